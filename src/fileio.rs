use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{BaseId, CellValue, ColumnId, ColumnType, TableId};
use crate::service::memory::MemoryService;

/// Non-empty cells looked at per column when guessing its type
const TYPE_SAMPLE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    Csv,
    Tsv,
}

impl FileFormat {
    fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "csv" => Some(FileFormat::Csv),
            "tsv" => Some(FileFormat::Tsv),
            _ => None,
        }
    }

    fn delimiter(&self) -> u8 {
        match self {
            FileFormat::Csv => b',',
            FileFormat::Tsv => b'\t',
        }
    }
}

/// Where an imported file landed, and anything that had to be adjusted
#[derive(Debug)]
pub struct ImportResult {
    pub base_id: BaseId,
    pub table_id: TableId,
    pub rows: usize,
    pub warnings: Vec<String>,
}

/// Number when at least half of the sampled non-empty values parse as numbers
pub fn infer_column_type<'a>(values: impl IntoIterator<Item = &'a str>) -> ColumnType {
    let (sampled, numeric) = values
        .into_iter()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .take(TYPE_SAMPLE)
        .fold((0usize, 0usize), |(n, num), v| (n + 1, num + usize::from(v.parse::<f64>().is_ok())));

    if sampled > 0 && numeric * 2 >= sampled {
        ColumnType::Number
    } else {
        ColumnType::Text
    }
}

/// Load a CSV or TSV file into a new base holding one table. The first
/// record is the header; unknown extensions are read as CSV.
pub fn import_csv(service: &MemoryService, path: &Path) -> Result<ImportResult> {
    let delim = FileFormat::from_extension(path).unwrap_or(FileFormat::Csv).delimiter();
    let file = File::open(path).map_err(|e| Error::Import(format!("{}: {}", path.display(), e)))?;
    let reader = BufReader::with_capacity(1 << 20, file);

    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delim)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::Fields)
        .from_reader(reader);

    let mut records: Vec<Vec<String>> = Vec::new();
    for result in csv_reader.records() {
        let record = result?;
        records.push(record.iter().map(|s| s.to_string()).collect());
    }

    let mut warnings = Vec::new();
    let mut records = records.into_iter();
    let mut header = records.next().ok_or_else(|| Error::Import(format!("{}: file is empty", path.display())))?;
    let body: Vec<Vec<String>> = records.collect();

    let width = body.iter().map(Vec::len).max().unwrap_or(0).max(header.len());
    if header.len() < width {
        warnings.push(format!("Named {} unlabeled column(s)", width - header.len()));
    }
    header.resize(width, String::new());
    let short = body.iter().filter(|r| r.len() < width).count();
    if short > 0 {
        warnings.push(format!("Padded {} short row(s) with empty cells", short));
    }

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("Imported");
    let base_id = service.add_base(name);
    let table_id = service.add_table(&base_id, name);

    let mut columns: Vec<(ColumnId, ColumnType)> = Vec::with_capacity(width);
    for (i, title) in header.iter().enumerate() {
        let title = if title.is_empty() { format!("Column {}", i + 1) } else { title.clone() };
        let column_type = infer_column_type(body.iter().filter_map(|r| r.get(i).map(String::as_str)));
        let id = service.add_column(&table_id, &format!("fld{:03}", i + 1), &title, column_type);
        debug!(column = %title, ?column_type, "column typed");
        columns.push((id, column_type));
    }

    let mut dropped = 0usize;
    for record in &body {
        let mut cells: HashMap<ColumnId, CellValue> = HashMap::new();
        for ((id, column_type), raw) in columns.iter().zip(record) {
            if raw.is_empty() {
                continue;
            }
            match CellValue::Text(raw.clone()).coerce(*column_type) {
                Some(value) => {
                    cells.insert(id.clone(), value);
                }
                None => dropped += 1,
            }
        }
        service.add_row_cells(&table_id, cells);
    }
    if dropped > 0 {
        warnings.push(format!("Dropped {} non-numeric value(s) from number columns", dropped));
    }

    info!(path = %path.display(), rows = body.len(), columns = width, "file imported");
    Ok(ImportResult { base_id, table_id, rows: body.len(), warnings })
}
