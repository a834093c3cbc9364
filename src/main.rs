use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use tracing::{error, info};

use basegrid::config::EngineConfig;
use basegrid::fileio::import_csv;
use basegrid::model::{Column, ColumnId, SortConfig, SortDirection};
use basegrid::navigation::{resolve_landing, Landing};
use basegrid::notice::NoticeBoard;
use basegrid::predicate::{parse_filter_expr, FilterPreference, LogicalOperator};
use basegrid::recents::Recents;
use basegrid::service::memory::MemoryService;
use basegrid::service::DataService;
use basegrid::session::TableSession;
use basegrid::store::{FileStore, KeyValueStore, MemoryStore};
use basegrid::util::pad_to_width;
use basegrid::{Error, Result};

#[derive(Debug, Default)]
struct Options {
    file_path: Option<PathBuf>,
    config_path: Option<PathBuf>,
    store_path: Option<PathBuf>,
    /// (expression, joined with `or`)
    filters: Vec<(String, bool)>,
    sorts: Vec<String>,
    hidden: Vec<String>,
    search: Option<String>,
    page_size: Option<usize>,
}

fn parse_args() -> Options {
    let args: Vec<String> = std::env::args().collect();
    let mut opts = Options::default();

    let mut i = 1;
    while i < args.len() {
        let arg = args[i].as_str();
        let takes_value = matches!(
            arg,
            "--filter" | "--or-filter" | "--sort" | "--search" | "--hide" | "--page-size" | "--config" | "--store"
        );
        if takes_value && i + 1 >= args.len() {
            eprintln!("Error: {} requires an argument", arg);
            std::process::exit(1);
        }

        match arg {
            "--filter" => opts.filters.push((args[i + 1].clone(), false)),
            "--or-filter" => opts.filters.push((args[i + 1].clone(), true)),
            "--sort" => opts.sorts.push(args[i + 1].clone()),
            "--hide" => opts.hidden.push(args[i + 1].clone()),
            "--search" => opts.search = Some(args[i + 1].clone()),
            "--config" => opts.config_path = Some(PathBuf::from(&args[i + 1])),
            "--store" => opts.store_path = Some(PathBuf::from(&args[i + 1])),
            "--page-size" => match args[i + 1].parse() {
                Ok(n) if n > 0 => opts.page_size = Some(n),
                _ => {
                    eprintln!("Invalid page size: '{}'", args[i + 1]);
                    std::process::exit(1);
                }
            },
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            arg if arg.starts_with('-') => {
                eprintln!("Unknown option: {}", arg);
                std::process::exit(1);
            }
            _ => opts.file_path = Some(PathBuf::from(arg)),
        }
        i += if takes_value { 2 } else { 1 };
    }

    opts
}

fn print_help() {
    eprintln!("basegrid - page through a CSV file as a filtered, sorted table view");
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    basegrid [OPTIONS] <FILE>");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    --filter <EXPR>      Keep rows matching EXPR, e.g. \"age > 30\" (joined with and)");
    eprintln!("    --or-filter <EXPR>   Like --filter, joined to the filters before it with or");
    eprintln!("    --sort <COL[:desc]>  Sort by a column; repeat for tie breakers");
    eprintln!("    --search <TEXT>      Only rows containing TEXT, matches reported on stderr");
    eprintln!("    --hide <COL>         Hide a column");
    eprintln!("    --page-size <N>      Rows per fetched page");
    eprintln!("    --config <FILE>      Engine settings (TOML)");
    eprintln!("    --store <FILE>       Remember recent bases and views in FILE (JSON)");
    eprintln!("    -h, --help           Print this help message");
    eprintln!();
    eprintln!("Filters are applied left to right without precedence: a OR b AND c is (a OR b) AND c.");
}

fn find_column<'a>(columns: &'a [Column], name: &str) -> Result<&'a Column> {
    columns
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name.trim()) || c.id.as_str() == name.trim())
        .ok_or_else(|| Error::validation("column", format!("no column named '{}'", name)))
}

fn build_filters(opts: &Options, columns: &[Column]) -> Result<Vec<FilterPreference>> {
    opts.filters
        .iter()
        .enumerate()
        .map(|(i, (expr, or))| {
            let (name, operator, value) =
                parse_filter_expr(expr).ok_or_else(|| Error::validation("filter", format!("can't parse '{}'", expr)))?;
            let column = find_column(columns, &name)?;
            let joined = if *or { LogicalOperator::Or } else { LogicalOperator::And };
            Ok(FilterPreference::new(column.id.clone(), operator, value)
                .with_order(i as u32)
                .joined_by(joined))
        })
        .collect()
}

fn build_sorts(opts: &Options, columns: &[Column]) -> Result<Vec<SortConfig>> {
    opts.sorts
        .iter()
        .map(|spec| {
            let (name, direction) = match spec.rsplit_once(':') {
                Some((name, dir)) if dir.eq_ignore_ascii_case("desc") => (name, SortDirection::Desc),
                Some((name, dir)) if dir.eq_ignore_ascii_case("asc") => (name, SortDirection::Asc),
                _ => (spec.as_str(), SortDirection::Asc),
            };
            Ok(SortConfig::new(find_column(columns, name)?.id.clone(), direction))
        })
        .collect()
}

fn print_rows(session: &TableSession, from: usize, widths: &[(ColumnId, usize)]) -> usize {
    let data = session.table_data();
    let data = data.borrow();
    let rows = data.rows.rows();
    for row in rows.iter().skip(from) {
        let line: Vec<String> = widths
            .iter()
            .map(|(id, w)| pad_to_width(&row.cell(id).map(|c| c.render()).unwrap_or_default(), *w))
            .collect();
        println!("{}", line.join(" | ").trim_end());
    }
    rows.len()
}

async fn run(opts: Options) -> Result<()> {
    let Some(path) = opts.file_path.as_ref() else {
        print_help();
        return Err(Error::validation("file", "no input file"));
    };

    let mut config = match &opts.config_path {
        Some(p) => EngineConfig::from_file(p)?,
        None => EngineConfig::default(),
    };
    if let Some(n) = opts.page_size {
        config.page_size = n;
    }

    let service = Rc::new(MemoryService::new());
    let imported = import_csv(&service, path)?;
    for warning in &imported.warnings {
        eprintln!("{}", warning);
    }

    let store: Rc<dyn KeyValueStore> = match &opts.store_path {
        Some(p) => Rc::new(FileStore::open(p)?),
        None => Rc::new(MemoryStore::new()),
    };
    let recents = Recents::new(store, config.recent_bases_cap);
    let notices = NoticeBoard::new();

    let dyn_service: Rc<dyn DataService> = service.clone();
    let (base_id, table, view) = match resolve_landing(dyn_service.as_ref(), &recents, &imported.base_id).await {
        Landing::Table { base_id, table, view } => (base_id, table, view),
        Landing::Home => return Err(Error::Import("nothing to show for the imported file".to_string())),
    };

    let session = TableSession::open(dyn_service, notices.clone(), config.clone(), base_id, table, view.id).await?;
    let columns = session.manager().columns();

    session.update_filters(build_filters(&opts, &columns)?).await?;
    session.update_sorts(build_sorts(&opts, &columns)?).await?;
    let hidden = opts
        .hidden
        .iter()
        .map(|name| find_column(&columns, name).map(|c| c.id.clone()))
        .collect::<Result<Vec<_>>>()?;
    session.update_hidden_columns(hidden).await?;
    if let Some(query) = &opts.search {
        session.set_search(query).await?;
    }

    session.fit_columns();
    let layout = session.layout();
    let char_width = config.char_width.max(1) as usize;
    let visible = session.visible_columns();
    let widths: Vec<(ColumnId, usize)> = layout
        .slots()
        .iter()
        .map(|s| (s.column_id.clone(), (s.width as usize / char_width).saturating_sub(2).max(1)))
        .collect();

    let header: Vec<String> = widths
        .iter()
        .map(|(id, w)| {
            let name = visible.iter().find(|c| &c.id == id).map(|c| c.name.as_str()).unwrap_or("");
            pad_to_width(name, *w)
        })
        .collect();
    println!("{}", header.join(" | ").trim_end());
    println!("{}", widths.iter().map(|(_, w)| "-".repeat(*w)).collect::<Vec<_>>().join("-+-"));

    let mut printed = print_rows(&session, 0, &widths);
    while session.pager().has_next_page() {
        if !session.pager().fetch_next_page().await? {
            break;
        }
        printed = print_rows(&session, printed, &widths);
    }

    if opts.search.is_some() {
        session.recompute_search();
        if let Some(status) = session.search_status() {
            eprintln!("{}", status);
        }
    }
    for notice in notices.drain() {
        eprintln!("{}", notice.message);
    }
    info!(rows = printed, "done");

    session.close();
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let opts = parse_args();
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(opts)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "basegrid failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
