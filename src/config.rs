use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Colors used to mark sorted and searched columns
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    /// Indexed by sort priority; wraps around when there are more sorts than colors
    pub sort_colors: Vec<String>,
    pub search_color: String,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            sort_colors: vec![
                "#fde9c9".to_string(),
                "#fbd9d3".to_string(),
                "#e3f0e6".to_string(),
                "#e1e8f7".to_string(),
            ],
            search_color: "#fff3a3".to_string(),
        }
    }
}

impl HighlightConfig {
    pub fn sort_color(&self, priority: usize) -> String {
        match self.sort_colors.len() {
            0 => self.search_color.clone(),
            n => self.sort_colors[priority % n].clone(),
        }
    }
}

/// Engine settings; every field falls back to its default when absent
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rows per page request
    pub page_size: usize,
    /// How many recently viewed bases are remembered
    pub recent_bases_cap: usize,
    pub default_column_width: u32,
    pub min_column_width: u32,
    pub max_column_width: u32,
    /// Pixels per display column when fitting widths to content
    pub char_width: u32,
    pub highlight: HighlightConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            recent_bases_cap: 50,
            default_column_width: 180,
            min_column_width: 60,
            max_column_width: 480,
            char_width: 8,
            highlight: HighlightConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.page_size == 0 {
            return Err(Error::Config("page_size must be at least 1".to_string()));
        }
        if self.min_column_width > self.max_column_width {
            return Err(Error::Config(format!(
                "min_column_width ({}) exceeds max_column_width ({})",
                self.min_column_width, self.max_column_width
            )));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_fields_use_defaults() {
        let config = EngineConfig::from_toml("page_size = 25\n[highlight]\nsearch_color = \"yellow\"\n").unwrap();
        assert_eq!(config.page_size, 25);
        assert_eq!(config.recent_bases_cap, 50);
        assert_eq!(config.highlight.search_color, "yellow");
        assert_eq!(config.highlight.sort_colors.len(), 4);
    }

    #[test]
    fn rejects_inverted_width_bounds() {
        let err = EngineConfig::from_toml("min_column_width = 500\nmax_column_width = 100").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn reads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "char_width = 10").unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.char_width, 10);

        let missing = EngineConfig::from_file(Path::new("/nonexistent/basegrid.toml"));
        assert!(matches!(missing, Err(Error::Config(_))));
    }

    #[test]
    fn sort_colors_wrap() {
        let highlight = HighlightConfig::default();
        assert_eq!(highlight.sort_color(4), highlight.sort_color(0));
    }
}
