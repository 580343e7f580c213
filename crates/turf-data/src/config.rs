//! YAML configuration for locating respondent data and the selection table.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use turf_core::ItemCatalog;

pub const DEFAULT_RESPONDENT_SHEET: &str = "Turf";
pub const DEFAULT_SELECTION_SHEET: &str = "Simulador";
pub const DEFAULT_SELECTION_ITEM_COLUMN: &str = "SKU";
pub const DEFAULT_SELECTION_FLAG_COLUMN: &str = "Seleccion";
pub const DEFAULT_ITEM_COUNT: usize = 24;

#[must_use]
pub fn default_item_columns() -> Vec<String> {
    (1..=DEFAULT_ITEM_COUNT).map(|index| format!("SKU_{index}")).collect()
}

fn default_respondent_sheet() -> String {
    DEFAULT_RESPONDENT_SHEET.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TurfConfig {
    pub data_file: PathBuf,
    #[serde(default = "default_respondent_sheet")]
    pub respondent_sheet: String,
    #[serde(default)]
    pub id_column: Option<String>,
    #[serde(default = "default_item_columns")]
    pub item_columns: Vec<String>,
    #[serde(default)]
    pub selection: SelectionConfig,
}

/// Where the end user's item choices live: rows of `item_column` flagged by `flag_column`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SelectionConfig {
    pub file: Option<PathBuf>,
    pub sheet: String,
    pub item_column: String,
    pub flag_column: String,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            file: None,
            sheet: DEFAULT_SELECTION_SHEET.to_string(),
            item_column: DEFAULT_SELECTION_ITEM_COLUMN.to_string(),
            flag_column: DEFAULT_SELECTION_FLAG_COLUMN.to_string(),
        }
    }
}

impl TurfConfig {
    #[must_use]
    pub fn new(data_file: PathBuf) -> Self {
        Self {
            data_file,
            respondent_sheet: default_respondent_sheet(),
            id_column: None,
            item_columns: default_item_columns(),
            selection: SelectionConfig::default(),
        }
    }

    /// Read a YAML config file. Relative paths inside it resolve against its directory.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or parsed, or fails [`Self::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        let body = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Self = serde_yaml::from_str(&body)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;

        if let Some(base) = path.parent() {
            config.data_file = resolve_relative(base, &config.data_file);
            config.selection.file =
                config.selection.file.as_deref().map(|file| resolve_relative(base, file));
        }

        config.validate()?;
        tracing::debug!(
            config = %path.display(),
            items = config.item_columns.len(),
            "loaded config"
        );
        Ok(config)
    }

    /// Build the effective config from an optional YAML file plus command-line overrides.
    ///
    /// Without a config file, `data_file` is required and every other field takes its default.
    ///
    /// # Errors
    /// Returns an error when neither source names a data file, or the result is invalid.
    pub fn resolve(
        config_path: Option<&Path>,
        data_file: Option<&Path>,
        sheet: Option<&str>,
    ) -> Result<Self> {
        let mut config = match (config_path, data_file) {
            (Some(path), _) => Self::load(path)?,
            (None, Some(data_file)) => Self::new(data_file.to_path_buf()),
            (None, None) => return Err(anyhow!("either --config or --data-file is required")),
        };
        if let Some(data_file) = data_file {
            config.data_file = data_file.to_path_buf();
        }
        if let Some(sheet) = sheet {
            config.respondent_sheet = sheet.to_string();
        }
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns an error for an empty, blank, or duplicated item column list, or blank
    /// sheet/column names.
    pub fn validate(&self) -> Result<()> {
        ItemCatalog::new(self.item_columns.iter().cloned())
            .map_err(|err| anyhow!("invalid item_columns: {err}"))?;

        for (field, value) in [
            ("respondent_sheet", &self.respondent_sheet),
            ("selection.sheet", &self.selection.sheet),
            ("selection.item_column", &self.selection.item_column),
            ("selection.flag_column", &self.selection.flag_column),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("{field} MUST be non-empty"));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn selection_file(&self) -> &Path {
        self.selection.file.as_deref().unwrap_or(&self.data_file)
    }
}

fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
