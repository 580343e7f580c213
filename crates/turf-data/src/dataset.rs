use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use turf_core::{ItemCatalog, RespondentMatrix, TurfError};

use crate::config::TurfConfig;
use crate::table::{read_table, Cell, Table};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataSource {
    pub path: PathBuf,
    pub sheet: Option<String>,
    pub respondents: usize,
    pub skipped_blank_rows: usize,
}

/// Item catalog and respondent matrix loaded together; read-only once built.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub catalog: ItemCatalog,
    pub matrix: RespondentMatrix,
    pub source: DataSource,
}

impl Dataset {
    /// # Errors
    /// Returns [`TurfError::CatalogMismatch`] when the matrix width differs from the catalog.
    pub fn new(
        catalog: ItemCatalog,
        matrix: RespondentMatrix,
        source: DataSource,
    ) -> Result<Self, TurfError> {
        if catalog.len() != matrix.item_count() {
            return Err(TurfError::CatalogMismatch {
                catalog_items: catalog.len(),
                matrix_items: matrix.item_count(),
            });
        }
        Ok(Self { catalog, matrix, source })
    }

    /// Dataset built in code rather than read from a file.
    ///
    /// # Errors
    /// Returns [`TurfError::CatalogMismatch`] when the matrix width differs from the catalog.
    pub fn in_memory(catalog: ItemCatalog, matrix: RespondentMatrix) -> Result<Self, TurfError> {
        let source = DataSource {
            path: PathBuf::from("<memory>"),
            sheet: None,
            respondents: matrix.respondent_count(),
            skipped_blank_rows: 0,
        };
        Self::new(catalog, matrix, source)
    }
}

fn is_csv(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()).is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

fn describe_source(path: &Path, sheet: &str) -> String {
    if is_csv(path) {
        path.display().to_string()
    } else {
        format!("{} [sheet {sheet}]", path.display())
    }
}

/// Load the respondent table named by `config` into a [`Dataset`].
///
/// Rows whose every cell is empty are skipped: they do not count toward the respondent total
/// `R` used as the reach denominator, and their number is reported in
/// [`DataSource::skipped_blank_rows`]. A row with any non-empty cell is a respondent, and its
/// empty item cells read as absent.
///
/// # Errors
/// Returns an error when the table cannot be read, an item column is missing, or a cell
/// cannot be read as binary presence.
pub fn load_dataset(config: &TurfConfig) -> Result<Dataset> {
    let path = config.data_file.as_path();
    let source = describe_source(path, &config.respondent_sheet);
    let table = read_table(path, &config.respondent_sheet)?;
    let (catalog, matrix, skipped_blank_rows) =
        matrix_from_table(&table, &config.item_columns, config.id_column.as_deref(), &source)?;

    if matrix.is_empty() {
        tracing::warn!(
            source = %source,
            "respondent table has no data rows; every reach will be 0"
        );
    }
    tracing::info!(
        source = %source,
        respondents = matrix.respondent_count(),
        items = catalog.len(),
        skipped_blank_rows,
        "loaded respondent dataset"
    );

    let data_source = DataSource {
        path: path.to_path_buf(),
        sheet: (!is_csv(path)).then(|| config.respondent_sheet.clone()),
        respondents: matrix.respondent_count(),
        skipped_blank_rows,
    };
    Ok(Dataset::new(catalog, matrix, data_source)?)
}

/// Build the catalog and matrix from `table`, one matrix column per entry of `item_columns`.
///
/// Rows whose every cell is empty are skipped, excluded from the respondent count, and
/// returned as the third tuple element.
///
/// # Errors
/// Returns an error for an invalid item list, a missing column, or a non-binary cell.
pub fn matrix_from_table(
    table: &Table,
    item_columns: &[String],
    id_column: Option<&str>,
    source: &str,
) -> Result<(ItemCatalog, RespondentMatrix, usize)> {
    let catalog = ItemCatalog::new(item_columns.iter().cloned())
        .with_context(|| format!("invalid item columns for {source}"))?;
    let positions = item_columns
        .iter()
        .map(|column| table.require_column(column, source))
        .collect::<Result<Vec<_>>>()?;
    if let Some(id_column) = id_column {
        table.require_column(id_column, source)?;
    }

    let mut rows = Vec::with_capacity(table.rows.len());
    let mut skipped_blank_rows = 0_usize;
    for (row, cells) in table.rows.iter().enumerate() {
        if cells.iter().all(Cell::is_empty) {
            skipped_blank_rows += 1;
            continue;
        }

        let mut presence = Vec::with_capacity(positions.len());
        for (item, &column) in item_columns.iter().zip(&positions) {
            let cell = table.cell(row, column);
            let Some(present) = cell.presence() else {
                return Err(anyhow!(
                    "{source}: row {} column `{item}` is not a binary value: {cell:?}",
                    row + 2
                ));
            };
            presence.push(present);
        }
        rows.push(presence);
    }

    let matrix = RespondentMatrix::from_rows(item_columns.len(), rows)?;
    Ok((catalog, matrix, skipped_blank_rows))
}

/// Items flagged in the selection table named by `config`, in table order.
///
/// # Errors
/// Returns an error when the selection table cannot be read or lacks its columns.
pub fn load_selection(config: &TurfConfig) -> Result<Vec<String>> {
    let path = config.selection_file();
    let source = describe_source(path, &config.selection.sheet);
    let table = read_table(path, &config.selection.sheet)?;
    let selected = selection_from_table(
        &table,
        &config.selection.item_column,
        &config.selection.flag_column,
        &source,
    )?;
    tracing::info!(source = %source, selected = selected.len(), "loaded item selection");
    Ok(selected)
}

/// # Errors
/// Returns an error when a column is missing or a flagged row names no item.
pub fn selection_from_table(
    table: &Table,
    item_column: &str,
    flag_column: &str,
    source: &str,
) -> Result<Vec<String>> {
    let item_position = table.require_column(item_column, source)?;
    let flag_position = table.require_column(flag_column, source)?;

    let mut selected = Vec::new();
    for row in 0..table.rows.len() {
        if table.cell(row, flag_position).presence() != Some(true) {
            continue;
        }
        let Some(item) = table.cell(row, item_position).as_text() else {
            return Err(anyhow!("{source}: row {} is flagged but names no item", row + 2));
        };
        selected.push(item);
    }
    Ok(selected)
}
