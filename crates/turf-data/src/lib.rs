//! Data collaborators around the TURF core: configuration, respondent/selection loading
//! from spreadsheets or CSV, and per-sequence CSV or workbook export.

mod config;
mod dataset;
mod export;
mod table;

pub use config::{
    default_item_columns, SelectionConfig, TurfConfig, DEFAULT_ITEM_COUNT,
    DEFAULT_RESPONDENT_SHEET, DEFAULT_SELECTION_FLAG_COLUMN, DEFAULT_SELECTION_ITEM_COLUMN,
    DEFAULT_SELECTION_SHEET,
};
pub use dataset::{
    load_dataset, load_selection, matrix_from_table, selection_from_table, DataSource, Dataset,
};
pub use export::{
    export_run, export_workbook, sequence_csv, sheet_name, workbook_sheet_name, ExportFileDigest,
    ExportManifest, WorkbookExport, WorkbookSheet, MANIFEST_FILE, MAX_WORKBOOK_SHEET_CHARS,
    OPTIMAL_SHEET, SHEET_COLUMNS, SHEET_HEADER, SHEET_PREFIX, WORKBOOK_FILE,
    WORKBOOK_OPTIMAL_SHEET, WORKBOOK_SHEET_PREFIX,
};
pub use table::{parse_csv, read_table, Cell, Table};
