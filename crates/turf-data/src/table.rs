//! Header-plus-rows tables read from spreadsheets (via calamine) or CSV files.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use calamine::{open_workbook_auto, Data, Reader};

const WORKBOOK_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

static EMPTY_CELL: Cell = Cell::Empty;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Number(f64),
    Bool(bool),
    Text(String),
}

impl Cell {
    fn from_text(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            Self::Empty
        } else {
            Self::Text(trimmed.to_string())
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Binary presence of a cell: positive numbers, `true`, and yes-like text are present.
    ///
    /// Returns `None` for text that cannot be read as presence.
    #[must_use]
    pub fn presence(&self) -> Option<bool> {
        match self {
            Self::Empty => Some(false),
            Self::Number(value) => Some(turf_core::is_present(*value)),
            Self::Bool(value) => Some(*value),
            Self::Text(text) => {
                if let Ok(value) = text.parse::<f64>() {
                    return Some(turf_core::is_present(value));
                }
                match text.to_ascii_lowercase().as_str() {
                    "true" | "yes" | "y" | "x" => Some(true),
                    "false" | "no" | "n" => Some(false),
                    _ => None,
                }
            }
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Empty => None,
            Self::Text(text) => Some(text.clone()),
            Self::Bool(value) => Some(value.to_string()),
            Self::Number(value) => {
                if value.fract() == 0.0 {
                    Some(format!("{value:.0}"))
                } else {
                    Some(value.to_string())
                }
            }
        }
    }
}

impl From<&Data> for Cell {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: &Data) -> Self {
        match value {
            Data::Empty => Self::Empty,
            Data::Int(value) => Self::Number(*value as f64),
            Data::Float(value) => Self::Number(*value),
            Data::Bool(value) => Self::Bool(*value),
            Data::String(value) | Data::DateTimeIso(value) | Data::DurationIso(value) => {
                Self::from_text(value)
            }
            Data::DateTime(value) => Self::Text(value.to_string()),
            Data::Error(err) => Self::Text(format!("#ERROR: {err:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    /// # Errors
    /// Returns an error naming `source` when the column is missing.
    pub fn require_column(&self, name: &str, source: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| anyhow!("column `{name}` not found in {source}"))
    }

    /// Cell at `row`/`column`; short rows read as empty.
    #[must_use]
    pub fn cell(&self, row: usize, column: usize) -> &Cell {
        self.rows.get(row).and_then(|cells| cells.get(column)).unwrap_or(&EMPTY_CELL)
    }

    fn from_records(mut records: Vec<Vec<Cell>>) -> Result<Self> {
        if records.is_empty() {
            return Err(anyhow!("table has no header row"));
        }
        let header_cells = records.remove(0);
        let headers = header_cells
            .iter()
            .map(|cell| cell.as_text().unwrap_or_default())
            .collect::<Vec<_>>();
        Ok(Self { headers, rows: records })
    }
}

/// Read the first row as headers and the remaining rows as data.
///
/// Workbooks (`xlsx`, `xlsm`, `xlsb`, `xls`, `ods`) read `sheet`; CSV files ignore it.
///
/// # Errors
/// Returns an error when the file cannot be opened, the sheet is missing, or the
/// extension is not supported.
pub fn read_table(path: &Path, sheet: &str) -> Result<Table> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if extension == "csv" {
        read_csv_table(path)
    } else if WORKBOOK_EXTENSIONS.contains(&extension.as_str()) {
        read_workbook_table(path, sheet)
    } else {
        Err(anyhow!("unsupported data file extension for {}", path.display()))
    }
}

fn read_workbook_table(path: &Path, sheet: &str) -> Result<Table> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("failed to open workbook {}", path.display()))?;
    let range = workbook
        .worksheet_range(sheet)
        .with_context(|| format!("failed to read sheet `{sheet}` from {}", path.display()))?;

    let records: Vec<Vec<Cell>> =
        range.rows().map(|row| row.iter().map(Cell::from).collect()).collect();
    Table::from_records(records)
        .with_context(|| format!("sheet `{sheet}` in {} is empty", path.display()))
}

fn read_csv_table(path: &Path) -> Result<Table> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read CSV file {}", path.display()))?;
    let records: Vec<Vec<Cell>> = parse_csv(&body)
        .with_context(|| format!("failed to parse CSV file {}", path.display()))?
        .into_iter()
        .map(|record| record.iter().map(|field| Cell::from_text(field)).collect())
        .collect();
    Table::from_records(records).with_context(|| format!("CSV file {} is empty", path.display()))
}

/// Split CSV text into records, honouring double-quoted fields and `""` escapes.
///
/// # Errors
/// Returns an error when a quoted field is never closed.
pub fn parse_csv(body: &str) -> Result<Vec<Vec<String>>> {
    let body = body.strip_prefix('\u{feff}').unwrap_or(body);
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = body.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(ch),
            }
            continue;
        }

        match ch {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(ch),
        }
    }

    if in_quotes {
        return Err(anyhow!("unterminated quoted field"));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}
