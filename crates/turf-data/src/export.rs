//! Result sinks: one CSV sheet per sequence plus a digest manifest, or one workbook with a
//! worksheet per sequence.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::Workbook;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use turf_core::{RunResult, SequenceResult};
use ulid::Ulid;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const SHEET_PREFIX: &str = "turf_incremental_";
pub const OPTIMAL_SHEET: &str = "turf_incremental_optimal";
pub const SHEET_HEADER: &str = "step,item_added,combination,cumulative_reach,delta";
pub const SHEET_COLUMNS: [&str; 5] =
    ["step", "item_added", "combination", "cumulative_reach", "delta"];

pub const WORKBOOK_FILE: &str = "turf_incremental.xlsx";
pub const WORKBOOK_SHEET_PREFIX: &str = "TURF_incremental_";
pub const WORKBOOK_OPTIMAL_SHEET: &str = "TURF_incremental_optimo";
/// Excel rejects worksheet names longer than this.
pub const MAX_WORKBOOK_SHEET_CHARS: usize = 31;

const OPTIMAL_LABEL: &str = "optimal";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportFileDigest {
    pub path: String,
    pub sequence: String,
    pub sha256: String,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportManifest {
    pub run_id: String,
    pub exported_at: String,
    pub respondents: usize,
    pub empty_respondent_set: bool,
    pub selected_items: Vec<String>,
    pub files: Vec<ExportFileDigest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkbookSheet {
    pub name: String,
    pub sequence: String,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkbookExport {
    pub run_id: String,
    pub exported_at: String,
    pub path: String,
    pub sha256: String,
    pub respondents: usize,
    pub empty_respondent_set: bool,
    pub selected_items: Vec<String>,
    pub sheets: Vec<WorkbookSheet>,
}

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Render one sequence as CSV rows under [`SHEET_HEADER`].
#[must_use]
pub fn sequence_csv(sequence: &SequenceResult) -> String {
    let mut body = String::from(SHEET_HEADER);
    body.push('\n');
    for step in sequence.steps() {
        let _ = writeln!(
            body,
            "{},{},{},{},{}",
            step.step,
            csv_escape(&step.item_added),
            csv_escape(&step.combination_label),
            step.cumulative_reach,
            step.delta
        );
    }
    body
}

/// File stem for a sequence sheet; characters outside `[A-Za-z0-9_-]` become `_`.
#[must_use]
pub fn sheet_name(item: &str) -> String {
    let sanitized = item
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' { ch } else { '_' })
        .collect::<String>();
    format!("{SHEET_PREFIX}{sanitized}")
}

fn unique_sheet_name(base: String, taken: &mut BTreeSet<String>) -> String {
    let mut candidate = base.clone();
    let mut suffix = 2_usize;
    while !taken.insert(candidate.clone()) {
        candidate = format!("{base}_{suffix}");
        suffix += 1;
    }
    candidate
}

/// Worksheet name for a forced sequence: Excel-forbidden characters become `_` and the name
/// is cut to [`MAX_WORKBOOK_SHEET_CHARS`].
#[must_use]
pub fn workbook_sheet_name(item: &str) -> String {
    let sanitized = item
        .chars()
        .map(|ch| match ch {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' | '\'' => '_',
            other => other,
        })
        .collect::<String>();
    format!("{WORKBOOK_SHEET_PREFIX}{sanitized}").chars().take(MAX_WORKBOOK_SHEET_CHARS).collect()
}

/// Excel compares worksheet names case-insensitively; suffixes stay within the length cap.
fn unique_workbook_sheet_name(base: &str, taken: &mut BTreeSet<String>) -> String {
    let mut candidate = base.to_string();
    let mut suffix = 2_usize;
    while !taken.insert(candidate.to_lowercase()) {
        let tag = format!("_{suffix}");
        let keep = MAX_WORKBOOK_SHEET_CHARS.saturating_sub(tag.chars().count());
        candidate = format!("{}{tag}", base.chars().take(keep).collect::<String>());
        suffix += 1;
    }
    candidate
}

/// The optimal sequence (`None`) followed by every forced sequence keyed by its start.
fn labelled_sequences(run: &RunResult) -> Vec<(Option<&str>, &SequenceResult)> {
    std::iter::once((None, &run.optimal))
        .chain(run.forced.iter().map(|(start, sequence)| (Some(start), sequence)))
        .collect()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn write_sheet(
    out_dir: &Path,
    file_name: &str,
    sequence: &SequenceResult,
) -> Result<(String, usize)> {
    let body = sequence_csv(sequence);
    let path = out_dir.join(file_name);
    fs::write(&path, body.as_bytes())
        .with_context(|| format!("failed to write export sheet {}", path.display()))?;
    Ok((sha256_hex(body.as_bytes()), sequence.len()))
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

/// Write every sequence of `run` to `out_dir` and record a manifest of file digests.
///
/// # Errors
/// Returns an error when the directory or any file cannot be written.
pub fn export_run(run: &RunResult, out_dir: &Path) -> Result<ExportManifest> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create export directory {}", out_dir.display()))?;

    let mut taken = BTreeSet::new();
    let mut files = Vec::with_capacity(run.forced.len() + 1);
    for (start, sequence) in labelled_sequences(run) {
        let base = start.map_or_else(|| OPTIMAL_SHEET.to_string(), sheet_name);
        let label = start.unwrap_or(OPTIMAL_LABEL);
        let file_name = format!("{}.csv", unique_sheet_name(base, &mut taken));
        let (sha256, rows) = write_sheet(out_dir, &file_name, sequence)?;
        tracing::debug!(file = %file_name, rows, "wrote export sheet");
        files.push(ExportFileDigest { path: file_name, sequence: label.to_string(), sha256, rows });
    }

    let manifest = ExportManifest {
        run_id: Ulid::new().to_string(),
        exported_at: now_rfc3339()?,
        respondents: run.respondents,
        empty_respondent_set: run.empty_respondent_set,
        selected_items: run.selected_items.clone(),
        files,
    };

    let manifest_path = out_dir.join(MANIFEST_FILE);
    let manifest_json =
        serde_json::to_vec_pretty(&manifest).context("failed to serialize export manifest")?;
    fs::write(&manifest_path, manifest_json).with_context(|| {
        format!("failed to write export manifest {}", manifest_path.display())
    })?;

    tracing::info!(
        out_dir = %out_dir.display(),
        run_id = %manifest.run_id,
        sheets = manifest.files.len(),
        "exported TURF run"
    );
    Ok(manifest)
}

fn write_workbook_sheet(
    workbook: &mut Workbook,
    name: &str,
    sequence: &SequenceResult,
) -> Result<()> {
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(name)?;
    for (column, header) in (0_u16..).zip(SHEET_COLUMNS) {
        worksheet.write_string(0, column, header)?;
    }
    for (row, step) in (1_u32..).zip(sequence.steps()) {
        let step_number = u32::try_from(step.step)
            .with_context(|| format!("step {} does not fit a worksheet row", step.step))?;
        worksheet.write_number(row, 0, f64::from(step_number))?;
        worksheet.write_string(row, 1, step.item_added.as_str())?;
        worksheet.write_string(row, 2, step.combination_label.as_str())?;
        worksheet.write_number(row, 3, step.cumulative_reach)?;
        worksheet.write_number(row, 4, step.delta)?;
    }
    Ok(())
}

/// Write `run` as one workbook: `TURF_incremental_optimo` plus a `TURF_incremental_<item>`
/// worksheet per forced sequence, each under the [`SHEET_COLUMNS`] header row.
///
/// # Errors
/// Returns an error when a worksheet cannot be built or the file cannot be written.
pub fn export_workbook(run: &RunResult, out_dir: &Path) -> Result<WorkbookExport> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create export directory {}", out_dir.display()))?;

    let mut workbook = Workbook::new();
    let mut taken = BTreeSet::new();
    let mut sheets = Vec::with_capacity(run.forced.len() + 1);
    for (start, sequence) in labelled_sequences(run) {
        let base = start.map_or_else(|| WORKBOOK_OPTIMAL_SHEET.to_string(), workbook_sheet_name);
        let label = start.unwrap_or(OPTIMAL_LABEL);
        let name = unique_workbook_sheet_name(&base, &mut taken);
        write_workbook_sheet(&mut workbook, &name, sequence)
            .with_context(|| format!("failed to build worksheet `{name}`"))?;
        sheets.push(WorkbookSheet { name, sequence: label.to_string(), rows: sequence.len() });
    }

    let bytes = workbook.save_to_buffer().context("failed to serialize export workbook")?;
    let path = out_dir.join(WORKBOOK_FILE);
    fs::write(&path, &bytes)
        .with_context(|| format!("failed to write export workbook {}", path.display()))?;

    let export = WorkbookExport {
        run_id: Ulid::new().to_string(),
        exported_at: now_rfc3339()?,
        path: WORKBOOK_FILE.to_string(),
        sha256: sha256_hex(&bytes),
        respondents: run.respondents,
        empty_respondent_set: run.empty_respondent_set,
        selected_items: run.selected_items.clone(),
        sheets,
    };
    tracing::info!(
        workbook = %path.display(),
        run_id = %export.run_id,
        sheets = export.sheets.len(),
        "exported TURF workbook"
    );
    Ok(export)
}

#[cfg(test)]
mod tests {
    use super::*;
    use turf_core::{run_turf, ItemCatalog, RespondentMatrix, Selection};

    fn fixture_run(items: &[&str]) -> RunResult {
        let catalog = match ItemCatalog::new(items.iter().copied()) {
            Ok(catalog) => catalog,
            Err(err) => panic!("fixture catalog failed: {err}"),
        };
        let rows = vec![
            (0..items.len()).map(|index| index % 2 == 0).collect::<Vec<_>>(),
            (0..items.len()).map(|index| index % 2 == 1).collect::<Vec<_>>(),
            (0..items.len()).map(|index| index == 0).collect::<Vec<_>>(),
            vec![false; items.len()],
        ];
        let matrix = match RespondentMatrix::from_rows(items.len(), rows) {
            Ok(matrix) => matrix,
            Err(err) => panic!("fixture matrix failed: {err}"),
        };
        let selection = match Selection::resolve(&catalog, items.iter().copied()) {
            Ok(selection) => selection,
            Err(err) => panic!("fixture selection failed: {err}"),
        };
        match run_turf(&matrix, &catalog, &selection) {
            Ok(run) => run,
            Err(err) => panic!("fixture run failed: {err}"),
        }
    }

    // Test IDs: TDATA-030
    #[test]
    fn sequence_csv_renders_one_row_per_step() {
        let run = fixture_run(&["A", "B"]);
        let body = sequence_csv(&run.optimal);
        assert_eq!(
            body,
            "step,item_added,combination,cumulative_reach,delta\n\
             1,A,A,0.5,0.5\n\
             2,B,A + B,0.75,0.25\n"
        );
    }

    // Test IDs: TDATA-031
    #[test]
    fn csv_escape_quotes_separators() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    // Test IDs: TDATA-032
    #[test]
    fn sheet_names_are_sanitized_and_unique() {
        let mut taken = BTreeSet::new();
        assert_eq!(sheet_name("SKU 1/x"), "turf_incremental_SKU_1_x");
        assert_eq!(unique_sheet_name(sheet_name("SKU 1"), &mut taken), "turf_incremental_SKU_1");
        assert_eq!(unique_sheet_name(sheet_name("SKU_1"), &mut taken), "turf_incremental_SKU_1_2");
    }

    // Test IDs: TDATA-033
    #[test]
    fn export_writes_sheets_and_manifest() -> Result<()> {
        let out_dir = std::env::temp_dir().join(format!("turf-export-{}", Ulid::new()));
        let run = fixture_run(&["SKU_1", "SKU_2", "SKU_3"]);
        let manifest = export_run(&run, &out_dir)?;

        let paths = manifest.files.iter().map(|file| file.path.as_str()).collect::<Vec<_>>();
        assert_eq!(
            paths,
            vec![
                "turf_incremental_optimal.csv",
                "turf_incremental_SKU_1.csv",
                "turf_incremental_SKU_2.csv",
                "turf_incremental_SKU_3.csv",
            ]
        );
        assert!(manifest.files.iter().all(|file| file.rows == 3 && file.sha256.len() == 64));
        assert_eq!(manifest.respondents, 4);

        let optimal = fs::read_to_string(out_dir.join("turf_incremental_optimal.csv"))?;
        assert_eq!(optimal, sequence_csv(&run.optimal));

        let written: ExportManifest =
            serde_json::from_slice(&fs::read(out_dir.join(MANIFEST_FILE))?)?;
        assert_eq!(written, manifest);

        let _ = fs::remove_dir_all(&out_dir);
        Ok(())
    }

    // Test IDs: TDATA-034
    #[test]
    fn workbook_sheet_names_fit_excel_limits() {
        assert_eq!(workbook_sheet_name("SKU_1"), "TURF_incremental_SKU_1");
        assert_eq!(workbook_sheet_name("a/b:c?"), "TURF_incremental_a_b_c_");

        let long = workbook_sheet_name("Chocolate Hazelnut Spread 400g");
        assert_eq!(long.chars().count(), MAX_WORKBOOK_SHEET_CHARS);
        assert_eq!(long, "TURF_incremental_Chocolate Haze");

        let mut taken = BTreeSet::new();
        assert_eq!(unique_workbook_sheet_name(&long, &mut taken), long);
        let second = unique_workbook_sheet_name(&long, &mut taken);
        assert_eq!(second, "TURF_incremental_Chocolate Ha_2");
        assert_eq!(second.chars().count(), MAX_WORKBOOK_SHEET_CHARS);
        assert_eq!(
            unique_workbook_sheet_name("TURF_incremental_sku_1", &mut taken),
            "TURF_incremental_sku_1"
        );
        assert_eq!(
            unique_workbook_sheet_name("TURF_incremental_SKU_1", &mut taken),
            "TURF_incremental_SKU_1_2"
        );
    }

    // Test IDs: TDATA-035
    #[test]
    fn export_workbook_writes_one_sheet_per_sequence() -> Result<()> {
        use crate::table::{read_table, Cell};

        let out_dir = std::env::temp_dir().join(format!("turf-workbook-{}", Ulid::new()));
        let run = fixture_run(&["SKU_1", "SKU_2"]);
        let export = export_workbook(&run, &out_dir)?;

        let names = export.sheets.iter().map(|sheet| sheet.name.as_str()).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec!["TURF_incremental_optimo", "TURF_incremental_SKU_1", "TURF_incremental_SKU_2"]
        );
        assert_eq!(export.sheets[0].sequence, "optimal");
        assert!(export.sheets.iter().all(|sheet| sheet.rows == 2));
        assert_eq!(export.path, WORKBOOK_FILE);
        assert_eq!(export.sha256.len(), 64);

        let path = out_dir.join(WORKBOOK_FILE);
        let optimal = read_table(&path, WORKBOOK_OPTIMAL_SHEET)?;
        assert_eq!(optimal.headers, SHEET_COLUMNS.map(str::to_string).to_vec());
        assert_eq!(optimal.rows.len(), 2);
        assert_eq!(optimal.cell(0, 0), &Cell::Number(1.0));
        assert_eq!(optimal.cell(0, 1), &Cell::Text("SKU_1".to_string()));
        assert_eq!(optimal.cell(1, 2), &Cell::Text("SKU_1 + SKU_2".to_string()));
        assert_eq!(optimal.cell(1, 3), &Cell::Number(0.75));
        assert_eq!(optimal.cell(1, 4), &Cell::Number(0.25));

        let forced = read_table(&path, "TURF_incremental_SKU_2")?;
        assert_eq!(forced.cell(0, 1), &Cell::Text("SKU_2".to_string()));

        let _ = fs::remove_dir_all(&out_dir);
        Ok(())
    }
}
