use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Formatter};

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const RULESET_VERSION: &str = "turf-greedy.v1";
pub const COMBINATION_SEPARATOR: &str = " + ";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum TurfError {
    #[error("unknown item: {item}")]
    UnknownItem { item: String },
    #[error("selection MUST contain at least one item")]
    EmptySelection,
    #[error("forced start {item} is not a member of the selection")]
    ForcedStartNotInSelection { item: String },
    #[error("duplicate catalog item: {item}")]
    DuplicateItem { item: String },
    #[error("respondent row {row} has {found} cells, expected {expected}")]
    RaggedRow { row: usize, expected: usize, found: usize },
    #[error("item index {index} is out of range for {item_count} items")]
    ItemIndexOutOfRange { index: usize, item_count: usize },
    #[error("catalog has {catalog_items} items but the respondent matrix has {matrix_items} columns")]
    CatalogMismatch { catalog_items: usize, matrix_items: usize },
    #[error("validation error: {0}")]
    Validation(String),
}

impl TurfError {
    /// Stable machine-readable name for the error kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownItem { .. } => "unknown_item",
            Self::EmptySelection => "empty_selection",
            Self::ForcedStartNotInSelection { .. } => "forced_start_not_in_selection",
            Self::DuplicateItem { .. } => "duplicate_item",
            Self::RaggedRow { .. } => "ragged_row",
            Self::ItemIndexOutOfRange { .. } => "item_index_out_of_range",
            Self::CatalogMismatch { .. } => "catalog_mismatch",
            Self::Validation(_) => "validation",
        }
    }
}

/// Ordered item identifiers with a fixed identifier <-> column mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemCatalog {
    items: Vec<String>,
    index: BTreeMap<String, usize>,
}

impl ItemCatalog {
    /// Build a catalog whose column order is the iteration order of `items`.
    ///
    /// # Errors
    /// Returns [`TurfError::DuplicateItem`] when an identifier repeats, and
    /// [`TurfError::Validation`] for blank identifiers or an empty catalog.
    pub fn new<I, S>(items: I) -> Result<Self, TurfError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordered = Vec::new();
        let mut index = BTreeMap::new();
        for item in items {
            let item = item.into();
            if item.trim().is_empty() {
                return Err(TurfError::Validation(
                    "catalog item identifiers MUST be non-empty".to_string(),
                ));
            }
            if index.insert(item.clone(), ordered.len()).is_some() {
                return Err(TurfError::DuplicateItem { item });
            }
            ordered.push(item);
        }

        if ordered.is_empty() {
            return Err(TurfError::Validation(
                "catalog MUST contain at least one item".to_string(),
            ));
        }

        Ok(Self { items: ordered, index })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn index_of(&self, item: &str) -> Option<usize> {
        self.index.get(item).copied()
    }

    #[must_use]
    pub fn item(&self, index: usize) -> Option<&str> {
        self.items.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn items(&self) -> &[String] {
        &self.items
    }

    fn require_item(&self, index: usize) -> Result<&str, TurfError> {
        self.item(index)
            .ok_or(TurfError::ItemIndexOutOfRange { index, item_count: self.items.len() })
    }
}

/// Binary respondent x item table, stored one column per item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RespondentMatrix {
    respondents: usize,
    columns: Vec<Vec<bool>>,
}

impl RespondentMatrix {
    /// Build a matrix from respondent rows of exactly `item_count` cells each.
    ///
    /// # Errors
    /// Returns [`TurfError::RaggedRow`] when a row width differs from `item_count`.
    pub fn from_rows<I>(item_count: usize, rows: I) -> Result<Self, TurfError>
    where
        I: IntoIterator<Item = Vec<bool>>,
    {
        let mut columns = vec![Vec::new(); item_count];
        let mut respondents = 0_usize;
        for (row, cells) in rows.into_iter().enumerate() {
            if cells.len() != item_count {
                return Err(TurfError::RaggedRow { row, expected: item_count, found: cells.len() });
            }
            for (column, present) in columns.iter_mut().zip(cells) {
                column.push(present);
            }
            respondents += 1;
        }

        Ok(Self { respondents, columns })
    }

    /// Build a matrix from numeric rows; a cell counts as present when it is `> 0`.
    ///
    /// # Errors
    /// Returns [`TurfError::RaggedRow`] when a row width differs from `item_count`.
    pub fn from_numeric_rows<I>(item_count: usize, rows: I) -> Result<Self, TurfError>
    where
        I: IntoIterator<Item = Vec<f64>>,
    {
        Self::from_rows(
            item_count,
            rows.into_iter().map(|row| row.into_iter().map(is_present).collect::<Vec<_>>()),
        )
    }

    /// Build a matrix from per-item columns of `respondents` cells each.
    ///
    /// # Errors
    /// Returns [`TurfError::Validation`] when a column length differs from `respondents`.
    pub fn from_columns(respondents: usize, columns: Vec<Vec<bool>>) -> Result<Self, TurfError> {
        for (index, column) in columns.iter().enumerate() {
            if column.len() != respondents {
                return Err(TurfError::Validation(format!(
                    "column {index} has {} cells, expected {respondents}",
                    column.len()
                )));
            }
        }
        Ok(Self { respondents, columns })
    }

    #[must_use]
    pub fn respondent_count(&self) -> usize {
        self.respondents
    }

    #[must_use]
    pub fn item_count(&self) -> usize {
        self.columns.len()
    }

    /// `true` when the matrix holds no respondents; every reach is then 0.0.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.respondents == 0
    }

    /// # Errors
    /// Returns [`TurfError::ItemIndexOutOfRange`] for an unknown column.
    pub fn column(&self, index: usize) -> Result<&[bool], TurfError> {
        self.columns
            .get(index)
            .map(Vec::as_slice)
            .ok_or(TurfError::ItemIndexOutOfRange { index, item_count: self.columns.len() })
    }

    #[must_use]
    pub fn is_present(&self, respondent: usize, item: usize) -> bool {
        self.columns
            .get(item)
            .and_then(|column| column.get(respondent))
            .copied()
            .unwrap_or(false)
    }
}

#[must_use]
pub fn is_present(value: f64) -> bool {
    value > 0.0
}

#[allow(clippy::cast_precision_loss)]
fn reach_fraction(covered: usize, respondents: usize) -> f64 {
    if respondents == 0 {
        return 0.0;
    }
    covered as f64 / respondents as f64
}

/// Fraction of respondents present in at least one of `item_indices`.
///
/// Duplicated indices never double count a respondent. An empty index list and an empty
/// respondent set both yield `0.0`.
///
/// # Errors
/// Returns [`TurfError::ItemIndexOutOfRange`] when an index has no matrix column.
pub fn reach(matrix: &RespondentMatrix, item_indices: &[usize]) -> Result<f64, TurfError> {
    let columns = item_indices
        .iter()
        .map(|&index| matrix.column(index))
        .collect::<Result<Vec<_>, _>>()?;
    if columns.is_empty() {
        return Ok(0.0);
    }

    let covered = (0..matrix.respondent_count())
        .filter(|&row| columns.iter().any(|column| column[row]))
        .count();
    Ok(reach_fraction(covered, matrix.respondent_count()))
}

/// Running union of the respondents reached by the items committed so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coverage {
    reached: Vec<bool>,
    covered: usize,
}

impl Coverage {
    #[must_use]
    pub fn new(respondents: usize) -> Self {
        Self { reached: vec![false; respondents], covered: 0 }
    }

    #[must_use]
    pub fn for_matrix(matrix: &RespondentMatrix) -> Self {
        Self::new(matrix.respondent_count())
    }

    #[must_use]
    pub fn covered_count(&self) -> usize {
        self.covered
    }

    #[must_use]
    pub fn reach(&self) -> f64 {
        reach_fraction(self.covered, self.reached.len())
    }

    /// Reach of the current union plus `column`, without committing it.
    #[must_use]
    pub fn reach_with(&self, column: &[bool]) -> f64 {
        let added = self
            .reached
            .iter()
            .zip(column)
            .filter(|(reached, present)| !**reached && **present)
            .count();
        reach_fraction(self.covered + added, self.reached.len())
    }

    pub fn absorb(&mut self, column: &[bool]) {
        for (reached, present) in self.reached.iter_mut().zip(column) {
            if *present && !*reached {
                *reached = true;
                self.covered += 1;
            }
        }
    }
}

/// A set of catalog columns chosen by the caller. Iteration follows catalog order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    indices: BTreeSet<usize>,
}

impl Selection {
    /// Resolve identifiers against `catalog`. Repeated identifiers collapse into one.
    ///
    /// # Errors
    /// Returns [`TurfError::UnknownItem`] for an identifier missing from the catalog and
    /// [`TurfError::EmptySelection`] when no identifiers are supplied.
    pub fn resolve<I, S>(catalog: &ItemCatalog, items: I) -> Result<Self, TurfError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut indices = BTreeSet::new();
        for item in items {
            let item = item.as_ref();
            let Some(index) = catalog.index_of(item) else {
                return Err(TurfError::UnknownItem { item: item.to_string() });
            };
            indices.insert(index);
        }

        if indices.is_empty() {
            return Err(TurfError::EmptySelection);
        }
        Ok(Self { indices })
    }

    /// # Errors
    /// Returns [`TurfError::ItemIndexOutOfRange`] for an index outside the catalog and
    /// [`TurfError::EmptySelection`] when `indices` is empty.
    pub fn from_indices<I>(catalog: &ItemCatalog, indices: I) -> Result<Self, TurfError>
    where
        I: IntoIterator<Item = usize>,
    {
        let mut resolved = BTreeSet::new();
        for index in indices {
            catalog.require_item(index)?;
            resolved.insert(index);
        }

        if resolved.is_empty() {
            return Err(TurfError::EmptySelection);
        }
        Ok(Self { indices: resolved })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.indices.contains(&index)
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().copied()
    }

    /// # Errors
    /// Returns [`TurfError::ItemIndexOutOfRange`] when the selection was built for a
    /// larger catalog.
    pub fn item_ids(&self, catalog: &ItemCatalog) -> Result<Vec<String>, TurfError> {
        self.indices().map(|index| catalog.require_item(index).map(str::to_string)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SequenceStep {
    pub step: usize,
    pub item_added: String,
    pub combination: Vec<String>,
    pub combination_label: String,
    pub cumulative_reach: f64,
    pub delta: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct SequenceResult {
    steps: Vec<SequenceStep>,
}

impl SequenceResult {
    #[must_use]
    pub fn steps(&self) -> &[SequenceStep] {
        &self.steps
    }

    #[must_use]
    pub fn into_steps(self) -> Vec<SequenceStep> {
        self.steps
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn first_item(&self) -> Option<&str> {
        self.steps.first().map(|step| step.item_added.as_str())
    }

    #[must_use]
    pub fn final_reach(&self) -> f64 {
        self.steps.last().map_or(0.0, |step| step.cumulative_reach)
    }
}

/// Forced-start sequences keyed by their starting item, in selection order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForcedSequences {
    entries: Vec<(String, SequenceResult)>,
}

impl ForcedSequences {
    #[must_use]
    pub fn get(&self, item: &str) -> Option<&SequenceResult> {
        self.entries.iter().find(|(start, _)| start == item).map(|(_, sequence)| sequence)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SequenceResult)> {
        self.entries.iter().map(|(start, sequence)| (start.as_str(), sequence))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, start: String, sequence: SequenceResult) {
        self.entries.push((start, sequence));
    }
}

impl Serialize for ForcedSequences {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(self.entries.iter().map(|(start, sequence)| (start, sequence)))
    }
}

impl<'de> Deserialize<'de> for ForcedSequences {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ForcedVisitor;

        impl<'de> Visitor<'de> for ForcedVisitor {
            type Value = ForcedSequences;

            fn expecting(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
                formatter.write_str("a map of starting item to sequence steps")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut forced = ForcedSequences::default();
                while let Some((start, sequence)) = access.next_entry::<String, SequenceResult>()? {
                    forced.push(start, sequence);
                }
                Ok(forced)
            }
        }

        deserializer.deserialize_map(ForcedVisitor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DeterminismMetadata {
    pub ruleset_version: String,
    pub tie_breakers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub selected_items: Vec<String>,
    pub respondents: usize,
    pub empty_respondent_set: bool,
    pub optimal: SequenceResult,
    pub forced: ForcedSequences,
    pub determinism: DeterminismMetadata,
}

#[must_use]
pub fn default_tie_breakers() -> Vec<String> {
    vec![
        "single_item_reach desc".to_string(),
        "reach_gain desc".to_string(),
        "catalog_index asc".to_string(),
    ]
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    position: usize,
    index: usize,
    trial_reach: f64,
    gain: f64,
}

fn ensure_aligned(matrix: &RespondentMatrix, catalog: &ItemCatalog) -> Result<(), TurfError> {
    if matrix.item_count() != catalog.len() {
        return Err(TurfError::CatalogMismatch {
            catalog_items: catalog.len(),
            matrix_items: matrix.item_count(),
        });
    }
    Ok(())
}

fn resolve_forced_start(
    catalog: &ItemCatalog,
    selection: &Selection,
    item: &str,
) -> Result<usize, TurfError> {
    let Some(index) = catalog.index_of(item) else {
        return Err(TurfError::UnknownItem { item: item.to_string() });
    };
    if !selection.contains(index) {
        return Err(TurfError::ForcedStartNotInSelection { item: item.to_string() });
    }
    Ok(index)
}

fn best_seed(matrix: &RespondentMatrix, candidates: &[usize]) -> Result<usize, TurfError> {
    let mut best: Option<(usize, f64)> = None;
    for &index in candidates {
        let single_reach = reach(matrix, &[index])?;
        if best.map_or(true, |(_, best_reach)| single_reach > best_reach) {
            best = Some((index, single_reach));
        }
    }
    best.map(|(index, _)| index).ok_or(TurfError::EmptySelection)
}

fn step_record(
    catalog: &ItemCatalog,
    chosen: &[usize],
    cumulative_reach: f64,
    delta: f64,
) -> Result<SequenceStep, TurfError> {
    let combination = chosen
        .iter()
        .map(|&index| catalog.require_item(index).map(str::to_string))
        .collect::<Result<Vec<_>, _>>()?;
    let item_added = combination.last().cloned().ok_or(TurfError::EmptySelection)?;
    Ok(SequenceStep {
        step: chosen.len(),
        item_added,
        combination_label: combination.join(COMBINATION_SEPARATOR),
        combination,
        cumulative_reach,
        delta,
    })
}

/// Greedily order `selection` so that each step adds the item with the largest reach gain.
///
/// With `forced_start`, the first step is that item instead of the best single item. Ties
/// resolve to the item with the lowest catalog index. Reach values match [`reach`] applied
/// to each step's combination exactly.
///
/// # Errors
/// Returns [`TurfError::CatalogMismatch`] when the matrix width differs from the catalog,
/// [`TurfError::UnknownItem`] for a forced start missing from the catalog, and
/// [`TurfError::ForcedStartNotInSelection`] when the forced start is not selected.
pub fn build_sequence(
    matrix: &RespondentMatrix,
    catalog: &ItemCatalog,
    selection: &Selection,
    forced_start: Option<&str>,
) -> Result<SequenceResult, TurfError> {
    ensure_aligned(matrix, catalog)?;
    let forced_index =
        forced_start.map(|item| resolve_forced_start(catalog, selection, item)).transpose()?;

    let mut remaining = selection.indices().collect::<Vec<_>>();
    let seed = match forced_index {
        Some(index) => index,
        None => best_seed(matrix, &remaining)?,
    };

    let mut coverage = Coverage::for_matrix(matrix);
    let seed_column = matrix.column(seed)?;
    let seed_reach = coverage.reach_with(seed_column);
    coverage.absorb(seed_column);
    remaining.retain(|&index| index != seed);

    let mut chosen = vec![seed];
    let mut steps = Vec::with_capacity(selection.len());
    steps.push(step_record(catalog, &chosen, seed_reach, seed_reach)?);

    while !remaining.is_empty() {
        let current_reach = coverage.reach();
        let mut best: Option<Candidate> = None;
        for (position, &index) in remaining.iter().enumerate() {
            let trial_reach = coverage.reach_with(matrix.column(index)?);
            let gain = trial_reach - current_reach;
            if best.map_or(true, |candidate| gain > candidate.gain) {
                best = Some(Candidate { position, index, trial_reach, gain });
            }
        }

        let Some(winner) = best else {
            break;
        };
        remaining.remove(winner.position);
        coverage.absorb(matrix.column(winner.index)?);
        chosen.push(winner.index);
        steps.push(step_record(catalog, &chosen, winner.trial_reach, winner.gain)?);
    }

    Ok(SequenceResult { steps })
}

/// Build the optimal sequence plus one forced-start sequence per selected item.
///
/// # Errors
/// Propagates any [`build_sequence`] error; no partial result is returned.
pub fn run_turf(
    matrix: &RespondentMatrix,
    catalog: &ItemCatalog,
    selection: &Selection,
) -> Result<RunResult, TurfError> {
    let optimal = build_sequence(matrix, catalog, selection, None)?;
    let selected_items = selection.item_ids(catalog)?;

    let mut forced = ForcedSequences::default();
    for item in &selected_items {
        let sequence = build_sequence(matrix, catalog, selection, Some(item))?;
        forced.push(item.clone(), sequence);
    }

    Ok(RunResult {
        selected_items,
        respondents: matrix.respondent_count(),
        empty_respondent_set: matrix.is_empty(),
        optimal,
        forced,
        determinism: DeterminismMetadata {
            ruleset_version: RULESET_VERSION.to_string(),
            tie_breakers: default_tie_breakers(),
        },
    })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const EPSILON: f64 = 1e-12;

    fn assert_reach(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < EPSILON, "expected reach {expected}, got {actual}");
    }

    fn abc_fixture() -> (ItemCatalog, RespondentMatrix) {
        let catalog = match ItemCatalog::new(["A", "B", "C"]) {
            Ok(catalog) => catalog,
            Err(err) => panic!("fixture catalog is invalid: {err}"),
        };
        let matrix = match RespondentMatrix::from_rows(
            3,
            vec![
                vec![true, false, false],
                vec![false, true, false],
                vec![true, true, false],
                vec![false, false, true],
            ],
        ) {
            Ok(matrix) => matrix,
            Err(err) => panic!("fixture matrix is invalid: {err}"),
        };
        (catalog, matrix)
    }

    fn labels(sequence: &SequenceResult) -> Vec<&str> {
        sequence.steps().iter().map(|step| step.item_added.as_str()).collect()
    }

    // Test IDs: TCORE-001
    #[test]
    fn single_item_reach_counts_present_respondents() -> Result<(), TurfError> {
        let (_, matrix) = abc_fixture();
        assert_reach(reach(&matrix, &[0])?, 0.5);
        assert_reach(reach(&matrix, &[1])?, 0.5);
        assert_reach(reach(&matrix, &[2])?, 0.25);
        Ok(())
    }

    // Test IDs: TCORE-002
    #[test]
    fn reach_is_a_union_not_a_sum() -> Result<(), TurfError> {
        let (_, matrix) = abc_fixture();
        assert_reach(reach(&matrix, &[0, 1])?, 0.75);
        assert_reach(reach(&matrix, &[0, 0, 1, 1])?, 0.75);
        assert_reach(reach(&matrix, &[0, 1, 2])?, 1.0);
        Ok(())
    }

    // Test IDs: TCORE-003
    #[test]
    fn reach_of_no_items_is_zero() -> Result<(), TurfError> {
        let (_, matrix) = abc_fixture();
        assert_reach(reach(&matrix, &[])?, 0.0);
        Ok(())
    }

    // Test IDs: TCORE-004
    #[test]
    fn reach_rejects_out_of_range_index() {
        let (_, matrix) = abc_fixture();
        assert_eq!(
            reach(&matrix, &[0, 3]),
            Err(TurfError::ItemIndexOutOfRange { index: 3, item_count: 3 })
        );
    }

    // Test IDs: TCORE-005
    #[test]
    fn numeric_rows_treat_positive_values_as_present() -> Result<(), TurfError> {
        let matrix = RespondentMatrix::from_numeric_rows(
            2,
            vec![vec![0.0, 2.0], vec![1.0, f64::NAN], vec![0.0, 0.0], vec![-1.0, 0.5]],
        )?;
        assert!(!matrix.is_present(0, 0));
        assert!(matrix.is_present(0, 1));
        assert!(matrix.is_present(1, 0));
        assert!(!matrix.is_present(1, 1));
        assert!(!matrix.is_present(3, 0));
        assert_reach(reach(&matrix, &[0])?, 0.25);
        assert_reach(reach(&matrix, &[1])?, 0.5);
        Ok(())
    }

    // Test IDs: TCORE-006
    #[test]
    fn ragged_rows_are_rejected() {
        let result = RespondentMatrix::from_rows(3, vec![vec![true, false, false], vec![true]]);
        assert_eq!(result, Err(TurfError::RaggedRow { row: 1, expected: 3, found: 1 }));
    }

    // Test IDs: TCORE-007
    #[test]
    fn columns_must_match_respondent_count() {
        let result = RespondentMatrix::from_columns(2, vec![vec![true, false], vec![true]]);
        assert!(matches!(result, Err(TurfError::Validation(_))));
    }

    // Test IDs: TCORE-008
    #[test]
    fn catalog_rejects_duplicates_and_blanks() {
        assert_eq!(
            ItemCatalog::new(["SKU_1", "SKU_2", "SKU_1"]),
            Err(TurfError::DuplicateItem { item: "SKU_1".to_string() })
        );
        assert!(matches!(ItemCatalog::new(["SKU_1", " "]), Err(TurfError::Validation(_))));
        assert!(matches!(ItemCatalog::new(Vec::<String>::new()), Err(TurfError::Validation(_))));
    }

    // Test IDs: TCORE-009
    #[test]
    fn catalog_maps_identifiers_both_ways() -> Result<(), TurfError> {
        let catalog = ItemCatalog::new(["SKU_1", "SKU_2", "SKU_10"])?;
        assert_eq!(catalog.index_of("SKU_10"), Some(2));
        assert_eq!(catalog.item(1), Some("SKU_2"));
        assert_eq!(catalog.index_of("SKU_3"), None);
        assert_eq!(catalog.item(3), None);
        Ok(())
    }

    // Test IDs: TCORE-010
    #[test]
    fn selection_dedups_and_follows_catalog_order() -> Result<(), TurfError> {
        let (catalog, _) = abc_fixture();
        let selection = Selection::resolve(&catalog, ["C", "A", "C"])?;
        assert_eq!(selection.len(), 2);
        assert_eq!(selection.item_ids(&catalog)?, vec!["A".to_string(), "C".to_string()]);
        Ok(())
    }

    // Test IDs: TCORE-011
    #[test]
    fn selection_reports_unknown_and_empty_input() {
        let (catalog, _) = abc_fixture();
        assert_eq!(
            Selection::resolve(&catalog, ["A", "Z"]),
            Err(TurfError::UnknownItem { item: "Z".to_string() })
        );
        assert_eq!(Selection::resolve(&catalog, Vec::<&str>::new()), Err(TurfError::EmptySelection));
        assert_eq!(Selection::from_indices(&catalog, Vec::<usize>::new()), Err(TurfError::EmptySelection));
        assert_eq!(
            Selection::from_indices(&catalog, [0, 7]),
            Err(TurfError::ItemIndexOutOfRange { index: 7, item_count: 3 })
        );
    }

    // Test IDs: TCORE-012
    #[test]
    fn optimal_sequence_matches_worked_example() -> Result<(), TurfError> {
        let (catalog, matrix) = abc_fixture();
        let selection = Selection::resolve(&catalog, ["A", "B", "C"])?;
        let sequence = build_sequence(&matrix, &catalog, &selection, None)?;

        assert_eq!(labels(&sequence), vec!["A", "B", "C"]);
        let expected = [(0.5, 0.5), (0.75, 0.25), (1.0, 0.25)];
        for (step, (cumulative, delta)) in sequence.steps().iter().zip(expected) {
            assert_reach(step.cumulative_reach, cumulative);
            assert_reach(step.delta, delta);
        }

        let last = &sequence.steps()[2];
        assert_eq!(last.step, 3);
        assert_eq!(last.combination, vec!["A".to_string(), "B".to_string(), "C".to_string()]);
        assert_eq!(last.combination_label, "A + B + C");
        Ok(())
    }

    // Test IDs: TCORE-013
    #[test]
    fn selection_order_does_not_change_tie_breaks() -> Result<(), TurfError> {
        let (catalog, matrix) = abc_fixture();
        let forward = Selection::resolve(&catalog, ["A", "B", "C"])?;
        let reversed = Selection::resolve(&catalog, ["C", "B", "A"])?;
        assert_eq!(
            build_sequence(&matrix, &catalog, &forward, None)?,
            build_sequence(&matrix, &catalog, &reversed, None)?
        );
        Ok(())
    }

    // Test IDs: TCORE-014
    #[test]
    fn forced_start_seeds_the_sequence() -> Result<(), TurfError> {
        let (catalog, matrix) = abc_fixture();
        let selection = Selection::resolve(&catalog, ["A", "B", "C"])?;
        let sequence = build_sequence(&matrix, &catalog, &selection, Some("C"))?;

        assert_eq!(labels(&sequence), vec!["C", "A", "B"]);
        assert_reach(sequence.steps()[0].cumulative_reach, 0.25);
        assert_reach(sequence.steps()[0].delta, 0.25);
        assert_reach(sequence.steps()[1].cumulative_reach, 0.75);
        assert_reach(sequence.steps()[1].delta, 0.5);
        assert_reach(sequence.steps()[2].cumulative_reach, 1.0);
        assert_reach(sequence.steps()[2].delta, 0.25);
        Ok(())
    }

    // Test IDs: TCORE-015
    #[test]
    fn forced_start_errors_are_reported_before_building() -> Result<(), TurfError> {
        let (catalog, matrix) = abc_fixture();
        let selection = Selection::resolve(&catalog, ["A", "B"])?;
        assert_eq!(
            build_sequence(&matrix, &catalog, &selection, Some("C")),
            Err(TurfError::ForcedStartNotInSelection { item: "C".to_string() })
        );
        assert_eq!(
            build_sequence(&matrix, &catalog, &selection, Some("D")),
            Err(TurfError::UnknownItem { item: "D".to_string() })
        );
        Ok(())
    }

    // Test IDs: TCORE-016
    #[test]
    fn mismatched_catalog_and_matrix_are_rejected() -> Result<(), TurfError> {
        let (_, matrix) = abc_fixture();
        let catalog = ItemCatalog::new(["A", "B"])?;
        let selection = Selection::resolve(&catalog, ["A"])?;
        assert_eq!(
            build_sequence(&matrix, &catalog, &selection, None),
            Err(TurfError::CatalogMismatch { catalog_items: 2, matrix_items: 3 })
        );
        Ok(())
    }

    // Test IDs: TCORE-017
    #[test]
    fn empty_respondent_set_yields_zero_reach_everywhere() -> Result<(), TurfError> {
        let catalog = ItemCatalog::new(["A", "B", "C"])?;
        let matrix = RespondentMatrix::from_rows(3, Vec::<Vec<bool>>::new())?;
        let selection = Selection::resolve(&catalog, ["C", "B", "A"])?;
        let run = run_turf(&matrix, &catalog, &selection)?;

        assert!(run.empty_respondent_set);
        assert_eq!(run.respondents, 0);
        assert_eq!(labels(&run.optimal), vec!["A", "B", "C"]);
        let all_sequences =
            std::iter::once(&run.optimal).chain(run.forced.iter().map(|(_, sequence)| sequence));
        for sequence in all_sequences {
            for step in sequence.steps() {
                assert_reach(step.cumulative_reach, 0.0);
                assert_reach(step.delta, 0.0);
            }
        }
        Ok(())
    }

    // Test IDs: TCORE-018
    #[test]
    fn single_item_selection_builds_one_step() -> Result<(), TurfError> {
        let (catalog, matrix) = abc_fixture();
        let selection = Selection::resolve(&catalog, ["B"])?;
        let run = run_turf(&matrix, &catalog, &selection)?;
        assert_eq!(run.optimal.len(), 1);
        assert_eq!(run.forced.len(), 1);
        assert_eq!(run.forced.get("B"), Some(&run.optimal));
        Ok(())
    }

    // Test IDs: TCORE-019
    #[test]
    fn run_result_has_one_optimal_and_one_forced_per_item() -> Result<(), TurfError> {
        let (catalog, matrix) = abc_fixture();
        let selection = Selection::resolve(&catalog, ["B", "C", "A"])?;
        let run = run_turf(&matrix, &catalog, &selection)?;

        assert_eq!(run.selected_items, vec!["A".to_string(), "B".to_string(), "C".to_string()]);
        assert!(!run.empty_respondent_set);
        assert_eq!(run.determinism.ruleset_version, RULESET_VERSION);
        assert_eq!(run.forced.iter().map(|(start, _)| start).collect::<Vec<_>>(), ["A", "B", "C"]);
        for (start, sequence) in run.forced.iter() {
            assert_eq!(sequence.first_item(), Some(start));
            assert_eq!(sequence.len(), 3);
        }
        Ok(())
    }

    // Test IDs: TCORE-020
    #[test]
    fn run_result_serializes_forced_map_in_selection_order() -> Result<(), serde_json::Error> {
        let catalog = match ItemCatalog::new(["SKU_2", "SKU_10", "SKU_1"]) {
            Ok(catalog) => catalog,
            Err(err) => panic!("catalog fixture failed: {err}"),
        };
        let matrix = match RespondentMatrix::from_rows(
            3,
            vec![vec![true, false, false], vec![false, true, true]],
        ) {
            Ok(matrix) => matrix,
            Err(err) => panic!("matrix fixture failed: {err}"),
        };
        let run = match Selection::resolve(&catalog, ["SKU_1", "SKU_10", "SKU_2"])
            .and_then(|selection| run_turf(&matrix, &catalog, &selection))
        {
            Ok(run) => run,
            Err(err) => panic!("run failed: {err}"),
        };

        let json = serde_json::to_string(&run)?;
        let sku_2 = json.find("\"SKU_2\":[").unwrap_or(usize::MAX);
        let sku_10 = json.find("\"SKU_10\":[").unwrap_or(usize::MAX);
        let sku_1 = json.find("\"SKU_1\":[").unwrap_or(usize::MAX);
        assert!(sku_2 < sku_10 && sku_10 < sku_1, "forced keys out of order: {json}");

        let decoded: RunResult = serde_json::from_str(&json)?;
        assert_eq!(decoded, run);
        Ok(())
    }

    // Test IDs: TCORE-021
    #[test]
    fn coverage_tracks_running_union() {
        let mut coverage = Coverage::new(4);
        assert_reach(coverage.reach_with(&[true, false, true, false]), 0.5);
        coverage.absorb(&[true, false, true, false]);
        assert_eq!(coverage.covered_count(), 2);
        assert_reach(coverage.reach_with(&[true, true, false, false]), 0.75);
        coverage.absorb(&[true, true, false, false]);
        assert_reach(coverage.reach(), 0.75);
        assert_reach(Coverage::new(0).reach_with(&[]), 0.0);
    }

    fn matrix_and_selection() -> impl Strategy<Value = (usize, Vec<Vec<bool>>, Vec<usize>)> {
        (1_usize..=6, 0_usize..=16).prop_flat_map(|(items, respondents)| {
            (
                Just(items),
                prop::collection::vec(prop::collection::vec(any::<bool>(), items), respondents),
                prop::sample::subsequence((0..items).collect::<Vec<_>>(), 1..=items),
            )
        })
    }

    fn fixture_from(
        items: usize,
        rows: Vec<Vec<bool>>,
        selected: Vec<usize>,
    ) -> (ItemCatalog, RespondentMatrix, Selection) {
        let catalog = match ItemCatalog::new((1..=items).map(|index| format!("SKU_{index}"))) {
            Ok(catalog) => catalog,
            Err(err) => panic!("generated catalog is invalid: {err}"),
        };
        let matrix = match RespondentMatrix::from_rows(items, rows) {
            Ok(matrix) => matrix,
            Err(err) => panic!("generated matrix is invalid: {err}"),
        };
        let selection = match Selection::from_indices(&catalog, selected) {
            Ok(selection) => selection,
            Err(err) => panic!("generated selection is invalid: {err}"),
        };
        (catalog, matrix, selection)
    }

    fn indices_of(catalog: &ItemCatalog, items: &[String]) -> Vec<usize> {
        items.iter().filter_map(|item| catalog.index_of(item)).collect()
    }

    proptest! {
        #[test]
        fn property_sequences_are_monotone_and_cover_the_selection((items, rows, selected) in matrix_and_selection()) {
            let (catalog, matrix, selection) = fixture_from(items, rows, selected);
            let run = match run_turf(&matrix, &catalog, &selection) {
                Ok(run) => run,
                Err(err) => panic!("run failed: {err}"),
            };
            let all_selected = selection.indices().collect::<Vec<_>>();
            let full_reach = match reach(&matrix, &all_selected) {
                Ok(value) => value,
                Err(err) => panic!("reach failed: {err}"),
            };

            let sequences =
                std::iter::once(&run.optimal).chain(run.forced.iter().map(|(_, sequence)| sequence));
            for sequence in sequences {
                prop_assert_eq!(sequence.len(), selection.len());
                let mut seen = sequence
                    .steps()
                    .iter()
                    .filter_map(|step| catalog.index_of(&step.item_added))
                    .collect::<Vec<_>>();
                seen.sort_unstable();
                prop_assert_eq!(&seen, &all_selected);

                let mut previous = 0.0_f64;
                for (position, step) in sequence.steps().iter().enumerate() {
                    prop_assert_eq!(step.step, position + 1);
                    prop_assert!(step.delta >= 0.0);
                    prop_assert!(step.cumulative_reach >= previous);
                    previous = step.cumulative_reach;
                }
                prop_assert_eq!(sequence.final_reach(), full_reach);
            }
        }

        #[test]
        fn property_cached_reach_matches_naive_reach((items, rows, selected) in matrix_and_selection()) {
            let (catalog, matrix, selection) = fixture_from(items, rows, selected);
            let sequence = match build_sequence(&matrix, &catalog, &selection, None) {
                Ok(sequence) => sequence,
                Err(err) => panic!("build failed: {err}"),
            };
            let mut previous = 0.0_f64;
            for step in sequence.steps() {
                let naive = match reach(&matrix, &indices_of(&catalog, &step.combination)) {
                    Ok(value) => value,
                    Err(err) => panic!("reach failed: {err}"),
                };
                prop_assert_eq!(step.cumulative_reach.to_bits(), naive.to_bits());
                prop_assert_eq!(step.delta.to_bits(), (naive - previous).to_bits());
                previous = naive;
            }
        }

        #[test]
        fn property_each_step_takes_the_first_best_gain((items, rows, selected) in matrix_and_selection()) {
            let (catalog, matrix, selection) = fixture_from(items, rows, selected);
            for start in selection.item_ids(&catalog).unwrap_or_default() {
                let sequence = match build_sequence(&matrix, &catalog, &selection, Some(&start)) {
                    Ok(sequence) => sequence,
                    Err(err) => panic!("build failed: {err}"),
                };
                prop_assert_eq!(sequence.first_item(), Some(start.as_str()));

                for window in sequence.steps().windows(2) {
                    let chosen = indices_of(&catalog, &window[0].combination);
                    let winner = catalog.index_of(&window[1].item_added).unwrap_or(usize::MAX);
                    let current = reach(&matrix, &chosen).unwrap_or(f64::NAN);
                    for candidate in selection.indices().filter(|index| !chosen.contains(index)) {
                        let mut trial = chosen.clone();
                        trial.push(candidate);
                        let gain = reach(&matrix, &trial).unwrap_or(f64::NAN) - current;
                        prop_assert!(gain <= window[1].delta);
                        if candidate < winner {
                            prop_assert!(gain < window[1].delta);
                        }
                    }
                }
            }
        }

        #[test]
        fn property_runs_are_deterministic((items, rows, selected) in matrix_and_selection()) {
            let (catalog, matrix, selection) = fixture_from(items, rows, selected);
            let first = run_turf(&matrix, &catalog, &selection);
            let second = run_turf(&matrix, &catalog, &selection);
            let (Ok(first), Ok(second)) = (first, second) else {
                panic!("run failed");
            };
            let first_json = serde_json::to_string(&first).unwrap_or_default();
            let second_json = serde_json::to_string(&second).unwrap_or_default();
            prop_assert!(!first_json.is_empty());
            prop_assert_eq!(first_json, second_json);
        }
    }
}
