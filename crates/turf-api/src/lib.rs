use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use turf_core::{build_sequence, reach, run_turf, RunResult, Selection, SequenceResult, TurfError};
use turf_data::{load_dataset, DataSource, Dataset, TurfConfig};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRequest {
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SequenceRequest {
    pub items: Vec<String>,
    #[serde(default)]
    pub forced_start: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReachRequest {
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SequenceResponse {
    pub selected_items: Vec<String>,
    pub forced_start: Option<String>,
    pub respondents: usize,
    pub empty_respondent_set: bool,
    pub steps: SequenceResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReachResponse {
    pub items: Vec<String>,
    pub reach: f64,
    pub respondents: usize,
    pub empty_respondent_set: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogResponse {
    pub items: Vec<String>,
    pub respondents: usize,
    pub source: DataSource,
}

/// Split a comma-separated item list, dropping blanks.
#[must_use]
pub fn parse_item_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Entry point shared by the HTTP service and the batch CLI over one loaded dataset.
#[derive(Debug, Clone)]
pub struct TurfApi {
    dataset: Arc<Dataset>,
}

impl TurfApi {
    #[must_use]
    pub fn new(dataset: Dataset) -> Self {
        Self { dataset: Arc::new(dataset) }
    }

    /// Load the dataset described by `config`.
    ///
    /// # Errors
    /// Returns an error when the respondent table cannot be loaded.
    pub fn from_config(config: &TurfConfig) -> Result<Self> {
        Ok(Self::new(load_dataset(config)?))
    }

    #[must_use]
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    #[must_use]
    pub fn catalog(&self) -> CatalogResponse {
        CatalogResponse {
            items: self.dataset.catalog.items().to_vec(),
            respondents: self.dataset.matrix.respondent_count(),
            source: self.dataset.source.clone(),
        }
    }

    fn selection(&self, items: &[String]) -> Result<Selection, TurfError> {
        Selection::resolve(&self.dataset.catalog, items)
    }

    /// Optimal sequence plus one forced-start sequence per selected item.
    ///
    /// # Errors
    /// Returns [`TurfError::UnknownItem`] or [`TurfError::EmptySelection`] for an invalid
    /// selection.
    pub fn run(&self, request: &RunRequest) -> Result<RunResult, TurfError> {
        let selection = self.selection(&request.items)?;
        let run = run_turf(&self.dataset.matrix, &self.dataset.catalog, &selection)?;
        tracing::debug!(
            selected = run.selected_items.len(),
            final_reach = run.optimal.final_reach(),
            "computed TURF run"
        );
        Ok(run)
    }

    /// One sequence, optionally seeded with `forced_start`.
    ///
    /// # Errors
    /// Returns the selection errors of [`Self::run`] plus
    /// [`TurfError::ForcedStartNotInSelection`].
    pub fn sequence(&self, request: &SequenceRequest) -> Result<SequenceResponse, TurfError> {
        let selection = self.selection(&request.items)?;
        let steps = build_sequence(
            &self.dataset.matrix,
            &self.dataset.catalog,
            &selection,
            request.forced_start.as_deref(),
        )?;
        Ok(SequenceResponse {
            selected_items: selection.item_ids(&self.dataset.catalog)?,
            forced_start: request.forced_start.clone(),
            respondents: self.dataset.matrix.respondent_count(),
            empty_respondent_set: self.dataset.matrix.is_empty(),
            steps,
        })
    }

    /// Reach of the union of `items`; an empty list reaches nobody.
    ///
    /// # Errors
    /// Returns [`TurfError::UnknownItem`] for an identifier missing from the catalog.
    pub fn reach(&self, request: &ReachRequest) -> Result<ReachResponse, TurfError> {
        let indices = request
            .items
            .iter()
            .map(|item| {
                self.dataset
                    .catalog
                    .index_of(item)
                    .ok_or_else(|| TurfError::UnknownItem { item: item.clone() })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ReachResponse {
            items: request.items.clone(),
            reach: reach(&self.dataset.matrix, &indices)?,
            respondents: self.dataset.matrix.respondent_count(),
            empty_respondent_set: self.dataset.matrix.is_empty(),
        })
    }
}
