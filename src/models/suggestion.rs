use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::ExternalId;

/// One freshly suggested item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Suggestion {
    pub external_id: ExternalId,
    #[serde(default)]
    pub secondary_external_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub rating_average: Option<f64>,
    #[serde(default)]
    pub rating_count: Option<i64>,
    #[serde(default)]
    pub in_local_catalog: bool,
}

impl Suggestion {
    /// Folds a later duplicate into this suggestion
    fn absorb(&mut self, later: Suggestion) {
        self.in_local_catalog |= later.in_local_catalog;
        if self.title.is_none() {
            self.title = later.title;
        }
        if self.secondary_external_id.is_none() {
            self.secondary_external_id = later.secondary_external_id;
        }
        if self.rating_average.is_none() {
            self.rating_average = later.rating_average;
        }
        if self.rating_count.is_none() {
            self.rating_count = later.rating_count;
        }
    }
}

/// A suggestion batch, deduplicated by external id
///
/// Order follows the first occurrence of each id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuggestionBatch {
    batch_id: Option<String>,
    items: Vec<Suggestion>,
}

impl SuggestionBatch {
    pub fn new(batch_id: Option<String>, suggestions: Vec<Suggestion>) -> Self {
        let mut index: HashMap<ExternalId, usize> = HashMap::new();
        let mut items: Vec<Suggestion> = Vec::with_capacity(suggestions.len());

        for suggestion in suggestions {
            match index.get(&suggestion.external_id) {
                Some(&pos) => items[pos].absorb(suggestion),
                None => {
                    index.insert(suggestion.external_id.clone(), items.len());
                    items.push(suggestion);
                }
            }
        }

        let batch_id = batch_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        Self { batch_id, items }
    }

    pub fn items(&self) -> &[Suggestion] {
        &self.items
    }

    /// Splits off candidates whose id is in `rejects`, returning them
    pub fn remove_rejected(&mut self, rejects: &HashSet<ExternalId>) -> Vec<Suggestion> {
        let (kept, rejected): (Vec<_>, Vec<_>) = std::mem::take(&mut self.items)
            .into_iter()
            .partition(|s| !rejects.contains(&s.external_id));
        self.items = kept;
        rejected
    }

    /// Stable identity of this batch for replay detection
    ///
    /// The caller-supplied batch id when present, otherwise a UUIDv5 over the sorted ids.
    pub fn fingerprint(&self) -> String {
        if let Some(id) = &self.batch_id {
            return id.clone();
        }
        let mut ids: Vec<&str> = self.items.iter().map(|s| s.external_id.as_str()).collect();
        ids.sort_unstable();
        Uuid::new_v5(&Uuid::NAMESPACE_OID, ids.join("\n").as_bytes()).to_string()
    }
}

/// Catalog matcher result for one title
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogMatch {
    pub external_id: ExternalId,
    pub secondary_external_id: Option<String>,
    pub title: Option<String>,
    pub rating_average: Option<f64>,
    pub rating_count: Option<i64>,
}

impl CatalogMatch {
    pub fn into_suggestion(self, in_local_catalog: bool) -> Suggestion {
        Suggestion {
            external_id: self.external_id,
            secondary_external_id: self.secondary_external_id,
            title: self.title,
            rating_average: self.rating_average,
            rating_count: self.rating_count,
            in_local_catalog,
        }
    }
}
