//! Collaborators the ledger services talk to
//!
//! Every external system sits behind one of these traits so the reconciler,
//! synchronizer and refresh logic can be exercised against fakes. The reqwest
//! adapters in the submodules are deliberately thin.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{
    error::AppResult,
    models::{CatalogMatch, ExternalId, ItemHandle, LedgerEntry, MediaKind},
};

pub mod arr;
pub mod plex;
pub mod tmdb;

pub use arr::ArrClient;
pub use plex::PlexClient;
pub use tmdb::{TmdbMatcher, TmdbRecommendations};

/// Produces free-text suggestion titles from a seed (e.g. a recently watched title)
#[async_trait]
pub trait RecommendationSource: Send + Sync {
    async fn generate(&self, seed: &str) -> AppResult<Vec<String>>;
}

/// Resolves a free-text title into catalog ids and rating signals
#[async_trait]
pub trait CatalogMatcher: Send + Sync {
    /// `Ok(None)` when nothing matches; errors are reserved for failed lookups
    async fn resolve(&self, title: &str, kind: MediaKind) -> AppResult<Option<CatalogMatch>>;
}

/// The external system hosting synchronized collections
#[async_trait]
pub trait CollectionApi: Send + Sync {
    /// Maps every item of `library` to its handle
    async fn catalog_index(&self, library: &str) -> AppResult<HashMap<ExternalId, ItemHandle>>;

    /// Current members of a collection in display order; empty when it does not exist
    async fn list_collection_members(
        &self,
        library: &str,
        collection: &str,
    ) -> AppResult<Vec<ItemHandle>>;

    /// Sets the collection to exactly `handles`, in order, creating it if needed
    async fn replace_collection_members(
        &self,
        library: &str,
        collection: &str,
        handles: &[ItemHandle],
    ) -> AppResult<()>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AddOutcome {
    Added,
    Exists,
}

/// Acquisition service for items missing from the local catalog
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn add_item(&self, entry: &LedgerEntry) -> AppResult<AddOutcome>;
}
