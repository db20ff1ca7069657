//! In-memory collaborators shared by service tests

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{AppError, AppResult};
use crate::models::{ExternalId, ItemHandle};
use crate::services::providers::CollectionApi;

/// Collection API keeping catalogs and members in memory
#[derive(Default)]
pub struct FakeCollections {
    catalogs: Mutex<HashMap<String, HashMap<ExternalId, ItemHandle>>>,
    members: Mutex<HashMap<(String, String), Vec<ItemHandle>>>,
    broken_libraries: Mutex<HashSet<String>>,
    writes: AtomicUsize,
    conflict: bool,
}

impl FakeCollections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write is refused with a conflict
    pub fn conflicting() -> Self {
        Self {
            conflict: true,
            ..Default::default()
        }
    }

    /// Registers `ids` in `library` with handles `rk{id}`
    pub fn with_catalog(self, library: &str, ids: &[u64]) -> Self {
        let catalog = ids
            .iter()
            .map(|id| (ExternalId::from(*id), handle(*id)))
            .collect();
        self.catalogs
            .lock()
            .unwrap()
            .insert(library.to_string(), catalog);
        self
    }

    /// Catalog reads of `library` fail with a 503
    pub fn with_broken_library(self, library: &str) -> Self {
        self.broken_libraries
            .lock()
            .unwrap()
            .insert(library.to_string());
        self
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn members(&self, library: &str, collection: &str) -> Vec<ItemHandle> {
        self.members
            .lock()
            .unwrap()
            .get(&(library.to_string(), collection.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

pub fn handle(id: u64) -> ItemHandle {
    ItemHandle(format!("rk{}", id))
}

#[async_trait]
impl CollectionApi for FakeCollections {
    async fn catalog_index(&self, library: &str) -> AppResult<HashMap<ExternalId, ItemHandle>> {
        if self.broken_libraries.lock().unwrap().contains(library) {
            return Err(AppError::Upstream {
                service: "plex",
                status: 503,
                body: "library unavailable".to_string(),
            });
        }
        Ok(self
            .catalogs
            .lock()
            .unwrap()
            .get(library)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_collection_members(
        &self,
        library: &str,
        collection: &str,
    ) -> AppResult<Vec<ItemHandle>> {
        Ok(self.members(library, collection))
    }

    async fn replace_collection_members(
        &self,
        library: &str,
        collection: &str,
        handles: &[ItemHandle],
    ) -> AppResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.conflict {
            return Err(AppError::Conflict("collection is locked".to_string()));
        }
        self.members
            .lock()
            .unwrap()
            .insert((library.to_string(), collection.to_string()), handles.to_vec());
        Ok(())
    }
}
