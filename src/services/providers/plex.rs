/// Plex Media Server collection adapter
///
/// API Flow:
/// 1. Sections: /library/sections → library title to section key and type
/// 2. Catalog: /library/sections/{key}/all?includeGuids=1 → ratingKey per `tmdb://` guid
/// 3. Collections: /library/sections/{key}/collections → collection ratingKey by title
/// 4. Members: /library/collections/{ck}/children in display order
/// 5. Replace: remove stale children, add missing items (or create the collection),
///    switch to custom sort and `move?after=` each item into place
use async_trait::async_trait;
use reqwest::{Client as HttpClient, Method, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize};
use std::collections::{HashMap, HashSet};

use crate::{
    error::{AppError, AppResult},
    models::{ExternalId, ItemHandle},
    services::providers::CollectionApi,
};

const TMDB_GUID_PREFIX: &str = "tmdb://";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "MediaContainer")]
    container: T,
}

#[derive(Debug, Deserialize)]
struct SectionList {
    #[serde(rename = "Directory", default)]
    directories: Vec<Section>,
}

#[derive(Debug, Clone, Deserialize)]
struct Section {
    key: String,
    title: String,
    #[serde(rename = "type")]
    kind: String,
}

impl Section {
    /// Plex metadata type used when creating a collection in this section
    fn item_type(&self) -> u8 {
        if self.kind == "show" {
            2
        } else {
            1
        }
    }
}

#[derive(Debug, Deserialize)]
struct MetadataList {
    #[serde(rename = "Metadata", default)]
    metadata: Vec<Metadata>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(rename = "ratingKey")]
    rating_key: String,
    #[serde(default)]
    title: String,
    #[serde(rename = "Guid", default)]
    guids: Vec<Guid>,
}

impl Metadata {
    fn tmdb_id(&self) -> Option<ExternalId> {
        self.guids
            .iter()
            .find_map(|g| g.id.strip_prefix(TMDB_GUID_PREFIX))
            .and_then(|raw| ExternalId::parse(raw).ok())
    }
}

#[derive(Debug, Deserialize)]
struct Guid {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Identity {
    #[serde(rename = "machineIdentifier")]
    machine_identifier: String,
}

#[derive(Clone)]
pub struct PlexClient {
    http_client: HttpClient,
    base_url: String,
    token: String,
}

impl PlexClient {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http_client
            .request(method, format!("{}{}", self.base_url, path))
            .header("X-Plex-Token", &self.token)
            .header("Accept", "application/json")
    }

    async fn send(&self, builder: RequestBuilder) -> AppResult<reqwest::Response> {
        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(AppError::from_response("plex", response).await);
        }
        Ok(response)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> AppResult<T> {
        let response = self.send(self.request(Method::GET, path).query(query)).await?;
        let envelope: Envelope<T> = response.json().await?;
        Ok(envelope.container)
    }

    async fn section(&self, library: &str) -> AppResult<Section> {
        let sections: SectionList = self.get("/library/sections", &[]).await?;
        sections
            .directories
            .into_iter()
            .find(|s| s.title.eq_ignore_ascii_case(library))
            .ok_or_else(|| AppError::NotFound(format!("Plex library '{}' not found", library)))
    }

    async fn find_collection(&self, section: &Section, collection: &str) -> AppResult<Option<String>> {
        let collections: MetadataList = self
            .get(&format!("/library/sections/{}/collections", section.key), &[])
            .await?;
        Ok(collections
            .metadata
            .into_iter()
            .find(|c| c.title.eq_ignore_ascii_case(collection))
            .map(|c| c.rating_key))
    }

    async fn children(&self, collection_key: &str) -> AppResult<Vec<ItemHandle>> {
        let children: MetadataList = self
            .get(&format!("/library/collections/{}/children", collection_key), &[])
            .await?;
        Ok(children
            .metadata
            .into_iter()
            .map(|m| ItemHandle(m.rating_key))
            .collect())
    }

    async fn items_uri(&self, handles: &[ItemHandle]) -> AppResult<String> {
        let identity: Identity = self.get("/identity", &[]).await?;
        let keys: Vec<&str> = handles.iter().map(|h| h.0.as_str()).collect();
        Ok(format!(
            "server://{}/com.plexapp.plugins.library/library/metadata/{}",
            identity.machine_identifier,
            keys.join(",")
        ))
    }

    async fn create_collection(
        &self,
        section: &Section,
        collection: &str,
        handles: &[ItemHandle],
    ) -> AppResult<String> {
        let uri = self.items_uri(handles).await?;
        let item_type = section.item_type().to_string();
        let created: MetadataList = {
            let response = self
                .send(self.request(Method::POST, "/library/collections").query(&[
                    ("type", item_type.as_str()),
                    ("title", collection),
                    ("smart", "0"),
                    ("sectionId", section.key.as_str()),
                    ("uri", uri.as_str()),
                ]))
                .await?;
            let envelope: Envelope<MetadataList> = response.json().await?;
            envelope.container
        };

        created
            .metadata
            .into_iter()
            .next()
            .map(|m| m.rating_key)
            .ok_or_else(|| AppError::ExternalApi(format!("Plex did not return collection '{}'", collection)))
    }

    async fn add_items(&self, collection_key: &str, handles: &[ItemHandle]) -> AppResult<()> {
        if handles.is_empty() {
            return Ok(());
        }
        let uri = self.items_uri(handles).await?;
        self.send(
            self.request(Method::PUT, &format!("/library/collections/{}/items", collection_key))
                .query(&[("uri", uri.as_str())]),
        )
        .await?;
        Ok(())
    }

    async fn remove_item(&self, collection_key: &str, handle: &ItemHandle) -> AppResult<()> {
        self.send(self.request(
            Method::DELETE,
            &format!("/library/collections/{}/children/{}", collection_key, handle),
        ))
        .await?;
        Ok(())
    }

    /// Puts the collection into custom sort and moves each item after its predecessor
    ///
    /// Ordering failures are logged only; membership is already correct at this point.
    async fn apply_order(&self, collection_key: &str, handles: &[ItemHandle]) {
        let sort = self
            .send(
                self.request(Method::PUT, &format!("/library/metadata/{}/prefs", collection_key))
                    .query(&[("collectionSort", "2")]),
            )
            .await;
        if let Err(e) = sort {
            tracing::warn!(collection_key, error = %e, "Failed to switch collection to custom sort");
        }

        let mut previous: Option<&ItemHandle> = None;
        for handle in handles {
            let path = format!("/library/collections/{}/items/{}/move", collection_key, handle);
            let mut builder = self.request(Method::PUT, &path);
            if let Some(after) = previous {
                builder = builder.query(&[("after", after.0.as_str())]);
            }
            if let Err(e) = self.send(builder).await {
                tracing::warn!(collection_key, item = %handle, error = %e, "Failed to move collection item");
            }
            previous = Some(handle);
        }
    }
}

#[async_trait]
impl CollectionApi for PlexClient {
    async fn catalog_index(&self, library: &str) -> AppResult<HashMap<ExternalId, ItemHandle>> {
        let section = self.section(library).await?;
        let items: MetadataList = self
            .get(
                &format!("/library/sections/{}/all", section.key),
                &[("includeGuids", "1")],
            )
            .await?;

        let total = items.metadata.len();
        let index: HashMap<ExternalId, ItemHandle> = items
            .metadata
            .into_iter()
            .filter_map(|m| m.tmdb_id().map(|id| (id, ItemHandle(m.rating_key))))
            .collect();

        tracing::info!(library, items = total, indexed = index.len(), "Loaded Plex catalog index");
        Ok(index)
    }

    async fn list_collection_members(
        &self,
        library: &str,
        collection: &str,
    ) -> AppResult<Vec<ItemHandle>> {
        let section = self.section(library).await?;
        match self.find_collection(&section, collection).await? {
            Some(key) => self.children(&key).await,
            None => Ok(Vec::new()),
        }
    }

    async fn replace_collection_members(
        &self,
        library: &str,
        collection: &str,
        handles: &[ItemHandle],
    ) -> AppResult<()> {
        let section = self.section(library).await?;

        let collection_key = match self.find_collection(&section, collection).await? {
            Some(key) => {
                let current = self.children(&key).await?;
                let desired: HashSet<&ItemHandle> = handles.iter().collect();
                let present: HashSet<&ItemHandle> = current.iter().collect();

                for stale in current.iter().filter(|h| !desired.contains(h)) {
                    self.remove_item(&key, stale).await?;
                }
                let missing: Vec<ItemHandle> = handles
                    .iter()
                    .filter(|h| !present.contains(h))
                    .cloned()
                    .collect();
                self.add_items(&key, &missing).await?;
                key
            }
            None => {
                if handles.is_empty() {
                    return Ok(());
                }
                let key = self.create_collection(&section, collection, handles).await?;
                tracing::info!(library, collection, collection_key = %key, "Created Plex collection");
                key
            }
        };

        self.apply_order(&collection_key, handles).await;
        Ok(())
    }
}
