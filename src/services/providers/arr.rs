//! Radarr / Sonarr downloader
//!
//! Both speak the same v3 API shape: look the item up by an external-id term,
//! report `Exists` when the lookup result already carries a library id (flipping
//! it back to monitored when needed), and otherwise post the lookup payload back with quality profile, root folder and
//! an immediate search enabled.

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    config::DownloaderSettings,
    error::{AppError, AppResult},
    models::{LedgerEntry, MediaKind},
    services::providers::{AddOutcome, Downloader},
};

#[derive(Clone)]
pub struct ArrClient {
    http_client: HttpClient,
    settings: DownloaderSettings,
    kind: MediaKind,
}

#[derive(Deserialize)]
struct RootFolder {
    path: String,
}

impl ArrClient {
    pub fn new(settings: DownloaderSettings, kind: MediaKind) -> Self {
        Self {
            http_client: HttpClient::new(),
            settings,
            kind,
        }
    }

    fn service(&self) -> &'static str {
        match self.kind {
            MediaKind::Movie => "radarr",
            MediaKind::Show => "sonarr",
        }
    }

    fn resource(&self) -> &'static str {
        match self.kind {
            MediaKind::Movie => "movie",
            MediaKind::Show => "series",
        }
    }

    /// Lookup term for an entry; shows need the TVDB id, falling back to the title
    fn lookup_term(&self, entry: &LedgerEntry) -> AppResult<String> {
        match self.kind {
            MediaKind::Movie => Ok(format!("tmdb:{}", entry.external_id)),
            MediaKind::Show => match (&entry.secondary_external_id, &entry.title) {
                (Some(tvdb), _) => Ok(format!("tvdb:{}", tvdb)),
                (None, Some(title)) => Ok(title.clone()),
                (None, None) => Err(AppError::InvalidInput(format!(
                    "Show {} has neither a TVDB id nor a title",
                    entry.external_id
                ))),
            },
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> AppResult<T> {
        let response = self
            .http_client
            .get(format!("{}/api/v3/{}", self.settings.url, path))
            .header("X-Api-Key", &self.settings.api_key)
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::from_response(self.service(), response).await);
        }
        Ok(response.json().await?)
    }

    async fn root_folder(&self) -> AppResult<String> {
        if let Some(root) = &self.settings.root_folder {
            return Ok(root.clone());
        }
        let folders: Vec<RootFolder> = self.get_json("rootfolder", &[]).await?;
        folders
            .into_iter()
            .next()
            .map(|f| f.path)
            .ok_or_else(|| AppError::ExternalApi(format!("{} has no root folder", self.service())))
    }

    fn add_payload(&self, mut lookup: Value, root_folder: String) -> AppResult<Value> {
        let fields = lookup
            .as_object_mut()
            .ok_or_else(|| AppError::ExternalApi(format!("Unexpected {} lookup payload", self.service())))?;

        fields.insert("qualityProfileId".into(), json!(self.settings.quality_profile_id));
        fields.insert("rootFolderPath".into(), json!(root_folder));
        fields.insert("monitored".into(), json!(true));
        match self.kind {
            MediaKind::Movie => {
                fields.insert("addOptions".into(), json!({ "searchForMovie": true }));
            }
            MediaKind::Show => {
                fields.insert("seasonFolder".into(), json!(true));
                fields.insert(
                    "addOptions".into(),
                    json!({ "monitor": "all", "searchForMissingEpisodes": true }),
                );
            }
        }
        Ok(lookup)
    }

    /// The tracked record with `monitored` switched on, `None` when it already is
    fn monitor_payload(&self, mut record: Value) -> Option<Value> {
        if record.get("monitored").and_then(Value::as_bool) == Some(true) {
            return None;
        }
        record
            .as_object_mut()?
            .insert("monitored".into(), json!(true));
        Some(record)
    }

    async fn set_monitored(&self, id: u64, record: &Value) -> AppResult<()> {
        let response = self
            .http_client
            .put(format!("{}/api/v3/{}/{}", self.settings.url, self.resource(), id))
            .header("X-Api-Key", &self.settings.api_key)
            .json(record)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::from_response(self.service(), response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl Downloader for ArrClient {
    async fn add_item(&self, entry: &LedgerEntry) -> AppResult<AddOutcome> {
        let term = self.lookup_term(entry)?;
        let results: Vec<Value> = self
            .get_json(&format!("{}/lookup", self.resource()), &[("term", term.as_str())])
            .await?;

        let lookup = results.into_iter().next().ok_or_else(|| {
            AppError::NotFound(format!("{} found nothing for '{}'", self.service(), term))
        })?;

        let tracked_id = lookup.get("id").and_then(Value::as_u64).unwrap_or(0);
        if tracked_id > 0 {
            if let Some(record) = self.monitor_payload(lookup) {
                self.set_monitored(tracked_id, &record).await?;
                tracing::info!(service = self.service(), term = %term, "Tracked item set back to monitored");
            } else {
                tracing::info!(service = self.service(), term = %term, "Item already tracked by downloader");
            }
            return Ok(AddOutcome::Exists);
        }

        let payload = self.add_payload(lookup, self.root_folder().await?)?;
        let response = self
            .http_client
            .post(format!("{}/api/v3/{}", self.settings.url, self.resource()))
            .header("X-Api-Key", &self.settings.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::from_response(self.service(), response).await);
        }

        tracing::info!(service = self.service(), term = %term, "Item added and search triggered");
        Ok(AddOutcome::Added)
    }
}
