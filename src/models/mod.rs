use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

use crate::error::{AppError, AppResult};

pub mod ledger;
pub mod report;
pub mod suggestion;

pub use ledger::{DownloadApproval, EntryStatus, LedgerEntry, PassMarker, RejectEntry};
pub use report::{
    DispatchStats, IngestReport, LedgerCounts, OrderSnapshot, ReconcileSummary, RefreshReport,
    RefreshStatus, SyncOutcome, SyncStatus,
};
pub use suggestion::{CatalogMatch, Suggestion, SuggestionBatch};

/// Primary external identifier of a ledger item (TMDb id for movies and shows)
///
/// Always non-empty and trimmed. Accepts either a JSON string or a JSON number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawExternalId", into = "String")]
pub struct ExternalId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawExternalId {
    Text(String),
    Number(u64),
}

impl ExternalId {
    /// Parses an identifier, rejecting empty or whitespace-only input
    pub fn parse(raw: impl AsRef<str>) -> AppResult<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(AppError::InvalidInput(
                "External id cannot be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<RawExternalId> for ExternalId {
    type Error = AppError;

    fn try_from(raw: RawExternalId) -> Result<Self, Self::Error> {
        match raw {
            RawExternalId::Text(s) => ExternalId::parse(s),
            RawExternalId::Number(n) => Ok(ExternalId::from(n)),
        }
    }
}

impl From<u64> for ExternalId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<ExternalId> for String {
    fn from(id: ExternalId) -> Self {
        id.0
    }
}

impl Display for ExternalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of an item inside the external collection system (a Plex ratingKey)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemHandle(pub String);

impl Display for ItemHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Show,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Show => "show",
        }
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "movie" | "movies" => Ok(MediaKind::Movie),
            "show" | "shows" | "tv" => Ok(MediaKind::Show),
            other => Err(AppError::InvalidInput(format!(
                "Unknown media kind '{}'",
                other
            ))),
        }
    }
}

/// Identifies one ledger: an owner's named collection for one media kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerScope {
    pub owner_id: String,
    pub collection: String,
    pub media_kind: MediaKind,
}

impl LedgerScope {
    pub fn new(
        owner_id: impl Into<String>,
        collection: impl Into<String>,
        media_kind: MediaKind,
    ) -> AppResult<Self> {
        let owner_id = owner_id.into().trim().to_string();
        let collection = collection.into().trim().to_string();
        if owner_id.is_empty() || collection.is_empty() {
            return Err(AppError::InvalidInput(
                "Owner and collection are required".to_string(),
            ));
        }
        Ok(Self {
            owner_id,
            collection,
            media_kind,
        })
    }
}

impl Display for LedgerScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.owner_id, self.collection, self.media_kind)
    }
}
