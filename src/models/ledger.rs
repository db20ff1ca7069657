use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::{ExternalId, MediaKind, Suggestion};
use crate::error::AppError;

/// Lifecycle state of a ledger row
///
/// Rows only ever move from `Pending` to `Active`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Suggested but not yet available in the local catalog
    Pending,
    /// Available locally and carrying points
    Active,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Active => "active",
        }
    }
}

impl FromStr for EntryStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EntryStatus::Pending),
            "active" => Ok(EntryStatus::Active),
            other => Err(AppError::Internal(format!("Unknown entry status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownloadApproval {
    #[default]
    None,
    Pending,
}

impl DownloadApproval {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadApproval::None => "none",
            DownloadApproval::Pending => "pending",
        }
    }
}

impl FromStr for DownloadApproval {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(DownloadApproval::None),
            "pending" => Ok(DownloadApproval::Pending),
            other => Err(AppError::Internal(format!(
                "Unknown download approval '{}'",
                other
            ))),
        }
    }
}

/// One scored row of a ledger, keyed by its scope and `external_id`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub external_id: ExternalId,
    pub status: EntryStatus,
    pub points: u32,
    pub title: Option<String>,
    pub secondary_external_id: Option<String>,
    pub rating_average: Option<f64>,
    pub rating_count: Option<i64>,
    pub download_approval: DownloadApproval,
    pub sent_to_downloader_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Creates the row for a first sighting of `suggestion`
    pub fn from_suggestion(
        suggestion: &Suggestion,
        max_points: u32,
        approval_required: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let (status, points, download_approval) = if suggestion.in_local_catalog {
            (EntryStatus::Active, max_points, DownloadApproval::None)
        } else if approval_required {
            (EntryStatus::Pending, 0, DownloadApproval::Pending)
        } else {
            (EntryStatus::Pending, 0, DownloadApproval::None)
        };

        Self {
            external_id: suggestion.external_id.clone(),
            status,
            points,
            title: suggestion.title.clone(),
            secondary_external_id: suggestion.secondary_external_id.clone(),
            rating_average: suggestion.rating_average,
            rating_count: suggestion.rating_count,
            download_approval,
            sent_to_downloader_at: None,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == EntryStatus::Active
    }

    /// Fills fields from `suggestion` without erasing anything already present
    pub fn merge_fields(&mut self, suggestion: &Suggestion) {
        if suggestion.title.is_some() {
            self.title = suggestion.title.clone();
        }
        if suggestion.secondary_external_id.is_some() {
            self.secondary_external_id = suggestion.secondary_external_id.clone();
        }
        if suggestion.rating_average.is_some() {
            self.rating_average = suggestion.rating_average;
        }
        if suggestion.rating_count.is_some() {
            self.rating_count = suggestion.rating_count;
        }
    }

    /// Whether the row is waiting on a downloader dispatch
    pub fn awaits_dispatch(&self) -> bool {
        self.status == EntryStatus::Pending
            && self.download_approval == DownloadApproval::None
            && self.sent_to_downloader_at.is_none()
    }
}

/// Permanent suppression of an item for an owner and media kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RejectEntry {
    pub owner_id: String,
    pub media_kind: MediaKind,
    pub external_id: ExternalId,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fingerprint of the most recent reconciliation pass of a scope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PassMarker {
    pub fingerprint: String,
    pub applied_at: DateTime<Utc>,
}
