use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Minimum spacing between two deal creations by the same agent.
pub const CREATION_COOLDOWN_SECS: i64 = 60;

/// An agent provisioned through the bot's /start command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    /// Store-assigned surrogate id
    pub id: i64,
    /// Platform user id carried in launch credentials
    pub telegram_id: i64,
    pub full_name: Option<String>,
}

/// One required action within a deal's current stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChecklistItem {
    /// Label shown to the agent; also the key used to toggle the item
    pub text: String,
    pub completed: bool,
}

impl ChecklistItem {
    pub fn open(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            completed: false,
        }
    }
}

/// A sales opportunity owned by exactly one agent.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Deal {
    pub id: i64,
    #[serde(skip)]
    pub agent_id: i64,
    pub client_name: String,
    /// Current funnel stage name
    pub status: String,
    pub checklist: Vec<ChecklistItem>,
    /// Assigned by the store on insert, never changed
    pub created_at: DateTime<Utc>,
}

/// Body of POST /api/deals
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDealRequest {
    #[serde(rename = "clientName", alias = "client_name")]
    pub client_name: Option<String>,
}

/// Body of POST /api/deals/{id}/status
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: Option<String>,
}

/// Body of POST /api/deals/{id}/checklist
#[derive(Debug, Deserialize, ToSchema)]
pub struct ToggleChecklistRequest {
    pub text: Option<String>,
}

/// Flip the `completed` flag of the first item labelled `text`.
///
/// Labels are not guaranteed unique; only the first match in sequence order is
/// touched. Returns `false` when no item matches.
pub fn toggle_item(items: &mut [ChecklistItem], text: &str) -> bool {
    match items.iter_mut().find(|item| item.text == text) {
        Some(item) => {
            item.completed = !item.completed;
            true
        }
        None => false,
    }
}

/// How long the agent still has to wait before creating another deal.
///
/// `None` means creation may proceed. The window is exclusive: exactly
/// `window` elapsed is allowed.
pub fn remaining_cooldown(
    last_created_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: TimeDelta,
) -> Option<TimeDelta> {
    let last = last_created_at?;
    let elapsed = now - last;
    if elapsed >= window {
        return None;
    }
    // A creation timestamp ahead of our clock still only blocks for one window.
    Some((window - elapsed).min(window))
}
