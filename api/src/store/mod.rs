//! Persistence contract for agents and deals.
//!
//! Decouples the deal service, authentication and the bot from `PgStore`,
//! enabling unit tests with `MemoryStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use funnel_core::deals::{Agent, ChecklistItem, Deal};

#[cfg(test)]
pub mod memory;
pub mod postgres;

#[cfg(test)]
pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("agent with platform id {0} already exists")]
    DuplicateAgent(i64),
    #[error("stored checklist for deal {deal_id} is unreadable: {reason}")]
    CorruptChecklist { deal_id: i64, reason: String },
}

/// Result of flipping one checklist item inside the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Toggled(Vec<ChecklistItem>),
    /// No deal with that id is owned by the agent.
    DealMissing,
    /// The deal exists but has no item with that label.
    ItemMissing,
}

#[async_trait]
pub trait DealStore: Send + Sync {
    // --- Agents ---
    async fn find_agent(&self, telegram_id: i64) -> Result<Option<Agent>, StoreError>;
    /// Fails with `DuplicateAgent` if the platform id is already registered.
    async fn insert_agent(
        &self,
        telegram_id: i64,
        full_name: Option<&str>,
    ) -> Result<Agent, StoreError>;

    // --- Deals ---
    async fn insert_deal(
        &self,
        agent_id: i64,
        client_name: &str,
        status: &str,
        checklist: &[ChecklistItem],
    ) -> Result<Deal, StoreError>;
    /// Newest first.
    async fn list_deals(&self, agent_id: i64) -> Result<Vec<Deal>, StoreError>;
    async fn find_deal(&self, agent_id: i64, deal_id: i64) -> Result<Option<Deal>, StoreError>;
    async fn latest_deal(&self, agent_id: i64) -> Result<Option<Deal>, StoreError>;
    /// The clock that stamps `created_at`. Cooldowns are measured against it.
    async fn current_time(&self) -> Result<DateTime<Utc>, StoreError>;
    /// Replace stage and checklist together. `None` if the agent owns no such deal.
    async fn update_stage(
        &self,
        agent_id: i64,
        deal_id: i64,
        status: &str,
        checklist: &[ChecklistItem],
    ) -> Result<Option<Deal>, StoreError>;
    async fn toggle_checklist_item(
        &self,
        agent_id: i64,
        deal_id: i64,
        text: &str,
    ) -> Result<ToggleOutcome, StoreError>;

    // --- Health ---
    async fn ping(&self) -> Result<(), StoreError>;
}
