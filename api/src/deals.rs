//! Deal lifecycle: creation under the per-agent cooldown, stage transitions
//! and checklist toggles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::OwnedMutexGuard;

use funnel_core::deals::{Agent, CREATION_COOLDOWN_SECS, ChecklistItem, Deal, remaining_cooldown};
use funnel_core::funnel::Funnel;

use crate::store::{DealStore, StoreError, ToggleOutcome};

#[derive(Debug, thiserror::Error)]
pub enum DealError {
    #[error("{field} must not be empty")]
    Validation { field: &'static str },
    #[error("deal {0} not found")]
    DealNotFound(i64),
    #[error("checklist item '{text}' not found on deal {deal_id}")]
    ItemNotFound { deal_id: i64, text: String },
    #[error("deal creation is limited to one per minute; retry in {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Enforces the minimum spacing between deal creations of one agent.
///
/// The check reads the agent's newest deal and compares its creation time to
/// now. Callers hold the per-agent guard from [`CreationLimiter::acquire`]
/// across the check and the insert, so two concurrent requests from one agent
/// cannot both pass.
pub struct CreationLimiter {
    window: TimeDelta,
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl CreationLimiter {
    pub fn new(window: TimeDelta) -> Self {
        Self {
            window,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Serialize creations for `agent_id`. Other agents are never blocked.
    pub async fn acquire(&self, agent_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Entries only the map references belong to idle agents.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(agent_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub fn check(
        &self,
        last_created_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), DealError> {
        match remaining_cooldown(last_created_at, now, self.window) {
            None => Ok(()),
            Some(remaining) => Err(DealError::RateLimited {
                retry_after: remaining.to_std().unwrap_or_default(),
            }),
        }
    }
}

impl Default for CreationLimiter {
    fn default() -> Self {
        Self::new(TimeDelta::seconds(CREATION_COOLDOWN_SECS))
    }
}

/// The funnel state machine over one store.
pub struct DealService {
    store: Arc<dyn DealStore>,
    funnel: Arc<Funnel>,
    limiter: CreationLimiter,
}

impl DealService {
    pub fn new(store: Arc<dyn DealStore>, funnel: Arc<Funnel>, limiter: CreationLimiter) -> Self {
        Self {
            store,
            funnel,
            limiter,
        }
    }

    pub fn funnel(&self) -> &Funnel {
        &self.funnel
    }

    /// Create a deal at the initial stage with a fresh copy of its checklist.
    pub async fn create_deal(&self, agent: &Agent, client_name: &str) -> Result<Deal, DealError> {
        let client_name = client_name.trim();
        if client_name.is_empty() {
            return Err(DealError::Validation {
                field: "clientName",
            });
        }

        let _guard = self.limiter.acquire(agent.id).await;
        let latest = self.store.latest_deal(agent.id).await?;
        let now = self.store.current_time().await?;
        if let Err(err) = self.limiter.check(latest.map(|deal| deal.created_at), now) {
            tracing::info!(agent_id = agent.id, "deal creation rejected by cooldown");
            return Err(err);
        }

        let stage = self.funnel.initial_stage();
        let checklist = self.funnel.checklist_for(&stage.name);
        let deal = self
            .store
            .insert_deal(agent.id, client_name, &stage.name, &checklist)
            .await?;

        tracing::info!(agent_id = agent.id, deal_id = deal.id, "deal created");
        Ok(deal)
    }

    pub async fn list_deals(&self, agent: &Agent) -> Result<Vec<Deal>, DealError> {
        Ok(self.store.list_deals(agent.id).await?)
    }

    /// Move a deal to `status`, resetting its checklist to that stage's
    /// template. Unknown stages are accepted and leave an empty checklist.
    pub async fn set_stage(
        &self,
        agent: &Agent,
        deal_id: i64,
        status: &str,
    ) -> Result<Deal, DealError> {
        let checklist = self.funnel.checklist_for(status);
        if self.funnel.stage(status).is_none() {
            tracing::warn!(
                agent_id = agent.id,
                deal_id,
                status,
                "stage is not part of the funnel; checklist cleared"
            );
        }

        let deal = self
            .store
            .update_stage(agent.id, deal_id, status, &checklist)
            .await?
            .ok_or(DealError::DealNotFound(deal_id))?;

        tracing::info!(agent_id = agent.id, deal_id, status, "deal stage changed");
        Ok(deal)
    }

    /// Flip the first checklist item labelled `text` and return the whole
    /// updated checklist.
    pub async fn toggle_checklist_item(
        &self,
        agent: &Agent,
        deal_id: i64,
        text: &str,
    ) -> Result<Vec<ChecklistItem>, DealError> {
        match self
            .store
            .toggle_checklist_item(agent.id, deal_id, text)
            .await?
        {
            ToggleOutcome::Toggled(checklist) => Ok(checklist),
            ToggleOutcome::DealMissing => Err(DealError::DealNotFound(deal_id)),
            ToggleOutcome::ItemMissing => Err(DealError::ItemNotFound {
                deal_id,
                text: text.to_string(),
            }),
        }
    }
}
