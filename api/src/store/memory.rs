use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use funnel_core::deals::{Agent, ChecklistItem, Deal, toggle_item};

use super::{DealStore, StoreError, ToggleOutcome};

#[derive(Default)]
struct Tables {
    agents: Vec<Agent>,
    deals: Vec<Deal>,
}

/// In-process store for tests. Mirrors `PgStore` semantics, including
/// newest-first ordering and owner scoping.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
    clock_skew_ms: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Shift a deal's creation time into the past.
    pub fn backdate_deal(&self, deal_id: i64, by: TimeDelta) {
        let mut tables = self.tables.lock().unwrap();
        if let Some(deal) = tables.deals.iter_mut().find(|deal| deal.id == deal_id) {
            deal.created_at -= by;
        }
    }

    /// Run the store's clock `skew` ahead of (or behind) the process clock.
    pub fn set_clock_skew(&self, skew: TimeDelta) {
        self.clock_skew_ms.store(skew.num_milliseconds(), Ordering::SeqCst);
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now() + TimeDelta::milliseconds(self.clock_skew_ms.load(Ordering::SeqCst))
    }

    pub fn deal_count(&self) -> usize {
        self.tables.lock().unwrap().deals.len()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl DealStore for MemoryStore {
    async fn find_agent(&self, telegram_id: i64) -> Result<Option<Agent>, StoreError> {
        self.check()?;
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .agents
            .iter()
            .find(|agent| agent.telegram_id == telegram_id)
            .cloned())
    }

    async fn insert_agent(
        &self,
        telegram_id: i64,
        full_name: Option<&str>,
    ) -> Result<Agent, StoreError> {
        self.check()?;
        let mut tables = self.tables.lock().unwrap();
        if tables.agents.iter().any(|agent| agent.telegram_id == telegram_id) {
            return Err(StoreError::DuplicateAgent(telegram_id));
        }
        let agent = Agent {
            id: tables.agents.len() as i64 + 1,
            telegram_id,
            full_name: full_name.map(str::to_string),
        };
        tables.agents.push(agent.clone());
        Ok(agent)
    }

    async fn insert_deal(
        &self,
        agent_id: i64,
        client_name: &str,
        status: &str,
        checklist: &[ChecklistItem],
    ) -> Result<Deal, StoreError> {
        self.check()?;
        let mut tables = self.tables.lock().unwrap();
        let deal = Deal {
            id: tables.deals.len() as i64 + 1,
            agent_id,
            client_name: client_name.to_string(),
            status: status.to_string(),
            checklist: checklist.to_vec(),
            created_at: self.now(),
        };
        tables.deals.push(deal.clone());
        Ok(deal)
    }

    async fn list_deals(&self, agent_id: i64) -> Result<Vec<Deal>, StoreError> {
        self.check()?;
        let tables = self.tables.lock().unwrap();
        let mut deals: Vec<Deal> = tables
            .deals
            .iter()
            .filter(|deal| deal.agent_id == agent_id)
            .cloned()
            .collect();
        deals.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(deals)
    }

    async fn find_deal(&self, agent_id: i64, deal_id: i64) -> Result<Option<Deal>, StoreError> {
        self.check()?;
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .deals
            .iter()
            .find(|deal| deal.id == deal_id && deal.agent_id == agent_id)
            .cloned())
    }

    async fn latest_deal(&self, agent_id: i64) -> Result<Option<Deal>, StoreError> {
        Ok(self.list_deals(agent_id).await?.into_iter().next())
    }

    async fn current_time(&self) -> Result<DateTime<Utc>, StoreError> {
        self.check()?;
        Ok(self.now())
    }

    async fn update_stage(
        &self,
        agent_id: i64,
        deal_id: i64,
        status: &str,
        checklist: &[ChecklistItem],
    ) -> Result<Option<Deal>, StoreError> {
        self.check()?;
        let mut tables = self.tables.lock().unwrap();
        let Some(deal) = tables
            .deals
            .iter_mut()
            .find(|deal| deal.id == deal_id && deal.agent_id == agent_id)
        else {
            return Ok(None);
        };
        deal.status = status.to_string();
        deal.checklist = checklist.to_vec();
        Ok(Some(deal.clone()))
    }

    async fn toggle_checklist_item(
        &self,
        agent_id: i64,
        deal_id: i64,
        text: &str,
    ) -> Result<ToggleOutcome, StoreError> {
        self.check()?;
        let mut tables = self.tables.lock().unwrap();
        let Some(deal) = tables
            .deals
            .iter_mut()
            .find(|deal| deal.id == deal_id && deal.agent_id == agent_id)
        else {
            return Ok(ToggleOutcome::DealMissing);
        };
        if !toggle_item(&mut deal.checklist, text) {
            return Ok(ToggleOutcome::ItemMissing);
        }
        Ok(ToggleOutcome::Toggled(deal.checklist.clone()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}
