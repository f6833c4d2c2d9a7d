use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;

use funnel_core::deals::{Agent, ChecklistItem, Deal, toggle_item};

use super::{DealStore, StoreError, ToggleOutcome};

const DEAL_COLUMNS: &str = "id, agent_id, client_name, status, checklist, created_at";

/// PostgreSQL-backed store sharing one pool between the bot and the API.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded migrations. Re-running against an up-to-date
    /// database is a no-op.
    pub async fn apply_schema(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../migrations").run(&self.pool).await
    }
}

/// Internal row type for sqlx mapping
#[derive(sqlx::FromRow)]
struct AgentRow {
    id: i64,
    telegram_id: i64,
    full_name: Option<String>,
}

impl From<AgentRow> for Agent {
    fn from(row: AgentRow) -> Self {
        Agent {
            id: row.id,
            telegram_id: row.telegram_id,
            full_name: row.full_name,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DealRow {
    id: i64,
    agent_id: i64,
    client_name: String,
    status: String,
    checklist: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl DealRow {
    fn into_deal(self) -> Result<Deal, StoreError> {
        let checklist = parse_checklist(self.id, self.checklist)?;
        Ok(Deal {
            id: self.id,
            agent_id: self.agent_id,
            client_name: self.client_name,
            status: self.status,
            checklist,
            created_at: self.created_at,
        })
    }
}

fn parse_checklist(
    deal_id: i64,
    raw: serde_json::Value,
) -> Result<Vec<ChecklistItem>, StoreError> {
    if raw.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(raw).map_err(|err| StoreError::CorruptChecklist {
        deal_id,
        reason: err.to_string(),
    })
}

#[async_trait]
impl DealStore for PgStore {
    async fn find_agent(&self, telegram_id: i64) -> Result<Option<Agent>, StoreError> {
        let row = sqlx::query_as::<_, AgentRow>(
            "SELECT id, telegram_id, full_name FROM agents WHERE telegram_id = $1",
        )
        .bind(telegram_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Agent::from))
    }

    async fn insert_agent(
        &self,
        telegram_id: i64,
        full_name: Option<&str>,
    ) -> Result<Agent, StoreError> {
        let row = sqlx::query_as::<_, AgentRow>(
            r#"
            INSERT INTO agents (telegram_id, full_name)
            VALUES ($1, $2)
            ON CONFLICT (telegram_id) DO NOTHING
            RETURNING id, telegram_id, full_name
            "#,
        )
        .bind(telegram_id)
        .bind(full_name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Agent::from)
            .ok_or(StoreError::DuplicateAgent(telegram_id))
    }

    async fn insert_deal(
        &self,
        agent_id: i64,
        client_name: &str,
        status: &str,
        checklist: &[ChecklistItem],
    ) -> Result<Deal, StoreError> {
        let row = sqlx::query_as::<_, DealRow>(&format!(
            "INSERT INTO deals (agent_id, client_name, status, checklist) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {DEAL_COLUMNS}"
        ))
        .bind(agent_id)
        .bind(client_name)
        .bind(status)
        .bind(Json(checklist))
        .fetch_one(&self.pool)
        .await?;
        row.into_deal()
    }

    async fn list_deals(&self, agent_id: i64) -> Result<Vec<Deal>, StoreError> {
        let rows = sqlx::query_as::<_, DealRow>(&format!(
            "SELECT {DEAL_COLUMNS} FROM deals \
             WHERE agent_id = $1 \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DealRow::into_deal).collect()
    }

    async fn find_deal(&self, agent_id: i64, deal_id: i64) -> Result<Option<Deal>, StoreError> {
        let row = sqlx::query_as::<_, DealRow>(&format!(
            "SELECT {DEAL_COLUMNS} FROM deals WHERE id = $1 AND agent_id = $2"
        ))
        .bind(deal_id)
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(DealRow::into_deal).transpose()
    }

    async fn latest_deal(&self, agent_id: i64) -> Result<Option<Deal>, StoreError> {
        let row = sqlx::query_as::<_, DealRow>(&format!(
            "SELECT {DEAL_COLUMNS} FROM deals \
             WHERE agent_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT 1"
        ))
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(DealRow::into_deal).transpose()
    }

    async fn current_time(&self) -> Result<chrono::DateTime<chrono::Utc>, StoreError> {
        Ok(sqlx::query_scalar("SELECT NOW()")
            .fetch_one(&self.pool)
            .await?)
    }

    async fn update_stage(
        &self,
        agent_id: i64,
        deal_id: i64,
        status: &str,
        checklist: &[ChecklistItem],
    ) -> Result<Option<Deal>, StoreError> {
        let row = sqlx::query_as::<_, DealRow>(&format!(
            "UPDATE deals SET status = $1, checklist = $2 \
             WHERE id = $3 AND agent_id = $4 \
             RETURNING {DEAL_COLUMNS}"
        ))
        .bind(status)
        .bind(Json(checklist))
        .bind(deal_id)
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(DealRow::into_deal).transpose()
    }

    async fn toggle_checklist_item(
        &self,
        agent_id: i64,
        deal_id: i64,
        text: &str,
    ) -> Result<ToggleOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Row lock keeps concurrent toggles on one deal from losing updates.
        let raw: Option<serde_json::Value> = sqlx::query_scalar(
            "SELECT checklist FROM deals WHERE id = $1 AND agent_id = $2 FOR UPDATE",
        )
        .bind(deal_id)
        .bind(agent_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(raw) = raw else {
            return Ok(ToggleOutcome::DealMissing);
        };
        let mut checklist = parse_checklist(deal_id, raw)?;
        if !toggle_item(&mut checklist, text) {
            return Ok(ToggleOutcome::ItemMissing);
        }

        sqlx::query("UPDATE deals SET checklist = $1 WHERE id = $2")
            .bind(Json(&checklist))
            .bind(deal_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(ToggleOutcome::Toggled(checklist))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}
