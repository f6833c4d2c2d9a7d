//! Inbound message poller.
//!
//! Reacts to a single command: `/start` provisions the sender as an agent (if
//! new) and answers with a button that opens the deal WebApp. Everything else
//! is ignored.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use funnel_core::deals::Agent;

use crate::store::{DealStore, StoreError};
use crate::supervisor::Shutdown;

pub mod telegram;

pub use telegram::TelegramTransport;

/// Stored display names are capped to the column width.
const MAX_NAME_CHARS: usize = 150;
const DEFAULT_RETRY_PAUSE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<Sender>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sender {
    pub id: i64,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl Sender {
    pub fn full_name(&self) -> String {
        let name = match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        };
        name.chars().take(MAX_NAME_CHARS).collect()
    }
}

/// Inline button that opens the WebApp at `url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchButton {
    pub text: String,
    pub url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),
    #[error("Bot API error: {0}")]
    Api(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        // Request URLs embed the bot token.
        TransportError::Http(err.without_url())
    }
}

/// The messaging platform as seen by the poller.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Discard updates queued while the process was down.
    async fn clear_pending(&self) -> Result<(), TransportError>;
    /// Long-poll for updates with `update_id >= offset`.
    async fn poll(&self, offset: Option<i64>) -> Result<Vec<Update>, TransportError>;
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        button: Option<&LaunchButton>,
    ) -> Result<(), TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub struct Bot {
    transport: Arc<dyn MessageTransport>,
    store: Arc<dyn DealStore>,
    launch: LaunchButton,
    retry_pause: Duration,
}

impl Bot {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        store: Arc<dyn DealStore>,
        launch: LaunchButton,
    ) -> Self {
        Self {
            transport,
            store,
            launch,
            retry_pause: DEFAULT_RETRY_PAUSE,
        }
    }

    /// Fixed pause after a failed poll before polling again.
    #[cfg(test)]
    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    /// Poll until `shutdown` fires. Only a failure to clear the pending queue
    /// at startup ends the loop with an error.
    pub async fn run(self, mut shutdown: Shutdown) -> Result<(), TransportError> {
        self.transport.clear_pending().await?;
        tracing::info!("message poller started");

        let mut offset = None;
        loop {
            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = self.transport.poll(offset) => polled,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        offset = Some(update.update_id + 1);
                        let update_id = update.update_id;
                        if let Err(err) = self.handle_update(update).await {
                            tracing::warn!(update_id, error = %err, "failed to handle update");
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "polling for updates failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_pause) => {}
                    }
                }
            }
        }

        tracing::info!("message poller stopping");
        Ok(())
    }

    pub async fn handle_update(&self, update: Update) -> Result<(), BotError> {
        let Some(message) = update.message else {
            return Ok(());
        };
        let (Some(sender), Some(text)) = (&message.from, &message.text) else {
            return Ok(());
        };
        if !is_start_command(text) {
            return Ok(());
        }

        let (agent, created) = self.provision(sender).await?;
        let name = agent.full_name.clone().unwrap_or_else(|| sender.full_name());
        let greeting = if created {
            tracing::info!(agent_id = agent.id, telegram_id = sender.id, "agent registered");
            format!("👋 Hello, {name}!\n\nWelcome! You have been successfully registered.")
        } else {
            format!("👋 Welcome back, {name}!")
        };

        self.transport
            .send_message(message.chat.id, &greeting, Some(&self.launch))
            .await?;
        Ok(())
    }

    /// Find the sender's agent, creating it on first contact.
    async fn provision(&self, sender: &Sender) -> Result<(Agent, bool), StoreError> {
        if let Some(agent) = self.store.find_agent(sender.id).await? {
            return Ok((agent, false));
        }
        match self
            .store
            .insert_agent(sender.id, Some(&sender.full_name()))
            .await
        {
            Ok(agent) => Ok((agent, true)),
            // Another /start from the same sender won the insert.
            Err(StoreError::DuplicateAgent(id)) => self
                .store
                .find_agent(id)
                .await?
                .map(|agent| (agent, false))
                .ok_or(StoreError::DuplicateAgent(id)),
            Err(err) => Err(err),
        }
    }
}

/// `/start`, `/start@SomeBot` and `/start <payload>` all count.
pub fn is_start_command(text: &str) -> bool {
    let Some(command) = text.split_whitespace().next() else {
        return false;
    };
    command == "/start" || command.starts_with("/start@")
}
