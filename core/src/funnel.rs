use serde::Serialize;
use utoipa::ToSchema;

use crate::deals::ChecklistItem;

pub const INITIAL_CONTACT: &str = "Первичный контакт";
pub const QUALIFICATION: &str = "Квалификация";
pub const PROPOSAL: &str = "Коммерческое предложение";
pub const CLOSING: &str = "Закрытие сделки";

/// One step of the funnel and the actions an agent must complete in it.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Stage {
    /// Stage name, also the value accepted by the status endpoint
    pub name: String,
    /// Checklist template, in display order
    pub checklist: Vec<String>,
}

impl Stage {
    pub fn new(name: impl Into<String>, checklist: &[&str]) -> Self {
        Self {
            name: name.into(),
            checklist: checklist.iter().map(|label| label.to_string()).collect(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FunnelError {
    #[error("funnel must contain at least one stage")]
    Empty,
    #[error("stage name must not be blank")]
    BlankStage,
    #[error("stage '{0}' is defined more than once")]
    DuplicateStage(String),
}

/// Ordered stage → checklist-template map.
///
/// Built once at startup and shared read-only. Every checklist handed out is a
/// fresh copy, so no two deals ever alias a template.
#[derive(Debug, Clone)]
pub struct Funnel {
    stages: Vec<Stage>,
}

impl Funnel {
    pub fn new(stages: Vec<Stage>) -> Result<Self, FunnelError> {
        if stages.is_empty() {
            return Err(FunnelError::Empty);
        }
        for (idx, stage) in stages.iter().enumerate() {
            if stage.name.trim().is_empty() {
                return Err(FunnelError::BlankStage);
            }
            if stages[..idx].iter().any(|prev| prev.name == stage.name) {
                return Err(FunnelError::DuplicateStage(stage.name.clone()));
            }
        }
        Ok(Self { stages })
    }

    /// The stage every new deal starts in.
    pub fn initial_stage(&self) -> &Stage {
        &self.stages[0]
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Instantiate the checklist for `stage` with every item open.
    ///
    /// Unknown stages yield an empty checklist rather than an error.
    pub fn checklist_for(&self, stage: &str) -> Vec<ChecklistItem> {
        self.stage(stage)
            .map(|stage| {
                stage
                    .checklist
                    .iter()
                    .map(|label| ChecklistItem::open(label.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for Funnel {
    /// The sales funnel shipped with the service.
    fn default() -> Self {
        Self {
            stages: vec![
                Stage::new(
                    INITIAL_CONTACT,
                    &[
                        "Выявить потребность клиента",
                        "Отправить презентацию",
                        "Договориться о следующем звонке",
                    ],
                ),
                Stage::new(
                    QUALIFICATION,
                    &[
                        "Уточнить бюджет",
                        "Определить лицо, принимающее решение",
                        "Согласовать сроки",
                    ],
                ),
                Stage::new(
                    PROPOSAL,
                    &[
                        "Подготовить коммерческое предложение",
                        "Отправить КП клиенту",
                        "Получить обратную связь",
                    ],
                ),
                Stage::new(
                    CLOSING,
                    &["Подписать договор", "Выставить счёт", "Получить оплату"],
                ),
            ],
        }
    }
}
