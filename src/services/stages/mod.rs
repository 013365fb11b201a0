//! One module per pipeline stage. Each stage owns its prompts, calls the
//! gateway once per operation and validates the answer before returning it.

pub mod characters;
pub mod consistency;
pub mod dialogue;
pub mod expansion;
pub mod outline;
pub mod plot;
pub mod splitter;
pub mod translation;

use crate::core::error::{GatewayError, StageError};
use crate::services::llm::LlmClient;
use crate::services::response::clean_text;
use log::debug;
use std::sync::Arc;

/// Gateway handle plus the model a stage talks to.
#[derive(Debug, Clone)]
pub struct StageModel {
    pub llm: Arc<dyn LlmClient>,
    pub model: String,
}

impl StageModel {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    pub(crate) async fn ask(&self, system: &str, user: &str) -> Result<String, StageError> {
        debug!("Prompting {} ({} chars)", self.model, user.len());
        Ok(self.llm.chat(&self.model, system, user).await?)
    }

    /// Like `ask`, but an empty answer is a generation failure.
    pub(crate) async fn ask_text(&self, system: &str, user: &str) -> Result<String, StageError> {
        let response = self.ask(system, user).await?;
        clean_text(&response)
            .ok_or_else(|| StageError::Generation(GatewayError::Fatal("empty response".to_string())))
    }
}
