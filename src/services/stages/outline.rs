use crate::core::error::StageError;
use crate::core::state::{FeedbackEntry, Outline};
use crate::services::response::extract_json;
use crate::services::stages::StageModel;
use log::info;
use serde::Deserialize;

pub(crate) const SYSTEM_PROMPT: &str = "You are an expert at generating detailed story outlines. \
Given a topic, produce a title, an ordered list of key plot events (6 to 10 beats covering \
setup, conflict, climax and resolution) and the names of the main characters. \
Respond ONLY with JSON of the form {\"title\": \"...\", \"events\": [\"...\"], \"cast\": [\"...\"]}.";

pub(crate) const REFINE_SYSTEM_PROMPT: &str = "You are an expert story editor. Rewrite the \
given outline so that it addresses the reader's feedback while keeping everything the feedback \
does not touch. Return the complete outline, not a list of changes. \
Respond ONLY with JSON of the form {\"title\": \"...\", \"events\": [\"...\"], \"cast\": [\"...\"]}.";

#[derive(Deserialize)]
struct RawOutline {
    #[serde(default)]
    title: String,
    #[serde(default)]
    events: Vec<String>,
    #[serde(default, alias = "characters")]
    cast: Vec<String>,
}

/// Validates the model's outline answer.
pub fn parse_outline(response: &str) -> Result<Outline, StageError> {
    let raw: RawOutline = extract_json(response)
        .map_err(|e| StageError::MalformedOutline(format!("invalid JSON: {}", e)))?;

    let title = raw.title.trim().to_string();
    if title.is_empty() {
        return Err(StageError::MalformedOutline("missing title".to_string()));
    }
    let events: Vec<String> = raw
        .events
        .into_iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect();
    if events.is_empty() {
        return Err(StageError::MalformedOutline("no plot events".to_string()));
    }
    let cast = raw
        .cast
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    Ok(Outline { title, events, cast })
}

#[derive(Debug, Clone)]
pub struct OutlineStage {
    model: StageModel,
}

impl OutlineStage {
    pub fn new(model: StageModel) -> Self {
        Self { model }
    }

    pub async fn generate(&self, topic: &str) -> Result<Outline, StageError> {
        info!("Generating outline for {:?}", topic);
        let user = format!("TOPIC: {}\n\nWrite the outline for a story on this topic.", topic);
        let response = self.model.ask(SYSTEM_PROMPT, &user).await?;
        parse_outline(&response)
    }

    /// Rewrites `outline` according to `feedback`. The whole outline is sent,
    /// never a diff.
    pub async fn refine(
        &self,
        outline: &Outline,
        feedback: &FeedbackEntry,
    ) -> Result<Outline, StageError> {
        info!("Refining outline revision {}", feedback.revision);
        let user = format!(
            "CURRENT OUTLINE:\n<outline>\n{}\n</outline>\n\nFEEDBACK: {}\n\nReturn the revised outline.",
            outline.render(),
            feedback.text
        );
        let response = self.model.ask(REFINE_SYSTEM_PROMPT, &user).await?;
        parse_outline(&response)
    }
}
