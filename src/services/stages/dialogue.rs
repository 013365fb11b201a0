use crate::core::error::StageError;
use crate::core::state::{Cast, ContentStage, EpisodeContent};
use crate::services::stages::StageModel;
use log::info;

pub(crate) const SYSTEM_PROMPT: &str = "You rewrite episode narratives so the characters speak. \
Keep every plot event and the episode ending, give each character a voice that fits their role \
and motivation, and return the complete rewritten episode text only.";

fn style_for(story_type: &str) -> &'static str {
    match story_type.to_lowercase().as_str() {
        "drama" => "Make the episode dialogue-heavy, close to a script, with short narration between lines.",
        _ => "Keep narration prominent and weave dialogue into it where characters interact.",
    }
}

#[derive(Debug, Clone)]
pub struct DialogueStage {
    model: StageModel,
}

impl DialogueStage {
    pub fn new(model: StageModel) -> Self {
        Self { model }
    }

    /// Replaces `content.text` with the dialogue version and marks it done.
    pub async fn add_dialogue(
        &self,
        content: &mut EpisodeContent,
        cast: &Cast,
        story_type: &str,
    ) -> Result<(), StageError> {
        if cast.characters.is_empty() && !cast.outline_names.is_empty() {
            return Err(StageError::MissingCharacterContext {
                named: cast.outline_names.len(),
            });
        }

        info!("Adding dialogue to episode {}", content.index);
        let characters = cast
            .characters
            .iter()
            .map(|c| format!("- {} ({}): {} Motivation: {}", c.name, c.role, c.description, c.motivation))
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "EPISODE NUMBER: {}\nEPISODE TITLE: {}\nSTYLE: {}\n\nCHARACTERS:\n{}\n\nNARRATIVE:\n<text>\n{}\n</text>",
            content.index,
            content.title,
            style_for(story_type),
            if characters.is_empty() { "(none)".to_string() } else { characters },
            content.text
        );

        content.text = self.model.ask_text(SYSTEM_PROMPT, &user).await?;
        content.stage = ContentStage::WithDialogue;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::Character;
    use crate::services::testing::{field, ScriptedLlm};
    use std::sync::Arc;

    fn content() -> EpisodeContent {
        EpisodeContent {
            index: 2,
            title: "Part 2".to_string(),
            text: "Mira flew.".to_string(),
            stage: ContentStage::Narrative,
        }
    }

    #[tokio::test]
    async fn test_missing_characters_fail_before_any_call() {
        let llm = Arc::new(ScriptedLlm::replying("unused"));
        let stage = DialogueStage::new(StageModel::new(llm.clone(), "m"));
        let cast = Cast {
            revision: 0,
            characters: vec![],
            outline_names: vec!["Mira".to_string(), "Tobin".to_string()],
        };

        let mut episode = content();
        let err = stage.add_dialogue(&mut episode, &cast, "general").await.unwrap_err();
        assert!(matches!(err, StageError::MissingCharacterContext { named: 2 }));
        assert!(llm.calls().is_empty());
        assert_eq!(episode, content());
    }

    #[tokio::test]
    async fn test_dialogue_mutates_in_place() {
        let llm = Arc::new(ScriptedLlm::replying("\"Hold on,\" Mira said."));
        let stage = DialogueStage::new(StageModel::new(llm.clone(), "m"));
        let cast = Cast {
            revision: 0,
            characters: vec![Character {
                name: "Mira".to_string(),
                role: "pilot".to_string(),
                ..Default::default()
            }],
            outline_names: vec!["Mira".to_string()],
        };

        let mut episode = content();
        stage.add_dialogue(&mut episode, &cast, "drama").await.unwrap();
        assert_eq!(episode.stage, ContentStage::WithDialogue);
        assert_eq!(episode.text, "\"Hold on,\" Mira said.");
        assert_eq!(episode.index, 2);

        let user = &llm.calls()[0].user;
        assert!(field(user, "STYLE").unwrap().contains("dialogue-heavy"));
        assert!(user.contains("- Mira (pilot)"));
    }

    #[tokio::test]
    async fn test_story_without_named_characters_is_allowed() {
        let llm = Arc::new(ScriptedLlm::replying("Rain fell."));
        let stage = DialogueStage::new(StageModel::new(llm, "m"));
        let cast = Cast {
            revision: 0,
            characters: vec![],
            outline_names: vec![],
        };
        let mut episode = content();
        stage.add_dialogue(&mut episode, &cast, "general").await.unwrap();
        assert_eq!(episode.stage, ContentStage::WithDialogue);
    }
}
