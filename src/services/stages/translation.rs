use crate::core::error::StageError;
use crate::core::state::{EpisodeContent, TranslatedEpisode};
use crate::services::stages::StageModel;
use log::info;

pub(crate) const SYSTEM_PROMPT: &str = "You are a literary translator. Translate the episode \
into the target language, keeping paragraph breaks, dialogue formatting and character names. \
Respond with the translated text only.";

#[derive(Debug, Clone)]
pub struct TranslationStage {
    model: StageModel,
}

impl TranslationStage {
    pub fn new(model: StageModel) -> Self {
        Self { model }
    }

    pub async fn translate(
        &self,
        content: &EpisodeContent,
        language: &str,
    ) -> Result<TranslatedEpisode, StageError> {
        info!("Translating episode {} into {}", content.index, language);
        let user = format!(
            "TARGET LANGUAGE: {}\nTITLE: {}\n\n<text>\n{}\n</text>",
            language, content.title, content.text
        );
        let text = self.model.ask_text(SYSTEM_PROMPT, &user).await?;

        Ok(TranslatedEpisode {
            index: content.index,
            language: language.to_string(),
            text,
        })
    }
}
