use crate::core::error::StageError;
use crate::core::state::{ApprovedOutline, Cast, Character};
use crate::services::response::extract_json;
use crate::services::stages::StageModel;
use log::info;
use serde::Deserialize;

pub(crate) const SYSTEM_PROMPT: &str = "You are a character designer for serialized fiction. \
For the outline you are given, create the main characters with a name, their role in the story, \
a short description and their core motivation. Keep the names the outline already uses. \
Respond ONLY with JSON of the form {\"characters\": [{\"name\": \"...\", \"role\": \"...\", \
\"description\": \"...\", \"motivation\": \"...\"}]}.";

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCharacters {
    Wrapped { characters: Vec<Character> },
    Bare(Vec<Character>),
}

#[derive(Debug, Clone)]
pub struct CharacterStage {
    model: StageModel,
}

impl CharacterStage {
    pub fn new(model: StageModel) -> Self {
        Self { model }
    }

    pub async fn derive(&self, approved: &ApprovedOutline) -> Result<Cast, StageError> {
        let outline = approved.outline();
        info!("Creating characters for {:?}", outline.title);
        let user = format!("OUTLINE:\n<outline>\n{}\n</outline>", outline.render());
        let response = self.model.ask(SYSTEM_PROMPT, &user).await?;

        let characters: Vec<Character> = match extract_json::<RawCharacters>(&response) {
            Ok(RawCharacters::Wrapped { characters }) | Ok(RawCharacters::Bare(characters)) => {
                characters
                    .into_iter()
                    .filter(|c| !c.name.trim().is_empty())
                    .collect()
            }
            Err(e) => return Err(StageError::MalformedCharacters(e.to_string())),
        };
        if characters.is_empty() {
            return Err(StageError::MalformedCharacters(
                "no named characters in the answer".to_string(),
            ));
        }

        Ok(Cast {
            revision: approved.revision(),
            characters,
            outline_names: outline.cast.clone(),
        })
    }
}
