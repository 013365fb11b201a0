use crate::core::error::StageError;
use crate::core::state::{ApprovedOutline, Cast, EpisodeSpec, PlotEnhancement};
use crate::services::response::extract_json;
use crate::services::stages::StageModel;
use log::{debug, info};
use serde::Deserialize;

pub(crate) const SYSTEM_PROMPT: &str = "You split story outlines into episodes for a serialized \
release. Produce exactly the requested number of episodes, in story order. Every episode needs a \
title and a synopsis; every episode except the last ends on a cliffhanger that leads into the next \
one, the last episode has an empty cliffhanger. Respond ONLY with JSON of the form \
{\"episodes\": [{\"number\": 1, \"title\": \"...\", \"synopsis\": \"...\", \"cliffhanger\": \"...\"}]}.";

#[derive(Deserialize, Debug, Clone)]
pub struct RawEpisode {
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "summary", alias = "content")]
    pub synopsis: String,
    #[serde(default, alias = "hook")]
    pub cliffhanger: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSplit {
    Wrapped { episodes: Vec<RawEpisode> },
    Bare(Vec<RawEpisode>),
}

/// Checks the split postconditions and numbers the entries `1..=expected`
/// in the order the model listed them.
pub fn validate_split(
    raw: Vec<RawEpisode>,
    expected: usize,
    revision: u32,
) -> Result<Vec<EpisodeSpec>, StageError> {
    if raw.len() != expected {
        return Err(StageError::SplitCountMismatch {
            expected,
            actual: raw.len(),
        });
    }

    let mut specs = Vec::with_capacity(expected);
    for (position, entry) in raw.into_iter().enumerate() {
        let index = position as u32 + 1;
        let is_final = position + 1 == expected;

        let synopsis = entry.synopsis.trim().to_string();
        if synopsis.is_empty() {
            return Err(StageError::MalformedEpisodes(format!(
                "episode {} has an empty synopsis",
                index
            )));
        }

        let hook = entry.cliffhanger.trim().to_string();
        let hook = if is_final {
            if !hook.is_empty() {
                debug!("Dropping cliffhanger of final episode {}", index);
            }
            String::new()
        } else if hook.is_empty() {
            return Err(StageError::MalformedEpisodes(format!(
                "episode {} of {} has no cliffhanger",
                index, expected
            )));
        } else {
            hook
        };

        let title = match entry.title.trim() {
            "" => format!("Episode {}", index),
            t => t.to_string(),
        };

        specs.push(EpisodeSpec {
            index,
            title,
            synopsis,
            hook,
            revision,
        });
    }
    Ok(specs)
}

#[derive(Debug, Clone)]
pub struct EpisodeSplitter {
    model: StageModel,
}

impl EpisodeSplitter {
    pub fn new(model: StageModel) -> Self {
        Self { model }
    }

    pub async fn split(
        &self,
        approved: &ApprovedOutline,
        plots: &[PlotEnhancement],
        cast: &Cast,
        episode_count: usize,
    ) -> Result<Vec<EpisodeSpec>, StageError> {
        info!("Splitting outline into {} episode(s)", episode_count);

        let plot_lines = plots
            .iter()
            .map(|p| format!("- {}", p.text))
            .collect::<Vec<_>>()
            .join("\n");
        let characters = serde_json::to_string_pretty(&cast.characters).unwrap_or_default();
        let user = format!(
            "EPISODE COUNT: {}\nOUTLINE:\n<outline>\n{}\n</outline>\n\nPLOT ELEMENTS TO WEAVE IN:\n{}\n\nCHARACTERS:\n{}",
            episode_count,
            approved.outline().render(),
            if plot_lines.is_empty() { "(none)".to_string() } else { plot_lines },
            characters
        );

        let response = self.model.ask(SYSTEM_PROMPT, &user).await?;
        let raw = match extract_json::<RawSplit>(&response) {
            Ok(RawSplit::Wrapped { episodes }) | Ok(RawSplit::Bare(episodes)) => episodes,
            Err(e) => {
                return Err(StageError::MalformedEpisodes(format!("invalid JSON: {}", e)));
            }
        };
        validate_split(raw, episode_count, approved.revision())
    }
}
