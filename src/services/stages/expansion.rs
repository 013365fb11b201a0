use crate::core::error::StageError;
use crate::core::state::{ContentStage, EpisodeContent, EpisodeSpec};
use crate::services::stages::StageModel;
use log::info;

pub(crate) const SYSTEM_PROMPT: &str = "You are a novelist expanding an episode synopsis into a \
full-length episode of a serialized story. Write rich narrative prose with scene detail and \
pacing. Stay consistent with what happened in earlier episodes and set up what comes next. \
End on the given cliffhanger when there is one. Respond with the episode text only.";

/// What the surrounding episodes say, derived from the split alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Continuity {
    pub previous_summary: String,
    pub previous_hook: String,
    pub upcoming: String,
}

const UPCOMING_WINDOW: usize = 3;

impl Continuity {
    pub fn for_episode(specs: &[EpisodeSpec], index: u32) -> Self {
        let previous: Vec<&EpisodeSpec> = specs.iter().filter(|s| s.index < index).collect();
        let upcoming: Vec<&EpisodeSpec> = specs
            .iter()
            .filter(|s| s.index > index)
            .take(UPCOMING_WINDOW)
            .collect();

        Self {
            previous_summary: previous
                .iter()
                .map(|s| format!("Episode {}: {}", s.index, s.synopsis))
                .collect::<Vec<_>>()
                .join("\n"),
            previous_hook: previous.last().map(|s| s.hook.clone()).unwrap_or_default(),
            upcoming: upcoming
                .iter()
                .map(|s| format!("Episode {}: {}", s.index, s.synopsis))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

fn or_none(text: &str) -> &str {
    if text.is_empty() {
        "(none)"
    } else {
        text
    }
}

#[derive(Debug, Clone)]
pub struct ExpansionStage {
    model: StageModel,
}

impl ExpansionStage {
    pub fn new(model: StageModel) -> Self {
        Self { model }
    }

    pub async fn expand(
        &self,
        spec: &EpisodeSpec,
        continuity: &Continuity,
    ) -> Result<EpisodeContent, StageError> {
        info!("Expanding episode {}: {}", spec.index, spec.title);
        let user = format!(
            "EPISODE NUMBER: {}\nEPISODE TITLE: {}\nSYNOPSIS:\n{}\nCLIFFHANGER: {}\n\n\
             PREVIOUS EPISODES:\n{}\nPREVIOUS CLIFFHANGER: {}\n\nUPCOMING EPISODES:\n{}",
            spec.index,
            spec.title,
            spec.synopsis,
            or_none(&spec.hook),
            or_none(&continuity.previous_summary),
            or_none(&continuity.previous_hook),
            or_none(&continuity.upcoming),
        );
        let text = self.model.ask_text(SYSTEM_PROMPT, &user).await?;

        Ok(EpisodeContent {
            index: spec.index,
            title: spec.title.clone(),
            text,
            stage: ContentStage::Narrative,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::GatewayError;
    use crate::services::testing::{field, ScriptedLlm};
    use std::sync::Arc;

    fn specs(n: u32) -> Vec<EpisodeSpec> {
        (1..=n)
            .map(|i| EpisodeSpec {
                index: i,
                title: format!("Part {}", i),
                synopsis: format!("S{}", i),
                hook: if i < n { format!("H{}", i) } else { String::new() },
                revision: 0,
            })
            .collect()
    }

    #[test]
    fn test_continuity_window() {
        let all = specs(6);
        let first = Continuity::for_episode(&all, 1);
        assert!(first.previous_summary.is_empty());
        assert!(first.previous_hook.is_empty());
        assert_eq!(first.upcoming, "Episode 2: S2\nEpisode 3: S3\nEpisode 4: S4");

        let third = Continuity::for_episode(&all, 3);
        assert_eq!(third.previous_summary, "Episode 1: S1\nEpisode 2: S2");
        assert_eq!(third.previous_hook, "H2");

        let last = Continuity::for_episode(&all, 6);
        assert!(last.upcoming.is_empty());
    }

    #[tokio::test]
    async fn test_expand_produces_narrative_for_the_same_index() {
        let llm = Arc::new(ScriptedLlm::replying("```\nThe city drifted.\n```"));
        let stage = ExpansionStage::new(StageModel::new(llm.clone(), "m"));
        let all = specs(3);

        let content = stage
            .expand(&all[1], &Continuity::for_episode(&all, 2))
            .await
            .unwrap();
        assert_eq!(content.index, 2);
        assert_eq!(content.title, "Part 2");
        assert_eq!(content.text, "The city drifted.");
        assert_eq!(content.stage, ContentStage::Narrative);

        let calls = llm.calls();
        assert_eq!(field(&calls[0].user, "EPISODE NUMBER"), Some("2"));
        assert_eq!(field(&calls[0].user, "PREVIOUS CLIFFHANGER"), Some("H1"));
    }

    #[tokio::test]
    async fn test_empty_answer_is_a_generation_error() {
        let llm = Arc::new(ScriptedLlm::replying("   "));
        let stage = ExpansionStage::new(StageModel::new(llm, "m"));
        let all = specs(1);
        let err = stage.expand(&all[0], &Continuity::default()).await.unwrap_err();
        assert!(matches!(err, StageError::Generation(GatewayError::Fatal(_))));
    }
}
