use crate::core::error::StageError;
use crate::core::state::{ApprovedOutline, PlotEnhancement, PlotSource};
use crate::services::response::extract_json;
use crate::services::stages::StageModel;
use log::{info, warn};

pub(crate) const SYSTEM_PROMPT: &str = "You are a creative writing assistant that specializes in \
plot options. Generate 10 distinct and creative plot options that would work well with the \
provided outline. Each option must be a complete plot point that could be inserted into the story. \
Respond ONLY with a JSON array of strings, one string per option.";

const MIN_OPTION_CHARS: usize = 10;

const GENERAL_TWISTS: &[&str] = &[
    "The protagonist discovers they've been misled the entire time",
    "A trusted ally is revealed to be working against the protagonist",
    "The antagonist is revealed to be a family member",
    "A seemingly unimportant character is revealed as the mastermind",
    "Two timelines are revealed to be occurring simultaneously",
    "The protagonist and antagonist must work together to overcome a greater threat",
    "A character believed dead returns at a crucial moment",
    "A prophecy is fulfilled but in an unexpected way",
    "A character's true identity is revealed, changing the story's context",
];

const GHOST_TWISTS: &[&str] = &[
    "The ghost is actually protecting the protagonist from a greater evil",
    "The protagonist discovers they've been dead the whole time",
    "The haunting is a hoax by a living person with ulterior motives",
    "The ghost is actually from the future, not the past",
    "The supposed ghost is a living person trapped between dimensions",
    "The ghost is a manifestation of the protagonist's guilt",
    "The haunting is caused by an object, not a location",
    "The ghost is the protagonist from another timeline",
];

const SCI_FI_TWISTS: &[&str] = &[
    "Technology intended to help humanity has a sinister purpose",
    "The alien species are evolved humans from the future",
    "The protagonist discovers they are a synthetic human",
    "The distant planet is revealed to be future Earth",
    "The mission is revealed to be a simulation",
    "The seemingly benevolent AI has its own agenda",
    "The corporation is controlled by a non-human intelligence",
];

/// Built-in twists used when the model's options cannot be read.
pub fn library_plots(story_type: &str) -> Vec<PlotEnhancement> {
    let twists = match story_type.to_lowercase().as_str() {
        "ghost" | "horror" => GHOST_TWISTS,
        "sci-fi" | "scifi" | "science fiction" => SCI_FI_TWISTS,
        _ => GENERAL_TWISTS,
    };
    twists
        .iter()
        .map(|t| PlotEnhancement {
            text: t.to_string(),
            source: PlotSource::Library,
        })
        .collect()
}

/// Numbered or bulleted lines from a prose answer.
fn extract_lines(response: &str) -> Vec<String> {
    response
        .lines()
        .map(|line| {
            line.trim_start_matches(|c: char| c.is_ascii_digit() || "-*.)• \t".contains(c))
                .trim()
                .trim_matches('"')
                .to_string()
        })
        .filter(|line| line.chars().count() > MIN_OPTION_CHARS)
        .collect()
}

/// Reads plot options from a model answer: a JSON array first, then list
/// lines, then the library for `story_type`.
pub fn parse_plot_options(response: &str, story_type: &str) -> Vec<PlotEnhancement> {
    let texts = match extract_json::<Vec<String>>(response) {
        Ok(options) => options
            .into_iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect(),
        Err(_) => {
            warn!("Plot options were not a JSON array, falling back to line extraction");
            extract_lines(response)
        }
    };

    if texts.is_empty() {
        warn!("No plot options found in the answer, using the {} twist library", story_type);
        return library_plots(story_type);
    }

    texts
        .into_iter()
        .map(|text| PlotEnhancement {
            text,
            source: PlotSource::Generated,
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct PlotStage {
    model: StageModel,
}

impl PlotStage {
    pub fn new(model: StageModel) -> Self {
        Self { model }
    }

    pub async fn derive(
        &self,
        approved: &ApprovedOutline,
        story_type: &str,
    ) -> Result<Vec<PlotEnhancement>, StageError> {
        info!("Generating plot options ({})", story_type);
        let user = format!(
            "STORY TYPE: {}\nOUTLINE:\n<outline>\n{}\n</outline>\n\nProvide 10 engaging plot options.",
            story_type,
            approved.outline().render()
        );
        let response = self.model.ask(SYSTEM_PROMPT, &user).await?;
        Ok(parse_plot_options(&response, story_type))
    }
}

/// How many options unattended runs keep for `episode_count` episodes.
pub fn default_plot_count(episode_count: usize) -> usize {
    episode_count.saturating_sub(2).clamp(3, 5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_array_is_generated() {
        let plots = parse_plot_options(r#"["A hidden door", "A second map"]"#, "general");
        assert_eq!(plots.len(), 2);
        assert!(plots.iter().all(|p| p.source == PlotSource::Generated));
    }

    #[test]
    fn test_numbered_list_fallback() {
        let answer = "Here you go:\n1. The vault is a decoy built by the city\n2) The pilot owes the warden money\n- ok";
        let plots = parse_plot_options(answer, "general");
        let texts: Vec<&str> = plots.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "Here you go:",
                "The vault is a decoy built by the city",
                "The pilot owes the warden money"
            ]
        );
    }

    #[test]
    fn test_library_fallback_by_story_type() {
        let plots = parse_plot_options("", "ghost");
        assert!(!plots.is_empty());
        assert!(plots.iter().all(|p| p.source == PlotSource::Library));
        assert!(plots[0].text.contains("ghost"));

        let unknown = parse_plot_options("[]", "western");
        assert_eq!(unknown, library_plots("general"));
    }

    #[test]
    fn test_default_plot_count() {
        assert_eq!(default_plot_count(1), 3);
        assert_eq!(default_plot_count(3), 3);
        assert_eq!(default_plot_count(6), 4);
        assert_eq!(default_plot_count(20), 5);
    }
}
