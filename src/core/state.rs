use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StoryRequest {
    pub topic: String,
    pub episode_count: usize,
    pub story_type: String,
    #[serde(default)]
    pub languages: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Outline {
    pub title: String,
    pub events: Vec<String>,
    /// Names the outline itself refers to.
    #[serde(default)]
    pub cast: Vec<String>,
}

impl Outline {
    /// Full textual form handed to refinement and downstream prompts.
    pub fn render(&self) -> String {
        let mut out = format!("# {}\n\n", self.title);
        for (i, event) in self.events.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, event));
        }
        if !self.cast.is_empty() {
            out.push_str(&format!("\nCast: {}\n", self.cast.join(", ")));
        }
        out
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutlineStatus {
    Drafted,
    Approved,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OutlineRevision {
    pub revision: u32,
    pub status: OutlineStatus,
    pub outline: Outline,
    /// Feedback that produced this revision; `None` for the first draft.
    pub feedback: Option<String>,
}

/// An outline that passed human review. Only `commit` creates one, so
/// stages that take `&ApprovedOutline` cannot run on a draft.
#[derive(Clone, Debug)]
pub struct ApprovedOutline {
    revision: u32,
    outline: Outline,
}

impl ApprovedOutline {
    pub(crate) fn commit(entry: &mut OutlineRevision) -> Self {
        entry.status = OutlineStatus::Approved;
        Self {
            revision: entry.revision,
            outline: entry.outline.clone(),
        }
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn outline(&self) -> &Outline {
        &self.outline
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedbackEntry {
    pub revision: u32,
    pub text: String,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq)]
pub struct Character {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub motivation: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Cast {
    /// Approved outline revision the characters were derived from.
    pub revision: u32,
    pub characters: Vec<Character>,
    #[serde(default)]
    pub outline_names: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlotSource {
    Generated,
    Library,
    Improved,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PlotEnhancement {
    pub text: String,
    pub source: PlotSource,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ConsistencyIssue {
    pub plot_index: Option<usize>,
    pub issue_type: String,
    pub severity: String,
    pub description: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EpisodeSpec {
    pub index: u32,
    pub title: String,
    pub synopsis: String,
    /// Continuity hook into the next episode. Empty for the final one.
    pub hook: String,
    pub revision: u32,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentStage {
    Narrative,
    WithDialogue,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EpisodeContent {
    pub index: u32,
    pub title: String,
    pub text: String,
    pub stage: ContentStage,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TranslatedEpisode {
    pub index: u32,
    pub language: String,
    pub text: String,
}

/// Everything produced for one story, indexed by stage and episode.
/// Serialized as the run manifest so an interrupted run can resume.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StoryRun {
    pub run_id: String,
    pub created_at: DateTime<Local>,
    pub request: StoryRequest,
    #[serde(default)]
    pub outline_history: Vec<OutlineRevision>,
    pub cast: Option<Cast>,
    #[serde(default)]
    pub plot_options: Vec<PlotEnhancement>,
    pub selected_plots: Option<Vec<PlotEnhancement>>,
    #[serde(default)]
    pub consistency_issues: Vec<ConsistencyIssue>,
    #[serde(default)]
    pub episodes: Vec<EpisodeSpec>,
    #[serde(default)]
    pub contents: BTreeMap<u32, EpisodeContent>,
    #[serde(default)]
    pub translations: Vec<TranslatedEpisode>,
    #[serde(default)]
    pub narrated: Vec<u32>,
}

impl StoryRun {
    pub fn new(run_id: String, request: StoryRequest) -> Self {
        Self {
            run_id,
            created_at: Local::now(),
            request,
            outline_history: Vec::new(),
            cast: None,
            plot_options: Vec::new(),
            selected_plots: None,
            consistency_issues: Vec::new(),
            episodes: Vec::new(),
            contents: BTreeMap::new(),
            translations: Vec::new(),
            narrated: Vec::new(),
        }
    }

    pub fn latest_outline(&self) -> Option<&OutlineRevision> {
        self.outline_history.last()
    }

    /// The committed outline, if review already finished.
    pub fn approved_outline(&self) -> Option<ApprovedOutline> {
        self.outline_history
            .iter()
            .rev()
            .find(|r| r.status == OutlineStatus::Approved)
            .map(|r| ApprovedOutline {
                revision: r.revision,
                outline: r.outline.clone(),
            })
    }

    pub fn content(&self, index: u32) -> Option<&EpisodeContent> {
        self.contents.get(&index)
    }

    pub fn translation(&self, index: u32, language: &str) -> Option<&TranslatedEpisode> {
        self.translations
            .iter()
            .find(|t| t.index == index && t.language == language)
    }

    /// Episodes whose dialogue pass is not done yet.
    pub fn pending_episodes(&self) -> Vec<&EpisodeSpec> {
        self.episodes
            .iter()
            .filter(|spec| {
                !matches!(self.content(spec.index), Some(c) if c.stage == ContentStage::WithDialogue)
            })
            .collect()
    }
}
