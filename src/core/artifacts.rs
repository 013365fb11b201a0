//! On-disk layout of a story run.
//!
//! ```text
//! <run>/story.json                      run manifest (resume point)
//! <run>/drafts/outline_rNN.md           every drafted outline revision
//! <run>/outline.md                      approved outline only
//! <run>/characters.json, plots.json
//! <run>/episodes/NNN_synopsis.md, NNN_content.md
//! <run>/translations/NNN_<lang>.md
//! <run>/audio/NNN.<ext>
//! <run>/final_story.md
//! ```

use crate::core::io::Storage;
use crate::core::state::{
    Cast, EpisodeContent, EpisodeSpec, Outline, OutlineRevision, PlotEnhancement, StoryRun,
    TranslatedEpisode,
};
use crate::utils::text::{language_code, slug};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const MANIFEST_FILE: &str = "story.json";

#[derive(Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    storage: Arc<dyn Storage>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, storage: Arc<dyn Storage>) -> Self {
        Self {
            root: root.into(),
            storage,
        }
    }

    /// Run id is `<topic slug>_<timestamp>`, the directory lives under `output_folder`.
    pub fn for_new_run(
        output_folder: &str,
        topic: &str,
        now: DateTime<Local>,
        storage: Arc<dyn Storage>,
    ) -> (String, Self) {
        let run_id = format!("{}_{}", slug(topic, 30), now.format("%Y%m%d_%H%M%S"));
        let root = Path::new(output_folder).join(&run_id);
        (run_id, Self::new(root, storage))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, relative: &str) -> String {
        self.root.join(relative).to_string_lossy().to_string()
    }

    pub fn draft_file(revision: u32) -> String {
        format!("drafts/outline_r{:02}.md", revision)
    }

    pub fn synopsis_file(index: u32) -> String {
        format!("episodes/{:03}_synopsis.md", index)
    }

    pub fn content_file(index: u32) -> String {
        format!("episodes/{:03}_content.md", index)
    }

    pub fn translation_file(index: u32, language: &str) -> String {
        format!("translations/{:03}_{}.md", index, language_code(language))
    }

    pub fn audio_file(index: u32, extension: &str) -> String {
        format!("audio/{:03}.{}", index, extension)
    }

    async fn write_text(&self, relative: &str, text: &str) -> Result<()> {
        let path = self.path(relative);
        self.storage
            .write(&path, text.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", path))
    }

    pub async fn write_bytes(&self, relative: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(relative);
        self.storage
            .write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path))
    }

    pub async fn save_manifest(&self, run: &StoryRun) -> Result<()> {
        let content = serde_json::to_string_pretty(run)?;
        self.write_text(MANIFEST_FILE, &content).await
    }

    pub async fn load_manifest(&self) -> Result<StoryRun> {
        let path = self.path(MANIFEST_FILE);
        let content = self
            .storage
            .read_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path))
    }

    pub async fn save_draft(&self, entry: &OutlineRevision) -> Result<()> {
        let mut text = entry.outline.render();
        if let Some(feedback) = &entry.feedback {
            text.push_str(&format!("\n> Feedback applied: {}\n", feedback));
        }
        self.write_text(&Self::draft_file(entry.revision), &text).await
    }

    pub async fn save_approved_outline(&self, outline: &Outline) -> Result<()> {
        self.write_text("outline.md", &outline.render()).await
    }

    pub async fn save_cast(&self, cast: &Cast) -> Result<()> {
        let content = serde_json::to_string_pretty(&cast.characters)?;
        self.write_text("characters.json", &content).await
    }

    pub async fn save_plots(&self, plots: &[PlotEnhancement]) -> Result<()> {
        let content = serde_json::to_string_pretty(plots)?;
        self.write_text("plots.json", &content).await
    }

    pub async fn save_episode_spec(&self, spec: &EpisodeSpec) -> Result<()> {
        let mut text = format!("# Episode {}: {}\n\n{}\n", spec.index, spec.title, spec.synopsis);
        if !spec.hook.is_empty() {
            text.push_str(&format!("\n**Cliffhanger:** {}\n", spec.hook));
        }
        self.write_text(&Self::synopsis_file(spec.index), &text).await
    }

    pub async fn save_episode_content(&self, content: &EpisodeContent) -> Result<()> {
        let text = format!("# Episode {}: {}\n\n{}\n", content.index, content.title, content.text);
        self.write_text(&Self::content_file(content.index), &text).await
    }

    pub async fn save_translation(&self, translated: &TranslatedEpisode) -> Result<()> {
        self.write_text(
            &Self::translation_file(translated.index, &translated.language),
            &translated.text,
        )
        .await
    }

    pub async fn save_final_story(&self, run: &StoryRun) -> Result<()> {
        self.write_text("final_story.md", &render_final_story(run)).await
    }
}

/// Readable assembly of a run: outline, characters, then episodes in order.
pub fn render_final_story(run: &StoryRun) -> String {
    let mut out = String::new();
    let title = run
        .approved_outline()
        .map(|a| a.outline().title.clone())
        .unwrap_or_else(|| run.request.topic.clone());
    out.push_str(&format!("# {}\n\n", title));

    if let Some(approved) = run.approved_outline() {
        out.push_str("## Outline\n\n");
        for (i, event) in approved.outline().events.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, event));
        }
        out.push('\n');
    }

    if let Some(cast) = &run.cast {
        out.push_str("## Characters\n\n");
        for c in &cast.characters {
            out.push_str(&format!("**{}** ({}): {}\n\n", c.name, c.role, c.description));
        }
    }

    out.push_str("## Story\n\n");
    let total = run.episodes.len();
    for (i, spec) in run.episodes.iter().enumerate() {
        out.push_str(&format!("### Episode {}: {}\n\n", spec.index, spec.title));
        match run.content(spec.index) {
            Some(content) => out.push_str(&content.text),
            None => out.push_str(&spec.synopsis),
        }
        out.push_str("\n\n");
        if i + 1 < total {
            out.push_str("---\n\n");
        }
    }

    out.push_str(&format!("\n*Generated on {}*\n", run.created_at.format("%Y-%m-%d")));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::state::{ContentStage, OutlineStatus, StoryRequest};

    fn store(dir: &Path) -> ArtifactStore {
        ArtifactStore::new(dir.join("run"), Arc::new(NativeStorage::new()))
    }

    #[test]
    fn test_file_names_are_zero_padded() {
        assert_eq!(ArtifactStore::content_file(3), "episodes/003_content.md");
        assert_eq!(ArtifactStore::synopsis_file(12), "episodes/012_synopsis.md");
        assert_eq!(ArtifactStore::translation_file(1, "Hindi"), "translations/001_hindi.md");
        assert_eq!(ArtifactStore::audio_file(7, "mp3"), "audio/007.mp3");
        assert_eq!(ArtifactStore::draft_file(1), "drafts/outline_r01.md");
    }

    #[test]
    fn test_run_directory_name() {
        let now = Local::now();
        let (run_id, store) = ArtifactStore::for_new_run(
            "stories",
            "A heist in a floating city",
            now,
            Arc::new(NativeStorage::new()),
        );
        assert!(run_id.starts_with("A_heist_in_a_floating_city_"));
        assert!(store.root().starts_with("stories"));
    }

    #[tokio::test]
    async fn test_manifest_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store(dir.path());
        let mut run = StoryRun::new(
            "run".to_string(),
            StoryRequest {
                topic: "t".to_string(),
                episode_count: 1,
                story_type: "general".to_string(),
                languages: vec!["hindi".to_string()],
            },
        );
        run.outline_history.push(OutlineRevision {
            revision: 0,
            status: OutlineStatus::Approved,
            outline: Outline {
                title: "T".to_string(),
                events: vec!["e".to_string()],
                cast: vec![],
            },
            feedback: None,
        });
        run.contents.insert(
            1,
            EpisodeContent {
                index: 1,
                title: "One".to_string(),
                text: "body".to_string(),
                stage: ContentStage::WithDialogue,
            },
        );
        store.save_manifest(&run).await?;

        let loaded = store.load_manifest().await?;
        assert_eq!(loaded.request, run.request);
        assert_eq!(loaded.content(1), run.content(1));
        assert_eq!(loaded.approved_outline().map(|a| a.revision()), Some(0));
        Ok(())
    }

    #[tokio::test]
    async fn test_final_story_lists_episodes_in_order() -> Result<()> {
        let mut run = StoryRun::new(
            "run".to_string(),
            StoryRequest {
                topic: "Topic".to_string(),
                episode_count: 2,
                story_type: "general".to_string(),
                languages: vec![],
            },
        );
        for index in 1..=2u32 {
            run.episodes.push(EpisodeSpec {
                index,
                title: format!("Part {}", index),
                synopsis: format!("synopsis {}", index),
                hook: if index == 1 { "hook".to_string() } else { String::new() },
                revision: 0,
            });
        }
        run.contents.insert(
            2,
            EpisodeContent {
                index: 2,
                title: "Part 2".to_string(),
                text: "full text two".to_string(),
                stage: ContentStage::WithDialogue,
            },
        );
        let text = render_final_story(&run);
        let one = text.find("### Episode 1: Part 1").unwrap();
        let two = text.find("### Episode 2: Part 2").unwrap();
        assert!(one < two);
        assert!(text.contains("synopsis 1"));
        assert!(text.contains("full text two"));
        Ok(())
    }
}
