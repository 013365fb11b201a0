use crate::core::artifacts::{ArtifactStore, MANIFEST_FILE};
use crate::core::config::Config;
use crate::core::error::{PipelineError, PipelineResult, StageError, StageName};
use crate::core::io::Storage;
use crate::core::state::{
    ApprovedOutline, EpisodeContent, EpisodeSpec, FeedbackEntry, Outline, OutlineRevision,
    OutlineStatus, StoryRequest, StoryRun, TranslatedEpisode,
};
use crate::services::llm::{LlmClient, LlmConfig};
use crate::services::review::{OutlineReviewer, ReviewDecision};
use crate::services::stages::characters::CharacterStage;
use crate::services::stages::consistency::ConsistencyStage;
use crate::services::stages::dialogue::DialogueStage;
use crate::services::stages::expansion::{Continuity, ExpansionStage};
use crate::services::stages::outline::OutlineStage;
use crate::services::stages::plot::{default_plot_count, PlotStage};
use crate::services::stages::splitter::EpisodeSplitter;
use crate::services::stages::translation::TranslationStage;
use crate::services::stages::StageModel;
use crate::services::tts::Narrator;
use crate::utils::text::distinct_languages;
use anyhow::Context;
use chrono::Local;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

/// Every stage the pipeline drives, each bound to its model.
#[derive(Debug, Clone)]
pub struct Stages {
    pub outline: OutlineStage,
    pub characters: CharacterStage,
    pub plot: PlotStage,
    pub consistency: ConsistencyStage,
    pub splitter: EpisodeSplitter,
    pub expansion: ExpansionStage,
    pub dialogue: DialogueStage,
    pub translation: TranslationStage,
}

impl Stages {
    pub fn from_config(llm: Arc<dyn LlmClient>, config: &LlmConfig) -> anyhow::Result<Self> {
        let model = |stage: StageName| -> anyhow::Result<StageModel> {
            Ok(StageModel::new(llm.clone(), config.model_for(stage)?))
        };
        Ok(Self {
            outline: OutlineStage::new(model(StageName::Outline)?),
            characters: CharacterStage::new(model(StageName::Characters)?),
            plot: PlotStage::new(model(StageName::Plot)?),
            consistency: ConsistencyStage::new(model(StageName::Consistency)?),
            splitter: EpisodeSplitter::new(model(StageName::Split)?),
            expansion: ExpansionStage::new(model(StageName::Expansion)?),
            dialogue: DialogueStage::new(model(StageName::Dialogue)?),
            translation: TranslationStage::new(model(StageName::Translation)?),
        })
    }
}

fn stage_failure(topic: &str, stage: StageName, attempts: u32, source: StageError) -> PipelineError {
    PipelineError::Stage {
        topic: topic.to_string(),
        stage,
        attempts,
        source,
    }
}

/// Re-invokes `call` while it fails a structural check, up to `max_attempts`
/// calls in total. Other errors end the loop at once.
async fn with_structural_retry<T, F, Fut>(
    topic: &str,
    stage: StageName,
    max_attempts: u32,
    mut call: F,
) -> PipelineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StageError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_structural() && attempt < max_attempts => {
                warn!(
                    "{} output rejected (attempt {}/{}): {}",
                    stage, attempt, max_attempts, e
                );
            }
            Err(e) => return Err(stage_failure(topic, stage, attempt, e)),
        }
    }
}

fn progress_bar(len: usize, message: &'static str) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );
    pb.set_message(message);
    Ok(pb)
}

struct EpisodeOutcome {
    index: u32,
    content: Option<EpisodeContent>,
    error: Option<PipelineError>,
}

pub struct PipelineOrchestrator {
    config: Config,
    stages: Stages,
    reviewer: Box<dyn OutlineReviewer>,
    narrator: Option<Narrator>,
    storage: Arc<dyn Storage>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: Config,
        stages: Stages,
        reviewer: Box<dyn OutlineReviewer>,
        narrator: Option<Narrator>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            config,
            stages,
            reviewer,
            narrator,
            storage,
        }
    }

    fn concurrency(&self) -> usize {
        self.config.concurrency.max(1)
    }

    /// Starts a new run in a fresh directory under the output folder.
    pub async fn run(&self, mut request: StoryRequest) -> PipelineResult<StoryRun> {
        request.languages = distinct_languages(&request.languages);
        if request.topic.trim().is_empty() {
            return Err(PipelineError::InvalidRequest("topic is empty".to_string()));
        }
        if request.episode_count == 0 {
            return Err(PipelineError::InvalidRequest(
                "episode count must be at least 1".to_string(),
            ));
        }

        let (run_id, store) = ArtifactStore::for_new_run(
            &self.config.output_folder,
            &request.topic,
            Local::now(),
            self.storage.clone(),
        );
        println!("Writing story to {}", store.root().display());
        let mut run = StoryRun::new(run_id, request);
        store.save_manifest(&run).await?;

        self.drive(&mut run, &store).await?;
        Ok(run)
    }

    /// Continues the run stored in `run_dir`, skipping finished stages.
    pub async fn resume(&self, run_dir: &Path) -> PipelineResult<StoryRun> {
        let store = ArtifactStore::new(run_dir, self.storage.clone());
        if !self.storage.exists(&store.path(MANIFEST_FILE)).await? {
            return Err(PipelineError::InvalidRequest(format!(
                "{} has no {} to resume from",
                run_dir.display(),
                MANIFEST_FILE
            )));
        }
        let mut run = store
            .load_manifest()
            .await
            .with_context(|| format!("Cannot resume from {}", run_dir.display()))?;
        run.request.languages = distinct_languages(&run.request.languages);
        println!("Resuming story {:?} from {}", run.request.topic, run_dir.display());

        self.drive(&mut run, &store).await?;
        Ok(run)
    }

    async fn drive(&self, run: &mut StoryRun, store: &ArtifactStore) -> PipelineResult<()> {
        let approved = self.approve_outline(run, store).await?;
        self.derive_cast_and_plots(run, &approved, store).await?;
        self.select_plots(run, &approved, store).await?;
        self.split_episodes(run, &approved, store).await?;
        self.check_revisions(run, &approved)?;
        self.write_episodes(run, store).await?;
        self.translate_episodes(run, store).await?;
        self.narrate_episodes(run, store).await?;

        store.save_final_story(run).await?;
        store.save_manifest(run).await?;
        println!("Story complete: {}", store.path("final_story.md"));
        Ok(())
    }

    // --- Outline + feedback loop ---

    async fn approve_outline(
        &self,
        run: &mut StoryRun,
        store: &ArtifactStore,
    ) -> PipelineResult<ApprovedOutline> {
        if let Some(approved) = run.approved_outline() {
            info!("Using approved outline revision {}", approved.revision());
            return Ok(approved);
        }

        let topic = run.request.topic.clone();
        let attempts = 1 + self.config.retries.outline_parse;

        if run.outline_history.is_empty() {
            println!("Generating outline...");
            let outline = with_structural_retry(&topic, StageName::Outline, attempts, || {
                self.stages.outline.generate(&topic)
            })
            .await?;
            self.record_draft(run, store, outline, None).await?;
        }

        loop {
            let Some(current) = run.latest_outline() else {
                return Err(PipelineError::InvalidRequest("outline history is empty".to_string()));
            };
            let decision = self
                .reviewer
                .review(current)
                .map_err(PipelineError::Review)?;

            match decision {
                ReviewDecision::Approve => {
                    let Some(entry) = run.outline_history.last_mut() else {
                        return Err(PipelineError::InvalidRequest(
                            "outline history is empty".to_string(),
                        ));
                    };
                    let approved = ApprovedOutline::commit(entry);
                    store.save_approved_outline(approved.outline()).await?;
                    store.save_manifest(run).await?;
                    println!("Outline revision {} approved.", approved.revision());
                    return Ok(approved);
                }
                ReviewDecision::Revise(text) => {
                    let feedback = FeedbackEntry {
                        revision: current.revision,
                        text,
                    };
                    let previous = current.outline.clone();
                    println!("Refining outline...");
                    let outline = with_structural_retry(&topic, StageName::Refine, attempts, || {
                        self.stages.outline.refine(&previous, &feedback)
                    })
                    .await?;
                    self.record_draft(run, store, outline, Some(feedback.text)).await?;
                }
                ReviewDecision::Abort => {
                    store.save_manifest(run).await?;
                    return Err(PipelineError::Aborted {
                        topic,
                        revisions: run.outline_history.len(),
                    });
                }
            }
        }
    }

    async fn record_draft(
        &self,
        run: &mut StoryRun,
        store: &ArtifactStore,
        outline: Outline,
        feedback: Option<String>,
    ) -> PipelineResult<()> {
        let entry = OutlineRevision {
            revision: run.outline_history.len() as u32,
            status: OutlineStatus::Drafted,
            outline,
            feedback,
        };
        store.save_draft(&entry).await?;
        run.outline_history.push(entry);
        store.save_manifest(run).await?;
        Ok(())
    }

    // --- Characters + plot options ---

    async fn derive_cast_and_plots(
        &self,
        run: &mut StoryRun,
        approved: &ApprovedOutline,
        store: &ArtifactStore,
    ) -> PipelineResult<()> {
        let need_cast = run.cast.is_none();
        let need_plots = run.plot_options.is_empty();
        if !need_cast && !need_plots {
            info!("Using cached characters and plot options");
            return Ok(());
        }

        println!("Creating characters and plot options...");
        let topic = run.request.topic.clone();
        let story_type = run.request.story_type.clone();

        let cast_task = async {
            if need_cast {
                let attempts = self.config.retries.characters;
                Some(
                    with_structural_retry(&topic, StageName::Characters, attempts, || {
                        self.stages.characters.derive(approved)
                    })
                    .await,
                )
            } else {
                None
            }
        };
        let plot_task = async {
            if need_plots {
                Some(self.stages.plot.derive(approved, &story_type).await)
            } else {
                None
            }
        };
        let (cast, plots) = futures_util::future::join(cast_task, plot_task).await;

        let mut failure = None;
        match cast {
            Some(Ok(cast)) => {
                store.save_cast(&cast).await?;
                run.cast = Some(cast);
            }
            Some(Err(e)) => failure = Some(e),
            None => {}
        }
        match plots {
            Some(Ok(plots)) => run.plot_options = plots,
            Some(Err(e)) => {
                failure.get_or_insert(stage_failure(&topic, StageName::Plot, 1, e));
            }
            None => {}
        }
        store.save_manifest(run).await?;

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn select_plots(
        &self,
        run: &mut StoryRun,
        approved: &ApprovedOutline,
        store: &ArtifactStore,
    ) -> PipelineResult<()> {
        if run.selected_plots.is_some() {
            return Ok(());
        }

        let suggested = self
            .config
            .story
            .plot_count
            .unwrap_or_else(|| default_plot_count(run.request.episode_count));
        let mut selected = self
            .reviewer
            .select_plots(&run.plot_options, suggested)
            .map_err(PipelineError::Review)?;

        if self.config.story.check_consistency && !selected.is_empty() {
            let topic = run.request.topic.clone();
            let story_type = run.request.story_type.clone();
            println!("Checking plot consistency...");
            let issues = self
                .stages
                .consistency
                .check(approved, &story_type, &selected)
                .await
                .map_err(|e| stage_failure(&topic, StageName::Consistency, 1, e))?;

            if issues.is_empty() {
                println!("No consistency issues found.");
            } else if self.reviewer.accept_fixes(&issues).map_err(PipelineError::Review)? {
                selected = self
                    .stages
                    .consistency
                    .improve(approved, &story_type, &selected, &issues)
                    .await
                    .map_err(|e| stage_failure(&topic, StageName::Consistency, 1, e))?;
            }
            run.consistency_issues = issues;
        }

        store.save_plots(&selected).await?;
        run.selected_plots = Some(selected);
        store.save_manifest(run).await?;
        Ok(())
    }

    // --- Episodes ---

    async fn split_episodes(
        &self,
        run: &mut StoryRun,
        approved: &ApprovedOutline,
        store: &ArtifactStore,
    ) -> PipelineResult<()> {
        if !run.episodes.is_empty() {
            info!("Using cached split of {} episode(s)", run.episodes.len());
            return Ok(());
        }
        let count = run.request.episode_count;
        if count == 0 {
            return Err(PipelineError::InvalidRequest(
                "episode count must be at least 1".to_string(),
            ));
        }
        let Some(cast) = run.cast.clone() else {
            return Err(PipelineError::InvalidRequest("no characters derived".to_string()));
        };
        let plots = run.selected_plots.clone().unwrap_or_default();
        let topic = run.request.topic.clone();

        println!("Splitting the story into {} episode(s)...", count);
        let specs = with_structural_retry(&topic, StageName::Split, self.config.retries.split, || {
            self.stages.splitter.split(approved, &plots, &cast, count)
        })
        .await?;

        for spec in &specs {
            store.save_episode_spec(spec).await?;
        }
        run.episodes = specs;
        store.save_manifest(run).await?;
        Ok(())
    }

    fn check_revisions(&self, run: &StoryRun, approved: &ApprovedOutline) -> PipelineResult<()> {
        let characters = run.cast.as_ref().map_or(approved.revision(), |c| c.revision);
        for spec in &run.episodes {
            if spec.revision != characters || spec.revision != approved.revision() {
                return Err(PipelineError::RevisionMismatch {
                    characters,
                    episodes: spec.revision,
                });
            }
        }
        if characters != approved.revision() {
            return Err(PipelineError::RevisionMismatch {
                characters,
                episodes: approved.revision(),
            });
        }
        Ok(())
    }

    async fn write_episode(
        &self,
        spec: &EpisodeSpec,
        draft: Option<EpisodeContent>,
        run: &StoryRun,
        store: &ArtifactStore,
    ) -> EpisodeOutcome {
        let topic = &run.request.topic;
        let mut content = match draft {
            Some(content) => content,
            None => {
                let continuity = Continuity::for_episode(&run.episodes, spec.index);
                match self.stages.expansion.expand(spec, &continuity).await {
                    Ok(content) => content,
                    Err(e) => {
                        return EpisodeOutcome {
                            index: spec.index,
                            content: None,
                            error: Some(stage_failure(topic, StageName::Expansion, 1, e)),
                        }
                    }
                }
            }
        };

        let cast = match &run.cast {
            Some(cast) => cast,
            None => {
                return EpisodeOutcome {
                    index: spec.index,
                    content: Some(content),
                    error: Some(PipelineError::InvalidRequest("no characters derived".to_string())),
                }
            }
        };
        let narrative = content.clone();
        if let Err(e) = self
            .stages
            .dialogue
            .add_dialogue(&mut content, cast, &run.request.story_type)
            .await
        {
            return EpisodeOutcome {
                index: spec.index,
                content: Some(narrative),
                error: Some(stage_failure(topic, StageName::Dialogue, 1, e)),
            };
        }

        let error = store.save_episode_content(&content).await.err().map(PipelineError::from);
        EpisodeOutcome {
            index: spec.index,
            content: Some(content),
            error,
        }
    }

    /// Expansion then dialogue, concurrently across episodes.
    async fn write_episodes(&self, run: &mut StoryRun, store: &ArtifactStore) -> PipelineResult<()> {
        let pending: Vec<EpisodeSpec> = run.pending_episodes().into_iter().cloned().collect();
        if pending.is_empty() {
            info!("All episodes already written");
            return Ok(());
        }

        let pb = progress_bar(pending.len(), "Writing episodes")?;
        let snapshot: &StoryRun = run;
        let mut outcomes: Vec<EpisodeOutcome> = futures_util::stream::iter(pending.iter())
            .map(|spec| {
                let pb = pb.clone();
                let draft = snapshot.content(spec.index).cloned();
                async move {
                    let outcome = self.write_episode(spec, draft, snapshot, store).await;
                    pb.inc(1);
                    outcome
                }
            })
            .buffer_unordered(self.concurrency())
            .collect()
            .await;
        pb.finish_with_message("Episodes written");

        outcomes.sort_by_key(|o| o.index);
        let mut first_error = None;
        for outcome in outcomes {
            if let Some(content) = outcome.content {
                run.contents.insert(outcome.index, content);
            }
            if let Some(e) = outcome.error {
                warn!("Episode {} failed: {}", outcome.index, e);
                first_error.get_or_insert(e);
            }
        }
        store.save_manifest(run).await?;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // --- Translation ---

    async fn translate_episodes(
        &self,
        run: &mut StoryRun,
        store: &ArtifactStore,
    ) -> PipelineResult<()> {
        let languages = run.request.languages.clone();
        let jobs: Vec<(&EpisodeContent, &str)> = run
            .episodes
            .iter()
            .filter_map(|spec| run.content(spec.index))
            .flat_map(|content| languages.iter().map(move |lang| (content, lang.as_str())))
            .filter(|(content, lang)| run.translation(content.index, lang).is_none())
            .collect();
        if jobs.is_empty() {
            return Ok(());
        }

        let topic = run.request.topic.as_str();
        let pb = progress_bar(jobs.len(), "Translating")?;
        let results: Vec<PipelineResult<TranslatedEpisode>> = futures_util::stream::iter(jobs)
            .map(|(content, language)| {
                let pb = pb.clone();
                async move {
                    let translated = self
                        .stages
                        .translation
                        .translate(content, language)
                        .await
                        .map_err(|e| stage_failure(topic, StageName::Translation, 1, e))?;
                    store.save_translation(&translated).await?;
                    pb.inc(1);
                    Ok::<_, PipelineError>(translated)
                }
            })
            .buffer_unordered(self.concurrency())
            .collect()
            .await;
        pb.finish_with_message("Translations done");

        let mut first_error = None;
        for result in results {
            match result {
                Ok(translated) => run.translations.push(translated),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        let position = |lang: &str| languages.iter().position(|l| l == lang).unwrap_or(usize::MAX);
        run.translations
            .sort_by_key(|t| (t.index, position(&t.language)));
        store.save_manifest(run).await?;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // --- Narration ---

    async fn narrate_episodes(&self, run: &mut StoryRun, store: &ArtifactStore) -> PipelineResult<()> {
        let Some(narrator) = &self.narrator else {
            return Ok(());
        };
        let jobs: Vec<&EpisodeContent> = run
            .episodes
            .iter()
            .filter(|spec| !run.narrated.contains(&spec.index))
            .filter_map(|spec| run.content(spec.index))
            .collect();
        if jobs.is_empty() {
            return Ok(());
        }

        let run_id = run.run_id.as_str();
        let pb = progress_bar(jobs.len(), "Narrating")?;
        let results: Vec<PipelineResult<u32>> = futures_util::stream::iter(jobs)
            .map(|content| {
                let pb = pb.clone();
                async move {
                    narrator
                        .narrate(run_id, content.index, &content.text, store)
                        .await
                        .map_err(|source| PipelineError::Narration {
                            index: content.index,
                            source,
                        })?;
                    pb.inc(1);
                    Ok::<_, PipelineError>(content.index)
                }
            })
            .buffer_unordered(self.concurrency())
            .collect()
            .await;
        pb.finish_with_message("Narration done");

        let mut first_error = None;
        for result in results {
            match result {
                Ok(index) => run.narrated.push(index),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        run.narrated.sort_unstable();
        store.save_manifest(run).await?;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
