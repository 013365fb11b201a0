use anyhow::{Context, Result};
use clap::Parser;
use inquire::Text;
use std::path::PathBuf;
use std::sync::Arc;
use storyloom::core::config::{Config, DEFAULT_CONFIG_PATH};
use storyloom::core::io::{NativeStorage, Storage};
use storyloom::core::state::StoryRequest;
use storyloom::services::llm::create_llm;
use storyloom::services::review::{AutoReviewer, InteractiveReviewer, OutlineReviewer};
use storyloom::services::setup::run_setup;
use storyloom::services::tts::{create_tts_client, Narrator};
use storyloom::services::workflow::{PipelineOrchestrator, Stages};

/// Generate multi-episode stories with an LLM, from outline to translated episodes.
#[derive(Parser, Debug)]
#[command(name = "storyloom")]
#[command(version)]
struct Cli {
    /// Story topic. Asked for interactively when omitted.
    topic: Option<String>,

    /// Number of episodes to split the story into.
    #[arg(short, long)]
    episodes: Option<usize>,

    /// Story type, e.g. general, ghost, sci-fi, drama.
    #[arg(short = 't', long)]
    story_type: Option<String>,

    /// Target language for translations. Repeat for several.
    #[arg(short, long = "language")]
    languages: Vec<String>,

    /// Path to the configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "STORYLOOM_CONFIG")]
    config: PathBuf,

    /// Approve the first outline and pick plot options without prompting.
    #[arg(long)]
    unattended: bool,

    /// Continue an interrupted run from its directory.
    #[arg(long, value_name = "RUN_DIR")]
    resume: Option<PathBuf>,
}

enum Job {
    Start(StoryRequest),
    Resume(PathBuf),
}

/// CLI flags win over the `story` section of the config.
fn build_request(cli: &Cli, config: &Config) -> Result<StoryRequest> {
    let topic = match &cli.topic {
        Some(topic) => topic.clone(),
        None if !config.unattended => Text::new("Story topic:").prompt()?,
        None => anyhow::bail!("A topic is required in unattended mode"),
    };
    let languages = if cli.languages.is_empty() {
        config.story.languages.clone()
    } else {
        cli.languages.clone()
    };
    Ok(StoryRequest {
        topic,
        episode_count: cli.episodes.unwrap_or(config.story.episode_count),
        story_type: cli
            .story_type
            .clone()
            .unwrap_or_else(|| config.story.story_type.clone()),
        languages,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match Config::load_from(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please ensure '{}' exists with valid LLM settings.", cli.config.display());
            return Err(e);
        }
    };
    if cli.unattended {
        config.unattended = true;
    }
    config.ensure_directories()?;

    if !config.unattended {
        run_setup(&mut config, &cli.config)?;
    }

    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let llm = create_llm(&config.llm)?;
    let stages = Stages::from_config(llm, &config.llm)?;

    let narrator = if config.audio.enabled {
        let tts = create_tts_client(&config.audio)?;
        Some(Narrator::new(
            tts,
            storage.clone(),
            &config.build_folder,
            config.audio.voice_config()?,
            config.audio.max_chars,
        ))
    } else {
        None
    };

    let reviewer: Box<dyn OutlineReviewer> = if config.unattended {
        Box::new(AutoReviewer)
    } else {
        Box::new(InteractiveReviewer)
    };

    let job = match &cli.resume {
        Some(dir) => Job::Resume(dir.clone()),
        None => Job::Start(build_request(&cli, &config)?),
    };

    let pipeline = PipelineOrchestrator::new(config, stages, reviewer, narrator, storage);
    let run = match job {
        Job::Resume(dir) => pipeline.resume(&dir).await,
        Job::Start(request) => pipeline.run(request).await,
    }
    .context("Story generation failed")?;

    println!(
        "Done: {} episode(s), {} translation(s), {} narrated.",
        run.episodes.len(),
        run.translations.len(),
        run.narrated.len()
    );
    Ok(())
}
