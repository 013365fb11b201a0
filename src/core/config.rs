use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::services::llm::LlmConfig;
use crate::services::tts::AudioConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_build")]
    pub build_folder: String,

    #[serde(default)]
    pub unattended: bool,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub story: StoryConfig,

    #[serde(default)]
    pub retries: RetryConfig,

    pub llm: LlmConfig,

    #[serde(default)]
    pub audio: AudioConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoryConfig {
    #[serde(default = "default_episode_count")]
    pub episode_count: usize,
    #[serde(default = "default_story_type")]
    pub story_type: String,
    #[serde(default)]
    pub languages: Vec<String>,
    /// Number of plot options kept in unattended mode. Derived from the
    /// episode count when unset.
    pub plot_count: Option<usize>,
    #[serde(default)]
    pub check_consistency: bool,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            episode_count: default_episode_count(),
            story_type: default_story_type(),
            languages: Vec::new(),
            plot_count: None,
            check_consistency: false,
        }
    }
}

/// Bounds for re-invoking a stage whose output broke its structural contract.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryConfig {
    /// Additional attempts after a malformed outline.
    #[serde(default = "default_outline_parse_retries")]
    pub outline_parse: u32,
    /// Total attempts for the character list.
    #[serde(default = "default_character_attempts")]
    pub characters: u32,
    /// Total attempts for the episode split.
    #[serde(default = "default_split_attempts")]
    pub split: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            outline_parse: default_outline_parse_retries(),
            characters: default_character_attempts(),
            split: default_split_attempts(),
        }
    }
}

fn default_output() -> String {
    "stories".to_string()
}
fn default_build() -> String {
    "build".to_string()
}
fn default_concurrency() -> usize {
    3
}
fn default_episode_count() -> usize {
    5
}
fn default_story_type() -> String {
    "general".to_string()
}
fn default_outline_parse_retries() -> u32 {
    2
}
fn default_character_attempts() -> u32 {
    3
}
fn default_split_attempts() -> u32 {
    3
}

impl Config {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml_ng::from_str(content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        fs::create_dir_all(&self.build_folder)?;
        Ok(())
    }
}
