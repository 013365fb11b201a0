use crate::core::artifacts::ArtifactStore;
use crate::core::io::Storage;
use crate::services::llm::resolve_api_key;
use crate::utils::audio::merge_audio;
use crate::utils::text::chunk_text;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AudioConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default)]
    pub api_key: String,
    pub base_url: Option<String>,
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini-tts".to_string()
}
fn default_format() -> String {
    "mp3".to_string()
}
fn default_max_chars() -> usize {
    4000
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            model: default_model(),
            voice: None,
            instructions: None,
            format: default_format(),
            max_chars: default_max_chars(),
            api_key: String::new(),
            base_url: None,
        }
    }
}

impl AudioConfig {
    pub fn voice_config(&self) -> Result<VoiceConfig> {
        Ok(VoiceConfig {
            voice: self.voice.clone().context("No narrator voice configured")?,
            instructions: self.instructions.clone(),
            format: self.format.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceConfig {
    pub voice: String,
    pub instructions: Option<String>,
    pub format: String,
}

#[derive(Debug, Clone)]
pub struct Voice {
    pub name: String,
    pub description: String,
}

#[async_trait]
pub trait TtsClient: Send + Sync + Debug {
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> Result<Vec<u8>>;
}

pub fn create_tts_client(config: &AudioConfig) -> Result<Arc<dyn TtsClient>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiTtsClient::new(config)?)),
        _ => Err(anyhow!("Unknown TTS provider: {}", config.provider)),
    }
}

// --- OpenAI ---

const OPENAI_VOICES: &[(&str, &str)] = &[
    ("alloy", "neutral, balanced"),
    ("ash", "clear, direct"),
    ("ballad", "soft, melodic"),
    ("coral", "warm, friendly"),
    ("echo", "calm, measured"),
    ("fable", "expressive storyteller"),
    ("nova", "bright, energetic"),
    ("onyx", "deep, authoritative"),
    ("sage", "gentle, thoughtful"),
    ("shimmer", "light, airy"),
    ("verse", "dynamic, dramatic"),
];

#[derive(Debug)]
pub struct OpenAiTtsClient {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiTtsClient {
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let api_key = resolve_api_key(&config.api_key, "OPENAI_API_KEY")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            api_key,
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
            client,
        })
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
    response_format: &'a str,
}

#[async_trait]
impl TtsClient for OpenAiTtsClient {
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> Result<Vec<u8>> {
        let url = format!("{}/audio/speech", self.base_url);
        let body = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &voice.voice,
            instructions: voice.instructions.as_deref(),
            response_format: &voice.format,
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("TTS request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("TTS API error ({}): {}", status, error_text));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Voices offered during setup, without needing credentials.
pub fn voices_for_provider(provider: &str) -> Result<Vec<Voice>> {
    match provider {
        "openai" => Ok(openai_voices()),
        _ => Err(anyhow!("Unknown TTS provider: {}", provider)),
    }
}

pub fn openai_voices() -> Vec<Voice> {
    OPENAI_VOICES
        .iter()
        .map(|(name, description)| Voice {
            name: name.to_string(),
            description: description.to_string(),
        })
        .collect()
}

// --- Narration ---

/// Turns episode text into one audio file per episode.
#[derive(Clone)]
pub struct Narrator {
    client: Arc<dyn TtsClient>,
    storage: Arc<dyn Storage>,
    build_folder: String,
    voice: VoiceConfig,
    max_chars: usize,
}

impl Narrator {
    pub fn new(
        client: Arc<dyn TtsClient>,
        storage: Arc<dyn Storage>,
        build_folder: &str,
        voice: VoiceConfig,
        max_chars: usize,
    ) -> Self {
        Self {
            client,
            storage,
            build_folder: build_folder.to_string(),
            voice,
            max_chars,
        }
    }

    /// Synthesizes `text` chunk by chunk into the build folder, merges the
    /// chunks into `audio/NNN.<format>` and removes them. Returns the
    /// artifact path relative to the run directory.
    pub async fn narrate(
        &self,
        run_id: &str,
        index: u32,
        text: &str,
        artifacts: &ArtifactStore,
    ) -> Result<String> {
        let chunks = chunk_text(text, self.max_chars);
        if chunks.is_empty() {
            return Err(anyhow!("Episode {} has no text to narrate", index));
        }
        info!("Narrating episode {} in {} chunk(s)", index, chunks.len());

        let mut chunk_paths = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let path = Path::new(&self.build_folder)
                .join(format!("{}_{:03}_{:03}.{}", run_id, index, i, self.voice.format))
                .to_string_lossy()
                .to_string();
            let audio = self
                .client
                .synthesize(chunk, &self.voice)
                .await
                .with_context(|| format!("Failed to synthesize chunk {} of episode {}", i, index))?;
            self.storage.write(&path, &audio).await?;
            debug!("Wrote {}", path);
            chunk_paths.push(path);
        }

        let mut buffers = Vec::with_capacity(chunk_paths.len());
        for path in &chunk_paths {
            buffers.push(self.storage.read(path).await?);
        }
        let merged = merge_audio(&self.voice.format, &buffers)?;

        let relative = ArtifactStore::audio_file(index, &self.voice.format);
        artifacts.write_bytes(&relative, &merged).await?;

        for path in &chunk_paths {
            self.storage.delete(path).await?;
        }
        Ok(relative)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use std::sync::Mutex;

    /// Returns the text bytes as "audio" and records every chunk.
    #[derive(Debug, Default)]
    pub(crate) struct EchoTts {
        pub chunks: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl TtsClient for EchoTts {
        async fn synthesize(&self, text: &str, _voice: &VoiceConfig) -> Result<Vec<u8>> {
            self.chunks.lock().unwrap().push(text.to_string());
            Ok(text.as_bytes().to_vec())
        }
    }

    pub(crate) fn voice() -> VoiceConfig {
        VoiceConfig {
            voice: "nova".to_string(),
            instructions: None,
            format: "mp3".to_string(),
        }
    }

    #[test]
    fn test_audio_config_defaults() {
        let config: AudioConfig = serde_yaml_ng::from_str("enabled: true\n").unwrap();
        assert!(config.enabled);
        assert_eq!(config.provider, "openai");
        assert_eq!(config.format, "mp3");
        assert_eq!(config.max_chars, 4000);
        assert!(config.voice_config().is_err());
    }

    #[tokio::test]
    async fn test_narrate_merges_chunks_and_cleans_build_folder() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let build = dir.path().join("build");
        let build_str = build.to_string_lossy().to_string();
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
        let artifacts = ArtifactStore::new(dir.path().join("run"), storage.clone());

        let tts = Arc::new(EchoTts::default());
        let narrator = Narrator::new(tts.clone(), storage.clone(), &build_str, voice(), 12);

        let relative = narrator
            .narrate("run", 4, "First part.\n\nSecond part.", &artifacts)
            .await?;
        assert_eq!(relative, "audio/004.mp3");

        let merged = storage.read(&artifacts.path(&relative)).await?;
        assert_eq!(merged, b"First part.Second part.".to_vec());
        assert_eq!(tts.chunks.lock().unwrap().len(), 2);
        assert!(storage.list(&build_str).await?.is_empty());
        Ok(())
    }
}
