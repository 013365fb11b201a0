use crate::core::config::Config;
use crate::services::tts::{voices_for_provider, Voice};
use anyhow::{anyhow, Result};
use inquire::Select;
use std::path::Path;

/// Asks for whatever the config still lacks and saves it back to `config_path`.
pub fn run_setup(config: &mut Config, config_path: &Path) -> Result<()> {
    let mut needs_save = false;

    if config.audio.enabled && config.audio.voice.is_none() {
        let voices = voices_for_provider(&config.audio.provider)?;
        if voices.is_empty() {
            return Err(anyhow!(
                "No voices available for TTS provider {}",
                config.audio.provider
            ));
        }
        config.audio.voice = Some(select_voice("Select Narrator Voice:", &voices)?);
        needs_save = true;
    }

    if needs_save {
        config.save_to(config_path)?;
        println!("Configuration saved to {}", config_path.display());
    }

    Ok(())
}

fn voice_label(voice: &Voice) -> String {
    format!("{} - {}", voice.name, voice.description)
}

fn select_voice(prompt: &str, voices: &[Voice]) -> Result<String> {
    let options: Vec<String> = voices.iter().map(voice_label).collect();
    let selection = Select::new(prompt, options).prompt()?;
    voices
        .iter()
        .find(|v| voice_label(v) == selection)
        .map(|v| v.name.clone())
        .ok_or_else(|| anyhow!("Unknown voice: {}", selection))
}
