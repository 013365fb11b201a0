//! Scripted gateway used by the stage and workflow tests.

use crate::core::error::GatewayError;
use crate::services::llm::{GatewayResult, LlmClient};
use crate::services::stages::{
    characters, consistency, dialogue, expansion, outline, plot, splitter, translation,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub model: String,
    pub system: String,
    pub user: String,
}

type Responder = dyn Fn(&Call) -> GatewayResult<String> + Send + Sync;

pub(crate) struct ScriptedLlm {
    responder: Box<Responder>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl fmt::Debug for ScriptedLlm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedLlm")
            .field("calls", &self.calls.lock().map(|c| c.len()).unwrap_or(0))
            .finish()
    }
}

impl ScriptedLlm {
    pub fn new(responder: impl Fn(&Call) -> GatewayResult<String> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn replying(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    /// Answers in order; the last answer repeats once the script runs out.
    pub fn sequence(answers: Vec<GatewayResult<String>>) -> Self {
        let queue = Mutex::new(VecDeque::from(answers));
        Self::new(move |_| {
            let mut queue = queue.lock().unwrap();
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue
                    .front()
                    .cloned()
                    .unwrap_or_else(|| Err(GatewayError::Fatal("script exhausted".into())))
            }
        })
    }

    /// A model that plays every stage of the pipeline.
    pub fn story() -> Self {
        Self::new(story_responder)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, system: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.system == system)
            .collect()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(&self, model: &str, system: &str, user: &str) -> GatewayResult<String> {
        let call = Call {
            model: model.to_string(),
            system: system.to_string(),
            user: user.to_string(),
        };
        self.calls.lock().unwrap().push(call.clone());
        (self.responder)(&call)
    }
}

/// Plays the story like [`story_responder`] but sleeps first, longest for the
/// earliest episodes and for the character list, so concurrent calls finish
/// in reverse submission order.
#[derive(Debug, Default)]
pub(crate) struct DelayedLlm {
    pub finished: Arc<Mutex<Vec<Call>>>,
}

fn delay_for(call: &Call) -> u64 {
    let episode = field(&call.user, "EPISODE NUMBER")
        .or_else(|| field(&call.user, "TITLE").and_then(|t| t.strip_prefix("Part ")))
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or(0);
    let earlier_is_slower = 4u64.saturating_sub(episode) * 10;
    match call.system.as_str() {
        s if s == characters::SYSTEM_PROMPT => 40,
        s if s == translation::SYSTEM_PROMPT => {
            if field(&call.user, "TARGET LANGUAGE") == Some("hindi") {
                earlier_is_slower + 5
            } else {
                earlier_is_slower
            }
        }
        s if s == expansion::SYSTEM_PROMPT || s == dialogue::SYSTEM_PROMPT => earlier_is_slower,
        _ => 0,
    }
}

#[async_trait]
impl LlmClient for DelayedLlm {
    async fn chat(&self, model: &str, system: &str, user: &str) -> GatewayResult<String> {
        let call = Call {
            model: model.to_string(),
            system: system.to_string(),
            user: user.to_string(),
        };
        tokio::time::sleep(Duration::from_millis(delay_for(&call))).await;
        let answer = story_responder(&call);
        self.finished.lock().unwrap().push(call);
        answer
    }
}

/// Value of a `LABEL: value` line in a prompt.
pub(crate) fn field<'a>(prompt: &'a str, label: &str) -> Option<&'a str> {
    let prefix = format!("{}: ", label);
    prompt
        .lines()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .map(str::trim)
}

/// Text between `<tag>` and `</tag>` in a prompt.
pub(crate) fn section<'a>(prompt: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>\n", tag);
    let close = format!("\n</{}>", tag);
    let start = prompt.find(&open)? + open.len();
    let end = prompt[start..].find(&close)? + start;
    Some(&prompt[start..end])
}

pub(crate) fn outline_json(title: &str) -> String {
    serde_json::json!({
        "title": title,
        "events": ["The crew gathers above the clouds.", "The vault drifts into a storm.", "The getaway."],
        "cast": ["Mira", "Tobin"],
    })
    .to_string()
}

pub(crate) fn split_json(count: usize) -> String {
    let episodes: Vec<_> = (1..=count)
        .map(|n| {
            serde_json::json!({
                "number": n,
                "title": format!("Part {}", n),
                "synopsis": format!("Synopsis of part {}.", n),
                "cliffhanger": if n < count { format!("Hook {}", n) } else { String::new() },
            })
        })
        .collect();
    serde_json::json!({ "episodes": episodes }).to_string()
}

pub(crate) fn story_responder(call: &Call) -> GatewayResult<String> {
    let user = call.user.as_str();
    let answer = match call.system.as_str() {
        s if s == outline::SYSTEM_PROMPT => outline_json("Skyfall"),
        s if s == outline::REFINE_SYSTEM_PROMPT => {
            let feedback = field(user, "FEEDBACK").unwrap_or_default();
            outline_json(&format!("Skyfall ({})", feedback))
        }
        s if s == characters::SYSTEM_PROMPT => serde_json::json!({
            "characters": [
                { "name": "Mira", "role": "protagonist", "description": "A pilot.", "motivation": "Freedom" },
                { "name": "Tobin", "role": "antagonist", "description": "A warden.", "motivation": "Order" },
            ]
        })
        .to_string(),
        s if s == plot::SYSTEM_PROMPT => {
            r#"["The vault is a decoy", "The pilot was hired by the warden", "The city is sinking", "An old map resurfaces"]"#
                .to_string()
        }
        s if s == consistency::CHECK_SYSTEM_PROMPT => "[]".to_string(),
        s if s == consistency::IMPROVE_SYSTEM_PROMPT => "[]".to_string(),
        s if s == splitter::SYSTEM_PROMPT => {
            let count = field(user, "EPISODE COUNT")
                .and_then(|n| n.parse().ok())
                .unwrap_or(1);
            split_json(count)
        }
        s if s == expansion::SYSTEM_PROMPT => {
            let number = field(user, "EPISODE NUMBER").unwrap_or("?");
            format!("Narrative of episode {}.", number)
        }
        s if s == dialogue::SYSTEM_PROMPT => {
            let number = field(user, "EPISODE NUMBER").unwrap_or("?");
            format!("\"Go,\" said Mira. Dialogue of episode {}.", number)
        }
        s if s == translation::SYSTEM_PROMPT => {
            let language = field(user, "TARGET LANGUAGE").unwrap_or("?");
            let text = section(user, "text").unwrap_or_default();
            format!("[{}] {}", language, text)
        }
        _ => return Err(GatewayError::Fatal("unexpected prompt".to_string())),
    };
    Ok(answer)
}
