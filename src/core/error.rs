//! Error taxonomy for the story pipeline.
//!
//! Gateway errors describe what the LLM transport reported, stage errors add
//! the structural checks each stage performs on the model output, and
//! pipeline errors carry the run context (topic, stage, attempts) needed to
//! resume by hand.

use std::fmt;
use thiserror::Error;

/// Failure reported by an LLM provider after its own retry policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Rate limits, timeouts, 5xx, dropped connections. Worth retrying.
    #[error("transient gateway error: {0}")]
    Transient(String),

    /// Bad credentials, bad request, unparseable body. Propagates at once.
    #[error("fatal gateway error: {0}")]
    Fatal(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            GatewayError::Transient(err.to_string())
        } else {
            GatewayError::Fatal(err.to_string())
        }
    }
}

/// Errors produced by a single stage call.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("generation failed: {0}")]
    Generation(#[from] GatewayError),

    #[error("malformed outline: {0}")]
    MalformedOutline(String),

    #[error("malformed character list: {0}")]
    MalformedCharacters(String),

    #[error("expected {expected} episodes, model produced {actual}")]
    SplitCountMismatch { expected: usize, actual: usize },

    #[error("malformed episode split: {0}")]
    MalformedEpisodes(String),

    #[error("dialogue requested with no characters while the outline names {named}")]
    MissingCharacterContext { named: usize },
}

impl StageError {
    /// Postcondition violations on model output. A fresh call may succeed.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            StageError::MalformedOutline(_)
                | StageError::MalformedCharacters(_)
                | StageError::SplitCountMismatch { .. }
                | StageError::MalformedEpisodes(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageName {
    Outline,
    Refine,
    Characters,
    Plot,
    Consistency,
    Split,
    Expansion,
    Dialogue,
    Translation,
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageName::Outline => "outline",
            StageName::Refine => "outline-refine",
            StageName::Characters => "characters",
            StageName::Plot => "plot-enrichment",
            StageName::Consistency => "consistency",
            StageName::Split => "episode-split",
            StageName::Expansion => "episode-expansion",
            StageName::Dialogue => "dialogue",
            StageName::Translation => "translation",
        };
        f.write_str(name)
    }
}

/// Unrecovered errors surfaced to the caller of the orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("stage `{stage}` failed for topic {topic:?} after {attempts} attempt(s): {source}")]
    Stage {
        topic: String,
        stage: StageName,
        attempts: u32,
        #[source]
        source: StageError,
    },

    #[error("outline review for topic {topic:?} aborted after {revisions} revision(s)")]
    Aborted { topic: String, revisions: usize },

    #[error("artifacts derived from different outline revisions (characters: {characters}, episodes: {episodes})")]
    RevisionMismatch { characters: u32, episodes: u32 },

    #[error("invalid story request: {0}")]
    InvalidRequest(String),

    #[error("review failed: {0:#}")]
    Review(anyhow::Error),

    #[error("narration of episode {index} failed: {source:#}")]
    Narration {
        index: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("artifact storage failed: {0:#}")]
    Artifact(#[from] anyhow::Error),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
