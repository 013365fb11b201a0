//! Optional pass that checks selected plot options against the outline and
//! rewrites the ones that contradict it.

use crate::core::error::StageError;
use crate::core::state::{ApprovedOutline, ConsistencyIssue, PlotEnhancement, PlotSource};
use crate::services::response::extract_json;
use crate::services::stages::StageModel;
use log::{info, warn};
use serde::Deserialize;
use std::collections::BTreeSet;

pub(crate) const CHECK_SYSTEM_PROMPT: &str = "You are an expert literary editor specializing in \
narrative consistency. Find contradictions between the story outline and the plot options, or \
between the plot options themselves. Respond ONLY with a JSON array of issues, each with the fields \
plot_option_index (0-based), issue_type, severity (critical, warning or minor), description and \
suggestions (array of strings). If there are no inconsistencies, return [].";

pub(crate) const IMPROVE_SYSTEM_PROMPT: &str = "You are an expert storyteller fixing inconsistent \
plot options. Keep the core idea of each problem option but remove its inconsistencies with the \
outline. Respond ONLY with a JSON array of strings, one improved option per problem, in the order \
the problems are listed.";

#[derive(Deserialize)]
struct RawIssue {
    #[serde(alias = "plot_option_index")]
    plot_index: Option<usize>,
    #[serde(default = "unknown")]
    issue_type: String,
    #[serde(default = "warning")]
    severity: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    suggestions: Vec<String>,
}

fn unknown() -> String {
    "unknown".to_string()
}
fn warning() -> String {
    "warning".to_string()
}

fn numbered(plots: &[PlotEnhancement]) -> String {
    plots
        .iter()
        .enumerate()
        .map(|(i, p)| format!("[{}] {}", i, p.text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone)]
pub struct ConsistencyStage {
    model: StageModel,
}

impl ConsistencyStage {
    pub fn new(model: StageModel) -> Self {
        Self { model }
    }

    pub async fn check(
        &self,
        approved: &ApprovedOutline,
        story_type: &str,
        plots: &[PlotEnhancement],
    ) -> Result<Vec<ConsistencyIssue>, StageError> {
        if plots.is_empty() {
            return Ok(Vec::new());
        }
        info!("Checking {} plot option(s) for consistency", plots.len());
        let user = format!(
            "STORY TYPE: {}\nOUTLINE:\n<outline>\n{}\n</outline>\n\nPLOT OPTIONS (indexed from 0):\n{}",
            story_type,
            approved.outline().render(),
            numbered(plots)
        );
        let response = self.model.ask(CHECK_SYSTEM_PROMPT, &user).await?;

        let raw: Vec<RawIssue> = match extract_json(&response) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Could not parse consistency report ({}), assuming no issues", e);
                return Ok(Vec::new());
            }
        };

        Ok(raw
            .into_iter()
            .map(|r| ConsistencyIssue {
                plot_index: r.plot_index.filter(|&i| i < plots.len()),
                issue_type: r.issue_type,
                severity: r.severity,
                description: r.description,
                suggestions: r.suggestions,
            })
            .collect())
    }

    /// Returns `plots` with every option flagged by `issues` rewritten.
    /// Options the model gives no replacement for are kept as they were.
    pub async fn improve(
        &self,
        approved: &ApprovedOutline,
        story_type: &str,
        plots: &[PlotEnhancement],
        issues: &[ConsistencyIssue],
    ) -> Result<Vec<PlotEnhancement>, StageError> {
        let flagged: BTreeSet<usize> = issues
            .iter()
            .filter_map(|i| i.plot_index)
            .filter(|&i| i < plots.len())
            .collect();
        if flagged.is_empty() {
            return Ok(plots.to_vec());
        }

        let mut problems = String::new();
        for &idx in &flagged {
            problems.push_str(&format!("PROBLEM OPTION [{}]: {}\n", idx, plots[idx].text));
            for issue in issues.iter().filter(|i| i.plot_index == Some(idx)) {
                problems.push_str(&format!("- {}: {}\n", issue.issue_type, issue.description));
            }
        }
        let user = format!(
            "STORY TYPE: {}\nOUTLINE:\n<outline>\n{}\n</outline>\n\nPROBLEMS:\n{}\nProvide {} improved option(s).",
            story_type,
            approved.outline().render(),
            problems,
            flagged.len()
        );
        let response = self.model.ask(IMPROVE_SYSTEM_PROMPT, &user).await?;
        let replacements: Vec<String> = extract_json(&response).unwrap_or_else(|e| {
            warn!("Could not parse improved plot options: {}", e);
            Vec::new()
        });

        let mut improved = plots.to_vec();
        for (idx, text) in flagged.into_iter().zip(replacements) {
            let text = text.trim();
            if !text.is_empty() {
                improved[idx] = PlotEnhancement {
                    text: text.to_string(),
                    source: PlotSource::Improved,
                };
            }
        }
        Ok(improved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{Outline, OutlineRevision, OutlineStatus};
    use crate::services::testing::ScriptedLlm;
    use std::sync::Arc;

    fn approved() -> ApprovedOutline {
        let mut entry = OutlineRevision {
            revision: 0,
            status: OutlineStatus::Drafted,
            outline: Outline {
                title: "Skyfall".to_string(),
                events: vec!["The heist happens at night.".to_string()],
                cast: vec![],
            },
            feedback: None,
        };
        ApprovedOutline::commit(&mut entry)
    }

    fn plots(texts: &[&str]) -> Vec<PlotEnhancement> {
        texts
            .iter()
            .map(|t| PlotEnhancement {
                text: t.to_string(),
                source: PlotSource::Generated,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_check_parses_issues_and_drops_bad_indices() {
        let llm = Arc::new(ScriptedLlm::replying(
            r#"[{"plot_option_index": 1, "issue_type": "timeline", "severity": "critical",
                 "description": "The heist happens at noon."},
                {"plot_option_index": 9, "description": "out of range"}]"#,
        ));
        let stage = ConsistencyStage::new(StageModel::new(llm, "m"));

        let issues = stage
            .check(&approved(), "general", &plots(&["a", "b"]))
            .await
            .unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].plot_index, Some(1));
        assert_eq!(issues[0].severity, "critical");
        assert_eq!(issues[1].plot_index, None);
        assert_eq!(issues[1].severity, "warning");
    }

    #[tokio::test]
    async fn test_unreadable_report_means_no_issues() {
        let llm = Arc::new(ScriptedLlm::replying("Looks fine to me."));
        let stage = ConsistencyStage::new(StageModel::new(llm, "m"));
        let issues = stage.check(&approved(), "general", &plots(&["a"])).await.unwrap();
        assert!(issues.is_empty());
    }

    #[tokio::test]
    async fn test_improve_replaces_flagged_options_by_index() {
        let llm = Arc::new(ScriptedLlm::replying(r#"["The heist happens at midnight."]"#));
        let stage = ConsistencyStage::new(StageModel::new(llm.clone(), "m"));
        let issue = ConsistencyIssue {
            plot_index: Some(1),
            issue_type: "timeline".to_string(),
            severity: "critical".to_string(),
            description: "noon".to_string(),
            suggestions: vec![],
        };

        let improved = stage
            .improve(&approved(), "general", &plots(&["keep", "noon heist"]), &[issue])
            .await
            .unwrap();
        assert_eq!(improved[0].text, "keep");
        assert_eq!(improved[1].text, "The heist happens at midnight.");
        assert_eq!(improved[1].source, PlotSource::Improved);
        assert!(llm.calls()[0].user.contains("PROBLEM OPTION [1]: noon heist"));
    }

    #[tokio::test]
    async fn test_improve_without_flags_makes_no_call() {
        let llm = Arc::new(ScriptedLlm::replying("[]"));
        let stage = ConsistencyStage::new(StageModel::new(llm.clone(), "m"));
        let original = plots(&["a"]);
        let improved = stage.improve(&approved(), "general", &original, &[]).await.unwrap();
        assert_eq!(improved, original);
        assert!(llm.calls().is_empty());
    }
}
