//! The human side of the pipeline: outline approval, plot selection and
//! consistency fixes.

use crate::core::state::{ConsistencyIssue, OutlineRevision, PlotEnhancement};
use anyhow::Result;
use inquire::{Confirm, MultiSelect, Select, Text};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    Revise(String),
    Abort,
}

pub trait OutlineReviewer: Send + Sync {
    fn review(&self, draft: &OutlineRevision) -> Result<ReviewDecision>;

    /// Chooses which plot options to weave into the episodes. `suggested`
    /// is how many an unattended run would keep.
    fn select_plots(
        &self,
        options: &[PlotEnhancement],
        suggested: usize,
    ) -> Result<Vec<PlotEnhancement>>;

    fn accept_fixes(&self, issues: &[ConsistencyIssue]) -> Result<bool>;
}

/// Approves the first draft, keeps the first `suggested` plots and applies
/// every consistency fix.
#[derive(Debug, Default)]
pub struct AutoReviewer;

impl OutlineReviewer for AutoReviewer {
    fn review(&self, _draft: &OutlineRevision) -> Result<ReviewDecision> {
        Ok(ReviewDecision::Approve)
    }

    fn select_plots(
        &self,
        options: &[PlotEnhancement],
        suggested: usize,
    ) -> Result<Vec<PlotEnhancement>> {
        Ok(options.iter().take(suggested).cloned().collect())
    }

    fn accept_fixes(&self, _issues: &[ConsistencyIssue]) -> Result<bool> {
        Ok(true)
    }
}

/// Options whose label was picked, in offer order. `None` when nothing was picked.
fn picked_plots(
    options: &[PlotEnhancement],
    labels: &[String],
    picked: &[String],
) -> Option<Vec<PlotEnhancement>> {
    let selected: Vec<PlotEnhancement> = labels
        .iter()
        .zip(options)
        .filter(|(label, _)| picked.contains(label))
        .map(|(_, option)| option.clone())
        .collect();
    (!selected.is_empty()).then_some(selected)
}

#[derive(Debug, Default)]
pub struct InteractiveReviewer;

const APPROVE: &str = "Approve outline";
const REVISE: &str = "Request changes";
const ABORT: &str = "Abort";

impl OutlineReviewer for InteractiveReviewer {
    fn review(&self, draft: &OutlineRevision) -> Result<ReviewDecision> {
        println!("\n=== OUTLINE (revision {}) ===\n", draft.revision);
        println!("{}", draft.outline.render());

        let choice = Select::new("What next?", vec![APPROVE, REVISE, ABORT]).prompt()?;
        match choice {
            APPROVE => Ok(ReviewDecision::Approve),
            REVISE => {
                let feedback = Text::new("What should change?").prompt()?;
                if feedback.trim().is_empty() {
                    // Nothing to refine with, ask again
                    return self.review(draft);
                }
                Ok(ReviewDecision::Revise(feedback))
            }
            _ => Ok(ReviewDecision::Abort),
        }
    }

    fn select_plots(
        &self,
        options: &[PlotEnhancement],
        suggested: usize,
    ) -> Result<Vec<PlotEnhancement>> {
        if options.is_empty() {
            return Ok(Vec::new());
        }
        let labels: Vec<String> = options
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. {}", i + 1, p.text))
            .collect();
        let defaults: Vec<usize> = (0..suggested.min(options.len())).collect();

        loop {
            let picked = MultiSelect::new("Select plot options to use:", labels.clone())
                .with_default(&defaults)
                .prompt()?;
            match picked_plots(options, &labels, &picked) {
                Some(selected) => return Ok(selected),
                None => println!("No options selected. Please try again."),
            }
        }
    }

    fn accept_fixes(&self, issues: &[ConsistencyIssue]) -> Result<bool> {
        println!("\n=== CONSISTENCY REPORT ===\n");
        for issue in issues {
            let target = issue
                .plot_index
                .map(|i| format!("option {}", i + 1))
                .unwrap_or_else(|| "story".to_string());
            println!("[{}] {} ({}): {}", issue.severity, issue.issue_type, target, issue.description);
            for suggestion in &issue.suggestions {
                println!("    - {}", suggestion);
            }
        }
        Ok(Confirm::new("Rewrite the flagged plot options?")
            .with_default(true)
            .prompt()?)
    }
}
