//! Screening executor.
//!
//! Applies a [`ScreeningStrategy`] to every parsed article, in input order, and
//! writes the decisions to the results CSV.

use crate::bibtex::ArticleRecord;
use crate::error::Result;
use crate::logic::{Decision, ScreeningStrategy, Verdict};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

/// Reasoning used when an article has neither title nor abstract
pub const INSUFFICIENT_INFORMATION: &str = "insufficient information";

/// CSV column order for the results table
pub const RESULT_COLUMNS: &[&str] = &["identifier", "decision", "reasoning"];

/// One row of the results table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScreeningDecision {
    pub identifier: String,
    pub decision: Decision,
    pub reasoning: String,
}

/// Counts per decision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScreeningSummary {
    pub total: usize,
    pub included: usize,
    pub excluded: usize,
}

impl ScreeningSummary {
    pub fn from_decisions(decisions: &[ScreeningDecision]) -> Self {
        let included = decisions
            .iter()
            .filter(|d| d.decision == Decision::Include)
            .count();
        Self {
            total: decisions.len(),
            included,
            excluded: decisions.len() - included,
        }
    }
}

/// Screen every article with `strategy`.
///
/// Articles with an empty title and abstract never reach the strategy; they
/// are excluded as [`INSUFFICIENT_INFORMATION`].
pub fn screen_articles<S: ScreeningStrategy + ?Sized>(
    strategy: &S,
    articles: &[ArticleRecord],
) -> Vec<ScreeningDecision> {
    info!(
        count = articles.len(),
        strategy = strategy.name(),
        "Starting screening"
    );

    let decisions: Vec<ScreeningDecision> = articles
        .iter()
        .map(|article| {
            let verdict = if article.title.trim().is_empty() && article.abstract_text.trim().is_empty() {
                Verdict::exclude(INSUFFICIENT_INFORMATION)
            } else {
                strategy.evaluate(article)
            };
            debug!(
                id = %article.identifier,
                decision = %verdict.decision,
                "Article screened"
            );
            ScreeningDecision {
                identifier: article.identifier.clone(),
                decision: verdict.decision,
                reasoning: verdict.reasoning,
            }
        })
        .collect();

    let summary = ScreeningSummary::from_decisions(&decisions);
    info!(
        total = summary.total,
        included = summary.included,
        excluded = summary.excluded,
        "Screening complete"
    );
    decisions
}

/// Write decisions to CSV. The header is written even when there are no rows.
pub fn write_results(path: &Path, decisions: &[ScreeningDecision]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;

    wtr.write_record(RESULT_COLUMNS)?;
    for item in decisions {
        wtr.serialize(item)?;
    }
    wtr.flush()?;

    info!(path = %path.display(), rows = decisions.len(), "Saved screening results");
    Ok(())
}
