//! Screening strategies.
//!
//! Every way of deciding on an article goes through [`ScreeningStrategy`]:
//! the keyword policy derived directly from a [`CriteriaModel`]
//! ([`ReferenceStrategy`]) and the decision tables written by the AI agent
//! ([`TableStrategy`]). Generated logic is data interpreted here, never code
//! executed by the process.

use crate::bibtex::ArticleRecord;
use crate::criteria::CriteriaModel;
use crate::error::{Result, ScreenError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Screening verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    #[serde(alias = "include", alias = "INCLUDE")]
    Include,
    #[serde(alias = "exclude", alias = "EXCLUDE")]
    Exclude,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Decision::Include => "Include",
            Decision::Exclude => "Exclude",
        })
    }
}

/// Decision plus the rationale behind it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    pub reasoning: String,
}

impl Verdict {
    pub fn include(reasoning: impl Into<String>) -> Self {
        Self {
            decision: Decision::Include,
            reasoning: reasoning.into(),
        }
    }

    pub fn exclude(reasoning: impl Into<String>) -> Self {
        Self {
            decision: Decision::Exclude,
            reasoning: reasoning.into(),
        }
    }
}

/// Fixed decision interface shared by all screening logic.
pub trait ScreeningStrategy {
    /// Short label used in logs
    fn name(&self) -> &str;

    /// Decide on one article. Must be deterministic.
    fn evaluate(&self, article: &ArticleRecord) -> Verdict;
}

/// Case folding and brace stripping applied to both haystack and needles
#[derive(Debug, Clone, Copy)]
struct Matcher {
    case_sensitive: bool,
}

impl Matcher {
    fn prepare(&self, text: &str) -> String {
        let text: String = text.chars().filter(|c| !matches!(c, '{' | '}')).collect();
        if self.case_sensitive {
            text
        } else {
            text.to_lowercase()
        }
    }

    /// Terms of `terms` found in the prepared haystack, in configured order.
    fn hits<'t>(&self, haystack: &str, terms: &'t [String]) -> Vec<&'t str> {
        terms
            .iter()
            .filter(|t| {
                let needle = self.prepare(t);
                !needle.is_empty() && haystack.contains(&needle)
            })
            .map(String::as_str)
            .collect()
    }
}

/// Keyword policy built straight from the criteria.
///
/// 1. any exclusion term in title or abstract excludes, unless an exception
///    term is present as well;
/// 2. every non-empty inclusion category must match title or abstract (one is
///    enough when `require_all_inclusion_categories` is off);
/// 3. with `require_primary_in_title`, a primary-category term must be in the
///    title itself.
pub struct ReferenceStrategy {
    criteria: CriteriaModel,
    matcher: Matcher,
    exceptions: Vec<String>,
    primaries: Vec<String>,
}

impl ReferenceStrategy {
    pub fn new(criteria: CriteriaModel) -> Self {
        let matcher = Matcher {
            case_sensitive: criteria.case_sensitive(),
        };
        let exceptions = criteria.exception_keywords();
        let primaries = criteria.primary_categories();
        Self {
            criteria,
            matcher,
            exceptions,
            primaries,
        }
    }

    pub fn criteria(&self) -> &CriteriaModel {
        &self.criteria
    }
}

impl ScreeningStrategy for ReferenceStrategy {
    fn name(&self) -> &str {
        "reference"
    }

    fn evaluate(&self, article: &ArticleRecord) -> Verdict {
        let title = self.matcher.prepare(&article.title);
        let both = format!("{} {}", title, self.matcher.prepare(&article.abstract_text));

        let exclusion_hits: Vec<String> = self
            .criteria
            .exclusion
            .iter()
            .filter_map(|(category, terms)| {
                let hits = self.matcher.hits(&both, terms);
                (!hits.is_empty()).then(|| format!("{} ({})", category, hits.join(", ")))
            })
            .collect();
        let exception_hits = self.matcher.hits(&both, &self.exceptions);

        if !exclusion_hits.is_empty() && exception_hits.is_empty() {
            return Verdict::exclude(format!(
                "Matched exclusion criteria: {}",
                exclusion_hits.join("; ")
            ));
        }

        let mut matched = Vec::new();
        let mut missing = Vec::new();
        for category in self.criteria.inclusion_categories() {
            let Some(terms) = self.criteria.inclusion.get(category).filter(|t| !t.is_empty()) else {
                continue;
            };
            let hits = self.matcher.hits(&both, terms);
            if hits.is_empty() {
                missing.push(category);
            } else {
                matched.push(format!("{} ({})", category, hits.join(", ")));
            }
        }

        let inclusion_failed = if self.criteria.require_all_inclusion_categories() {
            !missing.is_empty()
        } else {
            matched.is_empty() && !missing.is_empty()
        };
        if inclusion_failed {
            return Verdict::exclude(format!(
                "No inclusion keywords matched for: {}",
                missing.join(", ")
            ));
        }

        if self.criteria.require_primary_in_title() {
            let in_title = self.primaries.iter().any(|category| {
                self.criteria
                    .inclusion
                    .get(category)
                    .map(|terms| !self.matcher.hits(&title, terms).is_empty())
                    .unwrap_or(false)
            });
            if !in_title {
                return Verdict::exclude(format!(
                    "Primary keyword not found in title ({})",
                    self.primaries.join(", ")
                ));
            }
        }

        let mut reasoning = if matched.is_empty() {
            "No exclusion criteria matched".to_string()
        } else {
            format!("Matched inclusion criteria: {}", matched.join("; "))
        };
        if !exclusion_hits.is_empty() {
            reasoning.push_str(&format!(
                "; exclusion {} overridden by exception ({})",
                exclusion_hits.join("; "),
                exception_hits.join(", ")
            ));
        }
        Verdict::include(reasoning)
    }
}

/// Article field a table condition looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Title,
    Abstract,
    /// Title or abstract
    Any,
}

/// Boolean condition over named term groups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Some term of `group` occurs in `field`
    Match { group: String, field: Field },
    /// `field` is blank
    Empty { field: Field },
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

/// One step of the decision list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRule {
    pub when: Condition,
    pub decision: Decision,
    pub reason: String,
}

/// Outcome applied when no rule fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub decision: Decision,
    pub reason: String,
}

/// Serialized screening logic produced by the AI agent.
///
/// Rules are tried in order and the first one whose condition holds decides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTable {
    #[serde(default)]
    pub case_sensitive: bool,
    pub groups: BTreeMap<String, Vec<String>>,
    pub rules: Vec<TableRule>,
    pub default: Outcome,
}

impl DecisionTable {
    /// Parse and validate a table from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let table: DecisionTable = serde_json::from_str(text)
            .map_err(|e| ScreenError::Validation(format!("Not a decision table: {}", e)))?;
        table.validate()?;
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let table = Self::from_json(&text)?;
        info!(
            path = %path.display(),
            groups = table.groups.len(),
            rules = table.rules.len(),
            "Loaded decision table"
        );
        Ok(table)
    }

    /// Every group a rule refers to must be declared.
    pub fn validate(&self) -> Result<()> {
        for (idx, rule) in self.rules.iter().enumerate() {
            let mut missing = Vec::new();
            collect_unknown_groups(&rule.when, &self.groups, &mut missing);
            if !missing.is_empty() {
                return Err(ScreenError::Validation(format!(
                    "rule {} references undefined group(s): {}",
                    idx + 1,
                    missing.join(", ")
                )));
            }
        }
        Ok(())
    }
}

fn collect_unknown_groups(
    cond: &Condition,
    groups: &BTreeMap<String, Vec<String>>,
    missing: &mut Vec<String>,
) {
    match cond {
        Condition::Match { group, .. } => {
            if !groups.contains_key(group) && !missing.contains(group) {
                missing.push(group.clone());
            }
        }
        Condition::Empty { .. } => {}
        Condition::All(items) | Condition::Any(items) => {
            for item in items {
                collect_unknown_groups(item, groups, missing);
            }
        }
        Condition::Not(inner) => collect_unknown_groups(inner, groups, missing),
    }
}

/// Interpreter for a [`DecisionTable`]
pub struct TableStrategy {
    table: DecisionTable,
    matcher: Matcher,
}

impl TableStrategy {
    pub fn new(table: DecisionTable) -> Result<Self> {
        table.validate()?;
        let matcher = Matcher {
            case_sensitive: table.case_sensitive,
        };
        Ok(Self { table, matcher })
    }

    fn check(&self, cond: &Condition, doc: &PreparedArticle, hits: &mut Vec<String>) -> bool {
        match cond {
            Condition::Match { group, field } => {
                let terms = self.table.groups.get(group).map(Vec::as_slice).unwrap_or(&[]);
                let found = self.matcher.hits(doc.field(*field), terms);
                for term in &found {
                    if !hits.iter().any(|h| h == term) {
                        hits.push(term.to_string());
                    }
                }
                !found.is_empty()
            }
            Condition::Empty { field } => doc.field(*field).trim().is_empty(),
            Condition::All(items) => items.iter().all(|c| self.check(c, doc, hits)),
            Condition::Any(items) => {
                // Evaluate every branch so all matched terms are reported
                items
                    .iter()
                    .fold(false, |acc, c| self.check(c, doc, hits) || acc)
            }
            Condition::Not(inner) => {
                let mut ignored = Vec::new();
                !self.check(inner, doc, &mut ignored)
            }
        }
    }
}

struct PreparedArticle {
    title: String,
    abstract_text: String,
    both: String,
}

impl PreparedArticle {
    fn field(&self, field: Field) -> &str {
        match field {
            Field::Title => &self.title,
            Field::Abstract => &self.abstract_text,
            Field::Any => &self.both,
        }
    }
}

impl ScreeningStrategy for TableStrategy {
    fn name(&self) -> &str {
        "decision-table"
    }

    fn evaluate(&self, article: &ArticleRecord) -> Verdict {
        // padded so a term like " review " also matches at either edge
        let title = format!(" {} ", self.matcher.prepare(&article.title));
        let abstract_text = format!(" {} ", self.matcher.prepare(&article.abstract_text));
        let doc = PreparedArticle {
            both: format!("{}{}", title, abstract_text),
            title,
            abstract_text,
        };

        for (idx, rule) in self.table.rules.iter().enumerate() {
            let mut hits = Vec::new();
            if self.check(&rule.when, &doc, &mut hits) {
                debug!(id = %article.identifier, rule = idx + 1, "Rule fired");
                let reasoning = if hits.is_empty() {
                    rule.reason.clone()
                } else {
                    format!("{} (matched: {})", rule.reason, hits.join(", "))
                };
                return Verdict {
                    decision: rule.decision,
                    reasoning,
                };
            }
        }

        Verdict {
            decision: self.table.default.decision,
            reasoning: self.table.default.reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::parse_text_criteria;

    const DIABETES_CRITERIA: &str = "\
[INCLUSION_KEYWORDS]
Topic: Diabetes

[EXCLUSION_KEYWORDS]
Study Types: Meta-Analysis

[MATCHING_RULES]
Case Sensitive: No
Exception Keywords: individual patient data
";

    const DIABETES_TABLE: &str = r#"{
  "case_sensitive": false,
  "groups": {
    "topic": ["Diabetes"],
    "study_types": ["Meta-Analysis"],
    "exceptions": ["individual patient data"]
  },
  "rules": [
    {
      "when": {"all": [
        {"match": {"group": "study_types", "field": "any"}},
        {"not": {"match": {"group": "exceptions", "field": "any"}}}
      ]},
      "decision": "Exclude",
      "reason": "Matched exclusion criteria"
    },
    {
      "when": {"not": {"match": {"group": "topic", "field": "any"}}},
      "decision": "Exclude",
      "reason": "No inclusion keywords matched"
    }
  ],
  "default": {"decision": "Include", "reason": "Matched inclusion criteria"}
}"#;

    fn article(title: &str, abstract_text: &str) -> ArticleRecord {
        ArticleRecord {
            identifier: "a1".to_string(),
            title: title.to_string(),
            abstract_text: abstract_text.to_string(),
            ..Default::default()
        }
    }

    fn strategies() -> Vec<Box<dyn ScreeningStrategy>> {
        let table = DecisionTable::from_json(DIABETES_TABLE).expect("valid table");
        vec![
            Box::new(ReferenceStrategy::new(parse_text_criteria(DIABETES_CRITERIA))),
            Box::new(TableStrategy::new(table).expect("valid strategy")),
        ]
    }

    #[test]
    fn test_exclusion_dominates_inclusion() {
        for strategy in strategies() {
            let verdict = strategy.evaluate(&article("Meta-Analysis of Diabetes Treatments", ""));
            assert_eq!(verdict.decision, Decision::Exclude, "{}", strategy.name());
            assert!(
                verdict.reasoning.to_lowercase().contains("meta-analysis"),
                "{}: {}",
                strategy.name(),
                verdict.reasoning
            );
        }
    }

    #[test]
    fn test_inclusion_only_is_included() {
        for strategy in strategies() {
            let verdict = strategy.evaluate(&article(
                "Diabetes Treatment in Elderly Patients",
                "A cohort of 300 patients.",
            ));
            assert_eq!(verdict.decision, Decision::Include, "{}", strategy.name());
        }
    }

    #[test]
    fn test_exception_overrides_exclusion() {
        for strategy in strategies() {
            let verdict = strategy.evaluate(&article(
                "Meta-Analysis of Diabetes Treatments",
                "An individual patient data pooled analysis.",
            ));
            assert_eq!(verdict.decision, Decision::Include, "{}", strategy.name());
        }
    }

    #[test]
    fn test_no_inclusion_match_is_excluded() {
        for strategy in strategies() {
            let verdict = strategy.evaluate(&article("Hypertension in Adults", "Blood pressure."));
            assert_eq!(verdict.decision, Decision::Exclude, "{}", strategy.name());
        }
    }

    #[test]
    fn test_primary_in_title_required() {
        let criteria = parse_text_criteria(
            "[INCLUSION]\nPrimary Topic: Osteoclastoma\n[RULES]\nRequire Primary In Title: Yes\n",
        );
        let strategy = ReferenceStrategy::new(criteria);

        let abstract_only = strategy.evaluate(&article("Spinal lesions", "A case of osteoclastoma."));
        assert_eq!(abstract_only.decision, Decision::Exclude);
        assert!(abstract_only.reasoning.contains("Primary keyword not found in title"));

        let in_title = strategy.evaluate(&article("Osteoclastoma of C2", ""));
        assert_eq!(in_title.decision, Decision::Include);
    }

    #[test]
    fn test_primary_defaults_to_first_declared_category() {
        let criteria = parse_text_criteria(
            "[INCLUSION]\nTopic: Diabetes\nSetting: Elderly\n[RULES]\nRequire Primary In Title: Yes\nRequire All Inclusion Categories: No\n",
        );
        let strategy = ReferenceStrategy::new(criteria);
        let verdict = strategy.evaluate(&article("Diabetes outcomes", "A cohort of elderly adults."));
        assert_eq!(verdict.decision, Decision::Include, "{}", verdict.reasoning);

        let setting_only = strategy.evaluate(&article("Elderly adults", "Diabetes cohort."));
        assert_eq!(setting_only.decision, Decision::Exclude);
        assert!(setting_only.reasoning.contains("(topic)"));
    }

    #[test]
    fn test_case_sensitive_rule() {
        let criteria = parse_text_criteria("[INCLUSION]\nTopic: MRI\n[RULES]\nCase Sensitive: Yes\n");
        let strategy = ReferenceStrategy::new(criteria);
        assert_eq!(strategy.evaluate(&article("mri of the spine", "")).decision, Decision::Exclude);
        assert_eq!(strategy.evaluate(&article("MRI of the spine", "")).decision, Decision::Include);
    }

    #[test]
    fn test_any_category_mode() {
        let criteria = parse_text_criteria(
            "[INCLUSION]\nTopic: Diabetes\nSetting: Elderly\n[RULES]\nRequire All Inclusion Categories: No\n",
        );
        let strategy = ReferenceStrategy::new(criteria);
        assert_eq!(strategy.evaluate(&article("Diabetes care", "")).decision, Decision::Include);

        let strict = ReferenceStrategy::new(parse_text_criteria(
            "[INCLUSION]\nTopic: Diabetes\nSetting: Elderly\n",
        ));
        let verdict = strict.evaluate(&article("Diabetes care", ""));
        assert_eq!(verdict.decision, Decision::Exclude);
        assert!(verdict.reasoning.contains("setting"));
    }

    #[test]
    fn test_braces_are_ignored_when_matching() {
        let strategy = ReferenceStrategy::new(parse_text_criteria("[INCLUSION]\nTopic: MRI findings\n"));
        assert_eq!(strategy.evaluate(&article("{MRI} Findings", "")).decision, Decision::Include);
    }

    #[test]
    fn test_table_reports_matched_terms() {
        let table = DecisionTable::from_json(DIABETES_TABLE).expect("valid table");
        let strategy = TableStrategy::new(table).expect("valid strategy");
        let verdict = strategy.evaluate(&article("Meta-Analysis of Diabetes Treatments", ""));
        assert_eq!(verdict.reasoning, "Matched exclusion criteria (matched: Meta-Analysis)");
    }

    #[test]
    fn test_table_space_padded_term_matches_whole_word() {
        let text = r#"{
  "groups": {"review": [" review "]},
  "rules": [{"when": {"match": {"group": "review", "field": "title"}}, "decision": "Exclude", "reason": "Review"}],
  "default": {"decision": "Include", "reason": "ok"}
}"#;
        let strategy = TableStrategy::new(DecisionTable::from_json(text).expect("valid")).expect("valid");
        for title in ["Review of C2 lesions", "C2 lesions: a review", "A review of C2 lesions"] {
            assert_eq!(strategy.evaluate(&article(title, "")).decision, Decision::Exclude, "{title}");
        }
        assert_eq!(
            strategy.evaluate(&article("Peer-reviewed C2 case series", "")).decision,
            Decision::Include
        );
    }

    #[test]
    fn test_table_rejects_unknown_group() {
        let text = r#"{
  "groups": {"a": ["x"]},
  "rules": [{"when": {"match": {"group": "b", "field": "title"}}, "decision": "Exclude", "reason": "r"}],
  "default": {"decision": "Include", "reason": "ok"}
}"#;
        let err = DecisionTable::from_json(text).expect_err("group b is undefined");
        assert!(err.to_string().contains("undefined group(s): b"));
    }

    #[test]
    fn test_table_empty_condition() {
        let text = r#"{
  "groups": {},
  "rules": [{"when": {"empty": {"field": "abstract"}}, "decision": "exclude", "reason": "No abstract"}],
  "default": {"decision": "include", "reason": "ok"}
}"#;
        let strategy = TableStrategy::new(DecisionTable::from_json(text).expect("valid")).expect("valid");
        assert_eq!(strategy.evaluate(&article("T", "  ")).decision, Decision::Exclude);
        assert_eq!(strategy.evaluate(&article("T", "text")).decision, Decision::Include);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        for strategy in strategies() {
            let a = article("Meta-Analysis of Diabetes Treatments", "pooled");
            assert_eq!(strategy.evaluate(&a), strategy.evaluate(&a));
        }
    }
}
