//! Prompts for generating screening logic.
//!
//! The agent is shown the normalized criteria and a reference decision table,
//! and asked to answer with one decision table in a fenced `json` block.

use crate::criteria::CriteriaModel;
use crate::error::Result;
use std::path::Path;
use tracing::{debug, info};

/// Reference screening logic: cervical-spine bone giant cell tumour review.
pub const REFERENCE_TABLE: &str = r#"{
  "case_sensitive": false,
  "groups": {
    "gct": ["giant cell tumor", "giant-cell tumor", "giant cell tumour", "giant-cell tumour", "osteoclastoma"],
    "competing_diagnosis": ["osteoblastoma", "aneurysmal bone cyst", "metastasis", "metastases", "lymphoma", "chordoma", "plasmacytoma"],
    "cervical": ["cervical", "c1", "c2", "c3", "c4", "c5", "c6", "c7", "atlantoaxial"],
    "non_bone": ["synovial", "tenosynovial"],
    "review": ["systematic review", "meta-analysis", "narrative review", "literature review", " review "]
  },
  "rules": [
    {
      "when": {"not": {"any": [
        {"match": {"group": "gct", "field": "title"}},
        {"all": [
          {"match": {"group": "gct", "field": "abstract"}},
          {"not": {"match": {"group": "competing_diagnosis", "field": "title"}}}
        ]}
      ]}},
      "decision": "Exclude",
      "reason": "Not GCT/Osteoclastoma or primary topic is another tumor type"
    },
    {
      "when": {"match": {"group": "non_bone", "field": "any"}},
      "decision": "Exclude",
      "reason": "Non-bone origin (Synovial/Tenosynovial)"
    },
    {
      "when": {"not": {"match": {"group": "cervical", "field": "any"}}},
      "decision": "Exclude",
      "reason": "Not cervical spine"
    },
    {
      "when": {"match": {"group": "review", "field": "title"}},
      "decision": "Exclude",
      "reason": "Review/Meta-Analysis/Systematic Review"
    }
  ],
  "default": {"decision": "Include", "reason": "Original article on cervical bone GCT/Osteoclastoma"}
}"#;

/// Decision table format, as explained to the agent
pub const TABLE_SCHEMA: &str = r#"{
  "case_sensitive": <bool, default false>,
  "groups": { "<group_name>": ["term", ...], ... },
  "rules": [
    { "when": <condition>, "decision": "Include" | "Exclude", "reason": "<why>" },
    ...
  ],
  "default": { "decision": "Include" | "Exclude", "reason": "<why>" }
}

<condition> is exactly one of:
  {"match": {"group": "<group_name>", "field": "title" | "abstract" | "any"}}
  {"empty": {"field": "title" | "abstract" | "any"}}
  {"all": [<condition>, ...]}
  {"any": [<condition>, ...]}
  {"not": <condition>}

Rules are evaluated top to bottom; the first rule whose condition holds decides.
"match" is a substring test of any term of the group against the field.
Fields are padded with one space on each side, so a term written with
surrounding spaces (" review ") matches only the whole word, including at the
start or end of the field."#;

/// Generation prompt template
/// Placeholders: {reference}, {schema}, {criteria_json}
pub const GENERATION_PROMPT_TEMPLATE: &str = r#"You are an expert in systematic review methodology and in writing precise article screening logic.

I need screening logic for academic articles, expressed as a JSON decision table (not code). The table is run by an interpreter over each parsed article, which has the fields "identifier", "title" and "abstract". For every article it must produce a decision ("Include" or "Exclude") and a reason.

**DECISION TABLE FORMAT:**
```
{schema}
```

**REFERENCE DECISION TABLE (for structure and logic patterns):**
```json
{reference}
```

**USER'S CRITERIA:**
```json
{criteria_json}
```

**REQUIREMENTS:**
1. Build the groups from the user's inclusion and exclusion keyword categories; add spelling variants, plurals and common synonyms where they are unambiguous.
2. Use the SAME logic patterns as the reference table:
   - ordered, hierarchical rules
   - title vs abstract weighting
   - contextual exceptions (a term whose presence cancels an exclusion)
   - handling of competing topics
3. Exclusion criteria dominate inclusion criteria unless an exception term from the rules is present.
4. Honour the matching rules: "case_sensitive", "require_primary_in_title" (a primary-category term must be in the title), "exception_keywords", "require_all_inclusion_categories".
5. Every rule needs a short, specific reason; the default outcome must explain why an article is kept.

**OUTPUT:**
Reply with exactly ONE fenced code block tagged json containing the complete decision table, and nothing else inside the fence."#;

/// Build the generation prompt for `criteria`, showing `reference` as the
/// worked example.
pub fn build_generation_prompt(criteria: &CriteriaModel, reference: &str) -> Result<String> {
    let criteria_json = serde_json::to_string_pretty(criteria)?;
    let prompt = GENERATION_PROMPT_TEMPLATE
        .replace("{schema}", TABLE_SCHEMA)
        .replace("{reference}", reference.trim())
        .replace("{criteria_json}", &criteria_json);
    debug!(chars = prompt.len(), "Generation prompt built");
    Ok(prompt)
}

/// Reference example text: a custom file when given, the built-in table otherwise.
pub fn load_reference(path: Option<&Path>) -> Result<String> {
    match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)?;
            info!(path = %p.display(), "Using custom reference logic");
            Ok(text)
        }
        None => Ok(REFERENCE_TABLE.to_string()),
    }
}

/// Save the prompt for inspection.
pub fn save_prompt(path: &Path, prompt: &str) -> Result<()> {
    std::fs::write(path, prompt)?;
    info!(path = %path.display(), chars = prompt.len(), "Prompt saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bibtex::ArticleRecord;
    use crate::criteria::parse_text_criteria;
    use crate::logic::{Decision, DecisionTable, ScreeningStrategy, TableStrategy};

    #[test]
    fn test_build_generation_prompt() -> Result<()> {
        let criteria = parse_text_criteria(
            "[DESCRIPTION]\nDiabetes therapy trials\n[INCLUSION]\nTopic: Diabetes\n[EXCLUSION]\nStudy Types: Meta-Analysis\n",
        );
        let prompt = build_generation_prompt(&criteria, REFERENCE_TABLE)?;
        assert!(prompt.contains("\"topic\""));
        assert!(prompt.contains("Meta-Analysis"));
        assert!(prompt.contains("Diabetes therapy trials"));
        assert!(prompt.contains("osteoclastoma"));
        assert!(prompt.contains("\"match\""));
        assert!(!prompt.contains("{criteria_json}"));
        assert!(!prompt.contains("{reference}"));
        Ok(())
    }

    #[test]
    fn test_prompt_is_pure() -> Result<()> {
        let criteria = parse_text_criteria("[INCLUSION]\nTopic: Diabetes\n");
        assert_eq!(
            build_generation_prompt(&criteria, "ref")?,
            build_generation_prompt(&criteria, "ref")?
        );
        Ok(())
    }

    #[test]
    fn test_reference_table_is_valid_and_behaves() -> Result<()> {
        let strategy = TableStrategy::new(DecisionTable::from_json(REFERENCE_TABLE)?)?;
        let case = ArticleRecord {
            identifier: "c1".to_string(),
            title: "Giant cell tumor of the C2 vertebra".to_string(),
            abstract_text: "Case report.".to_string(),
            ..Default::default()
        };
        assert_eq!(strategy.evaluate(&case).decision, Decision::Include);

        let review = ArticleRecord {
            title: "Cervical osteoclastoma: a systematic review".to_string(),
            ..case.clone()
        };
        assert_eq!(strategy.evaluate(&review).decision, Decision::Exclude);

        let plain_review = ArticleRecord {
            title: "Osteoclastoma of the cervical spine: a review".to_string(),
            ..case.clone()
        };
        let verdict = strategy.evaluate(&plain_review);
        assert_eq!(verdict.decision, Decision::Exclude);
        assert!(verdict.reasoning.starts_with("Review/Meta-Analysis"));
        Ok(())
    }

    #[test]
    fn test_load_reference_default() -> Result<()> {
        assert_eq!(load_reference(None)?, REFERENCE_TABLE);
        Ok(())
    }
}
