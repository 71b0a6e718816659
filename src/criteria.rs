//! Screening criteria parsing.
//!
//! Criteria can be written as a sectioned text file, a Word document or a JSON
//! file. All three are normalized into the same [`CriteriaModel`], so the
//! prompt builder and the reference screener never care which one was used.

use crate::error::{Result, ScreenError};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

/// Supported criteria file extensions, as shown in error messages
pub const SUPPORTED_FORMATS: &str = ".txt, .docx, .json";

pub const RULE_CASE_SENSITIVE: &str = "case_sensitive";
pub const RULE_PRIMARY_IN_TITLE: &str = "require_primary_in_title";
pub const RULE_PRIMARY_CATEGORIES: &str = "primary_categories";
pub const RULE_EXCEPTION_KEYWORDS: &str = "exception_keywords";
pub const RULE_REQUIRE_ALL: &str = "require_all_inclusion_categories";

/// Alternative spellings accepted for the primary-in-title rule
const PRIMARY_IN_TITLE_ALIASES: &[&str] = &[
    "primary_keyword_required_in_title",
    "primary_keyword_in_title",
    "title_must_contain_primary_keyword",
];

/// Rules whose values are term lists rather than flags
const LIST_RULES: &[&str] = &[RULE_PRIMARY_CATEGORIES, RULE_EXCEPTION_KEYWORDS];

/// Value of a matching rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    Flag(bool),
    List(Vec<String>),
    Text(String),
}

/// Canonical screening criteria
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CriteriaModel {
    pub description: String,
    pub inclusion: BTreeMap<String, Vec<String>>,
    pub exclusion: BTreeMap<String, Vec<String>>,
    pub rules: BTreeMap<String, RuleValue>,
    /// Inclusion categories in the order the document declares them
    #[serde(skip)]
    inclusion_order: Vec<String>,
}

impl CriteriaModel {
    /// Boolean rule value, `None` when absent or not a flag.
    pub fn flag(&self, name: &str) -> Option<bool> {
        match self.rules.get(name) {
            Some(RuleValue::Flag(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn case_sensitive(&self) -> bool {
        self.flag(RULE_CASE_SENSITIVE).unwrap_or(false)
    }

    pub fn require_primary_in_title(&self) -> bool {
        self.flag(RULE_PRIMARY_IN_TITLE).unwrap_or(false)
    }

    pub fn require_all_inclusion_categories(&self) -> bool {
        self.flag(RULE_REQUIRE_ALL).unwrap_or(true)
    }

    pub fn exception_keywords(&self) -> Vec<String> {
        self.list(RULE_EXCEPTION_KEYWORDS)
    }

    /// Inclusion category names in declaration order.
    ///
    /// Models that were not built by a parser fall back to name order.
    pub fn inclusion_categories(&self) -> Vec<&str> {
        let declared = self
            .inclusion_order
            .iter()
            .filter(|name| self.inclusion.contains_key(name.as_str()))
            .map(String::as_str);
        let undeclared = self
            .inclusion
            .keys()
            .filter(|name| !self.inclusion_order.contains(name))
            .map(String::as_str);
        declared.chain(undeclared).collect()
    }

    /// Inclusion categories that must appear in the title when
    /// [`require_primary_in_title`](Self::require_primary_in_title) is on.
    ///
    /// Configured explicitly through `primary_categories`; otherwise every
    /// non-empty category named `primary*`, falling back to the first
    /// non-empty category declared.
    pub fn primary_categories(&self) -> Vec<String> {
        let configured: Vec<String> = self
            .list(RULE_PRIMARY_CATEGORIES)
            .iter()
            .map(|c| normalize_key(c))
            .collect();
        if !configured.is_empty() {
            return configured;
        }

        let non_empty: Vec<&str> = self
            .inclusion_categories()
            .into_iter()
            .filter(|name| self.inclusion.get(*name).is_some_and(|kws| !kws.is_empty()))
            .collect();
        let primaries: Vec<String> = non_empty
            .iter()
            .filter(|name| name.starts_with("primary"))
            .map(|name| name.to_string())
            .collect();
        if !primaries.is_empty() {
            return primaries;
        }
        non_empty.first().map(|name| vec![name.to_string()]).unwrap_or_default()
    }

    fn list(&self, name: &str) -> Vec<String> {
        match self.rules.get(name) {
            Some(RuleValue::List(items)) => items.clone(),
            Some(RuleValue::Text(text)) => split_keywords(text),
            _ => Vec::new(),
        }
    }
}

/// Criteria file format, chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriteriaFormat {
    Text,
    Docx,
    Json,
}

impl CriteriaFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "txt" => Ok(CriteriaFormat::Text),
            "docx" => Ok(CriteriaFormat::Docx),
            "json" => Ok(CriteriaFormat::Json),
            _ => Err(ScreenError::Format(format!(
                "Unsupported criteria file format: '.{}'. Supported formats: {}",
                ext, SUPPORTED_FORMATS
            ))),
        }
    }
}

/// Parse a criteria file, dispatching on its extension.
pub fn parse_criteria(path: &Path) -> Result<CriteriaModel> {
    let format = CriteriaFormat::from_path(path)?;
    debug!(path = %path.display(), format = ?format, "Parsing criteria");

    let model = match format {
        CriteriaFormat::Text => parse_text_criteria(&std::fs::read_to_string(path)?),
        CriteriaFormat::Json => parse_json_criteria(&std::fs::read_to_string(path)?)?,
        CriteriaFormat::Docx => parse_docx_criteria(path)?,
    };

    info!(
        inclusion = model.inclusion.len(),
        exclusion = model.exclusion.len(),
        rules = model.rules.len(),
        "Criteria parsed"
    );
    Ok(model)
}

/// Parse the sectioned text format.
///
/// ```text
/// [DESCRIPTION]
/// Cervical spine giant cell tumour case reports.
///
/// [INCLUSION_KEYWORDS]
/// Primary Topic: Giant Cell Tumor, Osteoclastoma
///
/// [EXCLUSION_KEYWORDS]
/// Study Types: Systematic Review, Meta-Analysis
///
/// [MATCHING_RULES]
/// Case Sensitive: No
/// ```
pub fn parse_text_criteria(content: &str) -> CriteriaModel {
    let mut builder = CriteriaBuilder::default();
    let mut section = None;

    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with('[') && line.ends_with(']') {
            section = Section::from_heading(&line[1..line.len() - 1]);
            if section.is_none() {
                debug!(header = line, "Ignoring unknown criteria section");
            }
            continue;
        }

        match section {
            Some(Section::Description) => builder.push_description(line),
            Some(Section::Rules) => {
                if let Some((name, value)) = line.split_once(':') {
                    builder.set_rule_text(name, value);
                }
            }
            Some(kind @ (Section::Inclusion | Section::Exclusion)) => {
                if let Some((category, keywords)) = line.split_once(':') {
                    builder.add_keywords(kind, category, split_keywords(keywords));
                }
            }
            None => {}
        }
    }

    builder.finish()
}

/// Parse the JSON format: `description`, `inclusion`, `exclusion`, `rules`.
pub fn parse_json_criteria(content: &str) -> Result<CriteriaModel> {
    let root: Value = serde_json::from_str(content)
        .map_err(|e| ScreenError::Format(format!("Invalid criteria JSON: {}", e)))?;
    let obj = root
        .as_object()
        .ok_or_else(|| ScreenError::Format("Criteria JSON must be an object".to_string()))?;

    let mut builder = CriteriaBuilder::default();

    match obj.get("description") {
        Some(Value::String(text)) => builder.push_description(text),
        Some(Value::Array(lines)) => {
            for line in lines.iter().filter_map(Value::as_str) {
                builder.push_description(line);
            }
        }
        Some(Value::Null) | None => {}
        Some(other) => {
            return Err(ScreenError::Format(format!(
                "'description' must be a string, got {}",
                other
            )))
        }
    }

    for (key, section) in [("inclusion", Section::Inclusion), ("exclusion", Section::Exclusion)] {
        let Some(groups) = obj.get(key) else { continue };
        let groups = groups
            .as_object()
            .ok_or_else(|| ScreenError::Format(format!("'{}' must be an object", key)))?;
        for (category, keywords) in groups {
            let keywords = match keywords {
                Value::Array(items) => items
                    .iter()
                    .map(|v| json_scalar(v, category))
                    .collect::<Result<Vec<_>>>()?,
                Value::String(text) => split_keywords(text),
                Value::Null => Vec::new(),
                other => {
                    return Err(ScreenError::Format(format!(
                        "keywords for '{}' must be a list, got {}",
                        category, other
                    )))
                }
            };
            builder.add_keywords(section, category, keywords);
        }
    }

    if let Some(rules) = obj.get("rules") {
        let rules = rules
            .as_object()
            .ok_or_else(|| ScreenError::Format("'rules' must be an object".to_string()))?;
        for (name, value) in rules {
            match value {
                Value::Bool(b) => builder.set_rule(name, RuleValue::Flag(*b)),
                Value::String(text) => builder.set_rule_text(name, text),
                Value::Array(items) => {
                    let items = items
                        .iter()
                        .map(|v| json_scalar(v, name))
                        .collect::<Result<Vec<_>>>()?;
                    builder.set_rule(name, RuleValue::List(items));
                }
                Value::Number(n) => builder.set_rule_text(name, &n.to_string()),
                Value::Null => {}
                Value::Object(_) => warn!(rule = %name, "Ignoring nested rule object"),
            }
        }
    }

    Ok(builder.finish())
}

/// Parse a Word document laid out with Heading 1 sections, Heading 2
/// categories and list items as keywords.
pub fn parse_docx_criteria(path: &Path) -> Result<CriteriaModel> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")?
        .read_to_string(&mut xml)?;

    let paragraphs = read_docx_paragraphs(&xml)?;
    debug!(count = paragraphs.len(), "Read document paragraphs");
    Ok(criteria_from_paragraphs(&paragraphs))
}

/// One paragraph of a Word document
#[derive(Debug, Clone, PartialEq)]
struct DocParagraph {
    style: Option<String>,
    text: String,
}

impl DocParagraph {
    /// Heading level from the paragraph style id (`Heading1`, `heading 2`, ...)
    fn heading_level(&self) -> Option<u8> {
        let style: String = self
            .style
            .as_deref()?
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match style.strip_prefix("heading")? {
            "1" => Some(1),
            "2" => Some(2),
            _ => None,
        }
    }
}

fn read_docx_paragraphs(xml: &str) -> Result<Vec<DocParagraph>> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut style: Option<String> = None;
    let mut text = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"p" => {
                    style = None;
                    text.clear();
                }
                b"t" => in_text = true,
                b"pStyle" => style = attr_value(&e, b"val")?,
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"pStyle" => style = attr_value(&e, b"val")?,
                b"tab" | b"br" => text.push(' '),
                _ => {}
            },
            Event::Text(t) if in_text => {
                text.push_str(&t.unescape().map_err(xml_err)?);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(DocParagraph {
                    style: style.take(),
                    text: std::mem::take(&mut text).trim().to_string(),
                }),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(paragraphs)
}

fn attr_value(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(xml_err)?;
        if attr.key.local_name().as_ref() == name {
            return Ok(Some(attr.unescape_value().map_err(xml_err)?.into_owned()));
        }
    }
    Ok(None)
}

fn xml_err(e: impl Display) -> ScreenError {
    ScreenError::Format(format!("Invalid document XML: {}", e))
}

fn criteria_from_paragraphs(paragraphs: &[DocParagraph]) -> CriteriaModel {
    let mut builder = CriteriaBuilder::default();
    let mut section = None;
    let mut category: Option<String> = None;

    for para in paragraphs.iter().filter(|p| !p.text.is_empty()) {
        match para.heading_level() {
            Some(1) => {
                section = Section::from_heading(&para.text);
                category = None;
            }
            Some(2) if matches!(section, Some(Section::Inclusion | Section::Exclusion)) => {
                category = Some(para.text.clone());
                if let Some(kind) = section {
                    builder.add_keywords(kind, &para.text, Vec::new());
                }
            }
            _ => match (section, &category) {
                (Some(kind @ (Section::Inclusion | Section::Exclusion)), Some(cat)) => {
                    builder.add_keywords(kind, cat, split_keywords(&para.text));
                }
                (Some(Section::Rules), _) => {
                    if let Some((name, value)) = para.text.split_once(':') {
                        builder.set_rule_text(name, value);
                    }
                }
                (Some(Section::Description), _) => builder.push_description(&para.text),
                _ => {}
            },
        }
    }

    builder.finish()
}

/// Criteria section selected by a header or heading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Description,
    Inclusion,
    Exclusion,
    Rules,
}

impl Section {
    fn from_heading(heading: &str) -> Option<Self> {
        let heading = heading.to_lowercase();
        if heading.contains("inclusion") {
            Some(Section::Inclusion)
        } else if heading.contains("exclusion") {
            Some(Section::Exclusion)
        } else if heading.contains("rule") || heading.contains("config") {
            Some(Section::Rules)
        } else if heading.contains("description") {
            Some(Section::Description)
        } else {
            None
        }
    }
}

/// Accumulates normalized criteria regardless of the source format
#[derive(Default)]
struct CriteriaBuilder {
    description: Vec<String>,
    model: CriteriaModel,
}

impl CriteriaBuilder {
    fn push_description(&mut self, text: &str) {
        let text = text.trim();
        if !text.is_empty() {
            self.description.push(text.to_string());
        }
    }

    fn add_keywords(&mut self, section: Section, category: &str, keywords: Vec<String>) {
        if !matches!(section, Section::Inclusion | Section::Exclusion) {
            return;
        }
        let key = normalize_key(category);
        if key.is_empty() {
            return;
        }
        if section == Section::Inclusion && !self.model.inclusion_order.contains(&key) {
            self.model.inclusion_order.push(key.clone());
        }
        let groups = match section {
            Section::Inclusion => &mut self.model.inclusion,
            _ => &mut self.model.exclusion,
        };
        let entry = groups.entry(key).or_default();
        for kw in keywords {
            let kw = kw.trim();
            if !kw.is_empty() && !entry.iter().any(|existing| existing == kw) {
                entry.push(kw.to_string());
            }
        }
    }

    fn set_rule_text(&mut self, name: &str, raw: &str) {
        let raw = raw.trim();
        let value = match raw.to_ascii_lowercase().as_str() {
            "yes" | "true" | "1" => RuleValue::Flag(true),
            "no" | "false" | "0" => RuleValue::Flag(false),
            _ => RuleValue::Text(raw.to_string()),
        };
        self.set_rule(name, value);
    }

    fn set_rule(&mut self, name: &str, value: RuleValue) {
        let mut key = normalize_key(name);
        if PRIMARY_IN_TITLE_ALIASES.contains(&key.as_str()) {
            key = RULE_PRIMARY_IN_TITLE.to_string();
        }
        if key.is_empty() {
            return;
        }
        let value = if LIST_RULES.contains(&key.as_str()) {
            match value {
                RuleValue::Text(text) => RuleValue::List(split_keywords(&text)),
                RuleValue::List(items) => RuleValue::List(
                    items
                        .into_iter()
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect(),
                ),
                flag => flag,
            }
        } else {
            value
        };
        self.model.rules.insert(key, value);
    }

    fn finish(mut self) -> CriteriaModel {
        self.model.description = self.description.join(" ");
        self.model
    }
}

/// `"Primary Topic "` → `"primary_topic"`
pub fn normalize_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

fn split_keywords(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|kw| !kw.is_empty())
        .map(str::to_string)
        .collect()
}

fn json_scalar(value: &Value, context: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(ScreenError::Format(format!(
            "expected a string in '{}', got {}",
            context, other
        ))),
    }
}
