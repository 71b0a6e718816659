//! BibTeX ingestion.
//!
//! Turns a reference-manager export into an ordered list of [`ArticleRecord`]s
//! and persists them as the intermediate `parsed_articles.json` file read by
//! the screening stage.
//!
//! The parser is lenient: a missing title or abstract becomes an empty string,
//! and a malformed entry is skipped and counted without aborting the batch.

use crate::error::{Result, ScreenError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// A single bibliographic record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ArticleRecord {
    /// Citation key, or `entry-<n>` when the source entry had none
    #[serde(alias = "key")]
    pub identifier: String,
    /// Entry type (`article`, `inproceedings`, ...), lowercase
    #[serde(default)]
    pub entry_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub journal: String,
    #[serde(default)]
    pub doi: String,
    /// Every other field, passed through untouched
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

/// Outcome of parsing one BibTeX file
#[derive(Debug, Default)]
pub struct ParseReport {
    pub records: Vec<ArticleRecord>,
    /// Entries dropped because they could not be parsed
    pub skipped: usize,
}

/// Parse a BibTeX file from disk.
pub fn parse_file(path: &Path) -> Result<ParseReport> {
    let content = std::fs::read_to_string(path)?;
    let report = parse_bibtex(&content);
    info!(
        path = %path.display(),
        records = report.records.len(),
        skipped = report.skipped,
        "Parsed BibTeX file"
    );
    Ok(report)
}

/// Parse BibTeX source text.
pub fn parse_bibtex(content: &str) -> ParseReport {
    let mut report = ParseReport::default();
    let mut macros = default_macros();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut position = 0usize;
    let mut cursor = Cursor::new(content);

    while let Some(at) = cursor.find_from('@') {
        cursor.pos = at + 1;
        let entry_type = cursor.take_while(|c| c.is_ascii_alphanumeric() || c == '_').to_ascii_lowercase();
        if entry_type.is_empty() {
            continue;
        }
        cursor.skip_ws();

        let open = match cursor.peek() {
            Some(c @ ('{' | '(')) => c,
            // stray `@`, e.g. an e-mail address in a comment
            _ => {
                debug!(token = %entry_type, offset = at, "Ignoring '@' outside an entry");
                continue;
            }
        };
        let body_start = cursor.pos + 1;
        let Some(body_end) = cursor.matching_close(body_start, open) else {
            if entry_type != "comment" {
                warn!(entry_type = %entry_type, offset = at, "Unbalanced entry, skipping");
                report.skipped += 1;
            }
            cursor.pos = body_start;
            continue;
        };
        let body = &content[body_start..body_end];
        cursor.pos = body_end + 1;

        match entry_type.as_str() {
            "comment" | "preamble" => continue,
            "string" => match parse_fields(body, &macros) {
                Ok(defs) => {
                    for (name, value) in defs {
                        macros.insert(name, value);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed @string definition");
                }
            },
            _ => {
                position += 1;
                match parse_entry(body, &macros) {
                    Ok((key, fields)) => {
                        let record = build_record(entry_type, key, fields, position, &mut seen_ids);
                        debug!(id = %record.identifier, "Parsed entry");
                        report.records.push(record);
                    }
                    Err(e) => {
                        warn!(position = position, error = %e, "Skipping malformed entry");
                        report.skipped += 1;
                    }
                }
            }
        }
    }

    if report.skipped > 0 {
        warn!(skipped = report.skipped, "Some BibTeX entries could not be parsed");
    }
    report
}

/// Write records to the intermediate JSON file.
pub fn write_records(path: &Path, records: &[ArticleRecord]) -> Result<()> {
    let content = serde_json::to_string_pretty(records)?;
    std::fs::write(path, content)?;
    info!(path = %path.display(), count = records.len(), "Saved parsed articles");
    Ok(())
}

/// Read records back from the intermediate JSON file.
pub fn read_records(path: &Path) -> Result<Vec<ArticleRecord>> {
    let content = std::fs::read_to_string(path)?;
    let records: Vec<ArticleRecord> = serde_json::from_str(&content).map_err(|e| {
        ScreenError::Format(format!("Invalid parsed-articles file {:?}: {}", path, e))
    })?;
    debug!(path = %path.display(), count = records.len(), "Loaded parsed articles");
    Ok(records)
}

fn default_macros() -> HashMap<String, String> {
    [
        ("jan", "January"),
        ("feb", "February"),
        ("mar", "March"),
        ("apr", "April"),
        ("may", "May"),
        ("jun", "June"),
        ("jul", "July"),
        ("aug", "August"),
        ("sep", "September"),
        ("oct", "October"),
        ("nov", "November"),
        ("dec", "December"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn build_record(
    entry_type: String,
    key: Option<String>,
    mut fields: Vec<(String, String)>,
    position: usize,
    seen_ids: &mut HashSet<String>,
) -> ArticleRecord {
    let base = key.unwrap_or_else(|| format!("entry-{}", position));
    let mut identifier = base.clone();
    let mut attempt = 0usize;
    while !seen_ids.insert(identifier.clone()) {
        identifier = if attempt == 0 {
            format!("{}-{}", base, position)
        } else {
            format!("{}-{}-{}", base, position, attempt)
        };
        attempt += 1;
    }
    if identifier != base {
        warn!(key = %base, renamed = %identifier, "Duplicate citation key");
    }

    let mut take = |names: &[&str]| -> Option<String> {
        let idx = fields.iter().position(|(n, _)| names.contains(&n.as_str()))?;
        Some(fields.remove(idx).1)
    };

    let title = take(&["title"]).unwrap_or_default();
    let abstract_text = take(&["abstract"]).unwrap_or_default();
    let authors = take(&["author"]).map(|a| split_authors(&a)).unwrap_or_default();
    let year_field = take(&["year"]);
    let journal = take(&["journal", "journaltitle", "booktitle"]).unwrap_or_default();
    let doi = take(&["doi"]).unwrap_or_default();

    let year = year_field
        .as_deref()
        .and_then(parse_year)
        .or_else(|| {
            fields
                .iter()
                .find(|(n, _)| n == "date")
                .and_then(|(_, v)| parse_year(v))
        });

    ArticleRecord {
        identifier,
        entry_type,
        title,
        abstract_text,
        authors,
        year,
        journal,
        doi,
        fields: fields.into_iter().collect(),
    }
}

fn parse_year(value: &str) -> Option<i32> {
    static YEAR_RE: OnceLock<Option<Regex>> = OnceLock::new();
    YEAR_RE
        .get_or_init(|| Regex::new(r"\d{4}").ok())
        .as_ref()?
        .find(value)
        .and_then(|m| m.as_str().parse().ok())
}

/// Split an author list on top-level ` and ` separators.
fn split_authors(value: &str) -> Vec<String> {
    let mut authors = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    let lower = value.to_ascii_lowercase();
    let bytes = value.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => depth -= 1,
            b if depth == 0 && b.is_ascii_whitespace() && lower[i..].len() >= 5 => {
                let rest = &lower[i + 1..];
                if rest.starts_with("and") && rest[3..].starts_with(|c: char| c.is_ascii_whitespace()) {
                    authors.push(value[start..i].trim().to_string());
                    i += 4;
                    start = i;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }
    authors.push(value[start..].trim().to_string());
    authors.retain(|a| !a.is_empty());
    authors
}

/// Parse `key, name = value, ...`. The key is `None` when the body starts
/// directly with a field.
fn parse_entry(body: &str, macros: &HashMap<String, String>) -> Result<(Option<String>, Vec<(String, String)>)> {
    let (key, rest) = match top_level_comma(body) {
        Some(idx) if !body[..idx].contains('=') => (body[..idx].trim(), &body[idx + 1..]),
        None if !body.contains('=') => (body.trim(), ""),
        _ => ("", body),
    };
    let key = (!key.is_empty()).then(|| key.to_string());
    let fields = parse_fields(rest, macros)?;
    Ok((key, fields))
}

fn top_level_comma(body: &str) -> Option<usize> {
    let mut depth = 0i32;
    for (i, c) in body.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            ',' if depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_fields(body: &str, macros: &HashMap<String, String>) -> Result<Vec<(String, String)>> {
    let mut cursor = Cursor::new(body);
    let mut fields = Vec::new();

    loop {
        cursor.skip_ws_and(',');
        if cursor.at_end() {
            break;
        }
        let name = cursor
            .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.'))
            .to_ascii_lowercase();
        if name.is_empty() {
            return Err(ScreenError::Format(format!(
                "unexpected character {:?} where a field name was expected",
                cursor.peek().unwrap_or(' ')
            )));
        }
        cursor.skip_ws();
        if cursor.peek() != Some('=') {
            return Err(ScreenError::Format(format!("field '{}' has no '='", name)));
        }
        cursor.pos += 1;

        let mut value = String::new();
        loop {
            cursor.skip_ws();
            value.push_str(&cursor.value_piece(macros)?);
            cursor.skip_ws();
            if cursor.peek() == Some('#') {
                cursor.pos += 1;
                continue;
            }
            break;
        }
        match cursor.peek() {
            None | Some(',') => {}
            Some(c) => {
                return Err(ScreenError::Format(format!(
                    "unexpected {:?} after value of field '{}'",
                    c, name
                )))
            }
        }
        fields.push((name, clean_value(&value)));
    }
    Ok(fields)
}

/// Join wrapped lines with single spaces; intra-line text is kept as written.
fn clean_value(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Byte cursor over ASCII-delimited BibTeX text
struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn find_from(&self, needle: char) -> Option<usize> {
        self.src[self.pos..].find(needle).map(|i| self.pos + i)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.src[start..self.pos]
    }

    fn skip_ws(&mut self) {
        self.take_while(char::is_whitespace);
    }

    fn skip_ws_and(&mut self, extra: char) {
        self.take_while(|c| c.is_whitespace() || c == extra);
    }

    /// Index of the delimiter closing an entry opened just before `start`.
    ///
    /// A new `@` at the start of a line while still inside the entry means the
    /// entry was never closed.
    fn matching_close(&self, start: usize, open: char) -> Option<usize> {
        let close = if open == '{' { '}' } else { ')' };
        let mut depth = 0i32;
        let mut line_start = false;
        for (i, c) in self.src[start..].char_indices() {
            match c {
                '\n' => {
                    line_start = true;
                    continue;
                }
                '@' if line_start => return None,
                '{' => depth += 1,
                '}' if close == '}' && depth == 0 => return Some(start + i),
                '}' => depth -= 1,
                ')' if close == ')' && depth == 0 => return Some(start + i),
                _ => {}
            }
            if !c.is_whitespace() {
                line_start = false;
            }
        }
        None
    }

    /// One operand of a (possibly `#`-concatenated) field value.
    fn value_piece(&mut self, macros: &HashMap<String, String>) -> Result<String> {
        match self.peek() {
            Some('{') => {
                let start = self.pos + 1;
                let mut depth = 0i32;
                for (i, c) in self.src[start..].char_indices() {
                    match c {
                        '{' => depth += 1,
                        '}' if depth == 0 => {
                            self.pos = start + i + 1;
                            return Ok(self.src[start..start + i].to_string());
                        }
                        '}' => depth -= 1,
                        _ => {}
                    }
                }
                Err(ScreenError::Format("unterminated braced value".to_string()))
            }
            Some('"') => {
                let start = self.pos + 1;
                let mut depth = 0i32;
                let mut prev = ' ';
                for (i, c) in self.src[start..].char_indices() {
                    match c {
                        '{' => depth += 1,
                        '}' => depth -= 1,
                        '"' if depth == 0 && prev != '\\' => {
                            self.pos = start + i + 1;
                            return Ok(self.src[start..start + i].to_string());
                        }
                        _ => {}
                    }
                    prev = c;
                }
                Err(ScreenError::Format("unterminated quoted value".to_string()))
            }
            Some(c) if c.is_ascii_digit() => Ok(self.take_while(|c| c.is_ascii_digit()).to_string()),
            Some(c) if c.is_ascii_alphabetic() => {
                let name = self.take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.'));
                Ok(macros
                    .get(&name.to_ascii_lowercase())
                    .cloned()
                    .unwrap_or_else(|| name.to_string()))
            }
            Some(c) => Err(ScreenError::Format(format!("unexpected {:?} at start of value", c))),
            None => Err(ScreenError::Format("missing value".to_string())),
        }
    }
}
