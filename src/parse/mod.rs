//! Annotation parser for SQL sources.
//!
//! Turns one SQL source (file contents or a literal string) into a sequence of
//! [`QueryDescriptor`]s. A source is a series of statement blocks; each block
//! is introduced by a preamble comment naming the query and its fetch
//! modifier:
//!
//! ```sql
//! -- :name get_user :one
//! -- Fetch a single user by primary key.
//! SELECT * FROM users WHERE id = :id;
//! ```
//!
//! A statement ends at the next preamble marker or end of source. Comment
//! lines without a recognized marker are concatenated into the descriptor's
//! documentation. Parsing performs no I/O and is idempotent: the same source
//! always yields descriptors equal in every field.

mod params;

pub use params::{parameter_names, scan_placeholders, Placeholder, PlaceholderKind};

use crate::error::{Result, StashError};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use tracing::warn;

/// The declared shape of a query's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultMode {
    /// Exactly one row; zero rows is a not-found error.
    One,
    /// All rows, possibly none.
    Many,
    /// The first column of the first row.
    Scalar,
    /// One execution per argument set in a batch.
    Multi,
    /// The affected-row count, independent of row content.
    Affected,
    /// All rows, undeserialized.
    Raw,
}

impl ResultMode {
    /// Parses a modifier token (keyword or single-character shorthand).
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "one" | "^" => Some(Self::One),
            "many" | "*" => Some(Self::Many),
            "scalar" | "$" => Some(Self::Scalar),
            "multi" | "!" => Some(Self::Multi),
            "affected" | "#" => Some(Self::Affected),
            "raw" | "~" => Some(Self::Raw),
            _ => None,
        }
    }

    /// Returns the keyword form of this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::One => "one",
            Self::Many => "many",
            Self::Scalar => "scalar",
            Self::Multi => "multi",
            Self::Affected => "affected",
            Self::Raw => "raw",
        }
    }

    /// Whether this mode has a cursor variant (row-returning, multi-row).
    pub fn supports_cursor(&self) -> bool {
        matches!(self, Self::Many | Self::Raw)
    }
}

impl fmt::Display for ResultMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed, immutable representation of one named SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    /// Query name, unique within its library category.
    pub name: String,
    /// Documentation gathered from unrecognized preamble comment lines.
    pub doc: String,
    /// The statement text with placeholders in source form.
    pub sql_template: String,
    /// Declared result mode.
    pub mode: ResultMode,
    /// Distinct parameter names, in first-occurrence order.
    pub parameters: Vec<String>,
    /// Every placeholder occurrence, in source order, for rewriting.
    pub placeholders: Vec<Placeholder>,
}

impl QueryDescriptor {
    /// True if the statement declares no bind parameters.
    pub fn is_nullary(&self) -> bool {
        self.parameters.is_empty()
    }
}

fn preamble_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^:name\s+(?P<name>[A-Za-z_]\w*(?:-\w+)*)(?:\s+:(?P<modifier>\S+))?")
            .expect("preamble pattern is valid")
    })
}

/// Parses one SQL source into descriptors.
///
/// `origin` names the source in error messages (a file path or `<inline>`).
/// Returns an empty vector for a source with no statements; fails if any
/// statement text appears before the first preamble marker, or if two
/// statements in the source share a name.
pub fn parse_source(text: &str, origin: &str) -> Result<Vec<QueryDescriptor>> {
    let mut blocks: Vec<Block> = Vec::new();
    let mut current: Option<Block> = None;
    // Comment lines whose owner is not yet known: doc for the next block if a
    // marker follows, interior SQL comments if statement text follows.
    let mut pending: Vec<String> = Vec::new();

    let mut lines = text.lines();
    while let Some(line) = lines.next() {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            if let Some(block) = current.as_mut() {
                if !block.sql.is_empty() {
                    block.sql.push(String::new());
                }
            }
            continue;
        }

        if let Some(comment) = trimmed.strip_prefix("--") {
            handle_comment_line(comment.trim(), &mut blocks, &mut current, &mut pending);
            continue;
        }

        if trimmed.starts_with("/*") {
            let body = collect_block_comment(trimmed, &mut lines);
            for inner in body {
                handle_comment_line(&inner, &mut blocks, &mut current, &mut pending);
            }
            continue;
        }

        // Statement text.
        let Some(block) = current.as_mut() else {
            return Err(StashError::parse(
                origin,
                format!("statement without a :name preamble: {trimmed:?}"),
            ));
        };
        // Comments buffered mid-statement were interior after all.
        for comment in pending.drain(..) {
            block.sql.push(format!("-- {comment}"));
        }
        block.sql.push(line.trim_end().to_string());
    }

    if let Some(block) = current.take() {
        blocks.push(block);
    }

    let mut descriptors = Vec::with_capacity(blocks.len());
    for block in blocks {
        let descriptor = block.into_descriptor(origin)?;
        if descriptors
            .iter()
            .any(|d: &QueryDescriptor| d.name == descriptor.name)
        {
            return Err(StashError::parse(
                origin,
                format!("duplicate query name '{}'", descriptor.name),
            ));
        }
        descriptors.push(descriptor);
    }
    Ok(descriptors)
}

/// One statement block under construction.
struct Block {
    name: String,
    mode: ResultMode,
    doc: Vec<String>,
    sql: Vec<String>,
}

impl Block {
    fn into_descriptor(self, origin: &str) -> Result<QueryDescriptor> {
        let mut sql = self.sql;
        while sql.last().is_some_and(|l| l.is_empty()) {
            sql.pop();
        }
        if sql.is_empty() {
            return Err(StashError::parse(
                origin,
                format!("query '{}' has no statement body", self.name),
            ));
        }
        let sql_template = sql.join("\n");
        let placeholders = scan_placeholders(&sql_template);
        let parameters = parameter_names(&placeholders);
        Ok(QueryDescriptor {
            name: self.name,
            doc: self.doc.join("\n"),
            sql_template,
            mode: self.mode,
            parameters,
            placeholders,
        })
    }
}

/// Routes one cleaned comment line: a preamble marker starts a new block;
/// anything else is documentation (or an interior comment, decided later).
fn handle_comment_line(
    comment: &str,
    blocks: &mut Vec<Block>,
    current: &mut Option<Block>,
    pending: &mut Vec<String>,
) {
    if let Some(captures) = preamble_pattern().captures(comment) {
        let name = captures["name"].to_string();
        let mode = match captures.name("modifier") {
            Some(token) => match ResultMode::from_token(token.as_str()) {
                Some(mode) => mode,
                None => {
                    warn!(
                        query = %name,
                        modifier = token.as_str(),
                        "unrecognized fetch modifier, defaulting to 'many'"
                    );
                    ResultMode::Many
                }
            },
            None => ResultMode::Many,
        };
        if let Some(done) = current.take() {
            blocks.push(done);
        }
        *current = Some(Block {
            name,
            mode,
            doc: std::mem::take(pending),
            sql: Vec::new(),
        });
        return;
    }

    if comment.is_empty() {
        return;
    }
    match current.as_mut() {
        // Still in the leading comment run: documentation.
        Some(block) if block.sql.is_empty() => block.doc.push(comment.to_string()),
        // After SQL began the owner is ambiguous; buffer until decided.
        _ => pending.push(comment.to_string()),
    }
}

/// Collects a `/* ... */` comment (possibly multi-line) into cleaned lines.
fn collect_block_comment<'a, I>(first: &str, lines: &mut I) -> Vec<String>
where
    I: Iterator<Item = &'a str>,
{
    let mut body = String::new();
    let mut text = first.to_string();
    loop {
        if let Some(end) = text.find("*/") {
            body.push_str(&text[..end]);
            break;
        }
        body.push_str(&text);
        body.push('\n');
        match lines.next() {
            Some(next) => text = next.trim().to_string(),
            None => break,
        }
    }
    body.lines()
        .map(|l| {
            l.trim()
                .trim_start_matches("/**")
                .trim_start_matches("/*")
                .trim_start_matches('*')
                .trim()
                .to_string()
        })
        .filter(|l| !l.is_empty())
        .collect()
}
