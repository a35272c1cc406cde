//! Bind-parameter scanning for SQL templates.
//!
//! Walks a statement's text and records every placeholder occurrence with its
//! byte span, so the normalizer can rewrite them for a target driver without
//! touching string literals, quoted identifiers, comments, or `::` casts.
//!
//! Recognized surface forms:
//! - `:name`: named parameter
//! - `%(name)s`: named parameter, pyformat style
//! - `:1` / `$1`: explicit positional, assigned the synthetic name `arg1`
//! - `?`: anonymous positional, assigned synthetic ordinal names in order

/// How a placeholder was written in the source template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderKind {
    /// `:name`
    Named,
    /// `%(name)s`
    PyFormat,
    /// `:1` or `$1`
    Ordinal,
    /// `?`
    Anonymous,
}

/// One placeholder occurrence within a SQL template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Parameter name; synthetic (`argN`) for positional forms.
    pub name: String,
    /// Byte offset of the first character of the placeholder.
    pub start: usize,
    /// Byte offset one past the last character of the placeholder.
    pub end: usize,
    /// Surface form the placeholder was written in.
    pub kind: PlaceholderKind,
}

/// Scans a SQL template for placeholder occurrences, in source order.
pub fn scan_placeholders(sql: &str) -> Vec<Placeholder> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut anon = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            // String literal: skip to the closing quote; '' escapes a quote.
            b'\'' => i = skip_quoted(bytes, i, b'\''),
            // Quoted identifier.
            b'"' => i = skip_quoted(bytes, i, b'"'),
            // Line comment.
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            // Block comment.
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
            }
            b':' => {
                // '::' is a cast, never a placeholder.
                if bytes.get(i + 1) == Some(&b':') {
                    i += 2;
                    while i < bytes.len() && is_ident_byte(bytes[i]) {
                        i += 1;
                    }
                    continue;
                }
                let start = i;
                let rest = &sql[i + 1..];
                if let Some(name) = take_ident(rest) {
                    let end = i + 1 + name.len();
                    found.push(Placeholder {
                        name: name.to_string(),
                        start,
                        end,
                        kind: PlaceholderKind::Named,
                    });
                    i = end;
                } else if let Some(digits) = take_digits(rest) {
                    let end = i + 1 + digits.len();
                    found.push(Placeholder {
                        name: format!("arg{digits}"),
                        start,
                        end,
                        kind: PlaceholderKind::Ordinal,
                    });
                    i = end;
                } else {
                    i += 1;
                }
            }
            b'$' => {
                let start = i;
                let rest = &sql[i + 1..];
                if let Some(digits) = take_digits(rest) {
                    let end = i + 1 + digits.len();
                    found.push(Placeholder {
                        name: format!("arg{digits}"),
                        start,
                        end,
                        kind: PlaceholderKind::Ordinal,
                    });
                    i = end;
                } else {
                    // Dollar-quoted string ($$ ... $$ or $tag$ ... $tag$).
                    i = skip_dollar_quoted(sql, i);
                }
            }
            b'%' if bytes.get(i + 1) == Some(&b'(') => {
                let start = i;
                let rest = &sql[i + 2..];
                if let Some(name) = take_ident(rest) {
                    let after = i + 2 + name.len();
                    if sql[after..].starts_with(")s") {
                        found.push(Placeholder {
                            name: name.to_string(),
                            start,
                            end: after + 2,
                            kind: PlaceholderKind::PyFormat,
                        });
                        i = after + 2;
                        continue;
                    }
                }
                i += 1;
            }
            b'?' => {
                anon += 1;
                found.push(Placeholder {
                    name: format!("arg{anon}"),
                    start: i,
                    end: i + 1,
                    kind: PlaceholderKind::Anonymous,
                });
                i += 1;
            }
            _ => i += 1,
        }
    }

    found
}

/// Returns the distinct parameter names in first-occurrence order.
pub fn parameter_names(placeholders: &[Placeholder]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for p in placeholders {
        if !names.iter().any(|n| n == &p.name) {
            names.push(p.name.clone());
        }
    }
    names
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Takes a leading identifier (`[A-Za-z_][A-Za-z0-9_]*`) from `s`, if any.
fn take_ident(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    let first = *bytes.first()?;
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return None;
    }
    let len = bytes.iter().take_while(|b| is_ident_byte(**b)).count();
    Some(&s[..len])
}

/// Takes a leading run of ASCII digits from `s`, if any.
fn take_digits(s: &str) -> Option<&str> {
    let len = s.bytes().take_while(|b| b.is_ascii_digit()).count();
    if len == 0 {
        None
    } else {
        Some(&s[..len])
    }
}

/// Skips a quoted region starting at `start` (which must point at the quote).
/// A doubled quote is an escape, not a terminator.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    i
}

/// Skips a dollar-quoted string starting at `start` (pointing at `$`).
/// If no valid opening tag is present, advances one byte.
fn skip_dollar_quoted(sql: &str, start: usize) -> usize {
    let rest = &sql[start + 1..];
    let tag_len = rest
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
        .count();
    if !rest[tag_len..].starts_with('$') {
        return start + 1;
    }
    let delim = &sql[start..start + tag_len + 2];
    match sql[start + delim.len()..].find(delim) {
        Some(pos) => start + delim.len() + pos + delim.len(),
        None => sql.len(),
    }
}
