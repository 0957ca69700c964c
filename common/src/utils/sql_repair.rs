//! SQL text repair.
//!
//! Model-generated SQL often arrives wrapped in markdown fences and tends to
//! pick up rows whose price is missing. [`SqlRepairer::repair`] strips the
//! decoration and guarantees the statement filters `"value" IS NOT NULL`.
//!
//! Clause boundaries are found by a small scanner rather than a regex so that
//! keywords inside string literals, quoted identifiers and parenthesised
//! subqueries are never mistaken for the outer statement's clauses. Comments
//! are removed before scanning.

use once_cell::sync::Lazy;
use regex::Regex;

const NULL_GUARD: &str = r#""value" IS NOT NULL"#;

static FENCE_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*```(?:sql\b)?").expect("fence pattern is valid"));

static FENCE_CLOSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*```\s*$").expect("fence pattern is valid"));

static NULL_GUARD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:"value"|\bvalue\b)\s+IS\s+NOT\s+NULL"#).expect("guard pattern is valid")
});

const SQL_MARKER: &str = "[SQL:";
const BACKGROUND_MARKER: &str = "\n(Background";

/// Pulls the statement out of an error message of the form
/// `... [SQL: <statement>] ...`.
///
/// The statement may itself contain brackets, so it runs to the last `]`
/// before the driver's `(Background ...)` trailer or the end of the text.
pub fn extract_embedded_sql(error_text: &str) -> Option<String> {
    let start = error_text.find(SQL_MARKER)? + SQL_MARKER.len();
    let rest = &error_text[start..];
    let rest = rest.find(BACKGROUND_MARKER).map_or(rest, |end| &rest[..end]);
    let sql = rest[..rest.rfind(']')?].trim();
    (!sql.is_empty()).then(|| sql.to_string())
}

/// Repairs model-generated SQL text.
pub struct SqlRepairer;

impl SqlRepairer {
    /// Removes markdown fences and adds the null guard on `value`.
    ///
    /// With a `WHERE` clause the guard is ANDed onto the end of its predicate;
    /// without one a `WHERE` is synthesized. Either way the insertion point is
    /// the earliest top-level clause that ends the predicate (`GROUP BY`,
    /// `ORDER BY`, `LIMIT`, ...) or a trailing `;`, else the end of the text.
    ///
    /// Comments are dropped first, so the guard can never land inside one
    /// and a commented-out guard does not count.
    ///
    /// Idempotent: a predicate that already checks the guard is left alone.
    pub fn repair(sql: &str) -> String {
        let cleaned = strip_comments(&Self::strip_markdown(sql)).trim().to_string();
        if cleaned.is_empty() {
            return cleaned;
        }

        let marks = scan_top_level(&cleaned);
        match marks.iter().find(|m| m.clause == Clause::Where) {
            Some(where_mark) => append_to_where(&cleaned, &marks, where_mark),
            None => {
                let boundary = marks
                    .iter()
                    .find(|m| m.clause.ends_predicate())
                    .map_or(cleaned.len(), |m| m.start);
                let before = cleaned[..boundary].trim_end();
                format!(
                    "{} WHERE {}{}",
                    before,
                    NULL_GUARD,
                    tail_after(&cleaned, before.len(), boundary)
                )
            }
        }
    }

    /// Strips a leading and a trailing markdown code fence (optionally
    /// tagged `sql`) and surrounding whitespace. Backticks elsewhere are kept.
    pub fn strip_markdown(sql: &str) -> String {
        let opened = FENCE_OPEN_RE.replace(sql, "");
        FENCE_CLOSE_RE.replace(&opened, "").trim().to_string()
    }
}

/// Removes `--` and `/* */` comments outside quoted text. A line comment
/// keeps its newline; a block comment and the blanks around it become one
/// space.
fn strip_comments(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => i = skip_quoted(bytes, i, quote),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                out.push_str(sql[copied..i].trim_end_matches([' ', '\t']));
                i = find_from(bytes, i, b"\n").unwrap_or(bytes.len());
                copied = i;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                out.push_str(sql[copied..i].trim_end_matches([' ', '\t']));
                out.push(' ');
                i = find_from(bytes, i + 2, b"*/").map_or(bytes.len(), |p| p + 2);
                while matches!(bytes.get(i), Some(b' ' | b'\t')) {
                    i += 1;
                }
                copied = i;
            }
            _ => i += 1,
        }
    }
    out.push_str(&sql[copied..]);
    out
}

fn append_to_where(sql: &str, marks: &[Mark], where_mark: &Mark) -> String {
    let boundary = predicate_end(sql, marks, where_mark);
    let predicate = &sql[where_mark.end..boundary];
    if NULL_GUARD_RE.is_match(predicate) {
        return sql.to_string();
    }

    let before = sql[..boundary].trim_end();
    let tail = tail_after(sql, before.len(), boundary);

    if predicate.trim().is_empty() {
        return format!("{} {}{}", before, NULL_GUARD, tail);
    }

    let has_or = marks
        .iter()
        .any(|m| m.clause == Clause::Or && m.start > where_mark.start && m.start < boundary);
    if has_or {
        let indent_len = predicate.len() - predicate.trim_start().len();
        let indent = if indent_len == 0 { " " } else { &predicate[..indent_len] };
        return format!(
            "{}{}({}) AND {}{}",
            &sql[..where_mark.end],
            indent,
            predicate.trim(),
            NULL_GUARD,
            tail
        );
    }

    format!("{} AND {}{}", before, NULL_GUARD, tail)
}

fn predicate_end(sql: &str, marks: &[Mark], where_mark: &Mark) -> usize {
    marks
        .iter()
        .filter(|m| m.start > where_mark.start)
        .find(|m| m.clause.ends_predicate())
        .map_or(sql.len(), |m| m.start)
}

/// Text that follows the insertion point, keeping the original gap.
fn tail_after(sql: &str, before_end: usize, boundary: usize) -> String {
    if boundary >= sql.len() {
        return String::new();
    }
    let rest = &sql[boundary..];
    if rest.starts_with(';') {
        return rest.to_string();
    }
    let gap = &sql[before_end..boundary];
    if gap.is_empty() {
        format!(" {}", rest)
    } else {
        format!("{}{}", gap, rest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clause {
    Where,
    Or,
    GroupBy,
    OrderBy,
    Having,
    Window,
    Limit,
    Offset,
    SetOperation,
    Terminator,
}

impl Clause {
    fn ends_predicate(self) -> bool {
        !matches!(self, Clause::Where | Clause::Or)
    }
}

#[derive(Debug, Clone, Copy)]
struct Mark {
    clause: Clause,
    /// Byte offset of the keyword.
    start: usize,
    /// Byte offset just past the keyword (and `BY`, if any).
    end: usize,
}

const SINGLE_KEYWORDS: [(&str, Clause); 9] = [
    ("WHERE", Clause::Where),
    ("OR", Clause::Or),
    ("HAVING", Clause::Having),
    ("WINDOW", Clause::Window),
    ("LIMIT", Clause::Limit),
    ("OFFSET", Clause::Offset),
    ("UNION", Clause::SetOperation),
    ("INTERSECT", Clause::SetOperation),
    ("EXCEPT", Clause::SetOperation),
];

/// Finds clause keywords of the outermost statement, in order. Expects
/// comment-free text.
fn scan_top_level(sql: &str) -> Vec<Mark> {
    let bytes = sql.as_bytes();
    let mut marks = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i = skip_quoted(bytes, i, quote);
                continue;
            }
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b';' if depth == 0 => marks.push(Mark {
                clause: Clause::Terminator,
                start: i,
                end: i + 1,
            }),
            b if is_word_byte(b) => {
                if depth == 0 {
                    if let Some(mark) = keyword_mark(bytes, i) {
                        i = mark.end;
                        marks.push(mark);
                        continue;
                    }
                }
                i = word_end(bytes, i);
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    marks
}

fn keyword_mark(bytes: &[u8], i: usize) -> Option<Mark> {
    for (word, clause) in [("GROUP", Clause::GroupBy), ("ORDER", Clause::OrderBy)] {
        if let Some(after) = keyword_at(bytes, i, word) {
            let by_start = skip_whitespace(bytes, after);
            if by_start > after {
                if let Some(end) = keyword_at(bytes, by_start, "BY") {
                    return Some(Mark { clause, start: i, end });
                }
            }
            return None;
        }
    }
    SINGLE_KEYWORDS.iter().find_map(|&(word, clause)| {
        keyword_at(bytes, i, word).map(|end| Mark { clause, start: i, end })
    })
}

/// Matches `word` case-insensitively at `i` as a whole word.
fn keyword_at(bytes: &[u8], i: usize, word: &str) -> Option<usize> {
    let end = i + word.len();
    let candidate = bytes.get(i..end)?;
    let whole_word = !bytes.get(end).is_some_and(|&b| is_word_byte(b));
    (candidate.eq_ignore_ascii_case(word.as_bytes()) && whole_word).then_some(end)
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

fn word_end(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && is_word_byte(bytes[i]) {
        i += 1;
    }
    i
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Returns the offset just past the closing quote. Doubled quotes (`''`)
/// are handled as two adjacent literals.
fn skip_quoted(bytes: &[u8], open: usize, quote: u8) -> usize {
    bytes[open + 1..]
        .iter()
        .position(|&b| b == quote)
        .map_or(bytes.len(), |p| open + 1 + p + 1)
}

fn find_from(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    bytes
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| from + p)
}
