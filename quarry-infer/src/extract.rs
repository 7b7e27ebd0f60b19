//! Pulling a query out of free-form model output.
//!
//! Rules, first match wins:
//! 1. `<think>...</think>` reasoning blocks are removed;
//! 2. a fenced block tagged `sql` yields its contents;
//! 3. a line `A: <keyword> ...` yields everything after the marker;
//! 4. a line starting with a query keyword is taken as is;
//! 5. otherwise the whole trimmed response.
//!
//! The result always has `\_` unescaped to `_`.

use lazy_static::lazy_static;
use regex::Regex;

const QUERY_KEYWORDS: [&str; 8] = [
    "SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "CREATE", "PRAGMA", "EXPLAIN",
];

lazy_static! {
    static ref THINK_BLOCK: Regex = Regex::new(r"(?is)<think>.*?</think>").unwrap();
    static ref FENCED_SQL: Regex =
        Regex::new(r"(?is)```[ \t]*(?:sql|sqlite|postgres(?:ql)?|mysql)\b[^\n]*\n(.*?)```").unwrap();
}

const THINK_CLOSE: &str = "</think>";

pub fn extract_query(raw: &str) -> String {
    let text = strip_reasoning(raw);
    let query = fenced_query(&text)
        .or_else(|| answer_line(&text))
        .or_else(|| keyword_line(&text))
        .unwrap_or_else(|| text.trim().to_string());
    unescape_underscores(&query)
}

/// Remove reasoning blocks. A closing tag without an opening one (some
/// models omit it) discards everything before it.
pub fn strip_reasoning(raw: &str) -> String {
    let stripped = THINK_BLOCK.replace_all(raw, "");
    match stripped.rfind(THINK_CLOSE) {
        Some(pos) => stripped[pos + THINK_CLOSE.len()..].to_string(),
        None => stripped.into_owned(),
    }
}

/// Contents of the first non-empty fenced block tagged as SQL.
pub fn fenced_query(text: &str) -> Option<String> {
    FENCED_SQL
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .find(|q| !q.is_empty())
        .map(str::to_string)
}

pub fn unescape_underscores(query: &str) -> String {
    query.replace("\\_", "_")
}

fn answer_line(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix("A:")?.trim();
        starts_with_keyword(rest).then(|| rest.to_string())
    })
}

fn keyword_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| starts_with_keyword(line))
        .map(str::to_string)
}

fn starts_with_keyword(s: &str) -> bool {
    let word: String = s.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    QUERY_KEYWORDS.iter().any(|k| word.eq_ignore_ascii_case(k))
}

/// Slice from the first `{` to the last `}`, if any.
pub fn json_object_span(text: &str) -> Option<&str> {
    span(text, '{', '}')
}

/// Slice from the first `[` to the last `]`, if any.
pub fn json_array_span(text: &str) -> Option<&str> {
    span(text, '[', ']')
}

fn span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_sql_block_wins() {
        let raw = "Here you go:\n```SQL\nSELECT name\nFROM users;\n```\nSELECT 1";
        assert_eq!(extract_query(raw), "SELECT name\nFROM users;");
    }

    #[test]
    fn answer_marker_line() {
        let raw = "Q: how many users?\nA: SELECT COUNT(*) FROM users";
        assert_eq!(extract_query(raw), "SELECT COUNT(*) FROM users");
    }

    #[test]
    fn bare_keyword_line() {
        let raw = "The query is:\n  with t as (select 1) select * from t  \nHope it helps.";
        assert_eq!(extract_query(raw), "with t as (select 1) select * from t");
    }

    #[test]
    fn free_text_comes_back_trimmed() {
        assert_eq!(
            extract_query("  I cannot answer that from this schema.\n"),
            "I cannot answer that from this schema."
        );
    }

    #[test]
    fn reasoning_is_ignored() {
        let raw = "<think>maybe SELECT * FROM wrong?\n</think>\nSELECT id FROM right";
        assert_eq!(extract_query(raw), "SELECT id FROM right");

        let unopened = "thinking about SELECT 2...</think>SELECT 3";
        assert_eq!(extract_query(unopened), "SELECT 3");
    }

    #[test]
    fn escaped_underscores_are_restored() {
        assert_eq!(
            extract_query("```sql\nSELECT order\\_id FROM order\\_items\n```"),
            "SELECT order_id FROM order_items"
        );
    }

    #[test]
    fn keyword_prefix_must_be_whole_word() {
        assert_eq!(extract_query("Selection is empty"), "Selection is empty");
    }

    #[test]
    fn json_spans() {
        let raw = "```json\n{\"a\": {\"b\": 1}}\n```";
        assert_eq!(json_object_span(raw), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(json_array_span("x [1, [2]] y"), Some("[1, [2]]"));
        assert_eq!(json_object_span("} nope {"), None);
    }
}
