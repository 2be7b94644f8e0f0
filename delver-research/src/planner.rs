//! Parsing of planner and judge responses
//!
//! The query generator answers with a one-line bracketed list or the
//! literal `<done>` sentinel; reasoning models may wrap their output in
//! `<think>` spans that must be stripped before any of it is used.

use regex::Regex;
use std::sync::OnceLock;

pub const DONE_SENTINEL: &str = "<done>";

/// Outcome of the query-generation step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPlanOutcome {
    /// Up to four new search queries
    Queries(Vec<String>),
    /// The model declared research complete
    Done,
    /// Nothing usable came back
    Empty,
}

fn think_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("static regex compiles"))
}

/// Remove `<think>...</think>` spans and surrounding whitespace
pub fn strip_think_tags(text: &str) -> String {
    think_pattern().replace_all(text, "").trim().to_string()
}

/// Remove a wrapping markdown code fence, if present
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.trim().strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse a query-generation response into queries, the done sentinel, or
/// nothing. Tolerates think spans, code fences and prose around the list.
pub fn parse_query_list(response: &str) -> QueryPlanOutcome {
    let cleaned = strip_think_tags(response);
    let cleaned = strip_code_fence(&cleaned);

    if cleaned.contains(DONE_SENTINEL) {
        return QueryPlanOutcome::Done;
    }

    let Some(open) = cleaned.find('[') else {
        return QueryPlanOutcome::Empty;
    };
    let Some(close) = cleaned.rfind(']') else {
        return QueryPlanOutcome::Empty;
    };
    if close <= open {
        return QueryPlanOutcome::Empty;
    }

    static ITEM: OnceLock<Regex> = OnceLock::new();
    let item = ITEM.get_or_init(|| {
        Regex::new(r#"'([^']+)'|"([^"]+)""#).expect("static regex compiles")
    });

    let body = &cleaned[open + 1..close];
    let queries: Vec<String> = item
        .captures_iter(body)
        .filter_map(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().trim().to_string())
        })
        .filter(|q| !q.is_empty())
        .collect();

    if queries.is_empty() {
        QueryPlanOutcome::Empty
    } else {
        QueryPlanOutcome::Queries(queries)
    }
}

/// Interpret a usefulness-check answer; anything unclear counts as No.
pub fn parse_yes_no(response: &str) -> bool {
    strip_think_tags(response)
        .trim()
        .to_ascii_lowercase()
        .starts_with("yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_think_spans() {
        let input = "<think>let me reason\nabout this</think>\nThe actual plan";
        assert_eq!(strip_think_tags(input), "The actual plan");
    }

    #[test]
    fn parses_single_quoted_list() {
        let outcome = parse_query_list("['rust async runtime', 'tokio internals']");
        assert_eq!(
            outcome,
            QueryPlanOutcome::Queries(vec![
                "rust async runtime".to_string(),
                "tokio internals".to_string()
            ])
        );
    }

    #[test]
    fn parses_double_quoted_list_with_surrounding_prose() {
        let outcome = parse_query_list("Here you go: [\"a b\", \"c d\"] hope that helps");
        assert_eq!(
            outcome,
            QueryPlanOutcome::Queries(vec!["a b".to_string(), "c d".to_string()])
        );
    }

    #[test]
    fn parses_fenced_list() {
        let outcome = parse_query_list("```python\n['one', 'two']\n```");
        assert_eq!(
            outcome,
            QueryPlanOutcome::Queries(vec!["one".to_string(), "two".to_string()])
        );
    }

    #[test]
    fn recognizes_done_sentinel() {
        assert_eq!(parse_query_list("<done>"), QueryPlanOutcome::Done);
        assert_eq!(
            parse_query_list("<think>enough already</think>\n<done>"),
            QueryPlanOutcome::Done
        );
    }

    #[test]
    fn garbage_is_empty() {
        assert_eq!(parse_query_list("no list here"), QueryPlanOutcome::Empty);
        assert_eq!(parse_query_list("[]"), QueryPlanOutcome::Empty);
        assert_eq!(parse_query_list(""), QueryPlanOutcome::Empty);
    }

    #[test]
    fn yes_no_defaults_to_no() {
        assert!(parse_yes_no("Yes"));
        assert!(parse_yes_no(" yes, definitely"));
        assert!(!parse_yes_no("No"));
        assert!(!parse_yes_no("maybe"));
        assert!(!parse_yes_no(""));
    }
}
