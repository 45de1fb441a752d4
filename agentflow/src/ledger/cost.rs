//! Cost extraction from AI CLI output.

use crate::supervisor::ProcessOutcome;
use regex::Regex;
use std::sync::LazyLock;

static COST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)total cost:\s*\$\s*([0-9]+(?:\.[0-9]+)?)|"?total_cost_usd"?\s*[:=]\s*([0-9]+(?:\.[0-9]+)?)"#,
    )
    .expect("cost pattern is valid")
});

/// Returns the last cost reported in `text`.
#[must_use]
pub fn parse_cost(text: &str) -> Option<f64> {
    COST_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .last()
}

/// Cost of an AI invocation: stderr first, stdout as fallback. `None` when
/// neither reports one.
#[must_use]
pub fn extract_cost(outcome: &ProcessOutcome) -> Option<f64> {
    parse_cost(&outcome.stderr).or_else(|| parse_cost(&outcome.stdout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_total_cost_line() {
        assert_eq!(parse_cost("Done.\nTotal cost: $0.0342\n"), Some(0.0342));
        assert_eq!(parse_cost("total cost: $ 1.5"), Some(1.5));
    }

    #[test]
    fn test_parse_json_cost() {
        assert_eq!(
            parse_cost(r#"{"type":"result","total_cost_usd": 0.12,"num_turns":3}"#),
            Some(0.12)
        );
        assert_eq!(parse_cost("total_cost_usd: 2"), Some(2.0));
    }

    #[test]
    fn test_last_match_wins() {
        let text = "Total cost: $0.01\nretrying\nTotal cost: $0.03";
        assert_eq!(parse_cost(text), Some(0.03));
    }

    #[test]
    fn test_absent_cost_is_none() {
        assert_eq!(parse_cost("all tests passed"), None);
        assert_eq!(parse_cost(""), None);
    }

    #[test]
    fn test_extract_prefers_stderr() {
        let outcome = ProcessOutcome::exited(0, "Total cost: $9.99", "Total cost: $0.02");
        assert_eq!(extract_cost(&outcome), Some(0.02));

        let stdout_only = ProcessOutcome::exited(0, "Total cost: $0.05", "");
        assert_eq!(extract_cost(&stdout_only), Some(0.05));
    }
}
