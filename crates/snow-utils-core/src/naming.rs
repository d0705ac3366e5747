//! Resource naming rules.
//!
//! Snowflake identifiers are uppercase with underscores; AWS names are
//! lowercase with hyphens. Both may carry the operator's identity as a
//! leading segment (`ALICE_DEMO_RUNNER`, `alice-demo-bucket`), which is what
//! export marks as adaptable and import rewrites.

use regex::Regex;
use std::sync::OnceLock;

static NON_SQL: OnceLock<Regex> = OnceLock::new();
static NON_AWS: OnceLock<Regex> = OnceLock::new();
static MULTI_UNDERSCORE: OnceLock<Regex> = OnceLock::new();
static MULTI_HYPHEN: OnceLock<Regex> = OnceLock::new();

fn non_sql() -> &'static Regex {
    NON_SQL.get_or_init(|| Regex::new(r"[^A-Za-z0-9_]").unwrap())
}

fn non_aws() -> &'static Regex {
    NON_AWS.get_or_init(|| Regex::new(r"[^a-z0-9-]").unwrap())
}

fn multi_underscore() -> &'static Regex {
    MULTI_UNDERSCORE.get_or_init(|| Regex::new(r"_+").unwrap())
}

fn multi_hyphen() -> &'static Regex {
    MULTI_HYPHEN.get_or_init(|| Regex::new(r"-+").unwrap())
}

/// How a field value is normalised after template rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameStyle {
    /// Left exactly as rendered.
    Verbatim,
    /// Uppercase Snowflake identifier.
    Sql,
    /// Lowercase AWS resource name.
    Aws,
}

impl NameStyle {
    pub fn apply(self, value: &str) -> String {
        match self {
            NameStyle::Verbatim => value.to_string(),
            NameStyle::Sql => to_sql_identifier(value),
            NameStyle::Aws => to_aws_name(value),
        }
    }
}

/// `my-demo bucket` → `MY_DEMO_BUCKET`. A leading digit gets an underscore prefix.
pub fn to_sql_identifier(name: &str) -> String {
    let replaced = name.replace(['-', ' ', '.'], "_");
    let cleaned = non_sql().replace_all(&replaced, "");
    let collapsed = multi_underscore().replace_all(&cleaned, "_");
    let trimmed = collapsed.trim_matches('_');
    let mut out = trimmed.to_uppercase();
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// `My_Demo Bucket` → `my-demo-bucket`.
pub fn to_aws_name(name: &str) -> String {
    let lowered = name.to_lowercase().replace(['_', ' '], "-");
    let cleaned = non_aws().replace_all(&lowered, "");
    let collapsed = multi_hyphen().replace_all(&cleaned, "-");
    collapsed.trim_matches('-').to_string()
}

/// Normalise an operator login (`alice.smith`) into an identity prefix (`ALICE_SMITH`).
pub fn identity_prefix(login: &str) -> String {
    to_sql_identifier(login)
}

/// True when `value` starts with `prefix` as a whole leading segment, ignoring case
/// and treating `_` and `-` as the same separator.
pub fn has_identity_prefix(value: &str, prefix: &str) -> bool {
    split_prefix(value, prefix).is_some()
}

/// Replace a leading identity segment, keeping the remainder verbatim.
///
/// The replacement follows the case and separator style of the original value,
/// so `alice-demo-bucket` becomes `bobs-demo-bucket` and `ALICE_DEMO_RUNNER`
/// becomes `BOBS_DEMO_RUNNER`. Returns `None` when `value` does not carry the prefix.
pub fn replace_identity_prefix(value: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    let (head, rest) = split_prefix(value, old_prefix)?;
    let replacement = if head.chars().any(|c| c.is_ascii_lowercase()) {
        to_aws_name(new_prefix)
    } else if head.contains('-') {
        to_sql_identifier(new_prefix).replace('_', "-")
    } else {
        to_sql_identifier(new_prefix)
    };
    Some(format!("{replacement}{rest}"))
}

/// Split `value` into its leading identity segment and the remainder (separator included).
fn split_prefix<'a>(value: &'a str, prefix: &str) -> Option<(&'a str, &'a str)> {
    let want = to_sql_identifier(prefix);
    if want.is_empty() || value.len() < want.len() {
        return None;
    }
    let (head, rest) = value.split_at_checked(want.len())?;
    if canonical(head) != want {
        return None;
    }
    // The prefix must end on a segment boundary.
    match rest.chars().next() {
        None | Some('_') | Some('-') => Some((head, rest)),
        _ => None,
    }
}

fn canonical(s: &str) -> String {
    s.to_uppercase().replace('-', "_")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_identifiers() {
        assert_eq!(to_sql_identifier("my-demo bucket"), "MY_DEMO_BUCKET");
        assert_eq!(to_sql_identifier("__a--b__"), "A_B");
        assert_eq!(to_sql_identifier("1abc"), "_1ABC");
        assert_eq!(to_sql_identifier("alice.smith"), "ALICE_SMITH");
    }

    #[test]
    fn aws_names() {
        assert_eq!(to_aws_name("ALICE_Iceberg Demo"), "alice-iceberg-demo");
        assert_eq!(to_aws_name("a__b--c!"), "a-b-c");
    }

    #[test]
    fn prefix_detection_needs_segment_boundary() {
        assert!(has_identity_prefix("ALICE_DEMO_RUNNER", "ALICE"));
        assert!(has_identity_prefix("alice-demo-bucket", "ALICE"));
        assert!(has_identity_prefix("ALICE", "alice"));
        assert!(!has_identity_prefix("ALICEBOT_RUNNER", "ALICE"));
        assert!(!has_identity_prefix("BOB_RUNNER", "ALICE"));
        assert!(!has_identity_prefix("AL", "ALICE"));
    }

    #[test]
    fn replace_preserves_remainder_and_style() {
        assert_eq!(
            replace_identity_prefix("ALICE_DEMO_RUNNER", "ALICE", "BOBS").as_deref(),
            Some("BOBS_DEMO_RUNNER")
        );
        assert_eq!(
            replace_identity_prefix("alice-demo-bucket", "ALICE", "BOBS").as_deref(),
            Some("bobs-demo-bucket")
        );
        assert_eq!(
            replace_identity_prefix("ALICE_SMITH_DB", "alice.smith", "bob").as_deref(),
            Some("BOB_DB")
        );
        assert_eq!(replace_identity_prefix("CAROL_DB", "ALICE", "BOBS"), None);
    }
}
