//! Masking for human-readable output. The manifest and JSON output are never masked.

use regex::Regex;
use std::sync::OnceLock;

static ACCOUNT_ID: OnceLock<Regex> = OnceLock::new();
static IPV4: OnceLock<Regex> = OnceLock::new();
static ARN: OnceLock<Regex> = OnceLock::new();

fn account_id_re() -> &'static Regex {
    ACCOUNT_ID.get_or_init(|| Regex::new(r"^\d{12}$").unwrap())
}

fn ipv4_re() -> &'static Regex {
    IPV4.get_or_init(|| Regex::new(r"^(\d+)\.(\d+)\.\d+\.\d+(/\d+)?$").unwrap())
}

fn arn_re() -> &'static Regex {
    ARN.get_or_init(|| Regex::new(r"^(arn:aws:[^:]+:[^:]*:)(\d{12})(:.+)$").unwrap())
}

/// `123456789012` → `1234****9012`
pub fn mask_aws_account_id(value: &str) -> String {
    if account_id_re().is_match(value) {
        format!("{}****{}", &value[..4], &value[8..])
    } else {
        value.to_string()
    }
}

/// `192.168.1.100/32` → `192.168.***.***/32`
pub fn mask_ip_address(value: &str) -> String {
    match ipv4_re().captures(value) {
        Some(caps) => format!(
            "{}.{}.***.***{}",
            &caps[1],
            &caps[2],
            caps.get(3).map(|m| m.as_str()).unwrap_or("")
        ),
        None => value.to_string(),
    }
}

/// Masks the account id inside an ARN, leaving the rest readable.
pub fn mask_arn(value: &str) -> String {
    match arn_re().captures(value) {
        Some(caps) => format!(
            "{}{}{}",
            &caps[1],
            mask_aws_account_id(&caps[2]),
            &caps[3]
        ),
        None => value.to_string(),
    }
}

/// `abc123xyz` → `abc***xyz`; short values are fully starred.
pub fn mask_external_id(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 6 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - 6))
}

/// Mask a field for display, choosing the rule from the field name and the value shape.
pub fn mask_field(name: &str, value: &str) -> String {
    if value.starts_with("arn:aws:") {
        return mask_arn(value);
    }
    if account_id_re().is_match(value) {
        return mask_aws_account_id(value);
    }
    if name.contains("cidr") || name == "values" {
        return value
            .split(',')
            .map(|v| mask_ip_address(v.trim()))
            .collect::<Vec<_>>()
            .join(",");
    }
    if ipv4_re().is_match(value) {
        return mask_ip_address(value);
    }
    if name.contains("external_id") {
        return mask_external_id(value);
    }
    value.to_string()
}
