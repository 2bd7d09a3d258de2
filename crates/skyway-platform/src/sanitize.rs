//! Secret scrubbing for platform error messages

use regex::Regex;
use std::sync::OnceLock;

/// Replacement for scrubbed values
pub const REDACTED: &str = "******";

const PATTERNS: &[(&str, &str)] = &[
    (r#"(?i)("(?:password|passwd|secret|token)"\s*:\s*")[^"]*(")"#, "${1}******${2}"),
    (r"(?i)\b(password|passwd|pwd|secret|token)(\s*[=:]\s*)[^\s&,;]+", "${1}${2}******"),
    (r"(?i)\b(bearer\s+)[A-Za-z0-9\-._~+/]+=*", "${1}******"),
    (r"(://[^/\s:@]+:)[^@\s/]+@", "${1}******@"),
];

fn patterns() -> &'static [(Regex, &'static str)] {
    static COMPILED: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        PATTERNS
            .iter()
            .filter_map(|(pattern, replacement)| {
                Regex::new(pattern).ok().map(|re| (re, *replacement))
            })
            .collect()
    })
}

/// Strip known secret values and credential-looking fragments from a message
pub fn sanitize_message(message: &str, secrets: &[&str]) -> String {
    let mut sanitized = message.to_string();
    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        sanitized = sanitized.replace(secret, REDACTED);
    }
    for (re, replacement) in patterns() {
        sanitized = re.replace_all(&sanitized, *replacement).into_owned();
    }
    sanitized
}
