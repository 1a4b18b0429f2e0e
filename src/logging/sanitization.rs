use regex::Regex;
use std::sync::OnceLock;

/// Patterns stripped from upstream error text before it reaches the logs
struct SanitizationPatterns {
    email: Regex,
    card_number: Regex,
    payments_key: Regex,
    jwt: Regex,
    bearer_token: Regex,
    secret_field: Regex,
    ipv4_address: Regex,
}

static PATTERNS: OnceLock<SanitizationPatterns> = OnceLock::new();

fn compile(pattern: &str) -> Regex {
    // Literal patterns; covered by the logging tests.
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid sanitization pattern {}: {}", pattern, e))
}

fn patterns() -> &'static SanitizationPatterns {
    PATTERNS.get_or_init(|| SanitizationPatterns {
        // Keep the domain visible
        email: compile(r"\b([a-zA-Z0-9._%+-]+)@([a-zA-Z0-9.-]+\.[a-zA-Z]{2,})\b"),

        card_number: compile(r"\b\d{13,19}\b"),

        // Payments provider secret/publishable/restricted/webhook keys
        payments_key: compile(r"\b(sk|pk|rk)_(live|test)_[a-zA-Z0-9]{8,}\b|\bwhsec_[a-zA-Z0-9]{8,}\b"),

        // Identity and service-role tokens
        jwt: compile(r"\beyJ[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]*"),

        bearer_token: compile(r"Bearer\s+[a-zA-Z0-9\-_\.]+"),

        secret_field: compile(r"(?i)\b(password|apikey|api_key|secret|token)\s*[:=]\s*\S+"),

        // Show subnet only
        ipv4_address: compile(r"\b(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})\b"),
    })
}

/// Remove credentials and personal data from a log message
///
/// - email addresses become `***@domain`
/// - card numbers, payment keys and JWTs become `[REDACTED]`
/// - `Bearer` tokens and `key=value` secrets keep only their label
/// - IPv4 addresses keep their first two octets
pub fn sanitize_log_message(message: &str) -> String {
    let patterns = patterns();

    let result = patterns.email.replace_all(message, "***@$2");
    let result = patterns.bearer_token.replace_all(&result, "Bearer [REDACTED]");
    let result = patterns.jwt.replace_all(&result, "[REDACTED]");
    let result = patterns.payments_key.replace_all(&result, "[REDACTED]");
    let result = patterns.card_number.replace_all(&result, "[REDACTED]");
    let result = patterns.secret_field.replace_all(&result, "$1=[REDACTED]");
    let result = patterns.ipv4_address.replace_all(&result, "$1.$2.x.x");

    result.into_owned()
}
