//! Input validation and output guardrails for user-facing agents.

use regex::Regex;
use std::sync::LazyLock;

use crate::domain::DomainError;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("email pattern")
});

static DANGEROUS_MARKUP: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"(?is)<script.*?>.*?</script>", r"(?i)javascript:", r"(?i)on\w+\s*="]
        .iter()
        .map(|p| Regex::new(p).expect("markup pattern"))
        .collect()
});

static INJECTION: LazyLock<Vec<(Regex, InjectionKind)>> = LazyLock::new(|| {
    [
        (r"ignore\s+(all\s+)?previous\s+instructions?", InjectionKind::IgnoreInstructions),
        (r"ignore\s+all\s+previous", InjectionKind::IgnoreInstructions),
        (r"disregard\s+(all\s+)?previous", InjectionKind::Disregard),
        (r"disregard\s+all", InjectionKind::Disregard),
        (r"forget\s+everything", InjectionKind::Forget),
        (r"you\s+are\s+now", InjectionKind::RoleChange),
        (r"new\s+instructions?:", InjectionKind::NewInstructions),
    ]
    .into_iter()
    .map(|(p, kind)| (Regex::new(p).expect("injection pattern"), kind))
    .collect()
});

static SENSITIVE: LazyLock<Vec<(Regex, SensitiveKind)>> = LazyLock::new(|| {
    [
        (r"\d{3}\.\d{3}\.\d{3}-\d{2}", SensitiveKind::Cpf),
        (r"\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2}", SensitiveKind::Cnpj),
        (r"\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}", SensitiveKind::CardNumber),
    ]
    .into_iter()
    .map(|(p, kind)| (Regex::new(p).expect("sensitive pattern"), kind))
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionKind {
    IgnoreInstructions,
    Disregard,
    Forget,
    RoleChange,
    NewInstructions,
}

impl InjectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IgnoreInstructions => "ignore_instructions",
            Self::Disregard => "disregard",
            Self::Forget => "forget",
            Self::RoleChange => "role_change",
            Self::NewInstructions => "new_instructions",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensitiveKind {
    Cpf,
    Cnpj,
    CardNumber,
}

pub fn validate_email(email: &str) -> bool {
    EMAIL.is_match(email)
}

/// Brazilian phone numbers: 10 or 11 digits once formatting is stripped.
pub fn validate_phone(phone: &str) -> bool {
    let digits = phone.chars().filter(char::is_ascii_digit).count();
    (10..=11).contains(&digits)
}

/// Collapses whitespace, truncates to `max_length` characters and strips
/// script blocks, `javascript:` URLs and inline event handlers.
pub fn sanitize_input(text: &str, max_length: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut text: String = collapsed.chars().take(max_length).collect();

    for pattern in DANGEROUS_MARKUP.iter() {
        text = pattern.replace_all(&text, "").into_owned();
    }

    text.trim().to_string()
}

pub fn check_prompt_injection(text: &str) -> Option<InjectionKind> {
    let lower = text.to_lowercase();
    INJECTION
        .iter()
        .find(|(pattern, _)| pattern.is_match(&lower))
        .map(|(_, kind)| *kind)
}

pub fn scan_sensitive_output(text: &str) -> Option<SensitiveKind> {
    SENSITIVE
        .iter()
        .find(|(pattern, _)| pattern.is_match(text))
        .map(|(_, kind)| *kind)
}

/// Gate applied to every chat message before it reaches the model.
pub fn validate_input(message: &str, max_length: usize) -> Result<(), DomainError> {
    if message.trim().is_empty() {
        return Err(DomainError::validation("empty messages are not allowed"));
    }

    if message.chars().count() > max_length {
        return Err(DomainError::validation(format!(
            "message too long (maximum {max_length} characters)"
        )));
    }

    if let Some(kind) = check_prompt_injection(message) {
        return Err(DomainError::validation(format!(
            "input contains disallowed patterns ({})",
            kind.as_str()
        )));
    }

    Ok(())
}
