//! Injection and size screening of untrusted strings.
//!
//! The validator only decides; auditing the decision is the caller's job.

use regex::RegexSet;

use crate::domain::models::ValidationConfig;

/// Outcome of a screening pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub valid: bool,
    pub block_reason: Option<String>,
}

impl Validation {
    fn ok() -> Self {
        Self {
            valid: true,
            block_reason: None,
        }
    }

    fn blocked(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            block_reason: Some(reason.into()),
        }
    }
}

/// Pattern families screened for, in match order.
const FAMILY_NAMES: &[&str] = &[
    "sql_injection",
    "prompt_override",
    "jailbreak",
    "system_token",
];

const SQL_PATTERNS: &str = r"(?i)('\s*(or|and)\s+[\w']+\s*=\s*[\w']+|;\s*(drop|delete|truncate|alter)\s+(table|database)|union\s+(all\s+)?select\s|--\s*$|/\*.*\*/\s*$)";
const PROMPT_OVERRIDE_PATTERNS: &str = r"(?i)(ignore\s+(all\s+)?(previous|prior|above)\s+(instructions|prompts?|rules)|disregard\s+(your|the|all)\s+(instructions|system\s+prompt|rules)|forget\s+(everything|all)\s+(you|above)|you\s+are\s+now\s+(a|an)\s)";
const JAILBREAK_PATTERNS: &str = r"(?i)(\bDAN\s+mode\b|do\s+anything\s+now|developer\s+mode\s+enabled|pretend\s+you\s+have\s+no\s+(restrictions|guidelines|filters)|act\s+as\s+if\s+you\s+(are\s+)?unrestricted|bypass\s+(your\s+)?safety)";
const SYSTEM_TOKEN_PATTERNS: &str = r"(?i)(<\|im_start\|>|<\|im_end\|>|<\|endoftext\|>|\[/?INST\]|<<SYS>>|<\|system\|>|\[/?SYSTEM\])";

/// Screens untrusted strings before they reach a handler or a model.
pub struct InputValidator {
    config: ValidationConfig,
    patterns: RegexSet,
}

impl InputValidator {
    pub fn new(config: ValidationConfig) -> Self {
        let patterns = RegexSet::new([
            SQL_PATTERNS,
            PROMPT_OVERRIDE_PATTERNS,
            JAILBREAK_PATTERNS,
            SYSTEM_TOKEN_PATTERNS,
        ])
        .expect("screening patterns are valid regexes");

        Self { config, patterns }
    }

    pub fn with_defaults() -> Self {
        Self::new(ValidationConfig::default())
    }

    /// Screen a text input: length first, then every pattern family.
    pub fn validate(&self, input: &str) -> Validation {
        if input.len() > self.config.max_input_length {
            return Validation::blocked(format!(
                "input exceeds maximum length ({} > {})",
                input.len(),
                self.config.max_input_length
            ));
        }

        if let Some(idx) = self.patterns.matches(input).iter().next() {
            return Validation::blocked(format!(
                "input matched {} screening pattern",
                FAMILY_NAMES.get(idx).copied().unwrap_or("unknown")
            ));
        }

        Validation::ok()
    }

    /// Byte-level cap for file payloads.
    pub fn validate_file_payload(&self, bytes: &[u8]) -> Validation {
        if bytes.len() > self.config.max_file_bytes {
            return Validation::blocked(format!(
                "file payload exceeds maximum size ({} > {} bytes)",
                bytes.len(),
                self.config.max_file_bytes
            ));
        }
        Validation::ok()
    }
}
