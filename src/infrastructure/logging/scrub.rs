//! Secret scrubbing for log output.
//!
//! Applied to user-visible error strings and any message that might echo
//! request material. Structured fields carrying secrets should simply not
//! be logged; this is the second line of defence.

use regex::Regex;

/// Rewrites token/key/secret-shaped substrings to redaction markers.
pub struct SecretScrubber {
    bearer_pattern: Regex,
    field_pattern: Regex,
    hex_key_pattern: Regex,
}

impl SecretScrubber {
    pub fn new() -> Self {
        Self {
            // Authorization header material
            bearer_pattern: Regex::new(r"Bearer\s+[A-Za-z0-9\-_\.=]+")
                .expect("scrub patterns are valid regexes"),
            // key/token/secret/password fields in JSON-ish or k=v text
            field_pattern: Regex::new(
                r#"["']?(?:api_key|apikey|token|secret|password|signing_key)["']?\s*[:=]\s*["']?[^"'\s,}]+["']?"#,
            )
            .expect("scrub patterns are valid regexes"),
            // Long bare hex blobs (signing keys, HMAC material)
            hex_key_pattern: Regex::new(r"\b[0-9a-fA-F]{48,}\b")
                .expect("scrub patterns are valid regexes"),
        }
    }

    /// Scrub one message.
    pub fn scrub(&self, message: &str) -> String {
        let scrubbed = self
            .bearer_pattern
            .replace_all(message, "Bearer [REDACTED]");
        let scrubbed = self.field_pattern.replace_all(&scrubbed, |caps: &regex::Captures| {
            let matched = &caps[0];
            let cut = matched
                .find(':')
                .or_else(|| matched.find('='))
                .unwrap_or(matched.len());
            format!("{}=[REDACTED]", matched[..cut].trim_end())
        });
        self.hex_key_pattern
            .replace_all(&scrubbed, "[REDACTED]")
            .to_string()
    }
}

impl Default for SecretScrubber {
    fn default() -> Self {
        Self::new()
    }
}
