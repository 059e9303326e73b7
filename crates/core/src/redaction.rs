//! Redaction of build-argument values in command lines
//!
//! Build arguments carry values merged from the host's root environment file,
//! which routinely holds API keys and passwords. Every command line that ends
//! up in a log record or an error message goes through [`redact_command`]
//! first so those values never leave the process.

use once_cell::sync::Lazy;
use regex::Regex;

/// Replacement text for redacted values
pub const REDACTION_PLACEHOLDER: &str = "****";

/// Matches `--build-arg KEY="VALUE"` where VALUE may contain escaped quotes
static BUILD_ARG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"--build-arg\s+([^\s=]+)="(?:[^"\\]|\\.)*""#)
        .expect("Valid regex pattern")
});

/// Replace every build-argument value in `command` with the placeholder.
///
/// Keys are preserved so logs still show which variables were passed.
pub fn redact_command(command: &str) -> String {
    BUILD_ARG_PATTERN
        .replace_all(command, |caps: &regex::Captures<'_>| {
            format!("--build-arg {}=\"{}\"", &caps[1], REDACTION_PLACEHOLDER)
        })
        .into_owned()
}
