//! Where a model client gets its API key from.
//!
//! The document path reads its key from the process environment; direct
//! chat uses whatever key the caller sent with the request and never looks
//! at the environment. Both are expressed as a [`CredentialSource`] handed
//! to the client when it is built.

use std::fmt;

#[derive(Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Read the named environment variable each time the key is needed.
    Environment { var: String },
    /// A key supplied with a single request. Never persisted.
    CallerSupplied(String),
}

impl CredentialSource {
    pub fn environment(var: impl Into<String>) -> Self {
        CredentialSource::Environment { var: var.into() }
    }

    /// Returns the key, or `None` if it is absent or blank.
    pub fn resolve(&self) -> Option<String> {
        let key = match self {
            CredentialSource::Environment { var } => std::env::var(var).ok()?,
            CredentialSource::CallerSupplied(key) => key.clone(),
        };
        let key = key.trim();
        if key.is_empty() {
            None
        } else {
            Some(key.to_string())
        }
    }

    /// Short description for logs and error messages. Never includes the key.
    pub fn describe(&self) -> String {
        match self {
            CredentialSource::Environment { var } => format!("environment variable {}", var),
            CredentialSource::CallerSupplied(_) => "caller-supplied key".to_string(),
        }
    }
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Environment { var } => {
                f.debug_struct("Environment").field("var", var).finish()
            }
            CredentialSource::CallerSupplied(_) => f.write_str("CallerSupplied(<redacted>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_supplied_blank_is_none() {
        assert_eq!(CredentialSource::CallerSupplied(String::new()).resolve(), None);
        assert_eq!(CredentialSource::CallerSupplied("  ".into()).resolve(), None);
        assert_eq!(
            CredentialSource::CallerSupplied(" sk-test ".into()).resolve(),
            Some("sk-test".to_string())
        );
    }

    #[test]
    fn missing_environment_variable_is_none() {
        let src = CredentialSource::environment("DOCCHAT_TEST_SURELY_UNSET_VAR");
        assert_eq!(src.resolve(), None);
    }

    #[test]
    fn debug_never_prints_key() {
        let src = CredentialSource::CallerSupplied("sk-secret".into());
        let shown = format!("{:?} {}", src, src.describe());
        assert!(!shown.contains("sk-secret"));
    }
}
