//! Token validation is an external collaborator per the spec's scope note
//! ("authentication token validation... out of scope, specified only by the
//! interfaces the core consumes"). This module defines that interface and a
//! minimal static-list implementation sufficient to exercise the `auth`
//! message's gate; a real deployment would swap in an OIDC/JWT validator the
//! way the teacher's `keycloak.rs` does for its own (client-side) token flow.

/// A validated token's opaque subject, carried only for logging.
pub type Subject = String;

pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Option<Subject>;
}

/// Accepts everything; used when `auth.enabled = false`.
pub struct NoopValidator;

impl TokenValidator for NoopValidator {
    fn validate(&self, _token: &str) -> Option<Subject> {
        Some("anonymous".to_owned())
    }
}

/// Accepts tokens present in a configured allowlist. Good enough for the
/// orchestration core's own tests; production deployments front this with a
/// real validator behind the same trait.
pub struct StaticTokenValidator {
    valid_tokens: Vec<String>,
}

impl StaticTokenValidator {
    pub fn new(valid_tokens: Vec<String>) -> Self {
        Self { valid_tokens }
    }
}

impl TokenValidator for StaticTokenValidator {
    fn validate(&self, token: &str) -> Option<Subject> {
        self.valid_tokens.iter().any(|t| t == token).then(|| token.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_validator_rejects_unknown_tokens() {
        let validator = StaticTokenValidator::new(vec!["good-token".into()]);
        assert!(validator.validate("good-token").is_some());
        assert!(validator.validate("bad-token").is_none());
    }

    #[test]
    fn noop_validator_accepts_anything() {
        assert!(NoopValidator.validate("whatever").is_some());
    }
}
