//! Ephemeral test identities
//!
//! Every scenario attempt registers a brand-new account. Usernames are built
//! from a millisecond token that is strictly increasing across the whole
//! process, so two attempts can never collide even when they start in the
//! same millisecond on different workers.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{E2eError, E2eResult};

/// Credentials for one scenario attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestIdentity {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// How a scenario wants its identity built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityFixture {
    /// Leading part of the username, e.g. `buyer`
    pub prefix: String,

    /// Appended after the token, e.g. `login`
    #[serde(default)]
    pub suffix: Option<String>,

    #[serde(default = "default_password")]
    pub password: String,
}

fn default_password() -> String {
    "testpassword123".to_string()
}

impl IdentityFixture {
    pub fn new(prefix: &str, password: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            suffix: None,
            password: password.to_string(),
        }
    }

    pub fn with_suffix(mut self, suffix: &str) -> Self {
        self.suffix = Some(suffix.to_string());
        self
    }
}

/// Process-wide source of unique identities.
#[derive(Debug)]
pub struct IdentitySource {
    run_started_ms: u64,
    last_token: AtomicU64,
    frozen_clock: Option<u64>,
    email_domain: String,
}

impl IdentitySource {
    /// Start a source at the current wall-clock time.
    pub fn new(email_domain: &str) -> Self {
        let now = wall_clock_ms();
        Self {
            run_started_ms: now,
            last_token: AtomicU64::new(now.saturating_sub(1)),
            frozen_clock: None,
            email_domain: email_domain.to_string(),
        }
    }

    /// A source whose clock never advances; tokens still increase by one per call.
    pub fn frozen_at(start_ms: u64, email_domain: &str) -> Self {
        Self {
            run_started_ms: start_ms,
            last_token: AtomicU64::new(start_ms.saturating_sub(1)),
            frozen_clock: Some(start_ms),
            email_domain: email_domain.to_string(),
        }
    }

    pub fn run_started_ms(&self) -> u64 {
        self.run_started_ms
    }

    /// Next token: the current millisecond, bumped past anything handed out before.
    pub fn next_token(&self) -> u64 {
        let now = self.frozen_clock.unwrap_or_else(wall_clock_ms);
        let previous = self
            .last_token
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }

    /// Build an identity for `fixture`.
    ///
    /// Fails with [`E2eError::InvalidIdentity`] when the prefix or suffix would
    /// not produce a valid email local part; run them through
    /// [`sanitize_suffix`] first if they come from user input.
    pub fn make_identity(&self, fixture: &IdentityFixture) -> E2eResult<TestIdentity> {
        validate_part(&fixture.prefix)?;
        if let Some(suffix) = &fixture.suffix {
            validate_suffix(suffix)?;
        }

        let token = self.next_token();
        let username = match &fixture.suffix {
            Some(suffix) => format!("{}_{}_{}", fixture.prefix, token, suffix),
            None => format!("{}_{}", fixture.prefix, token),
        };
        let email = format!("{}@{}", username, self.email_domain);

        Ok(TestIdentity {
            username,
            email,
            password: fixture.password.clone(),
        })
    }
}

fn wall_clock_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn is_valid_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

fn validate_part(part: &str) -> E2eResult<()> {
    if part.is_empty() || !part.chars().all(is_valid_char) {
        return Err(E2eError::InvalidIdentity {
            suffix: part.to_string(),
        });
    }
    Ok(())
}

/// The suffix is the last `_` segment of a username, so it must neither
/// contain `_` nor read as a token; otherwise `p_5` + token 6 and `p` +
/// token 5 + suffix `6` would both give `p_5_6`.
fn validate_suffix(suffix: &str) -> E2eResult<()> {
    validate_part(suffix)?;
    if suffix.contains('_') || suffix.chars().all(|c| c.is_ascii_digit()) {
        return Err(E2eError::InvalidIdentity {
            suffix: suffix.to_string(),
        });
    }
    Ok(())
}

/// Turn arbitrary text into a suffix [`IdentitySource::make_identity`] accepts.
pub fn sanitize_suffix(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if is_valid_char(c) && c != '_' { c } else { '-' })
        .collect();
    if cleaned.chars().all(|c| c.is_ascii_digit()) {
        format!("s{}", cleaned)
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn first_identity_uses_the_run_start_token() {
        let source = IdentitySource::frozen_at(1_700_000_000_000, "example.com");
        let identity = source
            .make_identity(&IdentityFixture::new("buyer", "buyerpass123"))
            .unwrap();

        assert_eq!(identity.username, "buyer_1700000000000");
        assert_eq!(identity.email, "buyer_1700000000000@example.com");
        assert_eq!(identity.password, "buyerpass123");
    }

    #[test]
    fn same_millisecond_bumps_the_token() {
        let source = IdentitySource::frozen_at(1_700_000_000_000, "example.com");
        let fixture = IdentityFixture::new("testuser", "testpassword123");
        let a = source.make_identity(&fixture).unwrap();
        let b = source.make_identity(&fixture).unwrap();

        assert_eq!(a.username, "testuser_1700000000000");
        assert_eq!(b.username, "testuser_1700000000001");
    }

    #[test]
    fn suffix_is_appended_after_token() {
        let source = IdentitySource::frozen_at(42, "example.com");
        let identity = source
            .make_identity(&IdentityFixture::new("testuser", "pw").with_suffix("login"))
            .unwrap();
        assert_eq!(identity.username, "testuser_42_login");
        assert_eq!(identity.email, "testuser_42_login@example.com");
    }

    #[test]
    fn invalid_suffix_is_reported() {
        let source = IdentitySource::new("example.com");
        let err = source
            .make_identity(&IdentityFixture::new("buyer", "pw").with_suffix("a b@c"))
            .unwrap_err();
        assert!(matches!(err, E2eError::InvalidIdentity { .. }));
        assert_eq!(sanitize_suffix("a b@c"), "a-b-c");
    }

    #[test]
    fn suffix_cannot_pose_as_a_token() {
        let source = IdentitySource::frozen_at(5, "example.com");
        for bad in ["6", "6_x", "retry_2"] {
            let err = source
                .make_identity(&IdentityFixture::new("p", "pw").with_suffix(bad))
                .unwrap_err();
            assert!(matches!(err, E2eError::InvalidIdentity { ref suffix } if suffix == bad));
        }

        let identity = source
            .make_identity(&IdentityFixture::new("p_5", "pw"))
            .unwrap();
        assert_eq!(identity.username, "p_5_5");
        assert_eq!(sanitize_suffix("42"), "s42");
        assert_eq!(sanitize_suffix("retry_2"), "retry-2");
        assert_eq!(sanitize_suffix(""), "s");
    }

    #[test]
    fn concurrent_identities_never_collide() {
        let source = Arc::new(IdentitySource::new("example.com"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let source = Arc::clone(&source);
                std::thread::spawn(move || {
                    let fixture = IdentityFixture::new("buyer", "pw");
                    (0..250)
                        .map(|_| source.make_identity(&fixture).unwrap().username)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for username in handle.join().unwrap() {
                assert!(seen.insert(username), "duplicate username");
            }
        }
        assert_eq!(seen.len(), 2000);
    }
}
