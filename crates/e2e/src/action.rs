//! Scenario actions
//!
//! Actions are plain data. Free text inside them may reference the identity
//! of the running attempt with `{username}`, `{email}` and `{password}`; those
//! placeholders are filled in by [`Bindings`] right before the action runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::identity::TestIdentity;
use crate::target::{Target, UrlPattern};

/// A single browser-driving step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Load a path relative to the base URL
    Navigate { path: String },

    /// Set the value of exactly one input
    Fill { target: Target, value: String },

    /// Click exactly one element
    Click { target: Target },

    /// Wait until the current URL matches
    WaitForUrlPattern { pattern: UrlPattern },

    /// Wait until exactly one element is visible
    AssertVisible { target: Target },

    /// Check that the URL keeps matching for the whole window
    HoldUrlPattern {
        pattern: UrlPattern,
        #[serde(default = "default_hold_ms")]
        hold_ms: u64,
    },
}

fn default_hold_ms() -> u64 {
    1500
}

impl Action {
    pub fn navigate(path: &str) -> Self {
        Action::Navigate {
            path: path.to_string(),
        }
    }

    pub fn fill(target: Target, value: &str) -> Self {
        Action::Fill {
            target,
            value: value.to_string(),
        }
    }

    pub fn click(target: Target) -> Self {
        Action::Click { target }
    }

    pub fn wait_for_url(pattern: UrlPattern) -> Self {
        Action::WaitForUrlPattern { pattern }
    }

    pub fn assert_visible(target: Target) -> Self {
        Action::AssertVisible { target }
    }

    pub fn hold_url(pattern: UrlPattern, hold_ms: u64) -> Self {
        Action::HoldUrlPattern { pattern, hold_ms }
    }

    /// Whether this action only observes the page.
    pub fn is_assertion(&self) -> bool {
        matches!(
            self,
            Action::WaitForUrlPattern { .. }
                | Action::AssertVisible { .. }
                | Action::HoldUrlPattern { .. }
        )
    }

    /// Short label used in logs and reports
    pub fn describe(&self) -> String {
        match self {
            Action::Navigate { path } => format!("navigate:{}", path),
            Action::Fill { target, .. } => format!("fill:{}", target),
            Action::Click { target } => format!("click:{}", target),
            Action::WaitForUrlPattern { pattern } => format!("wait_for_url:{}", pattern),
            Action::AssertVisible { target } => format!("assert_visible:{}", target),
            Action::HoldUrlPattern { pattern, hold_ms } => {
                format!("hold_url:{}:{}ms", pattern, hold_ms)
            }
        }
    }

    /// Substitute placeholders in every text field.
    pub fn resolve(&self, bindings: &Bindings) -> Action {
        let sub = |s: &str| bindings.substitute(s);
        match self {
            Action::Navigate { path } => Action::Navigate { path: sub(path) },
            Action::Fill { target, value } => Action::Fill {
                target: target.map_text(&sub),
                value: sub(value),
            },
            Action::Click { target } => Action::Click {
                target: target.map_text(&sub),
            },
            Action::AssertVisible { target } => Action::AssertVisible {
                target: target.map_text(&sub),
            },
            Action::WaitForUrlPattern { .. } | Action::HoldUrlPattern { .. } => self.clone(),
        }
    }
}

/// Placeholder values available to a running attempt.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: BTreeMap<String, String>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_identity(identity: &TestIdentity) -> Self {
        Self::new()
            .with("username", &identity.username)
            .with("email", &identity.email)
            .with("password", &identity.password)
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Replace every known `{key}`; unknown placeholders are left untouched.
    pub fn substitute(&self, input: &str) -> String {
        if !input.contains('{') {
            return input.to_string();
        }
        let mut out = input.to_string();
        for (key, value) in &self.values {
            out = out.replace(&format!("{{{}}}", key), value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> TestIdentity {
        TestIdentity {
            username: "buyer_1700000000000".to_string(),
            email: "buyer_1700000000000@example.com".to_string(),
            password: "buyerpass123".to_string(),
        }
    }

    #[test]
    fn resolves_identity_placeholders() {
        let bindings = Bindings::for_identity(&identity());
        let greeting = Action::assert_visible(Target::text("Hello, {username}"));
        assert_eq!(
            greeting.resolve(&bindings),
            Action::assert_visible(Target::text("Hello, buyer_1700000000000"))
        );

        let email = Action::fill(Target::css("#email"), "{email}");
        assert_eq!(
            email.resolve(&bindings),
            Action::fill(Target::css("#email"), "buyer_1700000000000@example.com")
        );
    }

    #[test]
    fn regex_quantifiers_survive_substitution() {
        let bindings = Bindings::for_identity(&identity());
        let action = Action::assert_visible(Target::text_matches(r"Order #\d{1,9}"));
        assert_eq!(action.resolve(&bindings), action);
    }

    #[test]
    fn parses_tagged_yaml_steps() {
        let yaml = r##"
- action: navigate
  path: /register
- action: fill
  target:
    css: "#username"
  value: "{username}"
- action: wait_for_url_pattern
  pattern:
    regex: /checkout/
- action: hold_url_pattern
  pattern:
    regex: /checkout/
"##;
        let steps: Vec<Action> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0], Action::navigate("/register"));
        assert!(steps[2].is_assertion());
        assert_eq!(
            steps[3],
            Action::hold_url(UrlPattern::regex("/checkout/"), 1500)
        );
    }
}
