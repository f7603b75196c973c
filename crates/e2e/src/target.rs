//! Element targets and URL patterns

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{E2eError, E2eResult};

/// Something on the page a primitive acts on.
///
/// Resolution is strict: a target must match exactly one element. Pages that
/// repeat a control (a "Buy Now" button per product) have to say which one
/// they mean with [`Target::First`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// CSS selector, e.g. `#cardNumber`
    Css(String),

    /// Element whose text contains this string
    Text(String),

    /// Element whose text matches this regular expression
    TextMatches(String),

    /// CSS selector narrowed to elements containing `text`
    HasText { css: String, text: String },

    /// First element matched by the inner target
    First(Box<Target>),
}

impl Target {
    pub fn css(selector: &str) -> Self {
        Target::Css(selector.to_string())
    }

    pub fn text(text: &str) -> Self {
        Target::Text(text.to_string())
    }

    pub fn text_matches(pattern: &str) -> Self {
        Target::TextMatches(pattern.to_string())
    }

    pub fn has_text(css: &str, text: &str) -> Self {
        Target::HasText {
            css: css.to_string(),
            text: text.to_string(),
        }
    }

    pub fn first(self) -> Self {
        Target::First(Box::new(self))
    }

    /// Apply `f` to every free-text part of the target.
    pub fn map_text(&self, f: &impl Fn(&str) -> String) -> Self {
        match self {
            Target::Css(s) => Target::Css(f(s)),
            Target::Text(t) => Target::Text(f(t)),
            Target::TextMatches(p) => Target::TextMatches(f(p)),
            Target::HasText { css, text } => Target::HasText {
                css: f(css),
                text: f(text),
            },
            Target::First(inner) => Target::First(Box::new(inner.map_text(f))),
        }
    }

    /// Render as a Playwright selector string.
    pub fn selector(&self) -> String {
        match self {
            Target::Css(s) => s.clone(),
            Target::Text(t) => format!("text={}", t),
            Target::TextMatches(p) => format!("text=/{}/", p),
            Target::HasText { css, text } => {
                format!("{}:has-text(\"{}\")", css, text.replace('"', "\\\""))
            }
            Target::First(inner) => format!("{} >> nth=0", inner.selector()),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.selector())
    }
}

/// What the current URL is expected to look like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlPattern {
    /// Exact path, compared against the path of the current URL
    Path(String),

    /// Glob over the full URL: `**` spans segments, `*` stays within one
    Glob(String),

    /// Regular expression searched anywhere in the full URL
    Regex(String),
}

impl UrlPattern {
    pub fn path(path: &str) -> Self {
        UrlPattern::Path(path.to_string())
    }

    pub fn glob(glob: &str) -> Self {
        UrlPattern::Glob(glob.to_string())
    }

    pub fn regex(pattern: &str) -> Self {
        UrlPattern::Regex(pattern.to_string())
    }

    pub fn compile(&self) -> E2eResult<UrlMatcher> {
        match self {
            UrlPattern::Path(p) => Ok(UrlMatcher::Path(p.clone())),
            UrlPattern::Glob(g) => Regex::new(&glob_to_regex(g))
                .map(UrlMatcher::Regex)
                .map_err(|e| E2eError::ScenarioParse(format!("bad URL glob {}: {}", g, e))),
            UrlPattern::Regex(r) => Regex::new(r)
                .map(UrlMatcher::Regex)
                .map_err(|e| E2eError::ScenarioParse(format!("bad URL regex {}: {}", r, e))),
        }
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlPattern::Path(p) => write!(f, "{}", p),
            UrlPattern::Glob(g) => write!(f, "{}", g),
            UrlPattern::Regex(r) => write!(f, "/{}/", r),
        }
    }
}

/// A compiled [`UrlPattern`].
#[derive(Debug, Clone)]
pub enum UrlMatcher {
    Path(String),
    Regex(Regex),
}

impl UrlMatcher {
    pub fn matches(&self, url: &str) -> bool {
        match self {
            UrlMatcher::Path(expected) => match reqwest::Url::parse(url) {
                Ok(parsed) => parsed.path() == expected,
                Err(_) => url == expected,
            },
            UrlMatcher::Regex(re) => re.is_match(url),
        }
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^/]*"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Target::css("#cardNumber"), "#cardNumber" ; "css")]
    #[test_case(Target::text("Order Confirmed!"), "text=Order Confirmed!" ; "text")]
    #[test_case(Target::text_matches(r"Order #\d+"), r"text=/Order #\d+/" ; "text regex")]
    #[test_case(Target::has_text("button", "Pay"), "button:has-text(\"Pay\")" ; "has text")]
    #[test_case(
        Target::has_text("button", "Buy Now").first(),
        "button:has-text(\"Buy Now\") >> nth=0" ;
        "first"
    )]
    fn renders_playwright_selectors(target: Target, expected: &str) {
        assert_eq!(target.selector(), expected);
    }

    #[test_case(UrlPattern::path("/"), "http://localhost:8080/", true ; "root path")]
    #[test_case(UrlPattern::path("/"), "http://localhost:8080/register", false ; "other path")]
    #[test_case(UrlPattern::path("/orders"), "http://localhost:8080/orders?page=1", true ; "query ignored")]
    #[test_case(UrlPattern::glob("**/order/**"), "http://localhost:8080/order/17", true ; "glob hit")]
    #[test_case(UrlPattern::glob("**/order/**"), "http://localhost:8080/orders", false ; "glob miss")]
    #[test_case(UrlPattern::regex(r"/checkout/"), "http://localhost:8080/checkout/9", true ; "regex hit")]
    #[test_case(UrlPattern::regex(r"/checkout/"), "http://localhost:8080/order/9", false ; "regex miss")]
    fn url_patterns(pattern: UrlPattern, url: &str, expected: bool) {
        assert_eq!(pattern.compile().unwrap().matches(url), expected);
    }

    // Inside an action the target is a nested map; on its own serde_yaml wants `!tag` form.
    #[test]
    fn targets_parse_from_yaml() {
        let action: crate::action::Action = serde_yaml::from_str(
            "action: click\ntarget:\n  first:\n    has_text:\n      css: button\n      text: Buy Now\n",
        )
        .unwrap();
        assert_eq!(
            action,
            crate::action::Action::click(Target::has_text("button", "Buy Now").first())
        );

        let target: Target = serde_yaml::from_str("!css \"#cardNumber\"").unwrap();
        assert_eq!(target, Target::css("#cardNumber"));
    }
}
