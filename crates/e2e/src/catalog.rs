//! Built-in storefront scenarios
//!
//! Four suites: registration/login, browsing, checkout and order history.
//! Checkout scenarios choose their terminal assertions from the configured
//! [`CardPolicy`] when the catalog is built, so the scenarios themselves stay
//! branch-free.

use crate::action::Action;
use crate::config::CardsConfig;
use crate::identity::IdentityFixture;
use crate::scenario::{Precondition, PreconditionFlows, Scenario};
use crate::target::{Target, UrlPattern};

pub const SUITE_AUTH: &str = "registration-login";
pub const SUITE_BROWSING: &str = "browsing";
pub const SUITE_CHECKOUT: &str = "checkout";
pub const SUITE_ORDERS: &str = "order-history";

mod selectors {
    pub const USERNAME: &str = "#username";
    pub const EMAIL: &str = "#email";
    pub const PASSWORD: &str = "#password";
    pub const CONFIRM_PASSWORD: &str = "#confirm-password";
    pub const SUBMIT: &str = "button[type=\"submit\"]";
    pub const CARD_NUMBER: &str = "#cardNumber";
    pub const PRODUCT_GRID: &str = ".grid";
}

fn buy_now() -> Target {
    Target::has_text("button", "Buy Now").first()
}

fn pay() -> Target {
    Target::has_text("button", "Pay")
}

fn greeting() -> Target {
    Target::text("Hello, {username}")
}

/// Decides whether the payment backend accepts a card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardPolicy {
    decline_prefix: String,
}

/// What a checkout is expected to end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutOutcome {
    Confirmed,
    StaysOnCheckout,
}

impl CardPolicy {
    pub fn new(decline_prefix: &str) -> Self {
        Self {
            decline_prefix: decline_prefix.to_string(),
        }
    }

    pub fn is_declined(&self, card: &str) -> bool {
        card.starts_with(&self.decline_prefix)
    }

    pub fn outcome(&self, card: &str) -> CheckoutOutcome {
        if self.is_declined(card) {
            CheckoutOutcome::StaysOnCheckout
        } else {
            CheckoutOutcome::Confirmed
        }
    }
}

/// Register `{username}` / `{email}` / `{password}` and land on the home page.
pub fn register_steps() -> Vec<Action> {
    vec![
        Action::navigate("/register"),
        Action::fill(Target::css(selectors::USERNAME), "{username}"),
        Action::fill(Target::css(selectors::EMAIL), "{email}"),
        Action::fill(Target::css(selectors::PASSWORD), "{password}"),
        Action::fill(Target::css(selectors::CONFIRM_PASSWORD), "{password}"),
        Action::click(Target::css(selectors::SUBMIT)),
    ]
}

fn start_checkout(card: &str) -> Vec<Action> {
    vec![
        Action::click(buy_now()),
        Action::wait_for_url(UrlPattern::regex("/checkout/")),
        Action::fill(Target::css(selectors::CARD_NUMBER), card),
        Action::click(pay()),
    ]
}

/// Flows that establish [`Precondition`]s.
pub fn flows(cards: &CardsConfig) -> PreconditionFlows {
    let mut register = register_steps();
    register.push(Action::wait_for_url(UrlPattern::path("/")));

    let mut purchase = start_checkout(&cards.history);
    purchase.push(Action::wait_for_url(UrlPattern::glob("**/order/**")));

    PreconditionFlows { register, purchase }
}

fn checkout_expectations(outcome: CheckoutOutcome, hold_ms: u64) -> Vec<Action> {
    match outcome {
        CheckoutOutcome::Confirmed => vec![
            Action::wait_for_url(UrlPattern::regex("/order/")),
            Action::assert_visible(Target::text("Order Confirmed!")),
        ],
        CheckoutOutcome::StaysOnCheckout => vec![
            Action::hold_url(UrlPattern::regex("/checkout/"), hold_ms),
            Action::assert_visible(pay()),
        ],
    }
}

fn checkout_scenario(name: &str, card: &str, policy: &CardPolicy, hold_ms: u64) -> Scenario {
    let outcome = policy.outcome(card);
    Scenario::new(name, SUITE_CHECKOUT)
        .describe("Buy the first listed product and pay with a card")
        .tag("checkout")
        .requires(Precondition::FreshSession)
        .requires(Precondition::RegisteredIdentity)
        .identity(IdentityFixture::new("buyer", "buyerpass123"))
        .steps(start_checkout(card))
        .expect(checkout_expectations(outcome, hold_ms))
}

/// Every built-in scenario.
pub fn storefront(cards: &CardsConfig) -> Vec<Scenario> {
    let policy = CardPolicy::new(&cards.decline_prefix);

    let register = Scenario::new("user can register a new account", SUITE_AUTH)
        .describe("A fresh identity registers and is greeted on the home page")
        .tag("auth")
        .requires(Precondition::FreshSession)
        .identity(IdentityFixture::new("testuser", "testpassword123"))
        .steps(register_steps())
        .expect([
            Action::wait_for_url(UrlPattern::path("/")),
            Action::assert_visible(greeting()),
        ]);

    let mut relogin_steps = register_steps();
    relogin_steps.extend([
        Action::wait_for_url(UrlPattern::path("/")),
        Action::click(Target::has_text("button", "Logout")),
        Action::navigate("/login"),
        Action::fill(Target::css(selectors::USERNAME), "{username}"),
        Action::fill(Target::css(selectors::PASSWORD), "{password}"),
        Action::click(Target::css(selectors::SUBMIT)),
    ]);
    let login = Scenario::new("user can login with existing account", SUITE_AUTH)
        .describe("Register, log out, then log back in with the same credentials")
        .tag("auth")
        .requires(Precondition::FreshSession)
        .identity(IdentityFixture::new("testuser", "testpassword123").with_suffix("login"))
        .steps(relogin_steps)
        .expect([
            Action::wait_for_url(UrlPattern::path("/")),
            Action::assert_visible(greeting()),
        ]);

    let browse = Scenario::new("home page displays products", SUITE_BROWSING)
        .describe("Anonymous visitors see the product grid and a purchasable product")
        .tag("smoke")
        .requires(Precondition::FreshSession)
        .steps([Action::navigate("/")])
        .expect([
            Action::assert_visible(buy_now()),
            Action::assert_visible(Target::css(selectors::PRODUCT_GRID).first()),
        ]);

    let valid_card = checkout_scenario(
        "user can complete a purchase with valid card",
        &cards.accepted,
        &policy,
        cards.decline_hold_ms,
    );
    let declined_card = checkout_scenario(
        "checkout fails with declined card",
        &cards.declined,
        &policy,
        cards.decline_hold_ms,
    );

    let orders = Scenario::new("user can view their orders after purchase", SUITE_ORDERS)
        .describe("After one purchase the order list shows an order entry")
        .tag("orders")
        .requires(Precondition::FreshSession)
        .requires(Precondition::RegisteredIdentity)
        .requires(Precondition::CompletedPurchase)
        .identity(IdentityFixture::new("orderviewer", "viewerpass123"))
        .steps([Action::click(Target::has_text("a", "My Orders"))])
        .expect([
            Action::wait_for_url(UrlPattern::path("/orders")),
            Action::assert_visible(Target::text_matches(r"Order #\d+").first()),
        ]);

    vec![register, login, browse, valid_card, declined_card, orders]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::check_unique_names;

    #[test]
    fn every_builtin_scenario_is_valid() {
        let cards = CardsConfig::default();
        let scenarios = storefront(&cards);
        assert_eq!(scenarios.len(), 6);
        check_unique_names(&scenarios).unwrap();

        let flows = flows(&cards);
        for scenario in &scenarios {
            scenario.plan(&flows).unwrap();
        }

        let suites: std::collections::BTreeSet<_> =
            scenarios.iter().map(|s| s.suite.as_str()).collect();
        assert_eq!(suites.len(), 4);
    }

    #[test]
    fn decline_prefix_selects_outcome() {
        let policy = CardPolicy::new("0000");
        assert_eq!(policy.outcome("0000123456789012"), CheckoutOutcome::StaysOnCheckout);
        assert_eq!(policy.outcome("1234567890123456"), CheckoutOutcome::Confirmed);
        assert_eq!(policy.outcome("1111222233334444"), CheckoutOutcome::Confirmed);
    }

    #[test]
    fn declined_checkout_expects_no_navigation() {
        let cards = CardsConfig::default();
        let declined = storefront(&cards)
            .into_iter()
            .find(|s| s.name == "checkout fails with declined card")
            .unwrap();
        assert_eq!(
            declined.expect[0],
            Action::hold_url(UrlPattern::regex("/checkout/"), 1500)
        );
        assert!(declined
            .steps
            .contains(&Action::fill(Target::css("#cardNumber"), "0000123456789012")));
    }

    #[test]
    fn custom_prefix_flips_expectations() {
        let cards = CardsConfig {
            decline_prefix: "1234".to_string(),
            ..Default::default()
        };
        let valid = storefront(&cards)
            .into_iter()
            .find(|s| s.name == "user can complete a purchase with valid card")
            .unwrap();
        assert!(matches!(valid.expect[0], Action::HoldUrlPattern { .. }));
    }

    #[test]
    fn order_history_plan_registers_then_purchases() {
        let cards = CardsConfig::default();
        let orders = storefront(&cards)
            .into_iter()
            .find(|s| s.suite == SUITE_ORDERS)
            .unwrap();
        let plan = orders.plan(&flows(&cards)).unwrap();
        assert_eq!(plan[0], Action::navigate("/register"));
        assert!(plan.contains(&Action::fill(Target::css("#cardNumber"), "1111222233334444")));
        assert!(plan.contains(&Action::wait_for_url(UrlPattern::glob("**/order/**"))));
    }
}
