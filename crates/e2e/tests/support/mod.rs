//! In-memory storefront used by the integration tests.
//!
//! Renders just enough of the real pages (register, login, home, checkout,
//! order confirmation, order list) for the built-in scenarios to run.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use storefront_e2e::catalog;
use storefront_e2e::config::CardsConfig;
use storefront_e2e::context::ArtifactPolicy;
use storefront_e2e::page::{BrowserLauncher, KeepRecordings, PageDriver, SessionOptions};
use storefront_e2e::primitives::Timeouts;
use storefront_e2e::{E2eError, E2eResult, IdentitySource, RunnerConfig, TestRunner};

pub const BASE_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone)]
pub struct User {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub id: u64,
    pub username: String,
    pub paid: bool,
}

#[derive(Debug, Default)]
pub struct Backend {
    pub users: HashMap<String, User>,
    pub registrations: Vec<String>,
    pub orders: Vec<Order>,
    pub sessions_opened: usize,
    pub open_sessions: usize,
    pub max_open_sessions: usize,
    pub closed: Vec<KeepRecordings>,
}

#[derive(Debug, Clone)]
pub struct FakeOptions {
    /// The first N sessions render a home page without products or greeting
    pub broken_sessions: usize,
    pub decline_prefix: String,
    /// Accept every card, declined or not
    pub ignore_declines: bool,
    pub products: usize,
}

impl Default for FakeOptions {
    fn default() -> Self {
        Self {
            broken_sessions: 0,
            decline_prefix: "0000".to_string(),
            ignore_declines: false,
            products: 3,
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeStorefront {
    pub backend: Arc<Mutex<Backend>>,
    pub options: FakeOptions,
}

impl FakeStorefront {
    pub fn new(options: FakeOptions) -> Self {
        Self {
            backend: Arc::default(),
            options,
        }
    }

    pub fn backend(&self) -> std::sync::MutexGuard<'_, Backend> {
        self.backend.lock().unwrap()
    }
}

#[async_trait]
impl BrowserLauncher for FakeStorefront {
    async fn launch(&self, options: &SessionOptions) -> E2eResult<Box<dyn PageDriver>> {
        let mut backend = self.backend();
        let index = backend.sessions_opened;
        backend.sessions_opened += 1;
        backend.open_sessions += 1;
        backend.max_open_sessions = backend.max_open_sessions.max(backend.open_sessions);

        Ok(Box::new(FakePage {
            backend: Arc::clone(&self.backend),
            options: self.options.clone(),
            broken: index < self.options.broken_sessions,
            session: options.clone(),
            path: None,
            user: None,
            fields: HashMap::new(),
        }))
    }
}

pub struct FakePage {
    backend: Arc<Mutex<Backend>>,
    options: FakeOptions,
    broken: bool,
    session: SessionOptions,
    path: Option<String>,
    user: Option<String>,
    fields: HashMap<String, String>,
}

impl FakePage {
    fn path(&self) -> &str {
        self.path.as_deref().unwrap_or("")
    }

    fn checkout_order(&self) -> Option<u64> {
        self.path().strip_prefix("/checkout/")?.parse().ok()
    }

    fn field(&self, selector: &str) -> String {
        self.fields.get(selector).cloned().unwrap_or_default()
    }

    fn navigate_to(&mut self, path: &str) {
        self.path = Some(path.to_string());
        self.fields.clear();
    }

    fn count_of(&self, selector: &str) -> usize {
        if let Some(inner) = selector.strip_suffix(" >> nth=0") {
            return self.count_of(inner).min(1);
        }

        let logged_in = self.user.is_some();
        if logged_in && !self.broken {
            if let Some(name) = selector.strip_prefix("text=Hello, ") {
                return usize::from(self.user.as_deref() == Some(name));
            }
            if selector == "button:has-text(\"Logout\")" || selector == "a:has-text(\"My Orders\")" {
                return 1;
            }
        }

        let path = self.path();
        match (path, selector) {
            ("/", "button:has-text(\"Buy Now\")") if !self.broken => self.options.products,
            ("/", ".grid") => {
                if self.broken {
                    1
                } else {
                    2
                }
            }
            ("/register", "#username" | "#email" | "#password" | "#confirm-password") => 1,
            ("/login", "#username" | "#password") => 1,
            ("/register" | "/login", "button[type=\"submit\"]") => 1,
            (p, "#cardNumber" | "button:has-text(\"Pay\")") if p.starts_with("/checkout/") => 1,
            (p, "text=Order Confirmed!") if p.starts_with("/order/") => 1,
            ("/orders", "text=/Order #\\d+/") => {
                let backend = self.backend.lock().unwrap();
                backend
                    .orders
                    .iter()
                    .filter(|o| o.paid && Some(&o.username) == self.user.as_ref())
                    .count()
            }
            _ => 0,
        }
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&mut self, url: &str, _timeout: Duration) -> E2eResult<()> {
        let path = url
            .strip_prefix(BASE_URL)
            .ok_or_else(|| E2eError::Driver(format!("unreachable: {}", url)))?;
        let path = if path.is_empty() { "/" } else { path };
        self.navigate_to(path);
        Ok(())
    }

    async fn count(&mut self, selector: &str) -> E2eResult<usize> {
        Ok(self.count_of(selector))
    }

    async fn is_visible(&mut self, selector: &str) -> E2eResult<bool> {
        Ok(self.count_of(selector) > 0)
    }

    async fn fill(&mut self, selector: &str, value: &str) -> E2eResult<()> {
        self.fields.insert(selector.to_string(), value.to_string());
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> E2eResult<()> {
        let path = self.path().to_string();
        match (path.as_str(), selector) {
            ("/register", "button[type=\"submit\"]") => {
                let username = self.field("#username");
                let password = self.field("#password");
                if password != self.field("#confirm-password") {
                    return Ok(());
                }
                let mut backend = self.backend.lock().unwrap();
                if backend.users.contains_key(&username) {
                    return Ok(());
                }
                backend.users.insert(
                    username.clone(),
                    User {
                        email: self.field("#email"),
                        password,
                    },
                );
                backend.registrations.push(username.clone());
                drop(backend);
                self.user = Some(username);
                self.navigate_to("/");
            }
            ("/login", "button[type=\"submit\"]") => {
                let username = self.field("#username");
                let ok = self
                    .backend
                    .lock()
                    .unwrap()
                    .users
                    .get(&username)
                    .map_or(false, |u| u.password == self.field("#password"));
                if ok {
                    self.user = Some(username);
                    self.navigate_to("/");
                }
            }
            (_, "button:has-text(\"Logout\")") => {
                self.user = None;
                self.navigate_to("/");
            }
            (_, "a:has-text(\"My Orders\")") => self.navigate_to("/orders"),
            ("/", "button:has-text(\"Buy Now\") >> nth=0") => match self.user.clone() {
                Some(username) => {
                    let mut backend = self.backend.lock().unwrap();
                    let id = backend.orders.len() as u64 + 1;
                    backend.orders.push(Order {
                        id,
                        username,
                        paid: false,
                    });
                    drop(backend);
                    self.navigate_to(&format!("/checkout/{}", id));
                }
                None => self.navigate_to("/login"),
            },
            (_, "button:has-text(\"Pay\")") => {
                let Some(id) = self.checkout_order() else {
                    return Ok(());
                };
                let card = self.field("#cardNumber");
                if card.starts_with(&self.options.decline_prefix) && !self.options.ignore_declines {
                    return Ok(());
                }
                let mut backend = self.backend.lock().unwrap();
                if let Some(order) = backend.orders.iter_mut().find(|o| o.id == id) {
                    order.paid = true;
                }
                drop(backend);
                self.navigate_to(&format!("/order/{}", id));
            }
            _ => {}
        }
        Ok(())
    }

    async fn current_url(&mut self) -> E2eResult<String> {
        Ok(match &self.path {
            Some(path) => format!("{}{}", BASE_URL, path),
            None => "about:blank".to_string(),
        })
    }

    async fn screenshot(&mut self, path: &Path) -> E2eResult<()> {
        std::fs::write(path, b"\x89PNG fake")?;
        Ok(())
    }

    async fn close(&mut self, keep: &KeepRecordings) -> E2eResult<()> {
        if let (Some(path), true) = (&keep.video, self.session.record_video) {
            std::fs::write(path, b"webm")?;
        }
        if let (Some(path), true) = (&keep.trace, self.session.record_trace) {
            std::fs::write(path, b"zip")?;
        }
        let mut backend = self.backend.lock().unwrap();
        backend.open_sessions -= 1;
        backend.closed.push(keep.clone());
        Ok(())
    }
}

pub fn runner(
    store: &FakeStorefront,
    output_dir: PathBuf,
    workers: usize,
    retries: u32,
    identities: IdentitySource,
) -> TestRunner {
    TestRunner::new(
        RunnerConfig {
            base_url: BASE_URL.to_string(),
            workers,
            retries,
            timeouts: Timeouts::default(),
            artifacts: ArtifactPolicy::default(),
            output_dir,
        },
        Arc::new(store.clone()),
        Arc::new(identities),
        catalog::flows(&CardsConfig::default()),
    )
}
