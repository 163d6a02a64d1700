//! Narrow browser abstraction consumed by the page driver.
//!
//! The production backend is [`crate::app::webdriver`]; tests script their own
//! sessions against a fake DOM.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("{context}: {source}")]
    Transport {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{context} HTTP {status}: {body}")]
    Http {
        context: &'static str,
        status: u16,
        body: String,
    },
    #[error("{context} webdriver error {error}: {message}")]
    WebDriver {
        context: &'static str,
        error: String,
        message: String,
    },
    #[error("{context}: unexpected response: {detail}")]
    Protocol {
        context: &'static str,
        detail: String,
    },
    #[error("no element matches selector `{0}`")]
    NoSuchElement(String),
    #[error("invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },
    #[error("timed out after {ms} ms waiting for {what}")]
    Timeout { what: String, ms: u128 },
}

impl BrowserError {
    /// WebDriver's "no such element" and our own lookup miss.
    pub fn is_no_such_element(&self) -> bool {
        match self {
            BrowserError::NoSuchElement(_) => true,
            BrowserError::WebDriver { error, .. } => error == "no such element",
            _ => false,
        }
    }
}

/// Attribute snapshot of a single DOM element, raw attribute text as authored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomElement {
    attributes: BTreeMap<String, String>,
}

impl DomElement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Starts isolated browser sessions. One session per page.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

/// A single isolated browser session (fresh profile, cookies, storage).
#[async_trait]
pub trait BrowserSession: Send {
    /// Navigate and wait for the load event, bounded by `timeout`.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// URL of the currently loaded document after redirects.
    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Every element matching `selector`, with the named attributes that are
    /// present on it.
    async fn query_attributes(
        &self,
        selector: &str,
        attributes: &[&str],
    ) -> Result<Vec<DomElement>, BrowserError>;

    async fn click(&mut self, selector: &str) -> Result<(), BrowserError>;

    /// Replace the value of a form field.
    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), BrowserError>;

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError>;

    async fn wait_for_network_idle(&mut self, timeout: Duration) -> Result<(), BrowserError>;

    async fn pause(&mut self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError>;
}
