//! W3C WebDriver backend spoken directly over HTTP.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use scraper::{Html, Selector};
use serde_json::{Value, json};
use tracing::debug;

use super::browser::{BrowserError, BrowserLauncher, BrowserSession, DomElement};
use super::types::BrowserArg;

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const POLL_INTERVAL: Duration = Duration::from_millis(200);
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const NETWORK_QUIET_WINDOW: Duration = Duration::from_millis(500);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(40);

static PROFILE_SEQ: AtomicU64 = AtomicU64::new(0);

fn truncate_for_log(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect::<String>() + "..."
}

/// Select `selector` in a rendered HTML snapshot and read the raw text of the
/// named attributes.
pub fn elements_from_html(
    html: &str,
    selector: &str,
    attributes: &[&str],
) -> Result<Vec<DomElement>, BrowserError> {
    let parsed = Selector::parse(selector).map_err(|e| BrowserError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&parsed)
        .map(|node| {
            let mut element = DomElement::new();
            for name in attributes {
                if let Some(value) = node.value().attr(name) {
                    element.set_attr(*name, value);
                }
            }
            element
        })
        .collect())
}

/// Thin JSON client for one WebDriver endpoint.
#[derive(Debug, Clone)]
pub struct WebDriverClient {
    http: reqwest::Client,
    endpoint: String,
}

impl WebDriverClient {
    pub fn new(endpoint: &str) -> Result<Self, BrowserError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| BrowserError::Transport {
                context: "webdriver client build",
                source,
            })?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one command and return the whole response envelope.
    ///
    /// A `/value/error` payload wins over the HTTP status so callers can tell
    /// "no such element" apart from transport trouble.
    async fn envelope(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        timeout: Option<Duration>,
        context: &'static str,
    ) -> Result<Value, BrowserError> {
        let mut request = self
            .http
            .request(method, format!("{}{}", self.endpoint, path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let res = request
            .send()
            .await
            .map_err(|source| BrowserError::Transport { context, source })?;
        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|source| BrowserError::Transport { context, source })?;
        let value: Value = serde_json::from_str(&text).unwrap_or_default();

        if let Some(error) = value.pointer("/value/error").and_then(|v| v.as_str()) {
            let message = value
                .pointer("/value/message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown webdriver error");
            return Err(BrowserError::WebDriver {
                context,
                error: error.to_string(),
                message: truncate_for_log(message, 240),
            });
        }
        if !status.is_success() {
            return Err(BrowserError::Http {
                context,
                status: status.as_u16(),
                body: truncate_for_log(&text, 240),
            });
        }
        if value.is_null() && !text.trim().is_empty() {
            return Err(BrowserError::Protocol {
                context,
                detail: truncate_for_log(&text, 220),
            });
        }
        Ok(value)
    }

    /// Send one command and return the response's `value` member.
    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        timeout: Option<Duration>,
        context: &'static str,
    ) -> Result<Value, BrowserError> {
        let mut envelope = self.envelope(method, path, body, timeout, context).await?;
        Ok(envelope
            .get_mut("value")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    pub async fn create_session(&self, capabilities: &Value) -> Result<String, BrowserError> {
        let context = "session create";
        let value = self
            .envelope(Method::POST, "/session", Some(capabilities.clone()), None, context)
            .await?;
        // JSON-wire drivers put the id next to `value` instead of inside it.
        value
            .pointer("/value/sessionId")
            .and_then(|v| v.as_str())
            .or_else(|| value.pointer("/sessionId").and_then(|v| v.as_str()))
            .map(|s| s.to_string())
            .ok_or_else(|| BrowserError::Protocol {
                context,
                detail: format!(
                    "session id missing in {}",
                    truncate_for_log(&value.to_string(), 220)
                ),
            })
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), BrowserError> {
        self.command(
            Method::DELETE,
            &format!("/session/{session_id}"),
            None,
            None,
            "delete session",
        )
        .await
        .map(|_| ())
    }
}

/// Launches one fresh WebDriver session per page.
#[derive(Debug, Clone)]
pub struct WebDriverLauncher {
    client: WebDriverClient,
    browser: BrowserArg,
    headless: bool,
}

impl WebDriverLauncher {
    pub fn new(client: WebDriverClient, browser: BrowserArg, headless: bool) -> Self {
        Self {
            client,
            browser,
            headless,
        }
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let (capabilities, profile_dir) = webdriver_capabilities(self.browser, self.headless);
        let session_id = match self.client.create_session(&capabilities).await {
            Ok(id) => id,
            Err(err) => {
                remove_profile(profile_dir.as_ref());
                return Err(err);
            }
        };
        debug!(session_id = %session_id, endpoint = self.client.endpoint(), "webdriver session created");
        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            session_id,
            profile_dir,
        }))
    }
}

fn remove_profile(profile_dir: Option<&PathBuf>) {
    if let Some(dir) = profile_dir {
        let _ = fs::remove_dir_all(dir);
    }
}

/// Capabilities for a throwaway session; Chrome additionally gets a private
/// profile directory which the caller removes when the session ends.
pub fn webdriver_capabilities(browser: BrowserArg, headless: bool) -> (Value, Option<PathBuf>) {
    match browser {
        BrowserArg::Firefox => {
            let mut args = Vec::<String>::new();
            if headless {
                args.push("-headless".to_string());
            }
            let caps = json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "firefox",
                        "acceptInsecureCerts": true,
                        "moz:firefoxOptions": {
                            "args": args,
                            "prefs": {
                                "browser.cache.disk.enable": false,
                                "browser.cache.memory.enable": false,
                                "network.http.use-cache": false
                            }
                        }
                    }
                }
            });
            (caps, None)
        }
        BrowserArg::Edge => {
            let mut args = Vec::<String>::new();
            if headless {
                args.push("--headless=new".to_string());
            }
            args.push("--disable-gpu".to_string());
            args.push("--disk-cache-size=0".to_string());
            let caps = json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "MicrosoftEdge",
                        "acceptInsecureCerts": true,
                        "ms:edgeOptions": { "args": args }
                    }
                }
            });
            (caps, None)
        }
        BrowserArg::Chrome => {
            let profile_dir = std::env::temp_dir().join(format!(
                "damscan-chrome-profile-{}-{}-{}",
                std::process::id(),
                Utc::now().timestamp_millis(),
                PROFILE_SEQ.fetch_add(1, Ordering::Relaxed)
            ));
            let _ = fs::create_dir_all(&profile_dir);
            let mut args = vec![format!("--user-data-dir={}", profile_dir.display())];
            if headless {
                args.push("--headless=new".to_string());
            }
            args.push("--window-size=1400,1200".to_string());
            args.push("--disable-gpu".to_string());
            args.push("--disable-dev-shm-usage".to_string());
            args.push("--no-first-run".to_string());
            args.push("--no-default-browser-check".to_string());
            args.push("--disk-cache-size=0".to_string());
            if !cfg!(target_os = "macos") {
                args.push("--no-sandbox".to_string());
            }
            let caps = json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "chrome",
                        "acceptInsecureCerts": true,
                        "goog:chromeOptions": { "args": args }
                    }
                }
            });
            (caps, Some(profile_dir))
        }
    }
}

pub struct WebDriverSession {
    client: WebDriverClient,
    session_id: String,
    profile_dir: Option<PathBuf>,
}

impl WebDriverSession {
    fn path(&self, suffix: &str) -> String {
        format!("/session/{}{}", self.session_id, suffix)
    }

    async fn execute(&self, script: &str, context: &'static str) -> Result<Value, BrowserError> {
        self.client
            .command(
                Method::POST,
                &self.path("/execute/sync"),
                Some(json!({ "script": script, "args": [] })),
                None,
                context,
            )
            .await
    }

    async fn rendered_html(&self) -> Result<String, BrowserError> {
        let context = "rendered snapshot";
        let value = self
            .execute(
                "return document.documentElement ? document.documentElement.outerHTML : \"\";",
                context,
            )
            .await?;
        match value.as_str() {
            Some(html) if !html.is_empty() => Ok(html.to_string()),
            _ => Err(BrowserError::Protocol {
                context,
                detail: "empty rendered snapshot".to_string(),
            }),
        }
    }

    async fn find_element(&self, selector: &str) -> Result<String, BrowserError> {
        let context = "find element";
        let value = self
            .client
            .command(
                Method::POST,
                &self.path("/element"),
                Some(json!({ "using": "css selector", "value": selector })),
                None,
                context,
            )
            .await?;
        value
            .get(ELEMENT_KEY)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| BrowserError::NoSuchElement(selector.to_string()))
    }

    async fn element_command(
        &self,
        element_id: &str,
        action: &str,
        body: Value,
        context: &'static str,
    ) -> Result<(), BrowserError> {
        self.client
            .command(
                Method::POST,
                &self.path(&format!("/element/{element_id}/{action}")),
                Some(body),
                None,
                context,
            )
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        let page_load_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.client
            .command(
                Method::POST,
                &self.path("/timeouts"),
                Some(json!({ "pageLoad": page_load_ms })),
                None,
                "set timeouts",
            )
            .await?;
        self.client
            .command(
                Method::POST,
                &self.path("/url"),
                Some(json!({ "url": url })),
                Some(timeout + Duration::from_secs(5)),
                "navigate",
            )
            .await
            .map(|_| ())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        let context = "current url";
        let value = self
            .client
            .command(Method::GET, &self.path("/url"), None, None, context)
            .await?;
        value
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| BrowserError::Protocol {
                context,
                detail: value.to_string(),
            })
    }

    async fn query_attributes(
        &self,
        selector: &str,
        attributes: &[&str],
    ) -> Result<Vec<DomElement>, BrowserError> {
        let html = self.rendered_html().await?;
        elements_from_html(&html, selector, attributes)
    }

    async fn click(&mut self, selector: &str) -> Result<(), BrowserError> {
        let id = self.find_element(selector).await?;
        self.element_command(&id, "click", json!({}), "click").await
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), BrowserError> {
        let id = self.find_element(selector).await?;
        self.element_command(&id, "clear", json!({}), "clear").await?;
        self.element_command(&id, "value", json!({ "text": value }), "send keys")
            .await
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let started = Instant::now();
        loop {
            match self.find_element(selector).await {
                Ok(_) => return Ok(()),
                Err(err) if err.is_no_such_element() => {}
                Err(err) => return Err(err),
            }
            if started.elapsed() >= timeout {
                return Err(BrowserError::Timeout {
                    what: format!("selector `{selector}`"),
                    ms: timeout.as_millis(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_network_idle(&mut self, timeout: Duration) -> Result<(), BrowserError> {
        let script = r#"
            return {
                ready: document.readyState,
                resources: performance.getEntriesByType("resource").length
            };
        "#;
        let started = Instant::now();
        let mut last_count = None;
        let mut quiet_since = Instant::now();
        loop {
            let value = self.execute(script, "network idle probe").await?;
            let ready = value.get("ready").and_then(|v| v.as_str()) == Some("complete");
            let count = value.get("resources").and_then(|v| v.as_u64());
            if ready && count.is_some() && count == last_count {
                if quiet_since.elapsed() >= NETWORK_QUIET_WINDOW {
                    return Ok(());
                }
            } else {
                last_count = count;
                quiet_since = Instant::now();
            }
            if started.elapsed() >= timeout {
                return Err(BrowserError::Timeout {
                    what: "network idle".to_string(),
                    ms: timeout.as_millis(),
                });
            }
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        let result = self.client.delete_session(&self.session_id).await;
        remove_profile(self.profile_dir.as_ref());
        result
    }
}
