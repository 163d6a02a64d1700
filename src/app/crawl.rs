use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;
use tracing::{debug, info};

use super::assets::{ASSET_ATTRIBUTES, ASSET_ELEMENT_SELECTOR, extract_assets};
use super::browser::{BrowserError, BrowserLauncher, BrowserSession};
use super::config::{AuthConfig, ScanConfig};

/// Step of the author login flow that failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AuthStep {
    LoginUrl,
    OpenLoginPage,
    RevealForm,
    Username,
    Password,
    Submit,
    NetworkIdle,
}

impl AuthStep {
    fn label(self) -> &'static str {
        match self {
            AuthStep::LoginUrl => "build login url",
            AuthStep::OpenLoginPage => "open login page",
            AuthStep::RevealForm => "reveal login form",
            AuthStep::Username => "fill username",
            AuthStep::Password => "fill password",
            AuthStep::Submit => "submit login form",
            AuthStep::NetworkIdle => "wait for network idle",
        }
    }
}

impl fmt::Display for AuthStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
pub enum PageError {
    #[error("failed to launch browser session: {0}")]
    Launch(#[source] BrowserError),
    #[error("login failed at `{step}`: {reason}")]
    Auth { step: AuthStep, reason: String },
    #[error("invalid target for `{line}`: {source}")]
    InvalidTarget {
        line: String,
        #[source]
        source: url::ParseError,
    },
    #[error("navigation to {url} failed: {source}")]
    Navigation {
        url: String,
        #[source]
        source: BrowserError,
    },
    #[error("asset extraction on {url} failed: {source}")]
    Extraction {
        url: String,
        #[source]
        source: BrowserError,
    },
}

impl PageError {
    /// Whether the run must stop. Everything except a browser that cannot be
    /// started only costs the current page.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PageError::Launch(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieOutcome {
    Dismissed,
    NotDismissed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOutcome {
    /// URL the browser was pointed at.
    pub target_url: String,
    pub cookies: CookieOutcome,
    pub element_count: usize,
    pub assets: BTreeSet<String>,
}

/// Drives one browser session per page through login, navigation, cookie
/// dismissal and asset matching.
pub struct PageDriver<'a> {
    launcher: &'a dyn BrowserLauncher,
    config: &'a ScanConfig,
}

impl<'a> PageDriver<'a> {
    pub fn new(launcher: &'a dyn BrowserLauncher, config: &'a ScanConfig) -> Self {
        Self { launcher, config }
    }

    /// Process one input line. The session is closed before returning on
    /// every path.
    pub async fn process_page(&self, line: &str) -> Result<PageOutcome, PageError> {
        let mut session = self.launcher.launch().await.map_err(PageError::Launch)?;
        let result = self.drive(&mut *session, line).await;
        if let Err(err) = session.close().await {
            debug!(line, "closing browser session failed: {err}");
        }
        result
    }

    async fn drive(
        &self,
        session: &mut dyn BrowserSession,
        line: &str,
    ) -> Result<PageOutcome, PageError> {
        let target_url = match &self.config.auth {
            Some(auth) => {
                login(session, auth, self.config).await?;
                auth.target_url(line)
                    .map_err(|source| PageError::InvalidTarget {
                        line: line.to_string(),
                        source,
                    })?
                    .to_string()
            }
            None => line.to_string(),
        };

        info!(url = %target_url, "navigating");
        session
            .navigate(&target_url, self.config.navigation_timeout())
            .await
            .map_err(|source| PageError::Navigation {
                url: target_url.clone(),
                source,
            })?;

        let cookies = accept_cookies(session, self.config).await;
        match &cookies {
            CookieOutcome::Dismissed => info!("cookies accepted"),
            CookieOutcome::NotDismissed { reason } => {
                info!("cookie banner not dismissed: {reason}")
            }
        }

        let elements = session
            .query_attributes(ASSET_ELEMENT_SELECTOR, &ASSET_ATTRIBUTES)
            .await
            .map_err(|source| PageError::Extraction {
                url: target_url.clone(),
                source,
            })?;
        info!(
            url = %target_url,
            "found {} elements with src or srcset",
            elements.len()
        );

        let base = match session.current_url().await {
            Ok(current) if !current.is_empty() => current,
            Ok(_) => target_url.clone(),
            Err(err) => {
                debug!("current url unavailable, resolving against target: {err}");
                target_url.clone()
            }
        };
        let assets = extract_assets(&elements, &base, &self.config.content_root);
        info!(url = %target_url, "extracted {} matching assets", assets.len());

        Ok(PageOutcome {
            target_url,
            cookies,
            element_count: elements.len(),
            assets,
        })
    }
}

async fn login(
    session: &mut dyn BrowserSession,
    auth: &AuthConfig,
    config: &ScanConfig,
) -> Result<(), PageError> {
    let fail = |step: AuthStep| move |err: BrowserError| PageError::Auth {
        step,
        reason: err.to_string(),
    };

    let login_url = auth.login_url().map_err(|e| PageError::Auth {
        step: AuthStep::LoginUrl,
        reason: e.to_string(),
    })?;
    info!(url = %login_url, "logging in");
    session
        .navigate(login_url.as_str(), config.navigation_timeout())
        .await
        .map_err(fail(AuthStep::OpenLoginPage))?;
    session
        .wait_for_selector(&auth.login_trigger_selector, config.navigation_timeout())
        .await
        .map_err(fail(AuthStep::RevealForm))?;
    session
        .click(&auth.login_trigger_selector)
        .await
        .map_err(fail(AuthStep::RevealForm))?;
    session
        .wait_for_selector(&auth.username_selector, config.navigation_timeout())
        .await
        .map_err(fail(AuthStep::Username))?;
    session
        .fill(&auth.username_selector, &auth.username)
        .await
        .map_err(fail(AuthStep::Username))?;
    session
        .fill(&auth.password_selector, &auth.password)
        .await
        .map_err(fail(AuthStep::Password))?;
    session
        .click(&auth.submit_selector)
        .await
        .map_err(fail(AuthStep::Submit))?;
    session
        .wait_for_network_idle(auth.network_idle_timeout())
        .await
        .map_err(fail(AuthStep::NetworkIdle))?;
    info!("logged in");
    Ok(())
}

async fn accept_cookies(session: &mut dyn BrowserSession, config: &ScanConfig) -> CookieOutcome {
    let selector = config.cookie_selector.as_str();
    if let Err(err) = session.wait_for_selector(selector, config.cookie_wait()).await {
        return CookieOutcome::NotDismissed {
            reason: err.to_string(),
        };
    }
    if let Err(err) = session.click(selector).await {
        return CookieOutcome::NotDismissed {
            reason: err.to_string(),
        };
    }
    session.pause(config.cookie_settle()).await;
    CookieOutcome::Dismissed
}
