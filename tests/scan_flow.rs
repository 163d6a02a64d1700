use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use damscan::app::{
    AuthConfig, BrowserError, BrowserLauncher, BrowserSession, CookieOutcome, DomElement,
    PageDriver, RunError, ScanConfig, scan_urls,
};

#[derive(Default, Clone)]
struct FakePage {
    elements: Vec<DomElement>,
    selectors: Vec<String>,
    redirect_to: Option<String>,
    fail_navigation: bool,
    fail_query: bool,
}

#[derive(Default)]
struct FakeWeb {
    pages: HashMap<String, FakePage>,
    log: Mutex<Vec<String>>,
    launched: AtomicUsize,
    closed: AtomicUsize,
}

impl FakeWeb {
    fn page(mut self, url: &str, page: FakePage) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[derive(Clone)]
struct FakeLauncher(Arc<FakeWeb>);

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        self.0.launched.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            web: self.0.clone(),
            current: None,
        }))
    }
}

struct FakeSession {
    web: Arc<FakeWeb>,
    current: Option<String>,
}

impl FakeSession {
    fn current_page(&self) -> Option<&FakePage> {
        self.current.as_ref().and_then(|url| self.web.pages.get(url))
    }

    fn has_selector(&self, selector: &str) -> bool {
        self.current_page()
            .is_some_and(|p| p.selectors.iter().any(|s| s == selector))
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        self.web.record(format!("navigate {url}"));
        match self.web.pages.get(url) {
            Some(page) if !page.fail_navigation => {
                self.current = Some(url.to_string());
                Ok(())
            }
            _ => Err(BrowserError::Timeout {
                what: format!("page load of {url}"),
                ms: timeout.as_millis(),
            }),
        }
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        let page = self.current_page();
        Ok(page
            .and_then(|p| p.redirect_to.clone())
            .or_else(|| self.current.clone())
            .unwrap_or_default())
    }

    async fn query_attributes(
        &self,
        _selector: &str,
        _attributes: &[&str],
    ) -> Result<Vec<DomElement>, BrowserError> {
        match self.current_page() {
            Some(page) if page.fail_query => Err(BrowserError::Protocol {
                context: "rendered snapshot",
                detail: "empty rendered snapshot".to_string(),
            }),
            Some(page) => Ok(page.elements.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn click(&mut self, selector: &str) -> Result<(), BrowserError> {
        if !self.has_selector(selector) {
            return Err(BrowserError::NoSuchElement(selector.to_string()));
        }
        self.web.record(format!("click {selector}"));
        Ok(())
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), BrowserError> {
        if !self.has_selector(selector) {
            return Err(BrowserError::NoSuchElement(selector.to_string()));
        }
        self.web.record(format!("fill {selector}={value}"));
        Ok(())
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        if self.has_selector(selector) {
            Ok(())
        } else {
            Err(BrowserError::Timeout {
                what: format!("selector `{selector}`"),
                ms: timeout.as_millis(),
            })
        }
    }

    async fn wait_for_network_idle(&mut self, _timeout: Duration) -> Result<(), BrowserError> {
        self.web.record("network idle".to_string());
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        self.web.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct BrokenLauncher;

#[async_trait]
impl BrowserLauncher for BrokenLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        Err(BrowserError::Http {
            context: "session create",
            status: 500,
            body: "browser binary missing".to_string(),
        })
    }
}

fn img(src: &str) -> DomElement {
    DomElement::new().with_attr("src", src)
}

fn srcset(value: &str) -> DomElement {
    DomElement::new().with_attr("srcset", value)
}

fn quick_config(unsupported: &[&str]) -> ScanConfig {
    ScanConfig {
        unsupported_extensions: unsupported.iter().map(|s| s.to_string()).collect(),
        cookie_wait_ms: 0,
        cookie_settle_ms: 0,
        ..ScanConfig::default()
    }
}

fn lines(urls: &[&str]) -> Vec<String> {
    urls.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn classifies_each_page_and_closes_every_session() {
    let web = Arc::new(
        FakeWeb::default()
            .page(
                "https://www.example.com/en.html",
                FakePage {
                    elements: vec![
                        img("/content/dam/site/hero.PNG"),
                        srcset("/content/dam/site/card.jpg 1x, /content/dam/site/card@2x.jpg 2x"),
                        img("/etc.clientlibs/site/logo.svg"),
                        DomElement::new().with_attr("alt", "nothing"),
                    ],
                    selectors: vec![".button_test".to_string()],
                    ..FakePage::default()
                },
            )
            .page(
                "https://www.example.com/de.html",
                FakePage {
                    elements: vec![img("/content/dam/site/doc?wid=100")],
                    ..FakePage::default()
                },
            ),
    );
    let launcher = FakeLauncher(web.clone());
    let urls = lines(&["https://www.example.com/en.html", "https://www.example.com/de.html"]);

    let (report, failed) = scan_urls(&launcher, &urls, &quick_config(&["png"]))
        .await
        .unwrap();

    assert_eq!(failed, 0);
    assert_eq!(report.len(), 2);
    let en = report.get("https://www.example.com/en.html").unwrap();
    assert_eq!(
        en.supported,
        vec![
            "https://www.example.com/content/dam/site/card.jpg",
            "https://www.example.com/content/dam/site/card@2x.jpg",
        ]
    );
    assert_eq!(
        en.unsupported,
        vec!["https://www.example.com/content/dam/site/hero.PNG"]
    );
    let de = report.get("https://www.example.com/de.html").unwrap();
    assert_eq!(
        de.supported,
        vec!["https://www.example.com/content/dam/site/doc?wid=100"]
    );

    assert_eq!(web.launched.load(Ordering::SeqCst), 2);
    assert_eq!(web.closed.load(Ordering::SeqCst), 2);
    assert!(web.log().contains(&"click .button_test".to_string()));
}

#[tokio::test]
async fn navigation_failure_yields_empty_entry_and_run_continues() {
    let web = Arc::new(
        FakeWeb::default()
            .page(
                "https://www.example.com/down.html",
                FakePage {
                    fail_navigation: true,
                    ..FakePage::default()
                },
            )
            .page(
                "https://www.example.com/up.html",
                FakePage {
                    elements: vec![img("/content/dam/a.jpg")],
                    ..FakePage::default()
                },
            ),
    );
    let launcher = FakeLauncher(web.clone());
    let urls = lines(&[
        "https://www.example.com/down.html",
        "https://www.example.com/up.html",
    ]);

    let (report, failed) = scan_urls(&launcher, &urls, &quick_config(&[])).await.unwrap();

    assert_eq!(failed, 1);
    assert!(report.get("https://www.example.com/down.html").unwrap().is_empty());
    assert_eq!(
        report.get("https://www.example.com/up.html").unwrap().supported,
        vec!["https://www.example.com/content/dam/a.jpg"]
    );
    assert_eq!(
        report.entries().map(|(k, _)| k).collect::<Vec<_>>(),
        vec!["https://www.example.com/down.html", "https://www.example.com/up.html"]
    );
    assert_eq!(web.closed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn extraction_failure_is_recoverable() {
    let web = Arc::new(FakeWeb::default().page(
        "https://www.example.com/spa.html",
        FakePage {
            fail_query: true,
            ..FakePage::default()
        },
    ));
    let launcher = FakeLauncher(web.clone());
    let urls = lines(&["https://www.example.com/spa.html"]);

    let (report, failed) = scan_urls(&launcher, &urls, &quick_config(&[])).await.unwrap();

    assert_eq!(failed, 1);
    assert!(report.get("https://www.example.com/spa.html").unwrap().is_empty());
    assert_eq!(web.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_cookie_banner_does_not_affect_extraction() {
    let web = Arc::new(FakeWeb::default().page(
        "https://www.example.com/en.html",
        FakePage {
            elements: vec![img("/content/dam/a.gif")],
            ..FakePage::default()
        },
    ));
    let launcher = FakeLauncher(web.clone());
    let config = quick_config(&["gif"]);
    let driver = PageDriver::new(&launcher, &config);

    let outcome = driver
        .process_page("https://www.example.com/en.html")
        .await
        .unwrap();

    assert!(matches!(outcome.cookies, CookieOutcome::NotDismissed { .. }));
    assert_eq!(outcome.element_count, 1);
    assert_eq!(
        outcome.assets.into_iter().collect::<Vec<_>>(),
        vec!["https://www.example.com/content/dam/a.gif"]
    );
}

#[tokio::test]
async fn assets_resolve_against_the_final_document_url() {
    let web = Arc::new(FakeWeb::default().page(
        "http://example.com/old",
        FakePage {
            elements: vec![img("/content/dam/a.jpg")],
            redirect_to: Some("https://www.example.com/new/".to_string()),
            ..FakePage::default()
        },
    ));
    let launcher = FakeLauncher(web);
    let config = quick_config(&[]);
    let outcome = PageDriver::new(&launcher, &config)
        .process_page("http://example.com/old")
        .await
        .unwrap();

    assert_eq!(outcome.target_url, "http://example.com/old");
    assert!(outcome.assets.contains("https://www.example.com/content/dam/a.jpg"));
}

fn author_config() -> ScanConfig {
    ScanConfig {
        auth: Some(AuthConfig {
            base_url: "https://author.example.com".to_string(),
            login_path: "/login.html".to_string(),
            login_trigger_selector: "#login-toggle".to_string(),
            username_selector: "#username".to_string(),
            password_selector: "#password".to_string(),
            submit_selector: "#submit".to_string(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            network_idle_timeout_ms: 1_000,
        }),
        ..quick_config(&[])
    }
}

fn login_page() -> FakePage {
    FakePage {
        selectors: ["#login-toggle", "#username", "#password", "#submit"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        ..FakePage::default()
    }
}

#[tokio::test]
async fn author_mode_logs_in_before_each_page() {
    let web = Arc::new(
        FakeWeb::default()
            .page("https://author.example.com/login.html", login_page())
            .page(
                "https://author.example.com/content/site/en.html",
                FakePage {
                    elements: vec![img("/content/dam/site/a.jpg")],
                    ..FakePage::default()
                },
            ),
    );
    let launcher = FakeLauncher(web.clone());
    let urls = lines(&["/content/site/en.html"]);

    let (report, failed) = scan_urls(&launcher, &urls, &author_config()).await.unwrap();

    assert_eq!(failed, 0);
    assert_eq!(
        report.get("/content/site/en.html").unwrap().supported,
        vec!["https://author.example.com/content/dam/site/a.jpg"]
    );
    assert_eq!(
        web.log(),
        vec![
            "navigate https://author.example.com/login.html",
            "click #login-toggle",
            "fill #username=admin",
            "fill #password=secret",
            "click #submit",
            "network idle",
            "navigate https://author.example.com/content/site/en.html",
        ]
    );
}

#[tokio::test]
async fn author_login_failure_only_costs_that_page() {
    let mut broken_login = login_page();
    broken_login.selectors.retain(|s| s != "#login-toggle");
    let web = Arc::new(
        FakeWeb::default()
            .page("https://author.example.com/login.html", broken_login)
            .page(
                "https://author.example.com/content/site/en.html",
                FakePage::default(),
            ),
    );
    let launcher = FakeLauncher(web.clone());
    let urls = lines(&["/content/site/en.html", "/content/site/de.html"]);

    let (report, failed) = scan_urls(&launcher, &urls, &author_config()).await.unwrap();

    assert_eq!(failed, 2);
    assert_eq!(report.len(), 2);
    assert!(report.entries().all(|(_, r)| r.is_empty()));
    assert_eq!(web.closed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn launch_failure_aborts_the_run() {
    let urls = lines(&["https://www.example.com/en.html"]);
    let err = scan_urls(&BrokenLauncher, &urls, &quick_config(&[]))
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Page { .. }));
}
