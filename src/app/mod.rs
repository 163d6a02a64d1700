pub mod assets;
pub mod browser;
pub mod classify;
pub mod config;
pub mod crawl;
pub mod data_io;
pub mod driver;
pub mod logging;
pub mod runtime;
pub mod types;
pub mod webdriver;

pub use assets::{DEFAULT_CONTENT_ROOT, extract_assets, resolve_asset_url, srcset_candidates};
pub use browser::{BrowserError, BrowserLauncher, BrowserSession, DomElement};
pub use classify::{asset_extension, classify_assets};
pub use config::{AuthConfig, ConfigError, ScanConfig};
pub use crawl::{AuthStep, CookieOutcome, PageDriver, PageError, PageOutcome};
pub use runtime::{RunError, run, scan_urls};
pub use types::{BrowserArg, Cli, PageResult, ReportFormat, RunReport, RunSummary};
