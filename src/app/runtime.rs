use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use super::browser::{BrowserError, BrowserLauncher};
use super::classify::classify_assets;
use super::config::{ConfigError, ScanConfig};
use super::crawl::{PageDriver, PageError};
use super::data_io::{load_url_list, write_report};
use super::driver::{DriverError, DriverOptions, ensure_webdriver};
use super::types::{Cli, PageResult, RunReport, RunSummary};
use super::webdriver::{WebDriverClient, WebDriverLauncher};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("input file {} not found", .0.display())]
    InputMissing(PathBuf),
    #[error("failed to read input file {}: {source}", .path.display())]
    InputUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no URLs found in input file {}", .0.display())]
    InputEmpty(PathBuf),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("webdriver client: {0}")]
    Client(#[source] BrowserError),
    #[error("aborting run while processing {line}: {source}")]
    Page {
        line: String,
        #[source]
        source: PageError,
    },
    #[error("failed to write report {}: {source}", .path.display())]
    Report {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn read_inputs(cli: &Cli) -> Result<(Vec<String>, ScanConfig), RunError> {
    let urls = load_url_list(&cli.urls).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            RunError::InputMissing(cli.urls.clone())
        } else {
            RunError::InputUnreadable {
                path: cli.urls.clone(),
                source,
            }
        }
    })?;
    if urls.is_empty() {
        return Err(RunError::InputEmpty(cli.urls.clone()));
    }
    let config = ScanConfig::load(&cli.config)?;
    Ok((urls, config))
}

/// Process every line strictly in order and collect the classified report.
///
/// Per-page failures leave an empty entry and the run moves on; a fatal page
/// error aborts without a report.
pub async fn scan_urls(
    launcher: &dyn BrowserLauncher,
    urls: &[String],
    config: &ScanConfig,
) -> Result<(RunReport, usize), RunError> {
    let unsupported = config.unsupported_set();
    let driver = PageDriver::new(launcher, config);
    let mut report = RunReport::new();
    let mut failed = 0usize;

    for (idx, line) in urls.iter().enumerate() {
        info!("processing {}/{}: {line}", idx + 1, urls.len());
        let result = match driver.process_page(line).await {
            Ok(outcome) => {
                let result = classify_assets(&outcome.assets, &unsupported);
                info!(
                    url = %outcome.target_url,
                    "classified: {} supported, {} unsupported",
                    result.supported.len(),
                    result.unsupported.len()
                );
                result
            }
            Err(err) if err.is_fatal() => {
                return Err(RunError::Page {
                    line: line.clone(),
                    source: err,
                });
            }
            Err(err) => {
                warn!("error processing {line}: {err}");
                failed += 1;
                PageResult::default()
            }
        };
        report.push(line.clone(), result);
    }

    Ok((report, failed))
}

/// Validate inputs, make sure a WebDriver endpoint is available, scan every
/// URL and write the report once at the end.
pub async fn run(cli: Cli) -> Result<RunSummary, RunError> {
    info!("starting extraction");
    let (urls, config) = read_inputs(&cli)?;
    info!(
        "{} URLs queued, {} unsupported extensions{}",
        urls.len(),
        config.unsupported_set().len(),
        if config.auth.is_some() { ", author mode" } else { "" }
    );

    let driver_opts = DriverOptions {
        endpoint: cli.webdriver_url.clone(),
        browser: cli.browser,
        binary: cli.webdriver_binary.clone(),
        autostart: !cli.no_webdriver_autostart,
        start_timeout: Duration::from_millis(cli.webdriver_start_timeout_ms),
    };
    let _driver_process = ensure_webdriver(&driver_opts).await?;

    let client = WebDriverClient::new(&cli.webdriver_url).map_err(RunError::Client)?;
    let launcher = WebDriverLauncher::new(client, cli.browser, !cli.headed);
    let (report, failed) = scan_urls(&launcher, &urls, &config).await?;

    write_report(&cli.output, cli.format, &report).map_err(|source| RunError::Report {
        path: cli.output.clone(),
        source,
    })?;

    let summary = RunSummary {
        pages: report.len(),
        failed_pages: failed,
        supported: report.entries().map(|(_, r)| r.supported.len()).sum(),
        unsupported: report.entries().map(|(_, r)| r.unsupported.len()).sum(),
        output: cli.output.clone(),
    };
    info!(
        "done: {} pages ({} failed), {} supported, {} unsupported, results saved to {}",
        summary.pages,
        summary.failed_pages,
        summary.supported,
        summary.unsupported,
        summary.output.display()
    );
    Ok(summary)
}
