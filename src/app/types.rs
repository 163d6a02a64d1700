use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

#[derive(Debug, Parser, Clone)]
#[command(
    name = "damscan",
    version,
    about = "Render pages through WebDriver and report their /content/dam assets"
)]
pub struct Cli {
    #[arg(short = 'i', long, value_name = "FILE", default_value = "urls.txt")]
    pub urls: PathBuf,

    #[arg(short, long, value_name = "FILE", default_value = "damscan.toml")]
    pub config: PathBuf,

    #[arg(short, long, value_name = "FILE", default_value = "output/results.json")]
    pub output: PathBuf,

    #[arg(long, value_enum, default_value_t = ReportFormat::Json)]
    pub format: ReportFormat,

    #[arg(long, value_name = "URL", default_value = "http://localhost:4444")]
    pub webdriver_url: String,

    #[arg(long, value_enum, default_value_t = BrowserArg::Chrome)]
    pub browser: BrowserArg,

    #[arg(long, default_value_t = false)]
    pub headed: bool,

    #[arg(long, value_name = "PATH")]
    pub webdriver_binary: Option<String>,

    #[arg(long, default_value_t = false)]
    pub no_webdriver_autostart: bool,

    #[arg(long, value_name = "MS", default_value_t = 12000)]
    pub webdriver_start_timeout_ms: u64,
}

#[derive(Debug, Copy, Clone, ValueEnum, PartialEq, Eq)]
pub enum BrowserArg {
    Chrome,
    Firefox,
    Edge,
}

#[derive(Debug, Copy, Clone, ValueEnum, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    /// Flat `url:` listing of every asset, one per line.
    Text,
}

/// Classified assets of one page. Both lists are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageResult {
    #[serde(rename = "scene7_supported")]
    pub supported: Vec<String>,
    #[serde(rename = "scene7_unsupported")]
    pub unsupported: Vec<String>,
}

impl PageResult {
    pub fn is_empty(&self) -> bool {
        self.supported.is_empty() && self.unsupported.is_empty()
    }

    /// Every asset of the page, sorted, regardless of bucket.
    pub fn all_assets(&self) -> Vec<&str> {
        let mut all = self
            .supported
            .iter()
            .chain(self.unsupported.iter())
            .map(String::as_str)
            .collect::<Vec<_>>();
        all.sort_unstable();
        all
    }
}

/// Per-line results in input order. Serializes as a JSON object keyed by the
/// input line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    entries: Vec<(String, PageResult)>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, source: impl Into<String>, result: PageResult) {
        self.entries.push((source.into(), result));
    }

    pub fn get(&self, source: &str) -> Option<&PageResult> {
        self.entries
            .iter()
            .find(|(key, _)| key == source)
            .map(|(_, result)| result)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &PageResult)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Serialize for RunReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (source, result) in &self.entries {
            map.serialize_entry(source, result)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub pages: usize,
    pub failed_pages: usize,
    pub supported: usize,
    pub unsupported: usize,
    pub output: PathBuf,
}
