//! Render pages in a real browser and report the `/content/dam` assets they
//! reference, split by whether their file extension is supported downstream.

pub mod app;

pub use app::{
    BrowserArg, Cli, PageResult, ReportFormat, RunError, RunReport, RunSummary, ScanConfig, run,
};
