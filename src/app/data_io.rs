use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use super::types::{ReportFormat, RunReport};

/// Read one URL (or site-relative path) per non-blank line, trimmed.
/// Repeated lines are kept once, at their first position.
pub fn load_url_list(path: &Path) -> io::Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if seen.insert(line) {
            urls.push(line.to_string());
        } else {
            warn!(line, "duplicate input line skipped");
        }
    }
    Ok(urls)
}

/// Legacy flat listing: `url:`, a blank line, every asset sorted, a blank line.
pub fn render_text_report(report: &RunReport) -> String {
    let mut out = String::new();
    for (source, result) in report.entries() {
        out.push_str(source);
        out.push_str(":\n\n");
        for asset in result.all_assets() {
            out.push_str(asset);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "report".into());
    name.push(".partial");
    path.with_file_name(name)
}

/// Write the full report once. Content goes to a sibling temp file first and
/// is renamed into place, so `path` only ever holds a complete report.
pub fn write_report(path: &Path, format: ReportFormat, report: &RunReport) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling(path);
    let written = (|| -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        match format {
            ReportFormat::Json => {
                serde_json::to_writer_pretty(&mut writer, report).map_err(io::Error::other)?;
                writer.write_all(b"\n")?;
            }
            ReportFormat::Text => writer.write_all(render_text_report(report).as_bytes())?,
        }
        writer.flush()?;
        Ok(())
    })();
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}
