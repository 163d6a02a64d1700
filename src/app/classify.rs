use std::collections::HashSet;

use super::types::PageResult;

/// Lowercase extension of the last path segment, query and fragment ignored.
/// Empty when the segment has no `.`.
pub fn asset_extension(asset: &str) -> String {
    let path = asset.split(['?', '#']).next().unwrap_or_default();
    let segment = path.rsplit('/').next().unwrap_or_default();
    segment
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Partition `assets` by extension into supported and unsupported, both
/// sorted. `unsupported` holds lowercase extensions without a leading dot.
pub fn classify_assets<'a, I>(assets: I, unsupported: &HashSet<String>) -> PageResult
where
    I: IntoIterator<Item = &'a String>,
{
    let mut result = PageResult::default();
    for asset in assets {
        if unsupported.contains(&asset_extension(asset)) {
            result.unsupported.push(asset.clone());
        } else {
            result.supported.push(asset.clone());
        }
    }
    result.supported.sort();
    result.unsupported.sort();
    result
}
