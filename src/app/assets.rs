use std::collections::BTreeSet;

use url::Url;

use super::browser::DomElement;

pub const DEFAULT_CONTENT_ROOT: &str = "/content/dam";

/// Elements whose attributes may reference assets.
pub const ASSET_ELEMENT_SELECTOR: &str = "[src], [srcset]";
pub const ASSET_ATTRIBUTES: [&str; 2] = ["src", "srcset"];

/// Resolve `reference` against `base`. Anything that fails to parse is
/// returned unchanged.
pub fn resolve_asset_url(base: &str, reference: &str) -> String {
    Url::parse(base)
        .and_then(|base| base.join(reference))
        .map(String::from)
        .unwrap_or_else(|_| reference.to_string())
}

/// URL candidates of a `srcset` value with width/density descriptors dropped.
pub fn srcset_candidates(srcset: &str) -> impl Iterator<Item = &str> {
    srcset
        .split(',')
        .filter_map(|entry| entry.split_whitespace().next())
}

/// Collect every asset referenced by `src`/`srcset` whose raw text starts
/// with `content_root`, resolved against `base`.
///
/// The prefix test runs on the attribute text before resolution, so
/// `../dam/x.png` never qualifies even where it would resolve under the root.
pub fn extract_assets<'a, I>(elements: I, base: &str, content_root: &str) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a DomElement>,
{
    let mut matches = BTreeSet::new();
    let mut accept = |candidate: &str| {
        if candidate.starts_with(content_root) {
            matches.insert(resolve_asset_url(base, candidate));
        }
    };

    for element in elements {
        if let Some(src) = element.attr("src").filter(|s| !s.is_empty()) {
            accept(src);
        }
        if let Some(srcset) = element.attr("srcset").filter(|s| !s.is_empty()) {
            for candidate in srcset_candidates(srcset) {
                accept(candidate);
            }
        }
    }

    matches
}
