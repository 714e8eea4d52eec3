//! Asset admission predicates used by directory scans.

use std::collections::BTreeSet;
use std::sync::Arc;

use globset::Glob;
use serde::{Deserialize, Serialize};
use simflow_core::errors::{ErrorInfo, FlowError};

use crate::asset::Asset;

/// Predicate deciding whether a discovered asset is kept.
pub type AssetFilter = Arc<dyn Fn(&Asset) -> bool + Send + Sync>;

/// How several filters combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Keep assets matching every filter.
    And,
    /// Keep assets matching at least one filter.
    #[default]
    Or,
}

/// Applies `filters` under `mode`. An empty filter list keeps everything.
pub fn apply_filters(asset: &Asset, filters: &[AssetFilter], mode: FilterMode) -> bool {
    if filters.is_empty() {
        return true;
    }
    match mode {
        FilterMode::And => filters.iter().all(|filter| filter(asset)),
        FilterMode::Or => filters.iter().any(|filter| filter(asset)),
    }
}

/// Matches the asset's `relative_path/filename` against a glob pattern.
pub fn glob_filter(pattern: &str) -> Result<AssetFilter, FlowError> {
    let matcher = Glob::new(pattern)
        .map_err(|err| {
            FlowError::Validation(
                ErrorInfo::new("asset_glob", err.to_string()).with_context("pattern", pattern),
            )
        })?
        .compile_matcher();
    Ok(Arc::new(move |asset: &Asset| {
        matcher.is_match(asset.short_remote_path())
    }))
}

/// Keeps assets whose file extension is one of `extensions` (without the dot, case-insensitive).
pub fn extension_filter<I, S>(extensions: I) -> AssetFilter
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let wanted: BTreeSet<String> = extensions
        .into_iter()
        .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
        .collect();
    Arc::new(move |asset: &Asset| {
        asset
            .filename()
            .rsplit_once('.')
            .map(|(_, ext)| wanted.contains(&ext.to_ascii_lowercase()))
            .unwrap_or(false)
    })
}

/// Keeps assets whose file name is one of `names`.
pub fn name_filter<I, S>(names: I) -> AssetFilter
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let wanted: BTreeSet<String> = names.into_iter().map(Into::into).collect();
    Arc::new(move |asset: &Asset| wanted.contains(asset.filename()))
}

/// Keeps assets strictly larger than `bytes`. Unreadable assets are dropped.
pub fn larger_than(bytes: u64) -> AssetFilter {
    Arc::new(move |asset: &Asset| asset.size().map(|size| size > bytes).unwrap_or(false))
}
