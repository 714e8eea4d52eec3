//! Ordered asset bundles that freeze once provisioned.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use simflow_core::errors::{ErrorInfo, FlowError};
use simflow_core::ids::ItemId;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::asset::{normalize_relative_path, Asset, AssetRecord};
use crate::filters::{apply_filters, AssetFilter, FilterMode};

/// Directories skipped by scans unless [`DirectoryOptions::no_ignore`] is set.
pub const IGNORED_DIRECTORIES: [&str; 7] = [
    ".git",
    ".svn",
    ".venv",
    ".idea",
    ".Rproj.user",
    "$RECYCLE.BIN",
    "__pycache__",
];

/// Options controlling [`AssetCollection::add_directory`].
#[derive(Clone)]
pub struct DirectoryOptions {
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Place every discovered file at the root, dropping subdirectories.
    pub flatten: bool,
    /// Admission predicates evaluated on each discovered asset.
    pub filters: Vec<AssetFilter>,
    /// How `filters` combine.
    pub mode: FilterMode,
    /// Constant path prepended to every relative path.
    pub prefix: Option<String>,
    /// Scan ignored directories too.
    pub no_ignore: bool,
}

impl Default for DirectoryOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            flatten: false,
            filters: Vec::new(),
            mode: FilterMode::Or,
            prefix: None,
            no_ignore: false,
        }
    }
}

impl fmt::Debug for DirectoryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryOptions")
            .field("recursive", &self.recursive)
            .field("flatten", &self.flatten)
            .field("filters", &self.filters.len())
            .field("mode", &self.mode)
            .field("prefix", &self.prefix)
            .field("no_ignore", &self.no_ignore)
            .finish()
    }
}

/// Attribute query used by find, remove and pop. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetQuery {
    /// Destination file name.
    pub filename: Option<String>,
    /// Destination directory.
    pub relative_path: Option<String>,
    /// Content checksum.
    pub checksum: Option<String>,
    /// Source file on disk.
    pub absolute_path: Option<String>,
}

impl AssetQuery {
    /// Query on file name only.
    pub fn filename(filename: impl Into<String>) -> Self {
        Self {
            filename: Some(filename.into()),
            ..Self::default()
        }
    }

    /// Query on checksum only.
    pub fn checksum(checksum: impl Into<String>) -> Self {
        Self {
            checksum: Some(checksum.into()),
            ..Self::default()
        }
    }

    /// Narrows the query to a destination directory.
    pub fn in_directory(mut self, relative_path: &str) -> Self {
        self.relative_path = Some(normalize_relative_path(relative_path));
        self
    }

    /// Tests a single asset against every set field.
    pub fn matches(&self, asset: &Asset) -> Result<bool, FlowError> {
        if let Some(filename) = &self.filename {
            if asset.filename() != filename {
                return Ok(false);
            }
        }
        if let Some(relative_path) = &self.relative_path {
            if asset.relative_path() != normalize_relative_path(relative_path) {
                return Ok(false);
            }
        }
        if let Some(absolute_path) = &self.absolute_path {
            match asset.absolute_path() {
                Some(path) if Path::new(absolute_path) == path => {}
                _ => return Ok(false),
            }
        }
        if let Some(checksum) = &self.checksum {
            if &asset.checksum()? != checksum {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Ordered set of assets with a stable id.
#[derive(Debug, Clone, Default)]
pub struct AssetCollection {
    id: ItemId,
    assets: Vec<Asset>,
    tags: BTreeMap<String, String>,
    frozen: bool,
}

impl AssetCollection {
    /// Creates an empty collection with a fresh id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a collection from assets, failing on duplicated paths.
    pub fn from_assets(assets: impl IntoIterator<Item = Asset>) -> Result<Self, FlowError> {
        let mut collection = Self::new();
        for asset in assets {
            collection.add(asset, true)?;
        }
        Ok(collection)
    }

    /// Builds a collection by scanning a directory.
    pub fn from_directory(root: &Path, options: &DirectoryOptions) -> Result<Self, FlowError> {
        let mut collection = Self::new();
        collection.add_directory(root, options)?;
        Ok(collection)
    }

    /// Editable copy with the same assets, a fresh id and no freeze.
    pub fn copy(&self) -> Self {
        Self {
            id: ItemId::new(),
            assets: self.assets.clone(),
            tags: self.tags.clone(),
            frozen: false,
        }
    }

    /// Stable identifier of the collection.
    pub fn id(&self) -> ItemId {
        self.id
    }

    /// Free-form tags.
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Sets a tag, last write wins.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Whether the collection has been provisioned.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Freezes the collection. Further add or remove calls fail.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Number of assets.
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// True when the collection holds no assets.
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Iterates assets in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Asset> {
        self.assets.iter()
    }

    /// Persists every asset, then hands out mutable access to record platform
    /// ids. Persisted assets refuse content, name and path changes, so the
    /// checksums recorded at provisioning stay valid.
    pub fn persisted_mut(&mut self) -> Result<std::slice::IterMut<'_, Asset>, FlowError> {
        self.persist_all()?;
        Ok(self.assets.iter_mut())
    }

    /// Adds an asset.
    ///
    /// On a path collision with `fail_on_duplicate` the call fails with
    /// [`FlowError::DuplicatedAsset`]. Otherwise an identical asset is skipped
    /// and one with different content replaces the existing entry. Returns
    /// whether the collection changed.
    pub fn add(&mut self, asset: Asset, fail_on_duplicate: bool) -> Result<bool, FlowError> {
        self.ensure_editable()?;
        let Some(index) = self.assets.iter().position(|existing| existing == &asset) else {
            self.assets.push(asset);
            return Ok(true);
        };
        let same_content = self.assets[index].checksum()? == asset.checksum()?;
        if fail_on_duplicate {
            let message = if same_content {
                "asset already present in collection"
            } else {
                "asset with the same path but different content already present"
            };
            return Err(FlowError::DuplicatedAsset(
                ErrorInfo::new("asset_duplicate", message)
                    .with_context("asset", asset.short_remote_path())
                    .with_context("collection", self.id.to_string()),
            ));
        }
        if same_content {
            return Ok(false);
        }
        self.assets[index] = asset;
        Ok(true)
    }

    /// Adds an asset, replacing any entry with the same path.
    pub fn add_or_replace(&mut self, asset: Asset) -> Result<(), FlowError> {
        self.ensure_editable()?;
        match self.assets.iter().position(|existing| existing == &asset) {
            Some(index) => self.assets[index] = asset,
            None => self.assets.push(asset),
        }
        Ok(())
    }

    /// Adds every asset of `other`, failing on the first duplicated path.
    pub fn extend(&mut self, other: &AssetCollection) -> Result<(), FlowError> {
        self.ensure_editable()?;
        for asset in other.iter() {
            self.add(asset.clone(), true)?;
        }
        Ok(())
    }

    /// Merges `other` into the collection, skipping or replacing duplicates.
    pub fn merge(&mut self, other: &AssetCollection) -> Result<(), FlowError> {
        self.ensure_editable()?;
        for asset in other.iter() {
            self.add(asset.clone(), false)?;
        }
        Ok(())
    }

    /// Scans `root` and adds every admitted file. Returns how many assets were added.
    ///
    /// Each file's directory relative to `root` becomes its relative path, then
    /// filters are evaluated, then `flatten` and `prefix` are applied in that order.
    pub fn add_directory(
        &mut self,
        root: &Path,
        options: &DirectoryOptions,
    ) -> Result<usize, FlowError> {
        self.ensure_editable()?;
        let discovered = scan_directory(root, options)?;
        let mut added = 0;
        for mut asset in discovered {
            if !apply_filters(&asset, &options.filters, options.mode) {
                continue;
            }
            if options.flatten {
                asset = asset.in_directory("");
            }
            if let Some(prefix) = &options.prefix {
                let joined = format!("{}/{}", prefix, asset.relative_path());
                asset = asset.in_directory(&joined);
            }
            if self.add(asset, true)? {
                added += 1;
            }
        }
        debug!(root = %root.display(), added, "scanned asset directory");
        Ok(added)
    }

    /// First asset matching the query.
    pub fn find(&self, query: &AssetQuery) -> Result<Option<&Asset>, FlowError> {
        for asset in &self.assets {
            if query.matches(asset)? {
                return Ok(Some(asset));
            }
        }
        Ok(None)
    }

    /// Removes every asset matching the query and returns how many were removed.
    pub fn remove(&mut self, query: &AssetQuery) -> Result<usize, FlowError> {
        self.ensure_editable()?;
        let matched = self
            .assets
            .iter()
            .map(|asset| query.matches(asset))
            .collect::<Result<Vec<bool>, FlowError>>()?;
        let before = self.assets.len();
        let mut verdicts = matched.into_iter();
        self.assets
            .retain(|_| !verdicts.next().unwrap_or(false));
        Ok(before - self.assets.len())
    }

    /// Removes and returns the first asset matching the query.
    pub fn pop(&mut self, query: &AssetQuery) -> Result<Option<Asset>, FlowError> {
        self.ensure_editable()?;
        let mut found = None;
        for (index, asset) in self.assets.iter().enumerate() {
            if query.matches(asset)? {
                found = Some(index);
                break;
            }
        }
        Ok(found.map(|index| self.assets.remove(index)))
    }

    /// Whether an asset with this destination path exists.
    pub fn has_path(&self, filename: &str, relative_path: &str) -> bool {
        let relative_path = normalize_relative_path(relative_path);
        self.assets
            .iter()
            .any(|asset| asset.filename() == filename && asset.relative_path() == relative_path)
    }

    /// Whether an asset with this content exists.
    pub fn has_checksum(&self, checksum: &str) -> Result<bool, FlowError> {
        for asset in &self.assets {
            if asset.checksum()? == checksum {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Distinct content checksums, sorted.
    pub fn unique_checksums(&self) -> Result<BTreeSet<String>, FlowError> {
        self.assets.iter().map(Asset::checksum).collect()
    }

    /// Sum of all asset sizes in bytes.
    pub fn total_size(&self) -> Result<u64, FlowError> {
        self.assets.iter().map(Asset::size).sum()
    }

    /// Persists every asset in place.
    pub fn persist_all(&mut self) -> Result<(), FlowError> {
        for asset in &mut self.assets {
            asset.persist()?;
        }
        Ok(())
    }

    /// Metadata view of every asset.
    pub fn records(&self) -> Result<Vec<AssetRecord>, FlowError> {
        self.assets.iter().map(Asset::record).collect()
    }

    fn ensure_editable(&self) -> Result<(), FlowError> {
        if self.frozen {
            Err(FlowError::Frozen(
                ErrorInfo::new("collection_frozen", "provisioned collections cannot be modified")
                    .with_context("collection", self.id.to_string()),
            ))
        } else {
            Ok(())
        }
    }
}

impl<'a> IntoIterator for &'a AssetCollection {
    type Item = &'a Asset;
    type IntoIter = std::slice::Iter<'a, Asset>;

    fn into_iter(self) -> Self::IntoIter {
        self.assets.iter()
    }
}

fn is_ignored(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| IGNORED_DIRECTORIES.contains(&name))
            .unwrap_or(false)
}

fn scan_directory(root: &Path, options: &DirectoryOptions) -> Result<Vec<Asset>, FlowError> {
    if !root.is_dir() {
        return Err(FlowError::io("asset_scan", "not a directory")
            .with_context("path", root.display().to_string()));
    }
    let mut walker = WalkDir::new(root).sort_by_file_name();
    if !options.recursive {
        walker = walker.max_depth(1);
    }
    let mut assets = Vec::new();
    for entry in walker
        .into_iter()
        .filter_entry(|entry| options.no_ignore || !is_ignored(entry))
    {
        let entry = entry.map_err(|err| {
            FlowError::io("asset_scan", err).with_context("path", root.display().to_string())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let parent = entry
            .path()
            .parent()
            .and_then(|dir| dir.strip_prefix(root).ok())
            .map(|dir| dir.to_string_lossy().into_owned())
            .unwrap_or_default();
        assets.push(Asset::from_path(entry.path())?.in_directory(&parent));
    }
    Ok(assets)
}
