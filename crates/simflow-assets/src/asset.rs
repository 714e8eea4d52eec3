//! A single file destined for a simulation working directory.

use std::borrow::Cow;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use simflow_core::errors::{ErrorInfo, FlowError};
use simflow_core::hash::content_checksum;
use simflow_core::serde::to_canonical_json_pretty;

/// Where the bytes of an [`Asset`] come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    /// A file on local disk, read on demand.
    Path(PathBuf),
    /// Bytes held in memory.
    Content(Vec<u8>),
}

/// One file with a destination path and lazily computed checksum.
///
/// Equality only looks at `(relative_path, filename)`. Once persisted the
/// content is snapshotted in memory and every mutator returns
/// [`FlowError::Frozen`].
#[derive(Debug, Clone)]
pub struct Asset {
    filename: String,
    relative_path: String,
    source: AssetSource,
    origin: Option<PathBuf>,
    checksum: OnceLock<String>,
    persisted: bool,
    platform_id: Option<String>,
}

/// Serializable view of an asset stored in metadata documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Destination file name.
    pub filename: String,
    /// Destination directory relative to the working directory.
    #[serde(default)]
    pub relative_path: String,
    /// Hex encoded SHA256 of the content.
    pub checksum: String,
    /// Source file on local disk, when the asset was not built in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absolute_path: Option<String>,
    /// Identifier assigned by the platform when the content was persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_id: Option<String>,
}

impl Asset {
    /// Creates an asset backed by a file on disk, placed at the working directory root.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, FlowError> {
        let path = path.into();
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                FlowError::validation("asset_filename", "asset path has no usable file name")
                    .with_context("path", path.display().to_string())
            })?
            .to_string();
        Ok(Self::new(filename, "", AssetSource::Path(path)))
    }

    /// Creates an asset from in-memory bytes.
    pub fn from_content(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self::new(filename.into(), "", AssetSource::Content(content.into()))
    }

    /// Creates an asset whose content is the JSON rendering of `value`.
    pub fn from_json(filename: impl Into<String>, value: &Value) -> Result<Self, FlowError> {
        let bytes = to_canonical_json_pretty(value)?;
        Ok(Self::from_content(filename, bytes))
    }

    fn new(filename: String, relative_path: &str, source: AssetSource) -> Self {
        Self {
            filename,
            relative_path: normalize_relative_path(relative_path),
            source,
            origin: None,
            checksum: OnceLock::new(),
            persisted: false,
            platform_id: None,
        }
    }

    /// Returns the asset with its destination directory set.
    ///
    /// Only meant for freshly built assets; persisted assets keep their path.
    pub fn in_directory(mut self, relative_path: &str) -> Self {
        if !self.persisted {
            self.relative_path = normalize_relative_path(relative_path);
        }
        self
    }

    /// Destination file name.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Destination directory, `/` separated, empty for the root.
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Source file on local disk the content was read from, if any.
    pub fn absolute_path(&self) -> Option<&Path> {
        match &self.source {
            AssetSource::Path(path) => Some(path.as_path()),
            AssetSource::Content(_) => self.origin.as_deref(),
        }
    }

    /// Where the bytes come from.
    pub fn source(&self) -> &AssetSource {
        &self.source
    }

    /// `relative_path/filename`, or the bare file name at the root.
    pub fn short_remote_path(&self) -> String {
        if self.relative_path.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.relative_path, self.filename)
        }
    }

    /// Reads the asset bytes.
    pub fn content(&self) -> Result<Cow<'_, [u8]>, FlowError> {
        match &self.source {
            AssetSource::Content(bytes) => Ok(Cow::Borrowed(bytes.as_slice())),
            AssetSource::Path(path) => fs::read(path).map(Cow::Owned).map_err(|err| {
                FlowError::io("asset_read", err).with_context("path", path.display().to_string())
            }),
        }
    }

    /// Content size in bytes.
    pub fn size(&self) -> Result<u64, FlowError> {
        match &self.source {
            AssetSource::Content(bytes) => Ok(bytes.len() as u64),
            AssetSource::Path(path) => fs::metadata(path).map(|meta| meta.len()).map_err(|err| {
                FlowError::io("asset_stat", err).with_context("path", path.display().to_string())
            }),
        }
    }

    /// Hex encoded SHA256 of the content, computed on first use.
    pub fn checksum(&self) -> Result<String, FlowError> {
        if let Some(existing) = self.checksum.get() {
            return Ok(existing.clone());
        }
        let digest = content_checksum(&self.content()?);
        Ok(self.checksum.get_or_init(|| digest).clone())
    }

    /// Whether the content has been frozen.
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Snapshots the content in memory and freezes the asset. Idempotent.
    pub fn persist(&mut self) -> Result<(), FlowError> {
        if self.persisted {
            return Ok(());
        }
        if let AssetSource::Path(path) = &self.source {
            let bytes = self.content()?.into_owned();
            self.origin = Some(path.clone());
            self.source = AssetSource::Content(bytes);
        }
        self.checksum()?;
        self.persisted = true;
        Ok(())
    }

    /// Identifier the platform assigned to the persisted content.
    pub fn platform_id(&self) -> Option<&str> {
        self.platform_id.as_deref()
    }

    /// Records the identifier returned by the platform.
    pub fn set_platform_id(&mut self, id: impl Into<String>) {
        self.platform_id = Some(id.into());
    }

    /// Replaces the in-memory content.
    pub fn set_content(&mut self, content: impl Into<Vec<u8>>) -> Result<(), FlowError> {
        self.ensure_editable()?;
        self.source = AssetSource::Content(content.into());
        self.checksum = OnceLock::new();
        Ok(())
    }

    /// Changes the destination file name.
    pub fn set_filename(&mut self, filename: impl Into<String>) -> Result<(), FlowError> {
        self.ensure_editable()?;
        self.filename = filename.into();
        Ok(())
    }

    /// Changes the destination directory.
    pub fn set_relative_path(&mut self, relative_path: &str) -> Result<(), FlowError> {
        self.ensure_editable()?;
        self.relative_path = normalize_relative_path(relative_path);
        Ok(())
    }

    /// Compares paths and content.
    pub fn deep_equals(&self, other: &Asset) -> Result<bool, FlowError> {
        Ok(self == other && self.checksum()? == other.checksum()?)
    }

    /// Builds the metadata view of the asset.
    pub fn record(&self) -> Result<AssetRecord, FlowError> {
        Ok(AssetRecord {
            filename: self.filename.clone(),
            relative_path: self.relative_path.clone(),
            checksum: self.checksum()?,
            absolute_path: self
                .absolute_path()
                .map(|path| path.display().to_string()),
            platform_id: self.platform_id.clone(),
        })
    }

    fn ensure_editable(&self) -> Result<(), FlowError> {
        if self.persisted {
            Err(FlowError::Frozen(
                ErrorInfo::new("asset_persisted", "persisted assets cannot be modified")
                    .with_context("asset", self.short_remote_path()),
            ))
        } else {
            Ok(())
        }
    }
}

impl PartialEq for Asset {
    fn eq(&self, other: &Self) -> bool {
        self.relative_path == other.relative_path && self.filename == other.filename
    }
}

impl Eq for Asset {}

impl Hash for Asset {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.relative_path.hash(state);
        self.filename.hash(state);
    }
}

/// Converts separators to `/` and strips leading, trailing and `.` segments.
pub fn normalize_relative_path(raw: &str) -> String {
    raw.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}
