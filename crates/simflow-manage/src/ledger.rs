//! At-most-once asset provisioning, keyed by checksum.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use simflow_assets::Asset;
use simflow_core::errors::{ErrorInfo, FlowError, Phase};
use simflow_platform::{with_retries, Platform, RetryPolicy};
use tracing::debug;

type Slot = Arc<OnceLock<Result<String, FlowError>>>;

/// Run-scoped record of provisioned content.
///
/// Concurrent requests for the same checksum wait on one slot, so the
/// backend sees a single existence check and at most one upload.
#[derive(Debug, Default)]
pub struct AssetLedger {
    slots: Mutex<HashMap<String, Slot>>,
    uploads: AtomicUsize,
}

impl AssetLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes sure the content of `asset` is stored and returns its platform id.
    pub fn provision(
        &self,
        platform: &dyn Platform,
        asset: &Asset,
        retry: &RetryPolicy,
    ) -> Result<String, FlowError> {
        let checksum = asset.checksum()?;
        let slot = {
            let mut slots = self.slots.lock().map_err(|_| {
                FlowError::Io(ErrorInfo::new("asset_ledger_lock", "asset ledger poisoned"))
            })?;
            Arc::clone(slots.entry(checksum.clone()).or_default())
        };
        slot.get_or_init(|| self.store(platform, asset, &checksum, retry))
            .clone()
            .map_err(|err| {
                err.with_phase(Phase::Provisioning)
                    .with_context("asset", asset.short_remote_path())
                    .with_context("checksum", checksum.clone())
            })
    }

    fn store(
        &self,
        platform: &dyn Platform,
        asset: &Asset,
        checksum: &str,
        retry: &RetryPolicy,
    ) -> Result<String, FlowError> {
        if with_retries(retry, "asset_exists", |_| platform.asset_exists(checksum))? {
            debug!(checksum, "asset already stored");
            return Ok(checksum.to_string());
        }
        let id = with_retries(retry, "upload_asset", |_| platform.upload_asset(asset))?;
        self.uploads.fetch_add(1, Ordering::Relaxed);
        debug!(checksum, id = %id, "asset uploaded");
        Ok(id)
    }

    /// Unique checksums seen so far.
    pub fn len(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or(0)
    }

    /// True when nothing was provisioned yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Uploads this ledger issued.
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::Relaxed)
    }
}
