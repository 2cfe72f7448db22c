//! Node configuration.

use cascade_bft::BftConfig;
use cascade_sync::SyncConfig;
use serde::Deserialize;
use std::time::Duration;

/// The core-visible configuration knobs.
///
/// Loaded from TOML by the outer shell; everything has a sane default so a
/// bare node runs without a config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Base pacemaker timeout (`pacemaker.timeout_ms`).
    pub pacemaker_timeout_ms: u64,
    /// Pacemaker backoff rate (`pacemaker.rate`).
    pub pacemaker_rate: f64,
    /// Pacemaker backoff exponent cap (`pacemaker.max_exp`).
    pub pacemaker_max_exp: u32,
    /// Sync re-send interval (`bft.sync.patience_ms`).
    pub sync_patience_ms: u64,
    /// Commands per sync batch.
    pub sync_batch_size: usize,
    /// Mempool capacity (`mempool.max_size`).
    pub mempool_max_size: usize,
    /// Replace the built-in fork registry (`overwrite_forks.enable`);
    /// testing only.
    pub overwrite_forks: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            pacemaker_timeout_ms: 3_000,
            pacemaker_rate: 1.1,
            pacemaker_max_exp: 0,
            sync_patience_ms: 2_000,
            sync_batch_size: 10,
            mempool_max_size: 10_000,
            overwrite_forks: false,
        }
    }
}

impl NodeConfig {
    pub fn bft(&self) -> BftConfig {
        BftConfig {
            timeout_ms: self.pacemaker_timeout_ms,
            rate: self.pacemaker_rate,
            max_exp: self.pacemaker_max_exp,
            ..BftConfig::default()
        }
    }

    pub fn sync(&self) -> SyncConfig {
        SyncConfig {
            batch_size: self.sync_batch_size,
            patience: Duration::from_millis(self.sync_patience_ms),
        }
    }
}
