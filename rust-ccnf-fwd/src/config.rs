//! Forwarder configuration.
//!
//! Defaults, an optional TOML file, and `CCNF_`-prefixed environment
//! overrides are layered in that order. Only the startup command file path
//! comes from argv; everything else lives here.

use anyhow::{Context, Result};
use rust_ccnf_common::types;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct ForwarderConfig {
    /// UDP socket for the data plane; unknown peers sending here get a
    /// connection created on first contact.
    pub listen: SocketAddr,
    /// TCP socket accepting local control connections.
    pub control: SocketAddr,
    /// Milliseconds per logical tick (timer-wheel granularity).
    pub tick_ms: u64,
    /// Object capacity of the content store.
    pub cs_capacity: usize,
    /// Entry capacity of the PIT.
    pub pit_capacity: usize,
    /// Lifetime applied to Interests that carry none, in milliseconds.
    pub default_interest_lifetime_ms: u64,
    /// Hard cap on any Interest lifetime, in milliseconds.
    pub max_interest_lifetime_ms: u64,
    /// Depth of each connection's egress queue; a full queue drops.
    pub send_queue_depth: usize,
    /// Ticks between content-store housekeeping sweeps.
    pub cs_sweep_interval_ticks: u64,
    /// Maximum lapsed entries removed per housekeeping sweep.
    pub cs_sweep_budget: usize,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 9695)),
            control: SocketAddr::from(([127, 0, 0, 1], 9695)),
            tick_ms: types::DEFAULT_TICK_MS,
            cs_capacity: types::DEFAULT_CS_CAPACITY,
            pit_capacity: types::DEFAULT_PIT_CAPACITY,
            default_interest_lifetime_ms: types::DEFAULT_INTEREST_LIFETIME_MS,
            max_interest_lifetime_ms: types::MAX_INTEREST_LIFETIME_MS,
            send_queue_depth: 64,
            cs_sweep_interval_ticks: 100,
            cs_sweep_budget: 64,
        }
    }
}

impl ForwarderConfig {
    /// Loads defaults, then `path` (when given), then `CCNF_*` environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = config::Config::builder()
            .set_default("listen", defaults.listen.to_string())?
            .set_default("control", defaults.control.to_string())?
            .set_default("tick_ms", defaults.tick_ms)?
            .set_default("cs_capacity", defaults.cs_capacity as u64)?
            .set_default("pit_capacity", defaults.pit_capacity as u64)?
            .set_default(
                "default_interest_lifetime_ms",
                defaults.default_interest_lifetime_ms,
            )?
            .set_default("max_interest_lifetime_ms", defaults.max_interest_lifetime_ms)?
            .set_default("send_queue_depth", defaults.send_queue_depth as u64)?
            .set_default("cs_sweep_interval_ticks", defaults.cs_sweep_interval_ticks)?
            .set_default("cs_sweep_budget", defaults.cs_sweep_budget as u64)?;
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let cfg: Self = builder
            .add_source(config::Environment::with_prefix("CCNF"))
            .build()
            .context("assembling forwarder configuration")?
            .try_deserialize()
            .context("deserializing forwarder configuration")?;
        if cfg.tick_ms == 0 {
            anyhow::bail!("tick_ms must be at least 1");
        }
        Ok(cfg)
    }
}
