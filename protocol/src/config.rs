//! # Engine Configuration & Constants
//!
//! Every tunable number in Warden lives here. Values that change how a
//! vault behaves (expiry windows, owner limits) are surfaced through
//! [`EngineConfig`] so that operators can override them at startup; the
//! rest are plain constants.

use chrono::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The engine version string reported by the node's status endpoint.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Version tag mixed into every event hash. Bump when the event encoding
/// changes so that old journals fail verification loudly instead of
/// silently replaying into the wrong shape.
pub const EVENT_SCHEMA_VERSION: u16 = 1;

// ---------------------------------------------------------------------------
// Proposal Timing
// ---------------------------------------------------------------------------

/// Default lifetime of a proposal when the proposer does not override it.
pub const DEFAULT_PROPOSAL_EXPIRY_SECS: i64 = 7 * 24 * 60 * 60;

/// Longest lifetime a proposer may request. A proposal that sits around for
/// a quarter collects approvals from owners who have long forgotten what
/// they signed.
pub const MAX_PROPOSAL_EXPIRY_SECS: i64 = 90 * 24 * 60 * 60;

// ---------------------------------------------------------------------------
// Membership & Identifiers
// ---------------------------------------------------------------------------

/// Upper bound on owners per vault. Keeps the linear membership scans on
/// the approval path bounded.
pub const MAX_OWNERS: usize = 64;

/// Maximum length of an owner / recipient address in bytes.
pub const MAX_ADDRESS_LENGTH: usize = 128;

/// Maximum length of an asset symbol in bytes.
pub const MAX_ASSET_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Network Parameters
// ---------------------------------------------------------------------------

/// Default REST / WebSocket API port.
pub const DEFAULT_API_PORT: u16 = 9841;

/// Default metrics (Prometheus) port.
pub const DEFAULT_METRICS_PORT: u16 = 9842;

/// Upper bound on the number of events returned by a single journal query.
pub const MAX_EVENTS_PER_PAGE: usize = 1_000;

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Runtime parameters for a [`VaultEngine`](crate::engine::VaultEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Lifetime applied to proposals created without an explicit override.
    pub default_expiry: Duration,

    /// Longest override a proposer may request.
    pub max_expiry: Duration,

    /// Maximum number of owners a vault may hold, at creation and after
    /// every `AddOwner` execution.
    pub max_owners: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_expiry: Duration::seconds(DEFAULT_PROPOSAL_EXPIRY_SECS),
            max_expiry: Duration::seconds(MAX_PROPOSAL_EXPIRY_SECS),
            max_owners: MAX_OWNERS,
        }
    }
}

impl EngineConfig {
    /// Overrides the default proposal lifetime.
    pub fn with_default_expiry(mut self, lifetime: Duration) -> Self {
        self.default_expiry = lifetime;
        self
    }

    /// Overrides the maximum number of owners per vault.
    pub fn with_max_owners(mut self, max_owners: usize) -> Self {
        self.max_owners = max_owners;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_expiry_is_seven_days() {
        let config = EngineConfig::default();
        assert_eq!(config.default_expiry, Duration::days(7));
    }

    #[test]
    fn default_expiry_fits_within_max() {
        let config = EngineConfig::default();
        assert!(config.default_expiry <= config.max_expiry);
        assert!(config.default_expiry > Duration::zero());
    }

    #[test]
    fn builder_overrides_apply() {
        let config = EngineConfig::default()
            .with_default_expiry(Duration::seconds(60))
            .with_max_owners(5);
        assert_eq!(config.default_expiry, Duration::seconds(60));
        assert_eq!(config.max_owners, 5);
    }

    #[test]
    fn ports_are_distinct() {
        assert_ne!(DEFAULT_API_PORT, DEFAULT_METRICS_PORT);
    }
}
