//! # Protocol Configuration & Constants
//!
//! Every magic number in MeshStealth lives here. Sizes that appear on the
//! wire are fixed by the primitives underneath (Ed25519, ML-KEM-768, the
//! ledger's transaction format). Timing and capacity values are tunable
//! defaults that the per-subsystem config structs pick up.
//!
//! [`CoreConfig`] bundles the tunable parts so an embedding app can ship a
//! single JSON file instead of four.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mesh::{MeshConfig, RelayConfig};
use crate::settlement::{NoncePoolConfig, SettlementConfig};

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Payloads without a durable pre-signed transaction. Only the sender can
/// settle these.
pub const PROTOCOL_VERSION_LEGACY: u8 = 1;

/// Payloads carrying a durable-nonce transaction either party can broadcast.
pub const PROTOCOL_VERSION_DURABLE: u8 = 2;

/// The version this build emits.
pub const PROTOCOL_VERSION: u8 = PROTOCOL_VERSION_DURABLE;

// ---------------------------------------------------------------------------
// Curve & Stealth Parameters
// ---------------------------------------------------------------------------

/// Compressed Edwards point length.
pub const POINT_LENGTH: usize = 32;

/// Canonical scalar encoding length.
pub const SCALAR_LENGTH: usize = 32;

/// Classical meta-address: spend point ‖ view point.
pub const CLASSICAL_META_ADDRESS_LENGTH: usize = 2 * POINT_LENGTH;

/// Domain tag hashed in front of every stealth shared secret. Changing it
/// orphans every payment ever sent, so don't.
pub const STEALTH_HASH_DOMAIN: &[u8] = b"meshstealth/v1/stealth-scalar";

/// HKDF info string used to fuse the ECDH and KEM secrets in hybrid mode.
pub const HYBRID_KDF_INFO: &[u8] = b"meshstealth/v1/hybrid-secret";

/// blake3 `derive_key` context for memo encryption keys.
pub const MEMO_KEY_CONTEXT: &str = "meshstealth 2026-01 memo encryption key";

/// Domain tag for deterministic key restore from a wallet seed.
pub const SEED_DERIVATION_DOMAIN: &[u8] = b"meshstealth/v1/seed";

/// Minimum wallet seed length accepted by `StealthKeyPair::from_seed`.
pub const MIN_SEED_LENGTH: usize = 32;

/// Upper bound on memo plaintext. Memos ride inside a radio frame.
pub const MAX_MEMO_LENGTH: usize = 256;

// ---------------------------------------------------------------------------
// ML-KEM-768
// ---------------------------------------------------------------------------

/// Encapsulation key length.
pub const KEM_PUBLIC_KEY_LENGTH: usize = 1184;

/// Decapsulation key length.
pub const KEM_SECRET_KEY_LENGTH: usize = 2400;

/// Ciphertext length.
pub const KEM_CIPHERTEXT_LENGTH: usize = 1088;

/// Shared secret length.
pub const KEM_SHARED_SECRET_LENGTH: usize = 32;

/// Hybrid meta-address: spend point ‖ view point ‖ KEM public key.
pub const HYBRID_META_ADDRESS_LENGTH: usize = CLASSICAL_META_ADDRESS_LENGTH + KEM_PUBLIC_KEY_LENGTH;

// ---------------------------------------------------------------------------
// Mesh Relay
// ---------------------------------------------------------------------------

/// Hard ceiling on hop count. Anything larger is clamped at creation.
pub const MAX_MESSAGE_TTL: u8 = 10;

/// Hop budget for payment messages.
pub const PAYMENT_TTL: u8 = 7;

/// Acks only need to find their way back, so they travel less.
pub const ACK_TTL: u8 = 3;

/// Discovery announcements are neighbourhood-local.
pub const DISCOVERY_TTL: u8 = 2;

/// Messages older than this are dropped on sight, whatever their TTL.
pub const MESSAGE_EXPIRY_WINDOW: Duration = Duration::from_secs(72 * 60 * 60);

/// Seen-id set capacity before eviction kicks in.
pub const SEEN_CACHE_CAPACITY: usize = 10_000;

/// A peer silent for this long is considered gone.
pub const PEER_STALE_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest frame we accept from the transport. A hybrid payment with a
/// pre-signed transaction is under 2 KiB; this leaves headroom.
pub const MAX_FRAME_SIZE: usize = 16 * 1024;

// ---------------------------------------------------------------------------
// Durable Nonces
// ---------------------------------------------------------------------------

/// Size of a nonce account's data on the ledger.
pub const NONCE_ACCOUNT_LENGTH: u64 = 80;

/// Rent-exempt minimum for an 80-byte account at current ledger rent.
/// Only a fallback; the pool asks the ledger first.
pub const NONCE_ACCOUNT_RENT_EXEMPT_LAMPORTS: u64 = 1_447_680;

/// A reservation that isn't consumed within this window goes back to the pool.
pub const NONCE_RESERVATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Number of nonce accounts the pool tries to keep on hand.
pub const NONCE_POOL_TARGET_SIZE: usize = 5;

/// Pause between account creations so public RPC endpoints don't throttle us.
pub const NONCE_CREATION_DELAY: Duration = Duration::from_millis(500);

/// Per-account retry budget during replenishment.
pub const NONCE_CREATION_MAX_RETRIES: u32 = 3;

/// Upper bound accepted for the pause between nonce account creations.
pub const NONCE_CREATION_DELAY_MAX: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// Wall-clock limit for any single ledger call.
pub const LEDGER_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Total settlement attempts before a payment stays `Failed`.
pub const SETTLEMENT_MAX_ATTEMPTS: u32 = 5;

/// Base delay after a rate-limit response. Doubles per retry.
pub const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(2);

/// Rate-limit retries inside one settlement attempt.
pub const RATE_LIMIT_MAX_RETRIES: u32 = 3;

/// Unsettled payments older than this are marked `Expired`.
pub const PENDING_PAYMENT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Lamports per SOL, for display helpers.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Clamp a requested hop count to `[1, MAX_MESSAGE_TTL]`.
pub fn clamp_ttl(ttl: u8) -> u8 {
    ttl.clamp(1, MAX_MESSAGE_TTL)
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

// ---------------------------------------------------------------------------
// Aggregate Configuration
// ---------------------------------------------------------------------------

/// Errors from loading a [`CoreConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Every tunable knob in one place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub mesh: MeshConfig,
    pub relay: RelayConfig,
    pub nonce_pool: NoncePoolConfig,
    pub settlement: SettlementConfig,
}

impl CoreConfig {
    /// Parse from a JSON string. Missing sections fall back to defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file on disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Reject values that would make a subsystem misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mesh.seen_cache_capacity == 0 {
            return Err(ConfigError::Invalid("mesh.seen_cache_capacity must be > 0".into()));
        }
        if self.mesh.max_ttl == 0 || self.mesh.max_ttl > MAX_MESSAGE_TTL {
            return Err(ConfigError::Invalid(format!(
                "mesh.max_ttl must be in 1..={MAX_MESSAGE_TTL}"
            )));
        }
        if self.relay.max_stored == 0 || self.relay.per_cycle_cap == 0 {
            return Err(ConfigError::Invalid(
                "relay.max_stored and relay.per_cycle_cap must be > 0".into(),
            ));
        }
        let pool = &self.nonce_pool;
        if pool.target_size == 0 {
            return Err(ConfigError::Invalid("nonce_pool.target_size must be > 0".into()));
        }
        if pool.reservation_timeout_ms == 0 || pool.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("nonce_pool timeouts must be > 0".into()));
        }
        if pool.creation_max_retries == 0 {
            return Err(ConfigError::Invalid(
                "nonce_pool.creation_max_retries must be > 0".into(),
            ));
        }
        if pool.creation_delay_ms > NONCE_CREATION_DELAY_MAX.as_millis() as u64 {
            return Err(ConfigError::Invalid(format!(
                "nonce_pool.creation_delay_ms must be <= {}",
                NONCE_CREATION_DELAY_MAX.as_millis()
            )));
        }

        let settlement = &self.settlement;
        if settlement.max_attempts == 0 {
            return Err(ConfigError::Invalid("settlement.max_attempts must be > 0".into()));
        }
        if settlement.request_timeout_ms == 0 || settlement.max_pending_age_ms == 0 {
            return Err(ConfigError::Invalid(
                "settlement.request_timeout_ms and settlement.max_pending_age_ms must be > 0"
                    .into(),
            ));
        }
        if settlement.rate_limit_max_retries > 0 && settlement.rate_limit_backoff_ms == 0 {
            return Err(ConfigError::Invalid(
                "settlement.rate_limit_backoff_ms must be > 0 when retrying".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hybrid_meta_address_is_classical_plus_kem_key() {
        assert_eq!(CLASSICAL_META_ADDRESS_LENGTH, 64);
        assert_eq!(HYBRID_META_ADDRESS_LENGTH, 1248);
    }

    #[test]
    fn ttl_ordering_makes_sense() {
        assert!(ACK_TTL < PAYMENT_TTL);
        assert!(PAYMENT_TTL <= MAX_MESSAGE_TTL);
        assert!(DISCOVERY_TTL <= ACK_TTL);
    }

    #[test]
    fn clamp_ttl_bounds() {
        assert_eq!(clamp_ttl(0), 1);
        assert_eq!(clamp_ttl(5), 5);
        assert_eq!(clamp_ttl(200), MAX_MESSAGE_TTL);
    }

    #[test]
    fn version_constants() {
        assert!(PROTOCOL_VERSION_LEGACY < PROTOCOL_VERSION_DURABLE);
        assert_eq!(PROTOCOL_VERSION, PROTOCOL_VERSION_DURABLE);
    }

    #[test]
    fn core_config_empty_json_uses_defaults() {
        let config = CoreConfig::from_json("{}").unwrap();
        assert_eq!(config.mesh.max_ttl, MAX_MESSAGE_TTL);
        assert_eq!(config.nonce_pool.target_size, NONCE_POOL_TARGET_SIZE);
    }

    #[test]
    fn core_config_picks_relay_profile() {
        let config = CoreConfig::from_json(r#"{"relay": {"profile": "aggressive"}}"#).unwrap();
        let aggressive = RelayConfig::aggressive();
        assert_eq!(config.relay.max_stored, aggressive.max_stored);
        assert_eq!(config.relay.per_cycle_cap, aggressive.per_cycle_cap);
    }

    #[test]
    fn core_config_rejects_zero_capacity() {
        let err = CoreConfig::from_json(r#"{"mesh": {"seen_cache_capacity": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn core_config_rejects_unusable_settlement_values() {
        for bad in [
            r#"{"nonce_pool": {"target_size": 0}}"#,
            r#"{"nonce_pool": {"reservation_timeout_ms": 0}}"#,
            r#"{"nonce_pool": {"creation_delay_ms": 600000}}"#,
            r#"{"settlement": {"request_timeout_ms": 0}}"#,
            r#"{"settlement": {"max_pending_age_ms": 0}}"#,
            r#"{"settlement": {"rate_limit_backoff_ms": 0}}"#,
        ] {
            assert!(
                matches!(CoreConfig::from_json(bad), Err(ConfigError::Invalid(_))),
                "accepted {bad}"
            );
        }
        let ok = r#"{"nonce_pool": {"creation_delay_ms": 0},
                     "settlement": {"rate_limit_max_retries": 0, "rate_limit_backoff_ms": 0}}"#;
        CoreConfig::from_json(ok).unwrap();
    }

    #[test]
    fn core_config_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.json");
        std::fs::write(&path, r#"{"settlement": {"max_attempts": 2}}"#).unwrap();
        let config = CoreConfig::load(&path).unwrap();
        assert_eq!(config.settlement.max_attempts, 2);
    }
}
