//! Configuration types for ClaimVault engine instances.

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::{ClaimvaultError, Result};

/// Fixed context folded into every claim signature.
///
/// Two deployments with different domains can never accept each other's
/// claims, even when they share a signing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningDomain {
    pub app_name: String,
    pub app_version: String,
    pub network_id: String,
}

impl SigningDomain {
    #[must_use]
    pub fn new(
        app_name: impl Into<String>,
        app_version: impl Into<String>,
        network_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            app_version: app_version.into(),
            network_id: network_id.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("app_name", &self.app_name),
            ("app_version", &self.app_version),
            ("network_id", &self.network_id),
        ] {
            if value.trim().is_empty() {
                return Err(ClaimvaultError::Configuration(format!(
                    "signing domain {field} is empty"
                )));
            }
        }
        Ok(())
    }
}

impl Default for SigningDomain {
    fn default() -> Self {
        Self::new(
            constants::DEFAULT_APP_NAME,
            constants::VERSION,
            constants::DEFAULT_NETWORK_ID,
        )
    }
}

/// Configuration for one engine instance.
///
/// Several instances may share one ledger; `instance_id` is recorded as
/// `consumed_by` so the winner of a race can be traced afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub domain: SigningDomain,
    /// Path to the SQLite ledger file.
    pub ledger_path: PathBuf,
    pub instance_id: String,
    pub claim_ttl_secs: i64,
    pub clock_skew_tolerance_secs: i64,
    /// Bound on the issuance-time ledger write.
    pub persist_timeout_ms: u64,
    /// How long after expiry an unused claim is kept before purge.
    pub gc_grace_secs: i64,
    /// Age after which a consumed claim, executing action or recorded
    /// reference with no outcome is treated as interrupted.
    pub reconcile_stale_after_secs: i64,
    pub conflict_window_ms: u64,
    pub conflict_alert_threshold: usize,
    pub ledger_busy_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            domain: SigningDomain::default(),
            ledger_path: PathBuf::from("claimvault.db"),
            instance_id: "claimvault-0".to_string(),
            claim_ttl_secs: constants::DEFAULT_CLAIM_TTL_SECS,
            clock_skew_tolerance_secs: constants::DEFAULT_CLOCK_SKEW_TOLERANCE_SECS,
            persist_timeout_ms: constants::DEFAULT_PERSIST_TIMEOUT_MS,
            gc_grace_secs: constants::DEFAULT_GC_GRACE_SECS,
            reconcile_stale_after_secs: constants::DEFAULT_RECONCILE_STALE_AFTER_SECS,
            conflict_window_ms: constants::DEFAULT_CONFLICT_WINDOW_MS,
            conflict_alert_threshold: constants::DEFAULT_CONFLICT_ALERT_THRESHOLD,
            ledger_busy_timeout_ms: constants::DEFAULT_LEDGER_BUSY_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    /// Check ranges and required fields.
    ///
    /// # Errors
    /// Returns `Configuration` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.domain.validate()?;
        if self.instance_id.trim().is_empty() {
            return Err(ClaimvaultError::Configuration("instance_id is empty".into()));
        }
        check_secs("claim_ttl_secs", self.claim_ttl_secs, 1, constants::MAX_CLAIM_TTL_SECS)?;
        check_secs(
            "clock_skew_tolerance_secs",
            self.clock_skew_tolerance_secs,
            0,
            constants::MAX_CLOCK_SKEW_TOLERANCE_SECS,
        )?;
        if self.persist_timeout_ms == 0 {
            return Err(ClaimvaultError::Configuration(
                "persist_timeout_ms must be positive".into(),
            ));
        }
        check_secs("gc_grace_secs", self.gc_grace_secs, 0, constants::MAX_GC_GRACE_SECS)?;
        check_secs(
            "reconcile_stale_after_secs",
            self.reconcile_stale_after_secs,
            1,
            constants::MAX_RECONCILE_STALE_AFTER_SECS,
        )?;
        if self.conflict_window_ms == 0 || self.conflict_alert_threshold == 0 {
            return Err(ClaimvaultError::Configuration(
                "conflict monitor window and threshold must be positive".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn claim_ttl(&self) -> Duration {
        Duration::seconds(self.claim_ttl_secs)
    }

    #[must_use]
    pub fn clock_skew_tolerance(&self) -> Duration {
        Duration::seconds(self.clock_skew_tolerance_secs)
    }

    #[must_use]
    pub fn gc_grace(&self) -> Duration {
        Duration::seconds(self.gc_grace_secs)
    }

    #[must_use]
    pub fn reconcile_stale_after(&self) -> Duration {
        Duration::seconds(self.reconcile_stale_after_secs)
    }

    #[must_use]
    pub fn persist_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.persist_timeout_ms)
    }

    /// Parse and validate a JSON config. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ClaimvaultError::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ClaimvaultError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }
}

fn check_secs(field: &str, value: i64, min: i64, max: i64) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ClaimvaultError::Configuration(format!(
            "{field} must be within {min}..={max}, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.clock_skew_tolerance(), Duration::seconds(30));
        assert_eq!(cfg.persist_timeout(), std::time::Duration::from_secs(5));
        assert_eq!(cfg.domain.app_name, "claimvault");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = EngineConfig::from_json_str(
            r#"{"instance_id": "node-7", "domain": {"app_name": "rpg", "app_version": "2", "network_id": "mainnet"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.instance_id, "node-7");
        assert_eq!(cfg.domain.network_id, "mainnet");
        assert_eq!(cfg.claim_ttl_secs, constants::DEFAULT_CLAIM_TTL_SECS);
    }

    #[test]
    fn rejects_out_of_range_skew() {
        let err = EngineConfig::from_json_str(r#"{"clock_skew_tolerance_secs": 3600}"#).unwrap_err();
        assert!(matches!(err, ClaimvaultError::Configuration(_)));
        assert!(EngineConfig::from_json_str(r#"{"clock_skew_tolerance_secs": -1}"#).is_err());
    }

    #[test]
    fn rejects_durations_past_their_bounds() {
        for field in ["claim_ttl_secs", "gc_grace_secs", "reconcile_stale_after_secs"] {
            let json = format!(r#"{{"{field}": {}}}"#, i64::MAX);
            let err = EngineConfig::from_json_str(&json).unwrap_err();
            assert!(
                matches!(&err, ClaimvaultError::Configuration(msg) if msg.contains(field)),
                "{field}: {err}"
            );
        }
        assert!(EngineConfig::from_json_str(r#"{"claim_ttl_secs": 0}"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{"gc_grace_secs": -1}"#).is_err());
    }

    #[test]
    fn largest_accepted_durations_convert() {
        let cfg = EngineConfig::from_json_str(&format!(
            r#"{{"claim_ttl_secs": {}, "gc_grace_secs": {}, "reconcile_stale_after_secs": {}}}"#,
            constants::MAX_CLAIM_TTL_SECS,
            constants::MAX_GC_GRACE_SECS,
            constants::MAX_RECONCILE_STALE_AFTER_SECS,
        ))
        .unwrap();
        assert_eq!(cfg.claim_ttl(), Duration::days(30));
        assert_eq!(cfg.gc_grace(), Duration::days(365));
        assert_eq!(cfg.reconcile_stale_after(), Duration::days(7));
    }

    #[test]
    fn rejects_empty_domain_field() {
        let mut cfg = EngineConfig::default();
        cfg.domain.network_id = "  ".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        let err = EngineConfig::from_json_str("{not json").unwrap_err();
        assert_eq!(err.code(), "CV_ERR_902");
    }

    #[test]
    fn missing_file_is_configuration_error() {
        let err = EngineConfig::from_json_file("/nonexistent/claimvault.json").unwrap_err();
        assert!(matches!(err, ClaimvaultError::Configuration(_)));
    }
}
