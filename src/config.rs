//! Configuration
//!
//! Every tunable in one struct, loaded from TOML and validated once at
//! startup. A bad value is fatal at construction and never at runtime;
//! after validation the config is immutable except for the fields that are
//! explicitly hot-swappable through the control plane (engine weights,
//! loss limit).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ring_capacity must be a power of two, got {0}")]
    RingCapacityNotPow2(usize),
    #[error("{field} must be positive")]
    NonPositive { field: &'static str },
    #[error("{field} must be within (0, 1], got {value}")]
    WeightOutOfRange { field: &'static str, value: f64 },
    #[error("fast regime p95 ({fast}) must be below normal regime p95 ({normal})")]
    RegimeThresholdsInverted { fast: f64, normal: f64 },
    #[error("no symbols configured")]
    NoSymbols,
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Intent ring
    pub ring_capacity: usize,

    // Venue health thresholds
    pub venue_staleness_max_ns: u64,
    pub venue_latency_max_ns: u64,
    pub venue_reject_max: u64,

    // Latency governor
    pub latency_window_size: usize,
    pub fast_regime_p95_ms: f64,
    pub normal_regime_p95_ms: f64,

    // Loss guard / risk governor
    pub daily_loss_limit: f64,
    pub base_spread_limit: f64,
    pub base_vol_limit: f64,
    pub base_latency_ms: f64,

    // Capital allocator
    pub global_notional_cap: f64,
    pub hft_weight: f64,
    pub structure_weight: f64,

    // Position gate
    pub max_position_per_symbol: f64,

    // Executor
    pub soft_cooldown_ms: u64,
    pub hard_cooldown_ms: u64,
    pub impulse_soft: f64,
    pub impulse_med: f64,
    pub impulse_hard: f64,
    pub tp_decay_tau_ms: u64,

    // Bootstrap
    pub bootstrap_min_ticks: u32,
    pub bootstrap_min_intents: u32,
    pub bootstrap_min_book_valid_ms: u64,

    // Watchdog
    pub watchdog_hang_ms: u64,

    // Threading
    pub core_pinning: HashMap<String, u32>,
    pub symbols: Vec<String>,

    // Persistence + telemetry
    pub journal_path: Option<PathBuf>,
    pub seq_store_dir: Option<PathBuf>,
    pub telemetry_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ring_capacity: 1024,
            venue_staleness_max_ns: 5_000_000_000,
            venue_latency_max_ns: 500_000_000,
            venue_reject_max: 10,
            latency_window_size: 2048,
            fast_regime_p95_ms: 6.0,
            normal_regime_p95_ms: 10.0,
            daily_loss_limit: 500.0,
            base_spread_limit: 1.0,
            base_vol_limit: 5.0,
            base_latency_ms: 500.0,
            global_notional_cap: 1_000_000.0,
            hft_weight: 0.6,
            structure_weight: 0.4,
            max_position_per_symbol: 100.0,
            soft_cooldown_ms: 800,
            hard_cooldown_ms: 400,
            impulse_soft: 0.08,
            impulse_med: 0.15,
            impulse_hard: 0.30,
            tp_decay_tau_ms: 120,
            bootstrap_min_ticks: 100,
            bootstrap_min_intents: 40,
            bootstrap_min_book_valid_ms: 30_000,
            watchdog_hang_ms: 5_000,
            core_pinning: HashMap::new(),
            symbols: vec!["XAUUSD".to_string(), "XAGUSD".to_string()],
            journal_path: None,
            seq_store_dir: None,
            telemetry_capacity: 8192,
        }
    }
}

impl Config {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Startup invariant checks. Violations are fatal here, never later.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ring_capacity == 0 || !self.ring_capacity.is_power_of_two() {
            return Err(ConfigError::RingCapacityNotPow2(self.ring_capacity));
        }

        let positives: [(&'static str, f64); 8] = [
            ("daily_loss_limit", self.daily_loss_limit),
            ("global_notional_cap", self.global_notional_cap),
            ("base_spread_limit", self.base_spread_limit),
            ("base_vol_limit", self.base_vol_limit),
            ("base_latency_ms", self.base_latency_ms),
            ("max_position_per_symbol", self.max_position_per_symbol),
            ("impulse_soft", self.impulse_soft),
            ("tp_decay_tau_ms", self.tp_decay_tau_ms as f64),
        ];
        for (field, value) in positives {
            if value <= 0.0 {
                return Err(ConfigError::NonPositive { field });
            }
        }

        for (field, value) in [
            ("hft_weight", self.hft_weight),
            ("structure_weight", self.structure_weight),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::WeightOutOfRange { field, value });
            }
        }

        if self.fast_regime_p95_ms >= self.normal_regime_p95_ms {
            return Err(ConfigError::RegimeThresholdsInverted {
                fast: self.fast_regime_p95_ms,
                normal: self.normal_regime_p95_ms,
            });
        }

        if self.symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn non_pow2_ring_rejected() {
        let config = Config {
            ring_capacity: 1000,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RingCapacityNotPow2(1000))
        ));
    }

    #[test]
    fn zero_cap_rejected() {
        let config = Config {
            global_notional_cap: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositive { field: "global_notional_cap" })
        ));
    }

    #[test]
    fn weight_bounds_enforced() {
        let config = Config {
            hft_weight: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WeightOutOfRange { field: "hft_weight", .. })
        ));
    }

    #[test]
    fn inverted_regimes_rejected() {
        let config = Config {
            fast_regime_p95_ms: 12.0,
            normal_regime_p95_ms: 10.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RegimeThresholdsInverted { .. })
        ));
    }

    #[test]
    fn toml_roundtrip() {
        let toml_src = r#"
            ring_capacity = 512
            daily_loss_limit = 750.0
            symbols = ["XAUUSD"]

            [core_pinning]
            XAUUSD = 2
        "#;
        let config: Config = toml::from_str(toml_src).unwrap();
        config.validate().unwrap();
        assert_eq!(config.ring_capacity, 512);
        assert_eq!(config.daily_loss_limit, 750.0);
        assert_eq!(config.core_pinning.get("XAUUSD"), Some(&2));
        // Unspecified keys fall back to defaults.
        assert_eq!(config.latency_window_size, 2048);
    }
}
