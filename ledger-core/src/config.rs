//! Configuration management
//!
//! Settings live in `<ledger_dir>/settings.json`:
//! ```json
//! {
//!   "ledger": { "maxRetries": 5, "retryBaseDelayMs": 10, "rejectRepeatReversals": true },
//!   "rates": { "provider": "fixed", "fixedRate": 16.0 }
//! }
//! ```
//! Keys this crate does not know about are kept when saving.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const SETTINGS_FILE: &str = "settings.json";

const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 10;
const DEFAULT_CBR_URL: &str = "https://cbr.ru/";
const DEFAULT_RATE_TIMEOUT_SECS: u64 = 10;

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    ledger: LedgerSettings,
    #[serde(default)]
    rates: RateSettings,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Ledger engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LedgerSettings {
    /// Attempts for a unit of work that hits a write conflict
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Default deadline for every unit of work, unbounded when absent
    pub operation_timeout_ms: Option<u64>,
    pub reject_repeat_reversals: bool,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            operation_timeout_ms: None,
            reject_repeat_reversals: true,
        }
    }
}

impl LedgerSettings {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateProviderKind {
    #[default]
    Fixed,
    /// Scrape the central bank key rate
    Cbr,
}

impl FromStr for RateProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "cbr" => Ok(Self::Cbr),
            other => bail!("unknown rate provider '{}', expected 'fixed' or 'cbr'", other),
        }
    }
}

/// Interest rate source settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateSettings {
    pub provider: RateProviderKind,
    pub fixed_rate: Decimal,
    pub cbr_url: String,
    pub timeout_secs: u64,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            provider: RateProviderKind::Fixed,
            fixed_rate: Decimal::new(160, 1),
            cbr_url: DEFAULT_CBR_URL.to_string(),
            timeout_secs: DEFAULT_RATE_TIMEOUT_SECS,
        }
    }
}

/// Ledger configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub ledger: LedgerSettings,
    pub rates: RateSettings,
    // Keep the raw settings for preservation when saving
    _raw_settings: SettingsFile,
}

impl Config {
    /// Load config from the ledger directory, then apply environment overrides
    ///
    /// Recognised variables: `LEDGER_MAX_RETRIES`, `LEDGER_OPERATION_TIMEOUT_MS`,
    /// `LEDGER_RATE_PROVIDER`, `LEDGER_FIXED_RATE`.
    pub fn load(ledger_dir: &Path) -> Result<Self> {
        Self::load_with_env(ledger_dir, |key| std::env::var(key).ok())
    }

    /// Same as [`Config::load`] with an explicit environment lookup
    pub fn load_with_env(ledger_dir: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let settings_path = ledger_dir.join(SETTINGS_FILE);

        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)
                .with_context(|| format!("Failed to read {}", settings_path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid settings in {}", settings_path.display()))?
        } else {
            SettingsFile::default()
        };

        let mut ledger = raw.ledger.clone();
        let mut rates = raw.rates.clone();

        if let Some(value) = env("LEDGER_MAX_RETRIES") {
            ledger.max_retries = value
                .trim()
                .parse()
                .with_context(|| format!("LEDGER_MAX_RETRIES must be a number, got '{}'", value))?;
        }
        if let Some(value) = env("LEDGER_OPERATION_TIMEOUT_MS") {
            ledger.operation_timeout_ms = Some(value.trim().parse().with_context(|| {
                format!("LEDGER_OPERATION_TIMEOUT_MS must be a number, got '{}'", value)
            })?);
        }
        if let Some(value) = env("LEDGER_RATE_PROVIDER") {
            rates.provider = value.parse()?;
        }
        if let Some(value) = env("LEDGER_FIXED_RATE") {
            rates.fixed_rate = Decimal::from_str(value.trim())
                .with_context(|| format!("LEDGER_FIXED_RATE must be a decimal, got '{}'", value))?;
        }

        let config = Self {
            ledger,
            rates,
            _raw_settings: raw,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.ledger.max_retries == 0 {
            bail!("ledger.maxRetries must be at least 1");
        }
        if self.rates.fixed_rate < Decimal::ZERO {
            bail!("rates.fixedRate must not be negative");
        }
        Ok(())
    }

    /// Save config to the ledger directory
    /// Preserves other settings that this crate doesn't manage
    pub fn save(&self, ledger_dir: &Path) -> Result<()> {
        let settings_path = ledger_dir.join(SETTINGS_FILE);

        let mut settings = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str::<SettingsFile>(&content).unwrap_or_default()
        } else {
            self._raw_settings.clone()
        };

        settings.ledger = self.ledger.clone();
        settings.rates = self.rates.clone();

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&settings_path, content)?;
        Ok(())
    }
}
