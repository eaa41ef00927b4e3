//! Interest rate providers
//!
//! - `FixedRateProvider` quotes a configured rate
//! - `CbrRateProvider` scrapes the key rate from the central bank front page

use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use rust_decimal::Decimal;

use crate::config::{RateProviderKind, RateSettings};
use crate::domain::result::{Error, Result};
use crate::ports::RateProvider;

/// Build the provider selected in the configuration
pub fn from_settings(settings: &RateSettings) -> Result<Arc<dyn RateProvider>> {
    let provider: Arc<dyn RateProvider> = match settings.provider {
        RateProviderKind::Fixed => Arc::new(FixedRateProvider::new(settings.fixed_rate)),
        RateProviderKind::Cbr => Arc::new(CbrRateProvider::new(
            &settings.cbr_url,
            Duration::from_secs(settings.timeout_secs),
        )?),
    };
    Ok(provider)
}

#[derive(Debug, Clone)]
pub struct FixedRateProvider {
    rate: Decimal,
}

impl FixedRateProvider {
    pub fn new(rate: Decimal) -> Self {
        Self { rate }
    }
}

impl RateProvider for FixedRateProvider {
    fn name(&self) -> &str {
        "fixed"
    }

    fn current_rate(&self) -> Result<Decimal> {
        Ok(self.rate)
    }
}

/// Central bank key rate scraper
#[derive(Debug)]
pub struct CbrRateProvider {
    client: Client,
    url: String,
}

impl CbrRateProvider {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl RateProvider for CbrRateProvider {
    fn name(&self) -> &str {
        "cbr"
    }

    fn current_rate(&self) -> Result<Decimal> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .map_err(|e| Error::RateUnavailable(format!("request to {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::RateUnavailable(format!(
                "unexpected status code: {}",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .map_err(|e| Error::RateUnavailable(format!("failed to read response: {}", e)))?;

        let rate = parse_key_rate(&body)?;
        tracing::debug!(provider = "cbr", %rate, "fetched key rate");
        Ok(rate)
    }
}

fn key_indicator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"class="[^"]*\bkey-indicator__value\b[^"]*"[^>]*>([^<]*)<"#)
            .unwrap_or_else(|e| panic!("invalid key indicator pattern: {}", e))
    })
}

/// Extract the first parseable `.key-indicator__value` from the page
///
/// Values use a decimal comma and may carry a percent sign, e.g. `16,50 %`.
pub fn parse_key_rate(html: &str) -> Result<Decimal> {
    key_indicator_regex()
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .find_map(|m| {
            let text: String = m
                .as_str()
                .chars()
                .filter(|c| !c.is_whitespace() && *c != '%')
                .collect();
            Decimal::from_str(&text.replacen(',', ".", 1)).ok()
        })
        .ok_or_else(|| Error::RateUnavailable("key rate not found in page".to_string()))
}
