use crate::currency::RateTable;
use crate::domain::Currency;
use crate::error::{CaisseError, CaisseResult};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_USD_TO_CDF: f64 = 2800.0;
pub const DEFAULT_PAGE_SIZE: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRates {
    pub usd_to_cdf: f64,
    pub cdf_to_usd: f64,
}

impl Default for ExchangeRates {
    fn default() -> Self {
        Self {
            usd_to_cdf: DEFAULT_USD_TO_CDF,
            cdf_to_usd: 1.0 / DEFAULT_USD_TO_CDF,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub exchange_rates: ExchangeRates,

    /// Page size used by listings when the caller does not pass one.
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// Signer recorded on entries when none is given on the command line.
    #[serde(default)]
    pub default_signer: Option<String>,
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            exchange_rates: ExchangeRates::default(),
            default_page_size: DEFAULT_PAGE_SIZE,
            default_signer: None,
        }
    }
}

impl AppConfig {
    pub fn rate_table(&self) -> CaisseResult<RateTable> {
        RateTable::new(self.exchange_rates.usd_to_cdf, self.exchange_rates.cdf_to_usd)
    }

    pub fn set_rate(&mut self, from: Currency, to: Currency, rate: f64) -> CaisseResult<()> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(CaisseError::validation(format!(
                "Rate must be greater than 0 (got {rate})"
            )));
        }
        match (from, to) {
            (Currency::Usd, Currency::Cdf) => self.exchange_rates.usd_to_cdf = rate,
            (Currency::Cdf, Currency::Usd) => self.exchange_rates.cdf_to_usd = rate,
            _ => {
                return Err(CaisseError::validation(format!(
                    "No configurable rate for {from} -> {to}"
                )));
            }
        }
        Ok(())
    }

    pub fn page_size_or_default(&self, requested: Option<u32>) -> u32 {
        match requested {
            Some(n) if n > 0 => n,
            _ if self.default_page_size > 0 => self.default_page_size,
            _ => DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

pub fn app_paths(override_home: Option<PathBuf>) -> Result<AppPaths> {
    if let Some(home) = override_home {
        return Ok(AppPaths {
            config_dir: home.join("config"),
            data_dir: home.join("data"),
        });
    }

    let proj = ProjectDirs::from("com", "caisse", "caisse")
        .context("Failed to resolve platform directories")?;

    Ok(AppPaths {
        config_dir: proj.config_dir().to_path_buf(),
        data_dir: proj.data_dir().to_path_buf(),
    })
}

pub fn load_or_init_config(paths: &AppPaths) -> Result<(AppConfig, PathBuf)> {
    fs::create_dir_all(&paths.config_dir)
        .with_context(|| format!("Failed to create config dir {}", paths.config_dir.display()))?;

    let cfg_path = paths.config_dir.join("config.json");
    if !cfg_path.exists() {
        let cfg = AppConfig::default();
        write_config(&cfg_path, &cfg)?;
        return Ok((cfg, cfg_path));
    }

    let raw = fs::read_to_string(&cfg_path)
        .with_context(|| format!("Failed to read {}", cfg_path.display()))?;
    let cfg: AppConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", cfg_path.display()))?;

    Ok((cfg, cfg_path))
}

pub fn write_config(path: &Path, cfg: &AppConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(cfg)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}
