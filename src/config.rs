use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::console::{CollapseMode, EphemeralTable, LogReconciler, DEFAULT_EPHEMERAL_PREFIXES};
use crate::sync::{ConfirmOptions, PollerOptions, RetryPolicy};

const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:5000/api";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 400;
const DEFAULT_CONFIRM_TIMEOUT_MS: u64 = 6000;
const DEFAULT_CONFIRM_POLL_INTERVAL_MS: u64 = 400;
const DEFAULT_CONFIRM_MIN_VISIBLE_MS: u64 = 500;
const DEFAULT_POLL_INITIAL_DELAY_MS: u64 = 1000;
const DEFAULT_POLL_MAX_DELAY_MS: u64 = 15_000;
const DEFAULT_POLL_GROWTH_FACTOR: f64 = 2.0;

#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
enum StringOrVec {
    String(String),
    Vec(Vec<String>),
}

impl StringOrVec {
    fn into_vec(self) -> Vec<String> {
        match self {
            StringOrVec::String(value) => split_list(&value),
            StringOrVec::Vec(values) => values
                .into_iter()
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect(),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
struct PanelYaml {
    api_base_url: Option<String>,
    request_timeout_ms: Option<u64>,
    retry_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    confirm_timeout_ms: Option<u64>,
    confirm_poll_interval_ms: Option<u64>,
    confirm_min_visible_ms: Option<u64>,
    poll_initial_delay_ms: Option<u64>,
    poll_max_delay_ms: Option<u64>,
    poll_growth_factor: Option<f64>,
    ephemeral_prefixes: Option<StringOrVec>,
    collapse_mode: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PanelConfig {
    pub api_base_url: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub confirm: ConfirmOptions,
    pub poller: PollerOptions,
    pub ephemeral_prefixes: Vec<String>,
    pub collapse_mode: CollapseMode,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self::from_yaml(PanelYaml::default())
    }
}

impl PanelConfig {
    pub fn from_env_or_yaml() -> Result<Self> {
        let config_path = env::var("BOTPANEL_CONFIG_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let cfg = match config_path {
            Some(path) => Self::from_yaml_path(path)?,
            None => Self::from_env()?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .with_context(|| format!("failed to open panel config {}", path_ref.display()))?;
        let yaml: PanelYaml = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse panel config {}", path_ref.display()))?;
        if let Some(mode) = &yaml.collapse_mode {
            mode.parse::<CollapseMode>()
                .with_context(|| format!("invalid collapse_mode in {}", path_ref.display()))?;
        }
        let cfg = Self::from_yaml(yaml);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let yaml = PanelYaml {
            api_base_url: env::var("BOTPANEL_API_BASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            request_timeout_ms: env_parse("BOTPANEL_REQUEST_TIMEOUT_MS")?,
            retry_attempts: env_parse("BOTPANEL_RETRY_ATTEMPTS")?,
            retry_base_delay_ms: env_parse("BOTPANEL_RETRY_BASE_DELAY_MS")?,
            confirm_timeout_ms: env_parse("BOTPANEL_CONFIRM_TIMEOUT_MS")?,
            confirm_poll_interval_ms: env_parse("BOTPANEL_CONFIRM_POLL_INTERVAL_MS")?,
            confirm_min_visible_ms: env_parse("BOTPANEL_CONFIRM_MIN_VISIBLE_MS")?,
            poll_initial_delay_ms: env_parse("BOTPANEL_POLL_INITIAL_DELAY_MS")?,
            poll_max_delay_ms: env_parse("BOTPANEL_POLL_MAX_DELAY_MS")?,
            poll_growth_factor: env_parse("BOTPANEL_POLL_GROWTH_FACTOR")?,
            ephemeral_prefixes: env::var("BOTPANEL_EPHEMERAL_PREFIXES")
                .ok()
                .map(StringOrVec::String),
            collapse_mode: env::var("BOTPANEL_COLLAPSE_MODE").ok(),
        };
        if let Some(mode) = &yaml.collapse_mode {
            mode.parse::<CollapseMode>()
                .context("invalid BOTPANEL_COLLAPSE_MODE")?;
        }
        Ok(Self::from_yaml(yaml))
    }

    fn from_yaml(yaml: PanelYaml) -> Self {
        let ephemeral_prefixes = yaml
            .ephemeral_prefixes
            .map(StringOrVec::into_vec)
            .unwrap_or_else(|| {
                DEFAULT_EPHEMERAL_PREFIXES
                    .iter()
                    .map(|p| p.to_string())
                    .collect()
            });
        let collapse_mode = yaml
            .collapse_mode
            .as_deref()
            .and_then(|mode| mode.parse().ok())
            .unwrap_or_default();

        let ms = |value: Option<u64>, default: u64| Duration::from_millis(value.unwrap_or(default));

        PanelConfig {
            api_base_url: yaml
                .api_base_url
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            request_timeout: ms(yaml.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS),
            retry: RetryPolicy::new(
                yaml.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS),
                ms(yaml.retry_base_delay_ms, DEFAULT_RETRY_BASE_DELAY_MS),
            ),
            confirm: ConfirmOptions {
                confirm_timeout: ms(yaml.confirm_timeout_ms, DEFAULT_CONFIRM_TIMEOUT_MS),
                poll_interval: ms(
                    yaml.confirm_poll_interval_ms,
                    DEFAULT_CONFIRM_POLL_INTERVAL_MS,
                ),
                min_visible: ms(yaml.confirm_min_visible_ms, DEFAULT_CONFIRM_MIN_VISIBLE_MS),
            },
            poller: PollerOptions {
                initial_delay: ms(yaml.poll_initial_delay_ms, DEFAULT_POLL_INITIAL_DELAY_MS),
                max_delay: ms(yaml.poll_max_delay_ms, DEFAULT_POLL_MAX_DELAY_MS),
                growth_factor: yaml
                    .poll_growth_factor
                    .unwrap_or(DEFAULT_POLL_GROWTH_FACTOR),
            },
            ephemeral_prefixes,
            collapse_mode,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.attempts == 0 {
            bail!("retry_attempts must be at least 1");
        }
        if self.confirm.poll_interval.is_zero() {
            bail!("confirm_poll_interval_ms must be greater than 0");
        }
        if self.poller.initial_delay.is_zero() {
            bail!("poll_initial_delay_ms must be greater than 0");
        }
        if !(self.poller.growth_factor >= 1.0 && self.poller.growth_factor.is_finite()) {
            bail!(
                "poll_growth_factor must be a finite value >= 1.0 (got {})",
                self.poller.growth_factor
            );
        }
        if self.poller.max_delay < self.poller.initial_delay {
            bail!(
                "poll_max_delay_ms ({}) must not be below poll_initial_delay_ms ({})",
                self.poller.max_delay.as_millis(),
                self.poller.initial_delay.as_millis()
            );
        }
        if self.api_base_url.trim().is_empty() {
            return Err(anyhow!("api_base_url must not be empty"));
        }
        Ok(())
    }

    pub fn reconciler(&self) -> LogReconciler {
        LogReconciler::new(
            EphemeralTable::new(self.ephemeral_prefixes.iter().cloned()),
            self.collapse_mode,
        )
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("{} has invalid value '{}': {}", key, raw, e)),
        _ => Ok(None),
    }
}
