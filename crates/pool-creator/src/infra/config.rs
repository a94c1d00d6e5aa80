//! The TOML configuration file: contract addresses, polling behaviour, the
//! optional multisig relay and the pool to create.

use {
    crate::domain::{Protocol, call::Contracts, eth, pool::PoolConfig},
    anyhow::{Context, Result},
    serde::Deserialize,
    std::{path::Path, time::Duration},
    url::Url,
};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Which flow the configured pool belongs to. Also the namespace its
    /// progress is stored under.
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub contracts: Contracts,
    #[serde(default)]
    pub polling: Polling,
    /// Submit through a Safe instead of sending from the signer.
    #[serde(default)]
    pub relay: Option<Relay>,
    /// How long Permit2 allowances granted to the router stay valid.
    #[serde(with = "humantime_serde", default = "default_permit_lifetime")]
    pub permit_lifetime: Duration,
    /// The pool definition. Uses the same field names as the stored wizard
    /// state.
    #[serde(default)]
    pub pool: Option<PoolConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct Polling {
    #[serde(with = "humantime_serde")]
    pub receipt_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub receipt_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub relay_interval: Duration,
    /// After this long an unexecuted relay transaction counts as stalled.
    #[serde(with = "humantime_serde")]
    pub relay_timeout: Duration,
}

impl Default for Polling {
    fn default() -> Self {
        Self {
            receipt_interval: Duration::from_secs(2),
            receipt_timeout: Duration::from_secs(300),
            relay_interval: Duration::from_secs(10),
            relay_timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Relay {
    /// Base URL of the Safe transaction service.
    pub url: Url,
    pub safe: eth::Address,
    pub chain_id: u64,
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_permit_lifetime() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

pub async fn load(path: &Path) -> Result<Config> {
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: Config =
        toml::from_str(&data).with_context(|| format!("parsing config file {}", path.display()))?;
    tracing::debug!(path = %path.display(), protocol = %config.protocol, "loaded configuration");
    Ok(config)
}
