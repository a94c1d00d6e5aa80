//! The pool a user is configuring: which protocol deploys it, its type, its
//! tokens and its type specific parameters.

use {
    crate::domain::eth,
    serde::{Deserialize, Serialize},
    std::ops::RangeInclusive,
};

/// The flow a pool is created through. Each protocol keeps its own persisted
/// wizard state.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Protocol {
    /// A CoW AMM: a weighted BPool that is filled with `bind` and opened with
    /// `finalize`.
    CowAmm,
    /// A Balancer V3 pool created by a factory and seeded by the router.
    #[default]
    BalancerV3,
}

impl Protocol {
    /// The key the wizard state of this protocol is persisted under.
    pub fn namespace(&self) -> String {
        self.to_string()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
pub enum PoolType {
    Weighted,
    Stable,
    StableSurge,
    GyroEclp,
    ReClamm,
}

impl PoolType {
    /// The number of tokens a pool of this type can hold.
    pub fn token_limits(&self, protocol: Protocol) -> RangeInclusive<usize> {
        match (protocol, self) {
            (Protocol::CowAmm, _) => 2..=2,
            (Protocol::BalancerV3, PoolType::Weighted) => 2..=8,
            (Protocol::BalancerV3, PoolType::Stable | PoolType::StableSurge) => 2..=5,
            (Protocol::BalancerV3, PoolType::GyroEclp | PoolType::ReClamm) => 2..=2,
        }
    }

    pub fn requires_weights(&self) -> bool {
        matches!(self, PoolType::Weighted)
    }
}

/// A token as the user entered it. Amounts are kept as typed and only turned
/// into raw units when a transaction is built.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenConfig {
    pub address: eth::Address,
    pub amount: String,
    pub decimals: u8,
    #[serde(default)]
    pub weight: Option<u8>,
    #[serde(default)]
    pub rate_provider: Option<eth::Address>,
    /// Seed the pool with the ERC-4626 vault share of this token instead of
    /// the token itself.
    #[serde(default)]
    pub use_yield_bearing_variant: bool,
    #[serde(default)]
    pub yield_bearing_vault: Option<eth::Address>,
}

impl TokenConfig {
    /// The token that actually ends up in the pool.
    pub fn pool_token(&self) -> eth::Address {
        match (self.use_yield_bearing_variant, self.yield_bearing_vault) {
            (true, Some(vault)) => vault,
            _ => self.address,
        }
    }
}

/// Settings shared by every pool type.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonParameters {
    pub name: String,
    pub symbol: String,
    /// Static swap fee in percent, e.g. `"0.3"`.
    pub swap_fee: String,
    #[serde(default)]
    pub swap_fee_manager: Option<eth::Address>,
    #[serde(default)]
    pub pause_manager: Option<eth::Address>,
    #[serde(default)]
    pub pool_hooks: Option<eth::Address>,
    #[serde(default)]
    pub disable_unbalanced_liquidity: bool,
    #[serde(default)]
    pub enable_donation: bool,
}

/// Elliptic concentrated liquidity curve inputs, all decimal strings.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EclpInputs {
    pub alpha: String,
    pub beta: String,
    pub c: String,
    pub s: String,
    pub lambda: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReClammInputs {
    pub initial_min_price: String,
    pub initial_max_price: String,
    pub initial_target_price: String,
    /// Daily price shift exponent in percent.
    pub price_shift_daily_rate: String,
    /// Centeredness margin in percent.
    pub centeredness_margin: String,
    #[serde(default)]
    pub token_a_price_includes_rate: bool,
    #[serde(default)]
    pub token_b_price_includes_rate: bool,
}

/// Type specific pool parameters. Each variant carries exactly the fields its
/// factory needs.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PoolParameters {
    Weighted,
    #[serde(rename_all = "camelCase")]
    Stable { amplification_parameter: u32 },
    #[serde(rename_all = "camelCase")]
    StableSurge {
        amplification_parameter: u32,
        /// Percent.
        max_surge_fee: String,
        /// Percent.
        surge_threshold: String,
    },
    GyroEclp(EclpInputs),
    ReClamm(ReClammInputs),
}

impl PoolParameters {
    pub fn pool_type(&self) -> PoolType {
        match self {
            PoolParameters::Weighted => PoolType::Weighted,
            PoolParameters::Stable { .. } => PoolType::Stable,
            PoolParameters::StableSurge { .. } => PoolType::StableSurge,
            PoolParameters::GyroEclp(_) => PoolType::GyroEclp,
            PoolParameters::ReClamm(_) => PoolType::ReClamm,
        }
    }
}

/// Everything the user chose for the pool.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    pub tokens: Vec<TokenConfig>,
    pub common: CommonParameters,
    pub parameters: PoolParameters,
}

impl PoolConfig {
    pub fn pool_type(&self) -> PoolType {
        self.parameters.pool_type()
    }
}
