//! Validation of a pool configuration before anything is sent to the network.
//!
//! Parsing a [`PoolConfig`] yields a [`ValidatedPool`] holding raw integer
//! amounts and fixed point parameters, so transaction construction never has
//! to deal with user input again.

use {
    crate::domain::{
        eclp,
        eth,
        number::{self, ParseNumberError},
        pool::{PoolConfig, PoolParameters, PoolType, Protocol, ReClammInputs},
    },
    bigdecimal::BigDecimal,
    num::Zero as _,
    std::collections::HashSet,
};

/// The largest number of decimals a token may have.
pub const MAX_TOKEN_DECIMALS: u8 = 18;
/// Smallest raw balance a BPool accepts in `bind`.
pub const BPOOL_MIN_BALANCE: u64 = 1_000_000;
/// The amplification parameter range of Balancer V3 stable pools.
pub const AMPLIFICATION_RANGE: std::ops::RangeInclusive<u32> = 1..=50_000;
/// Largest centeredness margin of a ReClamm pool, in percent.
const MAX_CENTEREDNESS_MARGIN: u8 = 90;

#[derive(Clone, Debug, thiserror::Error, Eq, PartialEq)]
pub enum InvalidConfiguration {
    #[error("{pool_type} pools need between {min} and {max} tokens, got {actual}")]
    TokenCount {
        pool_type: PoolType,
        min: usize,
        max: usize,
        actual: usize,
    },
    #[error("{pool_type} pools cannot be created through {protocol}")]
    UnsupportedPoolType {
        protocol: Protocol,
        pool_type: PoolType,
    },
    #[error("token {index} has the zero address")]
    ZeroAddress { index: usize },
    #[error("token {0} appears more than once")]
    DuplicateToken(eth::Address),
    #[error("token {index} has {decimals} decimals, at most 18 are supported")]
    UnsupportedDecimals { index: usize, decimals: u8 },
    #[error("invalid amount for token {index}: {source}")]
    Amount {
        index: usize,
        source: ParseNumberError,
    },
    #[error("amount of token {index} is below the protocol minimum of {minimum} raw units")]
    AmountBelowMinimum { index: usize, minimum: eth::U256 },
    #[error("token {index} has no weight")]
    MissingWeight { index: usize },
    #[error("weight of token {index} is below {min}%")]
    WeightTooSmall { index: usize, min: u8 },
    #[error("token weights sum to {0}%, not 100%")]
    WeightSum(u32),
    #[error("invalid swap fee: {0}")]
    SwapFee(ParseNumberError),
    #[error("swap fee {fee}% is outside of [{min}%, {max}%]")]
    SwapFeeOutOfRange {
        fee: BigDecimal,
        min: BigDecimal,
        max: BigDecimal,
    },
    #[error("amplification parameter {0} is outside of [1, 50000]")]
    Amplification(u32),
    #[error("invalid {name}: {source}")]
    Parameter {
        name: &'static str,
        source: ParseNumberError,
    },
    #[error("{name} must be between 0% and {max}%")]
    PercentOutOfRange { name: &'static str, max: u8 },
    #[error("ReClamm prices must satisfy 0 < min < target < max")]
    ReClammPrices,
    #[error(transparent)]
    Eclp(#[from] eclp::InvalidEclpParams),
    #[error("token {index} uses its yield bearing variant but has no vault")]
    MissingVault { index: usize },
    #[error("pool name and symbol must not be empty")]
    MissingName,
}

/// A token ready to be used in transactions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidatedToken {
    /// The token the user holds.
    pub underlying: eth::Address,
    /// The ERC-4626 vault the underlying is wrapped into before seeding.
    pub vault: Option<eth::Address>,
    /// Raw amount of [`Self::pool_token`] the pool is seeded with.
    pub amount: eth::U256,
    /// Weight as an 18-decimal fraction.
    pub weight: Option<eth::U256>,
    pub rate_provider: Option<eth::Address>,
}

impl ValidatedToken {
    pub fn pool_token(&self) -> eth::Address {
        self.vault.unwrap_or(self.underlying)
    }

    pub fn seed(&self) -> eth::TokenAmount {
        eth::TokenAmount::new(self.pool_token(), self.amount)
    }
}

/// Type specific parameters in contract units.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ValidatedParameters {
    Weighted,
    Stable {
        amplification: eth::U256,
    },
    StableSurge {
        amplification: eth::U256,
        max_surge_fee: eth::U256,
        surge_threshold: eth::U256,
    },
    GyroEclp(eclp::FixedPointParams),
    ReClamm {
        min_price: eth::U256,
        max_price: eth::U256,
        target_price: eth::U256,
        daily_price_shift: eth::U256,
        centeredness_margin: eth::U256,
        token_a_price_includes_rate: bool,
        token_b_price_includes_rate: bool,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidatedPool {
    pub protocol: Protocol,
    pub name: String,
    pub symbol: String,
    pub tokens: Vec<ValidatedToken>,
    /// 18-decimal fraction.
    pub swap_fee: eth::U256,
    pub swap_fee_manager: Option<eth::Address>,
    pub pause_manager: Option<eth::Address>,
    pub pool_hooks: Option<eth::Address>,
    pub disable_unbalanced_liquidity: bool,
    pub enable_donation: bool,
    pub parameters: ValidatedParameters,
}

impl ValidatedPool {
    pub fn pool_type(&self) -> PoolType {
        match self.parameters {
            ValidatedParameters::Weighted => PoolType::Weighted,
            ValidatedParameters::Stable { .. } => PoolType::Stable,
            ValidatedParameters::StableSurge { .. } => PoolType::StableSurge,
            ValidatedParameters::GyroEclp(_) => PoolType::GyroEclp,
            ValidatedParameters::ReClamm { .. } => PoolType::ReClamm,
        }
    }
}

/// Swap fee bounds in percent for pools of the given protocol.
pub fn swap_fee_bounds(protocol: Protocol) -> (BigDecimal, BigDecimal) {
    let percent = |value: &str| number::parse_decimal(value).unwrap_or_default();
    match protocol {
        Protocol::BalancerV3 => (percent("0.0001"), percent("10")),
        Protocol::CowAmm => (percent("0.0001"), percent("99.99")),
    }
}

/// Checks a configuration and converts it into contract units. The first
/// violated rule is reported.
pub fn validate(
    protocol: Protocol,
    config: &PoolConfig,
) -> Result<ValidatedPool, InvalidConfiguration> {
    let pool_type = config.pool_type();
    if protocol == Protocol::CowAmm && pool_type != PoolType::Weighted {
        return Err(InvalidConfiguration::UnsupportedPoolType {
            protocol,
            pool_type,
        });
    }
    if config.common.name.trim().is_empty() || config.common.symbol.trim().is_empty() {
        return Err(InvalidConfiguration::MissingName);
    }

    let limits = pool_type.token_limits(protocol);
    if !limits.contains(&config.tokens.len()) {
        return Err(InvalidConfiguration::TokenCount {
            pool_type,
            min: *limits.start(),
            max: *limits.end(),
            actual: config.tokens.len(),
        });
    }

    let mut seen = HashSet::new();
    let mut tokens = Vec::with_capacity(config.tokens.len());
    for (index, token) in config.tokens.iter().enumerate() {
        if token.address.is_zero() {
            return Err(InvalidConfiguration::ZeroAddress { index });
        }
        let vault = match (token.use_yield_bearing_variant, token.yield_bearing_vault) {
            (false, _) => None,
            (true, None) => return Err(InvalidConfiguration::MissingVault { index }),
            (true, Some(vault)) if vault.is_zero() => {
                return Err(InvalidConfiguration::MissingVault { index });
            }
            (true, Some(vault)) => Some(vault),
        };
        if !seen.insert(token.pool_token()) {
            return Err(InvalidConfiguration::DuplicateToken(token.pool_token()));
        }
        if token.decimals > MAX_TOKEN_DECIMALS {
            return Err(InvalidConfiguration::UnsupportedDecimals {
                index,
                decimals: token.decimals,
            });
        }
        let amount = number::parse_units(&token.amount, token.decimals)
            .map_err(|source| InvalidConfiguration::Amount { index, source })?;
        let minimum = match protocol {
            Protocol::CowAmm => eth::U256::from(BPOOL_MIN_BALANCE),
            Protocol::BalancerV3 => eth::U256::from(1),
        };
        if amount < minimum {
            return Err(InvalidConfiguration::AmountBelowMinimum { index, minimum });
        }
        tokens.push(ValidatedToken {
            underlying: token.address,
            vault,
            amount,
            weight: None,
            rate_provider: token.rate_provider,
        });
    }

    if pool_type.requires_weights() {
        let weights = validate_weights(protocol, config)?;
        for (token, weight) in tokens.iter_mut().zip(weights) {
            token.weight = Some(weight);
        }
    }

    let swap_fee = validate_swap_fee(protocol, &config.common.swap_fee)?;
    let parameters = validate_parameters(&config.parameters)?;

    Ok(ValidatedPool {
        protocol,
        name: config.common.name.clone(),
        symbol: config.common.symbol.clone(),
        tokens,
        swap_fee,
        swap_fee_manager: config.common.swap_fee_manager,
        pause_manager: config.common.pause_manager,
        pool_hooks: config.common.pool_hooks,
        disable_unbalanced_liquidity: config.common.disable_unbalanced_liquidity,
        enable_donation: config.common.enable_donation,
        parameters,
    })
}

fn validate_weights(
    protocol: Protocol,
    config: &PoolConfig,
) -> Result<Vec<eth::U256>, InvalidConfiguration> {
    // A BPool denormalizes weights to at most 50e18 in total with a minimum of
    // 1e18 per token, so every token needs at least 2%.
    let min = match protocol {
        Protocol::CowAmm => 2,
        Protocol::BalancerV3 => 1,
    };
    let mut sum = 0_u32;
    let mut weights = Vec::with_capacity(config.tokens.len());
    for (index, token) in config.tokens.iter().enumerate() {
        let weight = token
            .weight
            .ok_or(InvalidConfiguration::MissingWeight { index })?;
        if weight < min {
            return Err(InvalidConfiguration::WeightTooSmall { index, min });
        }
        sum += u32::from(weight);
        weights.push(eth::U256::from(weight) * eth::U256::from(10_u64.pow(16)));
    }
    if sum != 100 {
        return Err(InvalidConfiguration::WeightSum(sum));
    }
    Ok(weights)
}

fn validate_swap_fee(protocol: Protocol, fee: &str) -> Result<eth::U256, InvalidConfiguration> {
    let fee = number::parse_decimal(fee).map_err(InvalidConfiguration::SwapFee)?;
    let (min, max) = swap_fee_bounds(protocol);
    if fee < min || fee > max {
        return Err(InvalidConfiguration::SwapFeeOutOfRange { fee, min, max });
    }
    number::percent_to_fixed(&fee).map_err(InvalidConfiguration::SwapFee)
}

fn validate_parameters(
    parameters: &PoolParameters,
) -> Result<ValidatedParameters, InvalidConfiguration> {
    Ok(match parameters {
        PoolParameters::Weighted => ValidatedParameters::Weighted,
        PoolParameters::Stable {
            amplification_parameter,
        } => ValidatedParameters::Stable {
            amplification: validate_amplification(*amplification_parameter)?,
        },
        PoolParameters::StableSurge {
            amplification_parameter,
            max_surge_fee,
            surge_threshold,
        } => ValidatedParameters::StableSurge {
            amplification: validate_amplification(*amplification_parameter)?,
            max_surge_fee: percentage("max surge fee", max_surge_fee, 100)?,
            surge_threshold: percentage("surge threshold", surge_threshold, 100)?,
        },
        PoolParameters::GyroEclp(inputs) => {
            ValidatedParameters::GyroEclp(eclp::Params::parse(inputs)?.to_fixed_point()?)
        }
        PoolParameters::ReClamm(inputs) => validate_reclamm(inputs)?,
    })
}

fn validate_amplification(value: u32) -> Result<eth::U256, InvalidConfiguration> {
    if !AMPLIFICATION_RANGE.contains(&value) {
        return Err(InvalidConfiguration::Amplification(value));
    }
    Ok(eth::U256::from(value))
}

fn validate_reclamm(inputs: &ReClammInputs) -> Result<ValidatedParameters, InvalidConfiguration> {
    let price = |name: &'static str, value: &str| {
        number::parse_decimal(value).map_err(|source| InvalidConfiguration::Parameter { name, source })
    };
    let min = price("initial min price", &inputs.initial_min_price)?;
    let max = price("initial max price", &inputs.initial_max_price)?;
    let target = price("initial target price", &inputs.initial_target_price)?;
    if min <= BigDecimal::zero() || min >= target || target >= max {
        return Err(InvalidConfiguration::ReClammPrices);
    }
    let fixed = |name: &'static str, value: &BigDecimal| {
        number::to_fixed_18(value).map_err(|source| InvalidConfiguration::Parameter { name, source })
    };
    Ok(ValidatedParameters::ReClamm {
        min_price: fixed("initial min price", &min)?,
        max_price: fixed("initial max price", &max)?,
        target_price: fixed("initial target price", &target)?,
        daily_price_shift: percentage(
            "daily price shift exponent",
            &inputs.price_shift_daily_rate,
            100,
        )?,
        centeredness_margin: percentage(
            "centeredness margin",
            &inputs.centeredness_margin,
            MAX_CENTEREDNESS_MARGIN,
        )?,
        token_a_price_includes_rate: inputs.token_a_price_includes_rate,
        token_b_price_includes_rate: inputs.token_b_price_includes_rate,
    })
}

/// Parses a percentage in `[0, max]` into an 18-decimal fraction.
fn percentage(name: &'static str, value: &str, max: u8) -> Result<eth::U256, InvalidConfiguration> {
    let parsed = number::parse_decimal(value)
        .map_err(|source| InvalidConfiguration::Parameter { name, source })?;
    if parsed > BigDecimal::from(max) {
        return Err(InvalidConfiguration::PercentOutOfRange { name, max });
    }
    number::percent_to_fixed(&parsed).map_err(|source| InvalidConfiguration::Parameter { name, source })
}

#[cfg(test)]
pub(crate) mod tests {
    use {
        super::*,
        crate::domain::pool::{CommonParameters, EclpInputs, TokenConfig},
    };

    pub fn token(byte: u8, amount: &str, weight: Option<u8>) -> TokenConfig {
        TokenConfig {
            address: eth::Address::repeat_byte(byte),
            amount: amount.to_owned(),
            decimals: 18,
            weight,
            rate_provider: None,
            use_yield_bearing_variant: false,
            yield_bearing_vault: None,
        }
    }

    pub fn weighted(weights: &[u8]) -> PoolConfig {
        PoolConfig {
            tokens: weights
                .iter()
                .enumerate()
                .map(|(i, weight)| token(i as u8 + 1, "10", Some(*weight)))
                .collect(),
            common: CommonParameters {
                name: "Test Pool".to_owned(),
                symbol: "TP".to_owned(),
                swap_fee: "0.3".to_owned(),
                ..Default::default()
            },
            parameters: PoolParameters::Weighted,
        }
    }

    #[test]
    fn weighted_pool_converts_to_contract_units() {
        let pool = validate(Protocol::CowAmm, &weighted(&[60, 40])).unwrap();
        assert_eq!(pool.pool_type(), PoolType::Weighted);
        assert_eq!(pool.swap_fee, eth::U256::from(3_000_000_000_000_000_u64));
        assert_eq!(
            pool.tokens[0].weight,
            Some(eth::U256::from(600_000_000_000_000_000_u64))
        );
        assert_eq!(
            pool.tokens[1].amount,
            eth::U256::from(10_000_000_000_000_000_000_u128)
        );
    }

    #[test]
    fn weights_must_sum_to_100() {
        assert_eq!(
            validate(Protocol::CowAmm, &weighted(&[60, 39])),
            Err(InvalidConfiguration::WeightSum(99))
        );
        assert_eq!(
            validate(Protocol::BalancerV3, &weighted(&[50, 50, 1])),
            Err(InvalidConfiguration::WeightSum(101))
        );
    }

    #[test]
    fn weights_are_required_and_bounded() {
        let mut config = weighted(&[60, 40]);
        config.tokens[1].weight = None;
        assert_eq!(
            validate(Protocol::BalancerV3, &config),
            Err(InvalidConfiguration::MissingWeight { index: 1 })
        );
        assert_eq!(
            validate(Protocol::CowAmm, &weighted(&[99, 1])),
            Err(InvalidConfiguration::WeightTooSmall { index: 1, min: 2 })
        );
        assert!(validate(Protocol::BalancerV3, &weighted(&[99, 1])).is_ok());
    }

    #[test]
    fn token_count_depends_on_pool_type() {
        assert_eq!(
            validate(Protocol::CowAmm, &weighted(&[40, 30, 30])),
            Err(InvalidConfiguration::TokenCount {
                pool_type: PoolType::Weighted,
                min: 2,
                max: 2,
                actual: 3,
            })
        );
        assert!(validate(Protocol::BalancerV3, &weighted(&[40, 30, 30])).is_ok());
        assert!(matches!(
            validate(Protocol::BalancerV3, &weighted(&[100])),
            Err(InvalidConfiguration::TokenCount { actual: 1, .. })
        ));
    }

    #[test]
    fn rejects_bad_tokens() {
        let mut config = weighted(&[50, 50]);
        config.tokens[1].address = config.tokens[0].address;
        assert_eq!(
            validate(Protocol::BalancerV3, &config),
            Err(InvalidConfiguration::DuplicateToken(
                eth::Address::repeat_byte(1)
            ))
        );

        let mut config = weighted(&[50, 50]);
        config.tokens[0].address = eth::Address::ZERO;
        assert_eq!(
            validate(Protocol::BalancerV3, &config),
            Err(InvalidConfiguration::ZeroAddress { index: 0 })
        );

        let mut config = weighted(&[50, 50]);
        config.tokens[1].decimals = 19;
        assert!(matches!(
            validate(Protocol::BalancerV3, &config),
            Err(InvalidConfiguration::UnsupportedDecimals { index: 1, .. })
        ));

        let mut config = weighted(&[50, 50]);
        config.tokens[0].use_yield_bearing_variant = true;
        assert_eq!(
            validate(Protocol::BalancerV3, &config),
            Err(InvalidConfiguration::MissingVault { index: 0 })
        );
    }

    #[test]
    fn rejects_bad_amounts() {
        let mut config = weighted(&[50, 50]);
        config.tokens[0].amount = "0".to_owned();
        assert!(matches!(
            validate(Protocol::BalancerV3, &config),
            Err(InvalidConfiguration::AmountBelowMinimum { index: 0, .. })
        ));

        // 1e-13 with 18 decimals is 1e5 raw units, below the BPool minimum.
        let mut config = weighted(&[50, 50]);
        config.tokens[1].amount = "0.0000000000001".to_owned();
        assert!(matches!(
            validate(Protocol::CowAmm, &config),
            Err(InvalidConfiguration::AmountBelowMinimum { index: 1, .. })
        ));
        assert!(validate(Protocol::BalancerV3, &config).is_ok());

        let mut config = weighted(&[50, 50]);
        config.tokens[0].decimals = 6;
        config.tokens[0].amount = "1.0000001".to_owned();
        assert!(matches!(
            validate(Protocol::BalancerV3, &config),
            Err(InvalidConfiguration::Amount {
                index: 0,
                source: ParseNumberError::TooPrecise { .. }
            })
        ));
    }

    #[test]
    fn swap_fee_bounds_depend_on_protocol() {
        let mut config = weighted(&[50, 50]);
        config.common.swap_fee = "50".to_owned();
        assert!(matches!(
            validate(Protocol::BalancerV3, &config),
            Err(InvalidConfiguration::SwapFeeOutOfRange { .. })
        ));
        assert!(validate(Protocol::CowAmm, &config).is_ok());

        config.common.swap_fee = "0".to_owned();
        assert!(matches!(
            validate(Protocol::CowAmm, &config),
            Err(InvalidConfiguration::SwapFeeOutOfRange { .. })
        ));
    }

    #[test]
    fn cow_amm_only_creates_weighted_pools() {
        let mut config = weighted(&[50, 50]);
        config.parameters = PoolParameters::Stable {
            amplification_parameter: 100,
        };
        assert_eq!(
            validate(Protocol::CowAmm, &config),
            Err(InvalidConfiguration::UnsupportedPoolType {
                protocol: Protocol::CowAmm,
                pool_type: PoolType::Stable,
            })
        );
    }

    #[test]
    fn validates_type_specific_parameters() {
        let mut config = weighted(&[50, 50]);
        for token in &mut config.tokens {
            token.weight = None;
        }

        config.parameters = PoolParameters::Stable {
            amplification_parameter: 0,
        };
        assert_eq!(
            validate(Protocol::BalancerV3, &config),
            Err(InvalidConfiguration::Amplification(0))
        );

        config.parameters = PoolParameters::StableSurge {
            amplification_parameter: 200,
            max_surge_fee: "101".to_owned(),
            surge_threshold: "30".to_owned(),
        };
        assert_eq!(
            validate(Protocol::BalancerV3, &config),
            Err(InvalidConfiguration::PercentOutOfRange {
                name: "max surge fee",
                max: 100
            })
        );

        config.parameters = PoolParameters::GyroEclp(EclpInputs {
            alpha: "2".to_owned(),
            beta: "1".to_owned(),
            c: "1".to_owned(),
            s: "0".to_owned(),
            lambda: "1".to_owned(),
        });
        assert_eq!(
            validate(Protocol::BalancerV3, &config),
            Err(InvalidConfiguration::Eclp(
                eclp::InvalidEclpParams::PriceBounds
            ))
        );

        config.parameters = PoolParameters::ReClamm(ReClammInputs {
            initial_min_price: "1".to_owned(),
            initial_max_price: "3".to_owned(),
            initial_target_price: "4".to_owned(),
            price_shift_daily_rate: "100".to_owned(),
            centeredness_margin: "50".to_owned(),
            token_a_price_includes_rate: false,
            token_b_price_includes_rate: false,
        });
        assert_eq!(
            validate(Protocol::BalancerV3, &config),
            Err(InvalidConfiguration::ReClammPrices)
        );
    }

    #[test]
    fn yield_bearing_tokens_are_seeded_with_the_vault() {
        let mut config = weighted(&[50, 50]);
        config.tokens[0].use_yield_bearing_variant = true;
        config.tokens[0].yield_bearing_vault = Some(eth::Address::repeat_byte(9));
        let pool = validate(Protocol::BalancerV3, &config).unwrap();
        assert_eq!(pool.tokens[0].pool_token(), eth::Address::repeat_byte(9));
        assert_eq!(pool.tokens[0].underlying, eth::Address::repeat_byte(1));
    }
}
