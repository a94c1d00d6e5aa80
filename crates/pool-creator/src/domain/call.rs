//! Contract calls of every step, built from a validated pool.
//!
//! Calls are plain data; encoding them for a specific chain client is up to
//! the infrastructure.

use {
    crate::domain::{
        eclp,
        eth,
        pool::Protocol,
        sequencer::OnChainSnapshot,
        step::StepKind,
        validation::{ValidatedParameters, ValidatedPool, ValidatedToken},
        wizard::WizardState,
    },
    itertools::Itertools as _,
    serde::Deserialize,
};

/// BPools denormalize weights so that they sum up to 50.
const BPOOL_TOTAL_WEIGHT: u64 = 50;

/// Addresses of the contracts the flows interact with. Only the ones needed
/// by the configured protocol and pool type have to be known.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Contracts {
    pub cow_amm_factory: Option<eth::Address>,
    pub balancer_vault: Option<eth::Address>,
    pub balancer_router: Option<eth::Address>,
    pub permit2: Option<eth::Address>,
    pub weighted_pool_factory: Option<eth::Address>,
    pub stable_pool_factory: Option<eth::Address>,
    pub stable_surge_pool_factory: Option<eth::Address>,
    pub gyro_eclp_pool_factory: Option<eth::Address>,
    pub reclamm_pool_factory: Option<eth::Address>,
    pub stable_surge_hook: Option<eth::Address>,
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum CallError {
    #[error("no {0} address is configured")]
    MissingContract(&'static str),
    #[error("no pool was deployed yet")]
    NotDeployed,
    #[error("no deployment salt was chosen")]
    MissingSalt,
    #[error("step {0} does not refer to a configured token")]
    UnknownToken(StepKind),
    #[error("step {0} is not needed by a {1} pool")]
    NotApplicable(StepKind, Protocol),
    #[error("the mint cost of token {0} is unknown")]
    UnknownMintCost(usize),
}

/// Values that are not part of the pool configuration.
#[derive(Clone, Debug)]
pub struct Context<'a> {
    pub wallet: eth::Address,
    pub contracts: &'a Contracts,
    /// Unix timestamp until which Permit2 allowances are granted.
    pub permit_expiration: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PoolToken {
    pub token: eth::Address,
    pub rate_provider: Option<eth::Address>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PoolKind {
    /// Normalized weights as 18-decimal fractions summing to one.
    Weighted { weights: Vec<eth::U256> },
    Stable { amplification: eth::U256 },
    StableSurge { amplification: eth::U256 },
    GyroEclp(eclp::FixedPointParams),
    ReClamm {
        min_price: eth::U256,
        max_price: eth::U256,
        target_price: eth::U256,
        token_a_price_includes_rate: bool,
        token_b_price_includes_rate: bool,
        daily_price_shift: eth::U256,
        centeredness_margin: eth::U256,
    },
}

/// Arguments of a Balancer V3 factory `create`. Tokens are sorted by address
/// as the vault requires.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreatePool {
    pub name: String,
    pub symbol: String,
    pub tokens: Vec<PoolToken>,
    pub pause_manager: eth::Address,
    pub swap_fee_manager: eth::Address,
    pub swap_fee: eth::U256,
    pub pool_hooks: eth::Address,
    pub enable_donation: bool,
    pub disable_unbalanced_liquidity: bool,
    pub salt: eth::B256,
    pub kind: PoolKind,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    Approve {
        token: eth::Address,
        spender: eth::Address,
        amount: eth::U256,
    },
    Permit2Approve {
        permit2: eth::Address,
        token: eth::Address,
        spender: eth::Address,
        amount: eth::U256,
        expiration: u64,
    },
    MintShares {
        vault: eth::Address,
        shares: eth::U256,
        receiver: eth::Address,
    },
    CreateCowAmm {
        factory: eth::Address,
        name: String,
        symbol: String,
    },
    Bind {
        pool: eth::Address,
        token: eth::Address,
        balance: eth::U256,
        denorm: eth::U256,
    },
    SetSwapFee {
        pool: eth::Address,
        fee: eth::U256,
    },
    Finalize {
        pool: eth::Address,
    },
    CreatePool {
        factory: eth::Address,
        pool: Box<CreatePool>,
    },
    Initialize {
        router: eth::Address,
        pool: eth::Address,
        tokens: Vec<eth::Address>,
        amounts: Vec<eth::U256>,
    },
    SetMaxSurgeFee {
        hook: eth::Address,
        pool: eth::Address,
        fee: eth::U256,
    },
    SetSurgeThreshold {
        hook: eth::Address,
        pool: eth::Address,
        threshold: eth::U256,
    },
}

impl Call {
    /// Whether the transaction creates a pool whose address has to be taken
    /// from the receipt.
    pub fn creates_pool(&self) -> bool {
        matches!(self, Call::CreateCowAmm { .. } | Call::CreatePool { .. })
    }
}

/// Builds the transaction of `step`.
pub fn build(
    step: StepKind,
    state: &WizardState,
    pool: &ValidatedPool,
    snapshot: &OnChainSnapshot,
    ctx: &Context,
) -> Result<Call, CallError> {
    let contract = |address: Option<eth::Address>, name| address.ok_or(CallError::MissingContract(name));
    let deployed = || state.deployed_pool.ok_or(CallError::NotDeployed);
    let token = |index: usize| pool.tokens.get(index).ok_or(CallError::UnknownToken(step));
    let not_applicable = || CallError::NotApplicable(step, state.protocol);

    let call = match (state.protocol, step) {
        (Protocol::CowAmm, StepKind::Deploy) => Call::CreateCowAmm {
            factory: contract(ctx.contracts.cow_amm_factory, "CoW AMM factory")?,
            name: pool.name.clone(),
            symbol: pool.symbol.clone(),
        },
        (Protocol::BalancerV3, StepKind::Deploy) => Call::CreatePool {
            factory: factory(pool, ctx.contracts)?,
            pool: Box::new(create_pool(pool, state.salt.ok_or(CallError::MissingSalt)?)),
        },
        (Protocol::BalancerV3, StepKind::ApproveUnderlying { token: index }) => {
            let token = token(index)?;
            let vault = token.vault.ok_or_else(not_applicable)?;
            let cost = snapshot
                .tokens
                .get(index)
                .map(|read| read.mint_cost)
                .filter(|cost| !cost.is_zero())
                .ok_or(CallError::UnknownMintCost(index))?;
            Call::Approve {
                token: token.underlying,
                spender: vault,
                amount: cost,
            }
        }
        (Protocol::BalancerV3, StepKind::SwapToYieldVariant { token: index }) => {
            let token = token(index)?;
            Call::MintShares {
                vault: token.vault.ok_or_else(not_applicable)?,
                shares: token.amount,
                receiver: ctx.wallet,
            }
        }
        (protocol, StepKind::Approve { token: index }) => {
            let token = token(index)?;
            let spender = match protocol {
                Protocol::CowAmm => deployed()?,
                Protocol::BalancerV3 => contract(ctx.contracts.permit2, "Permit2")?,
            };
            Call::Approve {
                token: token.pool_token(),
                spender,
                amount: token.amount,
            }
        }
        (Protocol::BalancerV3, StepKind::PermitRouter { token: index }) => {
            let token = token(index)?;
            Call::Permit2Approve {
                permit2: contract(ctx.contracts.permit2, "Permit2")?,
                token: token.pool_token(),
                spender: contract(ctx.contracts.balancer_router, "Balancer router")?,
                amount: token.amount,
                expiration: ctx.permit_expiration,
            }
        }
        (Protocol::CowAmm, StepKind::Bind { token: index }) => {
            let token = token(index)?;
            Call::Bind {
                pool: deployed()?,
                token: token.pool_token(),
                balance: token.amount,
                denorm: token.weight.ok_or_else(not_applicable)?
                    * eth::U256::from(BPOOL_TOTAL_WEIGHT),
            }
        }
        (Protocol::CowAmm, StepKind::SetSwapFee) => Call::SetSwapFee {
            pool: deployed()?,
            fee: pool.swap_fee,
        },
        (Protocol::CowAmm, StepKind::Finalize) => Call::Finalize { pool: deployed()? },
        (Protocol::BalancerV3, StepKind::Initialize) => {
            let (tokens, amounts): (Vec<_>, Vec<_>) = sorted(&pool.tokens)
                .map(|token| (token.pool_token(), token.amount))
                .unzip();
            Call::Initialize {
                router: contract(ctx.contracts.balancer_router, "Balancer router")?,
                pool: deployed()?,
                tokens,
                amounts,
            }
        }
        (Protocol::BalancerV3, StepKind::SetMaxSurgeFee) => match pool.parameters {
            ValidatedParameters::StableSurge { max_surge_fee, .. } => Call::SetMaxSurgeFee {
                hook: contract(ctx.contracts.stable_surge_hook, "StableSurge hook")?,
                pool: deployed()?,
                fee: max_surge_fee,
            },
            _ => return Err(not_applicable()),
        },
        (Protocol::BalancerV3, StepKind::SetSurgeThreshold) => match pool.parameters {
            ValidatedParameters::StableSurge {
                surge_threshold, ..
            } => Call::SetSurgeThreshold {
                hook: contract(ctx.contracts.stable_surge_hook, "StableSurge hook")?,
                pool: deployed()?,
                threshold: surge_threshold,
            },
            _ => return Err(not_applicable()),
        },
        _ => return Err(not_applicable()),
    };
    Ok(call)
}

fn factory(pool: &ValidatedPool, contracts: &Contracts) -> Result<eth::Address, CallError> {
    let (address, name) = match pool.parameters {
        ValidatedParameters::Weighted => (contracts.weighted_pool_factory, "weighted pool factory"),
        ValidatedParameters::Stable { .. } => (contracts.stable_pool_factory, "stable pool factory"),
        ValidatedParameters::StableSurge { .. } => (
            contracts.stable_surge_pool_factory,
            "StableSurge pool factory",
        ),
        ValidatedParameters::GyroEclp(_) => {
            (contracts.gyro_eclp_pool_factory, "Gyro E-CLP pool factory")
        }
        ValidatedParameters::ReClamm { .. } => {
            (contracts.reclamm_pool_factory, "ReClamm pool factory")
        }
    };
    address.ok_or(CallError::MissingContract(name))
}

fn sorted(tokens: &[ValidatedToken]) -> impl Iterator<Item = &ValidatedToken> {
    tokens.iter().sorted_by_key(|token| token.pool_token())
}

fn create_pool(pool: &ValidatedPool, salt: eth::B256) -> CreatePool {
    let tokens = sorted(&pool.tokens).collect::<Vec<_>>();
    let kind = match &pool.parameters {
        ValidatedParameters::Weighted => PoolKind::Weighted {
            weights: tokens
                .iter()
                .map(|token| token.weight.unwrap_or_default())
                .collect(),
        },
        ValidatedParameters::Stable { amplification } => PoolKind::Stable {
            amplification: *amplification,
        },
        ValidatedParameters::StableSurge { amplification, .. } => PoolKind::StableSurge {
            amplification: *amplification,
        },
        ValidatedParameters::GyroEclp(params) => PoolKind::GyroEclp(params.clone()),
        ValidatedParameters::ReClamm {
            min_price,
            max_price,
            target_price,
            daily_price_shift,
            centeredness_margin,
            token_a_price_includes_rate,
            token_b_price_includes_rate,
        } => PoolKind::ReClamm {
            min_price: *min_price,
            max_price: *max_price,
            target_price: *target_price,
            token_a_price_includes_rate: *token_a_price_includes_rate,
            token_b_price_includes_rate: *token_b_price_includes_rate,
            daily_price_shift: *daily_price_shift,
            centeredness_margin: *centeredness_margin,
        },
    };
    CreatePool {
        name: pool.name.clone(),
        symbol: pool.symbol.clone(),
        tokens: tokens
            .iter()
            .map(|token| PoolToken {
                token: token.pool_token(),
                rate_provider: token.rate_provider,
            })
            .collect(),
        pause_manager: pool.pause_manager.unwrap_or_default(),
        swap_fee_manager: pool.swap_fee_manager.unwrap_or_default(),
        swap_fee: pool.swap_fee,
        pool_hooks: pool.pool_hooks.unwrap_or_default(),
        enable_donation: pool.enable_donation,
        disable_unbalanced_liquidity: pool.disable_unbalanced_liquidity,
        salt,
        kind,
    }
}

/// What has to be read from chain to sequence the steps of a pool.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Reads {
    pub protocol: Protocol,
    pub wallet: eth::Address,
    pub pool: Option<eth::Address>,
    pub balancer_vault: Option<eth::Address>,
    pub permit2: Option<eth::Address>,
    pub router: Option<eth::Address>,
    /// Set for StableSurge pools.
    pub surge_hook: Option<eth::Address>,
    pub tokens: Vec<TokenReads>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TokenReads {
    pub token: eth::Address,
    pub amount: eth::U256,
    /// Whoever pulls the token into the pool. Unknown for CoW AMMs until the
    /// pool is deployed.
    pub spender: Option<eth::Address>,
    /// Underlying token and the vault it is wrapped into.
    pub wrap: Option<(eth::Address, eth::Address)>,
}

pub fn reads(state: &WizardState, pool: &ValidatedPool, ctx: &Context) -> Reads {
    let spender = match state.protocol {
        Protocol::CowAmm => state.deployed_pool,
        Protocol::BalancerV3 => ctx.contracts.permit2,
    };
    Reads {
        protocol: state.protocol,
        wallet: ctx.wallet,
        pool: state.deployed_pool,
        balancer_vault: ctx.contracts.balancer_vault,
        permit2: ctx.contracts.permit2,
        router: ctx.contracts.balancer_router,
        surge_hook: matches!(pool.parameters, ValidatedParameters::StableSurge { .. })
            .then_some(ctx.contracts.stable_surge_hook)
            .flatten(),
        tokens: pool
            .tokens
            .iter()
            .map(|token| TokenReads {
                token: token.pool_token(),
                amount: token.amount,
                spender,
                wrap: token.vault.map(|vault| (token.underlying, vault)),
            })
            .collect(),
    }
}
