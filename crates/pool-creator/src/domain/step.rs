//! The transactions that create a pool, in the order they have to happen.

use {
    crate::domain::pool::{PoolConfig, PoolType, Protocol},
    std::{fmt, str::FromStr},
};

/// One blockchain mutating step of the flow. Token indices refer to the
/// position of the token in the configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum StepKind {
    Deploy,
    /// Approve the ERC-4626 vault to pull the underlying token.
    ApproveUnderlying { token: usize },
    /// Mint vault shares for a token seeded with its yield bearing variant.
    SwapToYieldVariant { token: usize },
    /// Approve the token for whoever pulls it into the pool: the pool itself
    /// for CoW AMMs, Permit2 for Balancer V3.
    Approve { token: usize },
    /// Grant the router a Permit2 allowance.
    PermitRouter { token: usize },
    Bind { token: usize },
    SetSwapFee,
    Finalize,
    Initialize,
    SetMaxSurgeFee,
    SetSurgeThreshold,
}

/// Steps of one group may be submitted concurrently since they do not depend
/// on each other.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StepGroup {
    Deploy,
    ApproveUnderlying,
    SwapToYieldVariant,
    Approve,
    PermitRouter,
    Bind,
    SetSwapFee,
    Finalize,
    Initialize,
    SetMaxSurgeFee,
    SetSurgeThreshold,
}

impl StepKind {
    pub fn group(&self) -> StepGroup {
        match self {
            StepKind::Deploy => StepGroup::Deploy,
            StepKind::ApproveUnderlying { .. } => StepGroup::ApproveUnderlying,
            StepKind::SwapToYieldVariant { .. } => StepGroup::SwapToYieldVariant,
            StepKind::Approve { .. } => StepGroup::Approve,
            StepKind::PermitRouter { .. } => StepGroup::PermitRouter,
            StepKind::Bind { .. } => StepGroup::Bind,
            StepKind::SetSwapFee => StepGroup::SetSwapFee,
            StepKind::Finalize => StepGroup::Finalize,
            StepKind::Initialize => StepGroup::Initialize,
            StepKind::SetMaxSurgeFee => StepGroup::SetMaxSurgeFee,
            StepKind::SetSurgeThreshold => StepGroup::SetSurgeThreshold,
        }
    }

    pub fn token(&self) -> Option<usize> {
        match self {
            StepKind::ApproveUnderlying { token }
            | StepKind::SwapToYieldVariant { token }
            | StepKind::Approve { token }
            | StepKind::PermitRouter { token }
            | StepKind::Bind { token } => Some(*token),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            StepKind::Deploy => "deploy",
            StepKind::ApproveUnderlying { .. } => "approveUnderlying",
            StepKind::SwapToYieldVariant { .. } => "swapToYieldVariant",
            StepKind::Approve { .. } => "approve",
            StepKind::PermitRouter { .. } => "permitRouter",
            StepKind::Bind { .. } => "bind",
            StepKind::SetSwapFee => "setFee",
            StepKind::Finalize => "finalize",
            StepKind::Initialize => "initialize",
            StepKind::SetMaxSurgeFee => "setMaxSurgeFee",
            StepKind::SetSurgeThreshold => "setSurgeThreshold",
        }
    }
}

/// Formats as the key the step's record is persisted under, e.g. `deploy` or
/// `approve[1]`.
impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.token() {
            Some(token) => write!(f, "{}[{token}]", self.name()),
            None => f.write_str(self.name()),
        }
    }
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[error("unknown step {0:?}")]
pub struct UnknownStep(String);

impl FromStr for StepKind {
    type Err = UnknownStep;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownStep(s.to_owned());
        let (name, token) = match s.split_once('[') {
            Some((name, rest)) => {
                let index = rest.strip_suffix(']').ok_or_else(unknown)?;
                (name, Some(index.parse::<usize>().map_err(|_| unknown())?))
            }
            None => (s, None),
        };
        let step = match (name, token) {
            ("deploy", None) => StepKind::Deploy,
            ("approveUnderlying", Some(token)) => StepKind::ApproveUnderlying { token },
            ("swapToYieldVariant", Some(token)) => StepKind::SwapToYieldVariant { token },
            ("approve", Some(token)) => StepKind::Approve { token },
            ("permitRouter", Some(token)) => StepKind::PermitRouter { token },
            ("bind", Some(token)) => StepKind::Bind { token },
            ("setFee", None) => StepKind::SetSwapFee,
            ("finalize", None) => StepKind::Finalize,
            ("initialize", None) => StepKind::Initialize,
            ("setMaxSurgeFee", None) => StepKind::SetMaxSurgeFee,
            ("setSurgeThreshold", None) => StepKind::SetSurgeThreshold,
            _ => return Err(unknown()),
        };
        Ok(step)
    }
}

/// The ordered steps that create the configured pool. Without a
/// configuration there is nothing to do.
pub fn plan(protocol: Protocol, config: Option<&PoolConfig>) -> Vec<StepKind> {
    let Some(config) = config else {
        return Vec::new();
    };
    let tokens = 0..config.tokens.len();
    let mut steps = vec![StepKind::Deploy];
    match protocol {
        Protocol::CowAmm => {
            steps.extend(tokens.clone().map(|token| StepKind::Approve { token }));
            steps.extend(tokens.map(|token| StepKind::Bind { token }));
            steps.extend([StepKind::SetSwapFee, StepKind::Finalize]);
        }
        Protocol::BalancerV3 => {
            let wrapped = config
                .tokens
                .iter()
                .enumerate()
                .filter(|(_, token)| token.use_yield_bearing_variant)
                .map(|(index, _)| index)
                .collect::<Vec<_>>();
            steps.extend(
                wrapped
                    .iter()
                    .map(|&token| StepKind::ApproveUnderlying { token }),
            );
            steps.extend(
                wrapped
                    .iter()
                    .map(|&token| StepKind::SwapToYieldVariant { token }),
            );
            steps.extend(tokens.clone().map(|token| StepKind::Approve { token }));
            steps.extend(tokens.map(|token| StepKind::PermitRouter { token }));
            steps.push(StepKind::Initialize);
            if config.pool_type() == PoolType::StableSurge {
                steps.extend([StepKind::SetMaxSurgeFee, StepKind::SetSurgeThreshold]);
            }
        }
    }
    steps
}
