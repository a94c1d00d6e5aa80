//! Derives the active step from the wizard state and what is currently on
//! chain.
//!
//! The stored step index is never trusted: every call re-derives it from the
//! transaction records and the live on-chain state. A step counts as done if
//! its transaction succeeded or if its effect is already visible on chain, so
//! work done in an earlier session (or outside of this tool) is never
//! repeated. The active step is the first one in plan order that is not done.

use {
    crate::domain::{
        eth,
        pool::Protocol,
        record::{StepFailure, TxIdentifier},
        step::StepKind,
        validation::{self, InvalidConfiguration, ValidatedParameters, ValidatedPool},
        wizard::WizardState,
    },
};

/// Per token values read from chain. Indices match the configured tokens.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TokenSnapshot {
    /// Allowance of the pool token for whoever pulls it into the pool.
    pub allowance: eth::U256,
    /// Permit2 allowance of the router. Zero once expired.
    pub router_allowance: eth::U256,
    /// Allowance of the underlying token for its ERC-4626 vault.
    pub underlying_allowance: eth::U256,
    /// Underlying needed to mint the seed amount of vault shares.
    pub mint_cost: eth::U256,
    /// Wallet balance of the pool token.
    pub balance: eth::U256,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SurgeSnapshot {
    pub max_surge_fee: eth::U256,
    pub surge_threshold: eth::U256,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PoolSnapshot {
    /// Tokens currently bound to a CoW AMM or registered with the vault.
    pub bound: Vec<eth::Address>,
    /// 18-decimal fraction.
    pub swap_fee: eth::U256,
    /// A CoW AMM was finalized or a Balancer V3 pool initialized.
    pub finalized: bool,
    pub surge: Option<SurgeSnapshot>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OnChainSnapshot {
    /// `None` until a pool was deployed.
    pub pool: Option<PoolSnapshot>,
    pub tokens: Vec<TokenSnapshot>,
}

/// An on-chain read failed; the step index is held until the next successful
/// read.
#[derive(Clone, Debug, thiserror::Error, Eq, PartialEq)]
#[error("on-chain read failed: {0}")]
pub struct ReadError(pub String);

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Action {
    /// No pool was configured yet.
    Unconfigured,
    /// The stored configuration is not valid.
    Invalid(InvalidConfiguration),
    Ready(StepKind),
    InFlight(StepKind, TxIdentifier),
    /// The last attempt failed; the step may be retried.
    Failed(StepKind, StepFailure),
    /// A relay transaction never resolved; resubmit or reset.
    Stalled(StepKind, TxIdentifier),
    /// On-chain state could not be read, nothing is enabled until it can.
    Held(ReadError),
    Complete,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Sequenced {
    /// 1-based index of the active step, `plan.len() + 1` when complete.
    pub index: usize,
    pub action: Action,
    /// Every step of the plan and whether it is done. Empty when the read
    /// failed.
    pub steps: Vec<(StepKind, bool)>,
    /// Steps of the active group that may be submitted right now, including
    /// the active step itself when it is ready.
    pub concurrent: Vec<StepKind>,
}

impl Sequenced {
    /// The index to persist, unless the read failed and the stored one is
    /// kept.
    pub fn advance_to(&self) -> Option<usize> {
        (!matches!(self.action, Action::Held(_))).then_some(self.index)
    }
}

pub fn sequence(state: &WizardState, snapshot: Result<&OnChainSnapshot, &ReadError>) -> Sequenced {
    let held = |action| Sequenced {
        index: state.current_step,
        action,
        steps: Vec::new(),
        concurrent: Vec::new(),
    };
    let Some(config) = state.config.as_ref() else {
        return held(Action::Unconfigured);
    };
    let pool = match validation::validate(state.protocol, config) {
        Ok(pool) => pool,
        Err(err) => return held(Action::Invalid(err)),
    };
    let snapshot = match snapshot {
        Ok(snapshot) => snapshot,
        Err(err) => return held(Action::Held(err.clone())),
    };

    let steps = state
        .plan()
        .into_iter()
        .map(|step| {
            let done = state.succeeded(step) || is_satisfied(step, state, &pool, snapshot);
            (step, done)
        })
        .collect::<Vec<_>>();

    let Some(position) = steps.iter().position(|(_, done)| !done) else {
        return Sequenced {
            index: steps.len() + 1,
            action: Action::Complete,
            steps,
            concurrent: Vec::new(),
        };
    };

    let active = steps[position].0;
    let concurrent = steps[position..]
        .iter()
        .take_while(|(step, _)| step.group() == active.group())
        .filter(|(step, done)| {
            !done
                && matches!(
                    step_action(state, *step),
                    Action::Ready(_) | Action::Failed(..)
                )
        })
        .map(|(step, _)| *step)
        .collect();

    Sequenced {
        index: position + 1,
        action: step_action(state, active),
        steps,
        concurrent,
    }
}

fn step_action(state: &WizardState, step: StepKind) -> Action {
    let Some(record) = state.record(step) else {
        return Action::Ready(step);
    };
    match (record.submitted, &record.failure) {
        (Some(id), _) if record.is_stalled() => Action::Stalled(step, id),
        // Not knowing the outcome of a handed off transaction is no reason to
        // send it again. The reconciler watches it on the next run.
        (Some(id), None | Some(StepFailure::Error(_))) if !record.succeeded => {
            Action::InFlight(step, id)
        }
        (_, Some(failure)) => Action::Failed(step, failure.clone()),
        _ => Action::Ready(step),
    }
}

/// Whether the effect of a step is already visible on chain.
fn is_satisfied(
    step: StepKind,
    state: &WizardState,
    pool: &ValidatedPool,
    snapshot: &OnChainSnapshot,
) -> bool {
    let deployed = snapshot.pool.as_ref();
    let finalized = deployed.is_some_and(|pool| pool.finalized);
    let token = |index: usize| {
        pool.tokens
            .get(index)
            .zip(snapshot.tokens.get(index))
    };
    let bound = |index: usize| {
        let address = pool.tokens.get(index).map(|token| token.pool_token());
        deployed.is_some_and(|deployed| {
            address.is_some_and(|address| deployed.bound.contains(&address))
        })
    };

    match step {
        StepKind::Deploy => state.deployed_pool.is_some(),
        // Binding and initializing pull the tokens and use up balances and
        // allowances, so every earlier step counts as done afterwards.
        StepKind::ApproveUnderlying { token: index } => {
            finalized
                || token(index).is_some_and(|(token, read)| {
                    read.balance >= token.amount
                        || (!read.mint_cost.is_zero()
                            && read.underlying_allowance >= read.mint_cost)
                })
        }
        StepKind::SwapToYieldVariant { token: index } => {
            finalized || token(index).is_some_and(|(token, read)| read.balance >= token.amount)
        }
        StepKind::Approve { token: index } => {
            let consumed = match state.protocol {
                Protocol::CowAmm => bound(index),
                Protocol::BalancerV3 => finalized,
            };
            consumed || token(index).is_some_and(|(token, read)| read.allowance >= token.amount)
        }
        StepKind::PermitRouter { token: index } => {
            finalized
                || token(index).is_some_and(|(token, read)| read.router_allowance >= token.amount)
        }
        StepKind::Bind { token: index } => bound(index),
        // A finalized pool can no longer change its fee.
        StepKind::SetSwapFee => {
            finalized || deployed.is_some_and(|deployed| deployed.swap_fee == pool.swap_fee)
        }
        StepKind::Finalize | StepKind::Initialize => finalized,
        StepKind::SetMaxSurgeFee => match pool.parameters {
            ValidatedParameters::StableSurge { max_surge_fee, .. } => deployed
                .and_then(|deployed| deployed.surge.as_ref())
                .is_some_and(|surge| surge.max_surge_fee == max_surge_fee),
            _ => true,
        },
        StepKind::SetSurgeThreshold => match pool.parameters {
            ValidatedParameters::StableSurge {
                surge_threshold, ..
            } => deployed
                .and_then(|deployed| deployed.surge.as_ref())
                .is_some_and(|surge| surge.surge_threshold == surge_threshold),
            _ => true,
        },
    }
}
