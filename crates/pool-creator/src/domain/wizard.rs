//! The persisted state of one pool creation attempt and the reducer that is
//! the only way to change it.

use {
    crate::domain::{
        eth,
        pool::{PoolConfig, Protocol},
        record::{StepFailure, TransactionRecord, TxIdentifier},
        step::{self, StepKind},
    },
    serde::{Deserialize, Serialize},
    serde_with::{DisplayFromStr, serde_as},
    std::collections::BTreeMap,
};

#[serde_as]
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WizardState {
    pub protocol: Protocol,
    /// 1-based index into the plan. `plan.len() + 1` means the flow is
    /// complete.
    pub current_step: usize,
    #[serde(default)]
    pub config: Option<PoolConfig>,
    /// Salt of the deterministic pool deployment, chosen when the pool is
    /// configured.
    #[serde(default)]
    pub salt: Option<eth::B256>,
    #[serde(default)]
    pub deployed_pool: Option<eth::Address>,
    #[serde_as(as = "BTreeMap<DisplayFromStr, _>")]
    #[serde(default)]
    pub records: BTreeMap<StepKind, TransactionRecord>,
    /// The last failed on-chain read, shown until the next successful one.
    #[serde(skip)]
    pub read_error: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Configure { config: PoolConfig, salt: eth::B256 },
    Submitted { step: StepKind, id: TxIdentifier },
    Confirmed {
        step: StepKind,
        hash: eth::TxHash,
        /// The address of the pool created by a deploy transaction.
        created_pool: Option<eth::Address>,
    },
    Failed { step: StepKind, failure: StepFailure },
    Stalled { step: StepKind },
    Advanced { index: usize },
    Reset,
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum InvalidTransition {
    #[error("the pool can no longer be reconfigured once its deployment was submitted")]
    ConfigurationLocked,
    #[error("step {0} is not part of this flow")]
    UnknownStep(StepKind),
    #[error("step {0} already succeeded")]
    AlreadySucceeded(StepKind),
    #[error("the deploy receipt did not contain a pool address")]
    MissingPoolAddress,
}

impl WizardState {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            current_step: 1,
            config: None,
            salt: None,
            deployed_pool: None,
            records: Default::default(),
            read_error: None,
        }
    }

    pub fn plan(&self) -> Vec<StepKind> {
        step::plan(self.protocol, self.config.as_ref())
    }

    /// The index of the terminal "flow complete" state.
    pub fn terminal_index(&self) -> usize {
        self.plan().len() + 1
    }

    pub fn is_complete(&self) -> bool {
        self.config.is_some() && self.current_step == self.terminal_index()
    }

    pub fn record(&self, step: StepKind) -> Option<&TransactionRecord> {
        self.records.get(&step)
    }

    pub fn succeeded(&self, step: StepKind) -> bool {
        self.record(step).is_some_and(|record| record.succeeded)
    }

    /// Records with a handed off transaction whose outcome was never
    /// observed.
    pub fn unresolved(&self) -> impl Iterator<Item = (StepKind, TxIdentifier)> + '_ {
        self.records.iter().filter_map(|(step, record)| {
            (!record.succeeded)
                .then_some(record.submitted)
                .flatten()
                .map(|id| (*step, id))
        })
    }

    /// Configuration edits are only allowed until the deployment was handed
    /// off; every later step depends on the deployed pool.
    pub fn is_locked(&self) -> bool {
        self.deployed_pool.is_some()
            || self
                .record(StepKind::Deploy)
                .is_some_and(|record| record.submitted.is_some() || record.succeeded)
    }

    pub fn apply(&mut self, event: Event) -> Result<(), InvalidTransition> {
        match event {
            Event::Configure { config, salt } => {
                if self.is_locked() {
                    return Err(InvalidTransition::ConfigurationLocked);
                }
                self.config = Some(config);
                self.salt = Some(salt);
                self.records.clear();
                self.current_step = 1;
            }
            Event::Submitted { step, id } => {
                let record = self.record_mut(step)?;
                if record.succeeded {
                    return Err(InvalidTransition::AlreadySucceeded(step));
                }
                record.submitted = Some(id);
                record.confirmed = None;
                record.stalled = false;
                record.failure = None;
            }
            Event::Confirmed {
                step,
                hash,
                created_pool,
            } => {
                self.ensure_planned(step)?;
                if step == StepKind::Deploy && self.deployed_pool.is_none() {
                    self.deployed_pool =
                        Some(created_pool.ok_or(InvalidTransition::MissingPoolAddress)?);
                }
                let record = self.record_mut(step)?;
                if !record.succeeded {
                    record.confirmed = Some(hash);
                    record.succeeded = true;
                    record.stalled = false;
                    record.failure = None;
                }
            }
            Event::Failed { step, failure } => {
                let record = self.record_mut(step)?;
                if record.succeeded {
                    return Ok(());
                }
                // A rejected or reverted transaction is gone, retrying it is a
                // first attempt.
                if matches!(
                    failure,
                    StepFailure::Rejected | StepFailure::Reverted { .. }
                ) {
                    record.submitted = None;
                    record.confirmed = None;
                    record.stalled = false;
                }
                record.failure = Some(failure);
            }
            Event::Stalled { step } => {
                let record = self.record_mut(step)?;
                if !record.succeeded {
                    record.stalled = true;
                    record.failure = Some(StepFailure::Stalled);
                }
            }
            Event::Advanced { index } => {
                self.current_step = index.clamp(1, self.terminal_index());
            }
            Event::Reset => *self = Self::new(self.protocol),
        }
        Ok(())
    }

    fn ensure_planned(&self, step: StepKind) -> Result<(), InvalidTransition> {
        if !self.plan().contains(&step) {
            return Err(InvalidTransition::UnknownStep(step));
        }
        Ok(())
    }

    fn record_mut(&mut self, step: StepKind) -> Result<&mut TransactionRecord, InvalidTransition> {
        self.ensure_planned(step)?;
        Ok(self.records.entry(step).or_default())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use {super::*, crate::domain::validation::tests::weighted, maplit::btreemap};

    pub fn configured(protocol: Protocol, weights: &[u8]) -> WizardState {
        let mut state = WizardState::new(protocol);
        state
            .apply(Event::Configure {
                config: weighted(weights),
                salt: eth::B256::repeat_byte(0x5a),
            })
            .unwrap();
        state
    }

    fn hash(byte: u8) -> eth::TxHash {
        eth::TxHash::repeat_byte(byte)
    }

    #[test]
    fn deploy_confirmation_sets_the_pool_once() {
        let mut state = configured(Protocol::CowAmm, &[60, 40]);
        state
            .apply(Event::Submitted {
                step: StepKind::Deploy,
                id: TxIdentifier::Chain(hash(1)),
            })
            .unwrap();
        state
            .apply(Event::Confirmed {
                step: StepKind::Deploy,
                hash: hash(1),
                created_pool: Some(eth::Address::repeat_byte(0xaa)),
            })
            .unwrap();
        state
            .apply(Event::Confirmed {
                step: StepKind::Deploy,
                hash: hash(2),
                created_pool: Some(eth::Address::repeat_byte(0xbb)),
            })
            .unwrap();

        assert_eq!(state.deployed_pool, Some(eth::Address::repeat_byte(0xaa)));
        let record = state.record(StepKind::Deploy).unwrap();
        assert!(record.succeeded);
        assert_eq!(record.confirmed, Some(hash(1)));
    }

    #[test]
    fn deploy_confirmation_needs_a_pool_address() {
        let mut state = configured(Protocol::CowAmm, &[60, 40]);
        assert_eq!(
            state.apply(Event::Confirmed {
                step: StepKind::Deploy,
                hash: hash(1),
                created_pool: None,
            }),
            Err(InvalidTransition::MissingPoolAddress)
        );
        assert!(!state.succeeded(StepKind::Deploy));
    }

    #[test]
    fn configuration_is_locked_after_deploy_submission() {
        let mut state = configured(Protocol::CowAmm, &[60, 40]);
        state
            .apply(Event::Configure {
                config: weighted(&[50, 50]),
                salt: eth::B256::ZERO,
            })
            .unwrap();
        state
            .apply(Event::Submitted {
                step: StepKind::Deploy,
                id: TxIdentifier::Chain(hash(1)),
            })
            .unwrap();
        assert_eq!(
            state.apply(Event::Configure {
                config: weighted(&[60, 40]),
                salt: eth::B256::ZERO,
            }),
            Err(InvalidTransition::ConfigurationLocked)
        );

        // A rejected deploy unlocks the configuration again.
        state
            .apply(Event::Failed {
                step: StepKind::Deploy,
                failure: StepFailure::Rejected,
            })
            .unwrap();
        assert!(!state.is_locked());
    }

    #[test]
    fn reverted_steps_are_retried_from_scratch() {
        let mut state = configured(Protocol::CowAmm, &[60, 40]);
        let step = StepKind::Approve { token: 1 };
        state
            .apply(Event::Submitted {
                step,
                id: TxIdentifier::Chain(hash(3)),
            })
            .unwrap();
        state
            .apply(Event::Failed {
                step,
                failure: StepFailure::Reverted {
                    reason: Some("BAL#401".to_owned()),
                },
            })
            .unwrap();
        let record = state.record(step).unwrap();
        assert_eq!(record.submitted, None);
        assert!(!record.succeeded);
        assert!(record.failure.is_some());

        state
            .apply(Event::Submitted {
                step,
                id: TxIdentifier::Chain(hash(4)),
            })
            .unwrap();
        assert!(state.record(step).unwrap().is_pending());
    }

    #[test]
    fn succeeded_records_never_regress() {
        let mut state = configured(Protocol::CowAmm, &[60, 40]);
        let step = StepKind::SetSwapFee;
        state
            .apply(Event::Confirmed {
                step,
                hash: hash(5),
                created_pool: None,
            })
            .unwrap();
        state
            .apply(Event::Failed {
                step,
                failure: StepFailure::Error("timeout".to_owned()),
            })
            .unwrap();
        state.apply(Event::Stalled { step }).unwrap();
        assert_eq!(
            state.apply(Event::Submitted {
                step,
                id: TxIdentifier::Chain(hash(6)),
            }),
            Err(InvalidTransition::AlreadySucceeded(step))
        );
        let record = state.record(step).unwrap();
        assert!(record.succeeded);
        assert_eq!(record.failure, None);
    }

    #[test]
    fn stalled_relay_transactions_keep_their_identifier() {
        let mut state = configured(Protocol::BalancerV3, &[50, 50]);
        let id = TxIdentifier::Relay(eth::B256::repeat_byte(7));
        state
            .apply(Event::Submitted {
                step: StepKind::Deploy,
                id,
            })
            .unwrap();
        state
            .apply(Event::Stalled {
                step: StepKind::Deploy,
            })
            .unwrap();
        let record = state.record(StepKind::Deploy).unwrap();
        assert_eq!(record.submitted, Some(id));
        assert!(record.is_stalled());
        assert!(record.stalled);

        // Resubmitting starts over.
        let retry = TxIdentifier::Relay(eth::B256::repeat_byte(8));
        state
            .apply(Event::Submitted {
                step: StepKind::Deploy,
                id: retry,
            })
            .unwrap();
        let record = state.record(StepKind::Deploy).unwrap();
        assert_eq!(record.submitted, Some(retry));
        assert!(!record.is_stalled());
    }

    #[test]
    fn rejects_steps_outside_the_plan() {
        let mut state = configured(Protocol::BalancerV3, &[50, 50]);
        assert_eq!(
            state.apply(Event::Stalled {
                step: StepKind::Bind { token: 0 }
            }),
            Err(InvalidTransition::UnknownStep(StepKind::Bind { token: 0 }))
        );
    }

    #[test]
    fn advancing_is_clamped_to_the_terminal_state() {
        let mut state = configured(Protocol::CowAmm, &[60, 40]);
        state.apply(Event::Advanced { index: 42 }).unwrap();
        assert_eq!(state.current_step, 8);
        assert!(state.is_complete());
        state.apply(Event::Advanced { index: 0 }).unwrap();
        assert_eq!(state.current_step, 1);
    }

    #[test]
    fn reset_wipes_everything() {
        let mut state = configured(Protocol::CowAmm, &[60, 40]);
        state
            .apply(Event::Confirmed {
                step: StepKind::Deploy,
                hash: hash(1),
                created_pool: Some(eth::Address::repeat_byte(0xaa)),
            })
            .unwrap();
        state.apply(Event::Reset).unwrap();
        assert_eq!(state, WizardState::new(Protocol::CowAmm));
    }

    #[test]
    fn reload_restores_everything_but_transient_fields() {
        let mut state = configured(Protocol::CowAmm, &[60, 40]);
        state
            .apply(Event::Confirmed {
                step: StepKind::Deploy,
                hash: hash(1),
                created_pool: Some(eth::Address::repeat_byte(0xaa)),
            })
            .unwrap();
        state
            .apply(Event::Submitted {
                step: StepKind::Approve { token: 0 },
                id: TxIdentifier::Chain(hash(2)),
            })
            .unwrap();
        state
            .apply(Event::Failed {
                step: StepKind::Approve { token: 1 },
                failure: StepFailure::Rejected,
            })
            .unwrap();
        state.read_error = Some("rpc down".to_owned());

        let json = serde_json::to_string(&state).unwrap();
        let restored: WizardState = serde_json::from_str(&json).unwrap();

        let mut expected = state.clone();
        expected.read_error = None;
        for record in expected.records.values_mut() {
            record.failure = None;
        }
        assert_eq!(restored, expected);
        assert!(json.contains("\"approve[0]\""));
    }

    #[test]
    fn unresolved_skips_succeeded_and_unsent_records() {
        let mut state = configured(Protocol::CowAmm, &[60, 40]);
        state.records = btreemap! {
            StepKind::Deploy => TransactionRecord {
                submitted: Some(TxIdentifier::Chain(hash(1))),
                confirmed: Some(hash(1)),
                succeeded: true,
                ..Default::default()
            },
            StepKind::Approve { token: 0 } => TransactionRecord {
                submitted: Some(TxIdentifier::Chain(hash(2))),
                ..Default::default()
            },
            StepKind::Approve { token: 1 } => TransactionRecord::default(),
        };
        assert_eq!(
            state.unresolved().collect::<Vec<_>>(),
            vec![(StepKind::Approve { token: 0 }, TxIdentifier::Chain(hash(2)))]
        );
    }
}
