//! Resumes transactions that were handed off in an earlier run but whose
//! outcome was never observed.

use {
    super::{
        observe,
        submitter::{SubmitError, Submitter},
    },
    crate::domain::{Event, StepFailure, StepKind, TxIdentifier, WizardState, eth},
    dashmap::DashSet,
    std::sync::Arc,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    Confirmed(eth::TxHash),
    Failed(StepFailure),
    /// The relay never produced a chain transaction. The identifier is kept
    /// so a later run can look again.
    Stalled,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Confirmed(hash) => write!(f, "confirmed in {hash}"),
            Outcome::Failed(failure) => write!(f, "{failure}"),
            Outcome::Stalled => f.write_str("relay transaction stalled"),
        }
    }
}

#[derive(Clone)]
pub struct Reconciler {
    submitter: Submitter,
    watching: Arc<DashSet<TxIdentifier>>,
}

impl Reconciler {
    pub fn new(submitter: Submitter) -> Self {
        Self {
            submitter,
            watching: Default::default(),
        }
    }

    /// Waits for every unresolved record of `state` and applies the outcome.
    /// Identifiers another call is already waiting for are skipped and
    /// succeeded records are never looked at again. Relay transactions that
    /// stalled before are looked up once instead of waited for.
    pub async fn reconcile(&self, state: &mut WizardState) -> Vec<(StepKind, Outcome)> {
        let watches = state
            .unresolved()
            .filter_map(|(step, id)| {
                let guard = Watch::start(&self.watching, id)?;
                let stalled = state.record(step).is_some_and(|record| record.stalled);
                observe::resuming(step, id);
                Some(async move {
                    // A stalled transaction already had its full time.
                    let result = if stalled {
                        self.submitter.recheck(step, id).await
                    } else {
                        self.submitter.confirm(step, id).await
                    };
                    drop(guard);
                    (step, result)
                })
            })
            .collect::<Vec<_>>();

        let mut outcomes = Vec::with_capacity(watches.len());
        for (step, result) in futures::future::join_all(watches).await {
            let (event, outcome) = match result {
                Ok(confirmation) => (
                    Event::Confirmed {
                        step,
                        hash: confirmation.hash,
                        created_pool: confirmation.created_pool,
                    },
                    Outcome::Confirmed(confirmation.hash),
                ),
                Err(SubmitError::StalledRelayTransaction { .. }) => {
                    (Event::Stalled { step }, Outcome::Stalled)
                }
                Err(err) => {
                    let failure = err.failure();
                    (
                        Event::Failed {
                            step,
                            failure: failure.clone(),
                        },
                        Outcome::Failed(failure),
                    )
                }
            };
            match state.apply(event) {
                Ok(()) => outcomes.push((step, outcome)),
                Err(err) => {
                    tracing::error!(?err, %step, "could not apply transaction outcome");
                    let failure = StepFailure::Error(err.to_string());
                    // The step is part of the plan, so recording a failure on
                    // it cannot be rejected.
                    let _ = state.apply(Event::Failed {
                        step,
                        failure: failure.clone(),
                    });
                    outcomes.push((step, Outcome::Failed(failure)));
                }
            }
        }
        outcomes
    }
}

/// Membership of an identifier in the watch set for as long as it lives.
struct Watch<'a> {
    set: &'a DashSet<TxIdentifier>,
    id: TxIdentifier,
}

impl<'a> Watch<'a> {
    fn start(set: &'a DashSet<TxIdentifier>, id: TxIdentifier) -> Option<Self> {
        set.insert(id).then_some(Self { set, id })
    }
}

impl Drop for Watch<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            domain::{
                Protocol,
                sequencer::{self, OnChainSnapshot, PoolSnapshot, TokenSnapshot},
                wizard::tests::configured,
            },
            infra::{
                blockchain::{MockBlockchain, Receipt},
                relay::{MockRelay, Relay},
                submitter,
            },
        },
        std::time::Duration,
    };

    const POOL: eth::Address = eth::Address::new([0xaa; 20]);

    fn reconciler(chain: MockBlockchain, relay: Option<MockRelay>) -> Reconciler {
        Reconciler::new(Submitter::new(
            Arc::new(chain),
            relay.map(|relay| Arc::new(relay) as Arc<dyn Relay>),
            submitter::Config {
                relay_poll_interval: Duration::from_secs(5),
                relay_timeout: Duration::from_secs(60),
            },
        ))
    }

    fn submitted(protocol: Protocol, step: StepKind, id: TxIdentifier) -> WizardState {
        let mut state = configured(protocol, &[60, 40]);
        state.apply(Event::Submitted { step, id }).unwrap();
        state
    }

    fn deploy_receipt() -> MockBlockchain {
        let mut chain = MockBlockchain::new();
        chain.expect_receipt().times(1).returning(|hash| {
            Ok(Receipt {
                hash,
                success: true,
                created_pool: Some(POOL),
            })
        });
        chain
    }

    #[tokio::test]
    async fn pending_deploy_is_confirmed_after_reload() {
        let hash = eth::TxHash::repeat_byte(1);
        let persisted = serde_json::to_string(&submitted(
            Protocol::CowAmm,
            StepKind::Deploy,
            TxIdentifier::Chain(hash),
        ))
        .unwrap();
        let mut state: WizardState = serde_json::from_str(&persisted).unwrap();

        let outcomes = reconciler(deploy_receipt(), None)
            .reconcile(&mut state)
            .await;

        assert_eq!(outcomes, vec![(StepKind::Deploy, Outcome::Confirmed(hash))]);
        assert_eq!(state.deployed_pool, Some(POOL));
        assert!(state.succeeded(StepKind::Deploy));

        let snapshot = OnChainSnapshot {
            pool: Some(PoolSnapshot::default()),
            tokens: vec![TokenSnapshot::default(); 2],
        };
        assert_eq!(sequencer::sequence(&state, Ok(&snapshot)).index, 2);
    }

    #[tokio::test]
    async fn reconciling_twice_waits_once() {
        let hash = eth::TxHash::repeat_byte(1);
        let mut state = submitted(Protocol::CowAmm, StepKind::Deploy, TxIdentifier::Chain(hash));
        let reconciler = reconciler(deploy_receipt(), None);

        reconciler.reconcile(&mut state).await;
        let once = state.clone();
        let outcomes = reconciler.reconcile(&mut state).await;

        assert!(outcomes.is_empty());
        assert_eq!(state, once);
    }

    #[tokio::test]
    async fn identifiers_being_watched_are_skipped() {
        let id = TxIdentifier::Chain(eth::TxHash::repeat_byte(1));
        let mut state = submitted(Protocol::CowAmm, StepKind::Deploy, id);
        let mut chain = MockBlockchain::new();
        chain.expect_receipt().never();
        let reconciler = reconciler(chain, None);

        let _watch = Watch::start(&reconciler.watching, id).unwrap();
        let outcomes = reconciler.reconcile(&mut state).await;

        assert!(outcomes.is_empty());
        assert!(state.record(StepKind::Deploy).unwrap().is_pending());
    }

    #[test]
    fn watches_end_when_dropped() {
        let set = DashSet::new();
        let id = TxIdentifier::Relay(eth::B256::repeat_byte(2));
        let watch = Watch::start(&set, id).unwrap();
        assert!(Watch::start(&set, id).is_none());
        drop(watch);
        assert!(Watch::start(&set, id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_relay_transactions_are_reported() {
        let id = eth::B256::repeat_byte(2);
        let mut state = submitted(Protocol::CowAmm, StepKind::Deploy, TxIdentifier::Relay(id));
        let mut relay = MockRelay::new();
        relay.expect_resolve().returning(|_| Ok(None));
        let mut chain = MockBlockchain::new();
        chain.expect_receipt().never();

        let outcomes = reconciler(chain, Some(relay)).reconcile(&mut state).await;

        assert_eq!(outcomes, vec![(StepKind::Deploy, Outcome::Stalled)]);
        let record = state.record(StepKind::Deploy).unwrap();
        assert!(record.is_stalled());
        assert_eq!(record.submitted, Some(TxIdentifier::Relay(id)));
        assert!(state.deployed_pool.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn known_stalls_are_reported_without_waiting() {
        let id = eth::B256::repeat_byte(2);
        let mut state = submitted(Protocol::CowAmm, StepKind::Deploy, TxIdentifier::Relay(id));
        state.apply(Event::Stalled { step: StepKind::Deploy }).unwrap();
        let mut state: WizardState =
            serde_json::from_str(&serde_json::to_string(&state).unwrap()).unwrap();
        let mut relay = MockRelay::new();
        relay.expect_resolve().times(1).returning(|_| Ok(None));

        let start = tokio::time::Instant::now();
        let outcomes = reconciler(MockBlockchain::new(), Some(relay))
            .reconcile(&mut state)
            .await;

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(outcomes, vec![(StepKind::Deploy, Outcome::Stalled)]);
        assert!(state.record(StepKind::Deploy).unwrap().is_stalled());
    }

    #[tokio::test(start_paused = true)]
    async fn known_stalls_still_confirm_once_executed() {
        let id = eth::B256::repeat_byte(2);
        let hash = eth::TxHash::repeat_byte(3);
        let mut state = submitted(Protocol::CowAmm, StepKind::Deploy, TxIdentifier::Relay(id));
        state.apply(Event::Stalled { step: StepKind::Deploy }).unwrap();
        let mut relay = MockRelay::new();
        relay
            .expect_resolve()
            .times(1)
            .returning(move |_| Ok(Some(hash)));

        let outcomes = reconciler(deploy_receipt(), Some(relay))
            .reconcile(&mut state)
            .await;

        assert_eq!(outcomes, vec![(StepKind::Deploy, Outcome::Confirmed(hash))]);
        assert_eq!(state.deployed_pool, Some(POOL));
        assert!(!state.record(StepKind::Deploy).unwrap().is_stalled());
    }

    #[tokio::test]
    async fn reverted_transactions_can_be_retried() {
        let hash = eth::TxHash::repeat_byte(1);
        let mut state = submitted(Protocol::CowAmm, StepKind::Deploy, TxIdentifier::Chain(hash));
        let mut chain = MockBlockchain::new();
        chain.expect_receipt().returning(|hash| {
            Ok(Receipt {
                hash,
                success: false,
                created_pool: None,
            })
        });

        let outcomes = reconciler(chain, None).reconcile(&mut state).await;

        assert_eq!(
            outcomes,
            vec![(StepKind::Deploy, Outcome::Failed(StepFailure::Reverted { reason: None }))]
        );
        assert_eq!(state.record(StepKind::Deploy).unwrap().submitted, None);
        assert_eq!(state.unresolved().count(), 0);
    }
}
