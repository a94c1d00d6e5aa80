//! Hands step transactions off to the chain (or the multisig relay) and
//! waits for their outcome.

use {
    super::{
        blockchain::{Blockchain, SendError, contracts},
        observe,
        relay::Relay,
    },
    crate::domain::{StepFailure, StepKind, TxIdentifier, call::Call, eth},
    std::{sync::Arc, time::Duration},
};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("the signer rejected the transaction")]
    SubmissionRejected,
    #[error("the transaction reverted: {}", reason.as_deref().unwrap_or("no reason given"))]
    TransactionReverted { reason: Option<String> },
    #[error("relay transaction {id} was not executed in time")]
    StalledRelayTransaction { id: eth::B256 },
    #[error(transparent)]
    Chain(anyhow::Error),
    #[error("relay error: {0:#}")]
    Relay(anyhow::Error),
}

impl SubmitError {
    /// How the failure is remembered on the step's record.
    pub fn failure(&self) -> StepFailure {
        match self {
            SubmitError::SubmissionRejected => StepFailure::Rejected,
            SubmitError::TransactionReverted { reason } => StepFailure::Reverted {
                reason: reason.clone(),
            },
            SubmitError::StalledRelayTransaction { .. } => StepFailure::Stalled,
            SubmitError::Chain(err) | SubmitError::Relay(err) => StepFailure::Error(format!("{err:#}")),
        }
    }
}

impl From<SendError> for SubmitError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Rejected => SubmitError::SubmissionRejected,
            SendError::Reverted { reason } => SubmitError::TransactionReverted { reason },
            SendError::Other(err) => SubmitError::Chain(err),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Confirmation {
    pub hash: eth::TxHash,
    /// The pool a factory announced in the transaction.
    pub created_pool: Option<eth::Address>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub relay_poll_interval: Duration,
    /// How long a relayed transaction may wait for signatures before it is
    /// reported as stalled.
    pub relay_timeout: Duration,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Patience {
    UntilTimeout,
    Once,
}

#[derive(Clone)]
pub struct Submitter {
    chain: Arc<dyn Blockchain>,
    relay: Option<Arc<dyn Relay>>,
    config: Config,
}

impl Submitter {
    pub fn new(chain: Arc<dyn Blockchain>, relay: Option<Arc<dyn Relay>>, config: Config) -> Self {
        Self {
            chain,
            relay,
            config,
        }
    }

    /// Simulates the call and hands it off. Returns as soon as there is an
    /// identifier to persist; [`Self::confirm`] waits for the outcome.
    pub async fn send(&self, step: StepKind, call: &Call) -> Result<TxIdentifier, SubmitError> {
        let tx = contracts::encode(call);
        observe::submitting(step);
        let result = async {
            self.chain.simulate(&tx).await?;
            Ok::<_, SubmitError>(match &self.relay {
                Some(relay) => {
                    TxIdentifier::Relay(relay.propose(&tx).await.map_err(SubmitError::Relay)?)
                }
                None => TxIdentifier::Chain(self.chain.send(&tx).await?),
            })
        }
        .await;
        match &result {
            Ok(id) => observe::pending(step, *id),
            Err(err) => observe::failed(step, &err.failure()),
        }
        result
    }

    /// Waits for the transaction behind `id` to be mined. Relay identifiers
    /// are first resolved to the hash of the executing transaction.
    pub async fn confirm(&self, step: StepKind, id: TxIdentifier) -> Result<Confirmation, SubmitError> {
        self.settle(step, id, Patience::UntilTimeout).await
    }

    /// Like [`Self::confirm`], but asks the relay only once. For relay
    /// transactions that already stalled in an earlier run.
    pub async fn recheck(&self, step: StepKind, id: TxIdentifier) -> Result<Confirmation, SubmitError> {
        self.settle(step, id, Patience::Once).await
    }

    async fn settle(
        &self,
        step: StepKind,
        id: TxIdentifier,
        patience: Patience,
    ) -> Result<Confirmation, SubmitError> {
        let result = async {
            let hash = match id {
                TxIdentifier::Chain(hash) => hash,
                TxIdentifier::Relay(id) => self.resolve(id, patience).await?,
            };
            let receipt = self.chain.receipt(hash).await.map_err(SubmitError::Chain)?;
            if !receipt.success {
                return Err(SubmitError::TransactionReverted { reason: None });
            }
            Ok::<_, SubmitError>(Confirmation {
                hash: receipt.hash,
                created_pool: receipt.created_pool,
            })
        }
        .await;
        match &result {
            Ok(confirmation) => observe::confirmed(step, confirmation.hash),
            Err(SubmitError::StalledRelayTransaction { .. }) => observe::stalled(step, id),
            Err(err) => observe::failed(step, &err.failure()),
        }
        result
    }

    async fn resolve(&self, id: eth::B256, patience: Patience) -> Result<eth::TxHash, SubmitError> {
        let relay = self.relay.as_ref().ok_or_else(|| {
            SubmitError::Relay(anyhow::anyhow!("no relay is configured to resolve {id}"))
        })?;
        if patience == Patience::Once {
            return relay
                .resolve(id)
                .await
                .map_err(SubmitError::Relay)?
                .ok_or(SubmitError::StalledRelayTransaction { id });
        }
        let poll = async {
            let mut interval = tokio::time::interval(self.config.relay_poll_interval);
            loop {
                interval.tick().await;
                match relay.resolve(id).await {
                    Ok(Some(hash)) => return hash,
                    Ok(None) => tracing::trace!(?id, "relay transaction not executed yet"),
                    Err(err) => tracing::warn!(?err, ?id, "failed to poll relay"),
                }
            }
        };
        tokio::time::timeout(self.config.relay_timeout, poll)
            .await
            .map_err(|_| SubmitError::StalledRelayTransaction { id })
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::infra::{
            blockchain::{MockBlockchain, Receipt},
            relay::MockRelay,
        },
        mockall::Sequence,
    };

    const POOL: eth::Address = eth::Address::new([0xaa; 20]);
    const TOKEN: eth::Address = eth::Address::new([0xbb; 20]);

    fn config() -> Config {
        Config {
            relay_poll_interval: Duration::from_secs(5),
            relay_timeout: Duration::from_secs(60),
        }
    }

    fn approve() -> Call {
        Call::Approve {
            token: TOKEN,
            spender: POOL,
            amount: eth::U256::from(1_000),
        }
    }

    fn submitter(chain: MockBlockchain, relay: Option<MockRelay>) -> Submitter {
        Submitter::new(
            Arc::new(chain),
            relay.map(|relay| Arc::new(relay) as Arc<dyn Relay>),
            config(),
        )
    }

    #[tokio::test]
    async fn simulation_reverts_are_not_sent() {
        let mut chain = MockBlockchain::new();
        chain.expect_simulate().returning(|_| {
            Err(SendError::Reverted {
                reason: Some("ERR_NOT_CONTROLLER".into()),
            })
        });
        chain.expect_send().never();

        let err = submitter(chain, None)
            .send(StepKind::Finalize, &approve())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SubmitError::TransactionReverted { reason: Some(ref reason) } if reason == "ERR_NOT_CONTROLLER"
        ));
    }

    #[tokio::test]
    async fn declining_to_sign_is_a_rejection() {
        let mut chain = MockBlockchain::new();
        chain.expect_simulate().returning(|_| Ok(()));
        chain.expect_send().returning(|_| Err(SendError::Rejected));

        let err = submitter(chain, None)
            .send(StepKind::Approve { token: 0 }, &approve())
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::SubmissionRejected));
        assert_eq!(err.failure(), StepFailure::Rejected);
    }

    #[tokio::test]
    async fn direct_submissions_return_the_chain_hash() {
        let hash = eth::TxHash::repeat_byte(1);
        let mut chain = MockBlockchain::new();
        chain.expect_simulate().returning(|_| Ok(()));
        chain
            .expect_send()
            .withf(|tx| tx.to == TOKEN)
            .times(1)
            .returning(move |_| Ok(hash));

        let id = submitter(chain, None)
            .send(StepKind::Approve { token: 0 }, &approve())
            .await
            .unwrap();
        assert_eq!(id, TxIdentifier::Chain(hash));
    }

    #[tokio::test]
    async fn relayed_submissions_are_proposed_instead_of_sent() {
        let id = eth::B256::repeat_byte(2);
        let mut chain = MockBlockchain::new();
        chain.expect_simulate().returning(|_| Ok(()));
        chain.expect_send().never();
        let mut relay = MockRelay::new();
        relay.expect_propose().times(1).returning(move |_| Ok(id));

        let submitted = submitter(chain, Some(relay))
            .send(StepKind::Approve { token: 0 }, &approve())
            .await
            .unwrap();
        assert_eq!(submitted, TxIdentifier::Relay(id));
    }

    #[tokio::test(start_paused = true)]
    async fn relay_identifiers_resolve_before_waiting_for_the_receipt() {
        let id = eth::B256::repeat_byte(2);
        let hash = eth::TxHash::repeat_byte(3);
        let mut relay = MockRelay::new();
        let mut polls = Sequence::new();
        relay
            .expect_resolve()
            .times(2)
            .in_sequence(&mut polls)
            .returning(|_| Ok(None));
        relay
            .expect_resolve()
            .times(1)
            .in_sequence(&mut polls)
            .returning(move |_| Ok(Some(hash)));
        let mut chain = MockBlockchain::new();
        chain
            .expect_receipt()
            .withf(move |requested| *requested == hash)
            .returning(move |hash| {
                Ok(Receipt {
                    hash,
                    success: true,
                    created_pool: Some(POOL),
                })
            });

        let confirmation = submitter(chain, Some(relay))
            .confirm(StepKind::Deploy, TxIdentifier::Relay(id))
            .await
            .unwrap();
        assert_eq!(
            confirmation,
            Confirmation {
                hash,
                created_pool: Some(POOL),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unresolved_relay_transactions_stall() {
        let id = eth::B256::repeat_byte(2);
        let mut relay = MockRelay::new();
        relay.expect_resolve().returning(|_| Ok(None));
        let mut chain = MockBlockchain::new();
        chain.expect_receipt().never();

        let err = submitter(chain, Some(relay))
            .confirm(StepKind::Deploy, TxIdentifier::Relay(id))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::StalledRelayTransaction { id: stalled } if stalled == id));
        assert_eq!(err.failure(), StepFailure::Stalled);
    }

    #[tokio::test(start_paused = true)]
    async fn rechecking_asks_the_relay_once() {
        let id = eth::B256::repeat_byte(2);
        let mut relay = MockRelay::new();
        relay.expect_resolve().times(1).returning(|_| Ok(None));
        let mut chain = MockBlockchain::new();
        chain.expect_receipt().never();

        let start = tokio::time::Instant::now();
        let err = submitter(chain, Some(relay))
            .recheck(StepKind::Deploy, TxIdentifier::Relay(id))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::StalledRelayTransaction { .. }));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn relay_errors_while_polling_are_retried() {
        let id = eth::B256::repeat_byte(2);
        let hash = eth::TxHash::repeat_byte(3);
        let mut relay = MockRelay::new();
        let mut polls = Sequence::new();
        relay
            .expect_resolve()
            .times(1)
            .in_sequence(&mut polls)
            .returning(|_| Err(anyhow::anyhow!("503")));
        relay
            .expect_resolve()
            .times(1)
            .in_sequence(&mut polls)
            .returning(move |_| Ok(Some(hash)));
        let mut chain = MockBlockchain::new();
        chain.expect_receipt().returning(|hash| {
            Ok(Receipt {
                hash,
                success: true,
                created_pool: None,
            })
        });

        let confirmation = submitter(chain, Some(relay))
            .confirm(StepKind::Finalize, TxIdentifier::Relay(id))
            .await
            .unwrap();
        assert_eq!(confirmation.hash, hash);
    }

    #[tokio::test]
    async fn failed_receipts_are_reverts() {
        let hash = eth::TxHash::repeat_byte(3);
        let mut chain = MockBlockchain::new();
        chain.expect_receipt().returning(|hash| {
            Ok(Receipt {
                hash,
                success: false,
                created_pool: None,
            })
        });

        let err = submitter(chain, None)
            .confirm(StepKind::Bind { token: 1 }, TxIdentifier::Chain(hash))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::TransactionReverted { reason: None }));
    }
}
