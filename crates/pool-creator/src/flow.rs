//! The pool creation flow: loads the stored wizard state, resumes pending
//! transactions, derives the active step from chain and submits it.

use {
    crate::{
        domain::{
            Action,
            Event,
            OnChainSnapshot,
            PoolConfig,
            Protocol,
            ReadError,
            Sequenced,
            StepKind,
            ValidatedPool,
            WizardState,
            call::{self, Contracts},
            eth,
            sequencer,
            validation,
        },
        infra::{
            blockchain::Blockchain,
            observe,
            persistence::Store,
            reconciler::{Outcome, Reconciler},
            submitter::Submitter,
        },
    },
    alloy::primitives::keccak256,
    anyhow::{Context, Result, bail},
    std::{
        sync::Arc,
        time::{Duration, SystemTime, UNIX_EPOCH},
    },
};

/// The wizard state together with what was derived from chain for it.
#[derive(Clone, Debug)]
pub struct View {
    pub state: WizardState,
    pub sequenced: Sequenced,
}

/// What a single [`Flow::step`] did.
#[derive(Clone, Debug)]
pub struct StepReport {
    /// Every transaction of the step group that was attempted.
    pub results: Vec<(StepKind, Outcome)>,
    pub view: View,
}

impl StepReport {
    /// The first attempted step that did not succeed.
    pub fn failure(&self) -> Option<&(StepKind, Outcome)> {
        self.results
            .iter()
            .find(|(_, outcome)| !matches!(outcome, Outcome::Confirmed(_)))
    }
}

pub struct Flow {
    protocol: Protocol,
    store: Arc<dyn Store>,
    chain: Arc<dyn Blockchain>,
    submitter: Submitter,
    reconciler: Reconciler,
    contracts: Contracts,
    permit_lifetime: Duration,
}

impl Flow {
    pub fn new(
        protocol: Protocol,
        store: Arc<dyn Store>,
        chain: Arc<dyn Blockchain>,
        submitter: Submitter,
        contracts: Contracts,
        permit_lifetime: Duration,
    ) -> Self {
        Self {
            protocol,
            store,
            chain,
            reconciler: Reconciler::new(submitter.clone()),
            submitter,
            contracts,
            permit_lifetime,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn load(&self) -> Result<WizardState> {
        let namespace = self.protocol.namespace();
        let state = self
            .store
            .load(&namespace)?
            .unwrap_or_else(|| WizardState::new(self.protocol));
        if state.protocol != self.protocol {
            bail!(
                "state stored under {namespace} belongs to {}",
                state.protocol
            );
        }
        Ok(state)
    }

    fn save(&self, state: &WizardState) -> Result<()> {
        let namespace = self.protocol.namespace();
        self.store.save(&namespace, state)?;
        observe::persisted(&namespace);
        Ok(())
    }

    /// Validates `config` and stores it as the pool to create. Storing the
    /// configuration that is already stored keeps all progress.
    pub fn configure(&self, config: PoolConfig) -> Result<WizardState> {
        validation::validate(self.protocol, &config)?;
        let mut state = self.load()?;
        if state.config.as_ref() == Some(&config) {
            return Ok(state);
        }
        let salt = salt(&config, self.chain.account())?;
        state.apply(Event::Configure { config, salt })?;
        self.save(&state)?;
        tracing::info!(protocol = %self.protocol, ?salt, "configured pool");
        Ok(state)
    }

    /// Resumes pending transactions and derives the active step.
    pub async fn status(&self) -> Result<View> {
        let mut state = self.load()?;
        self.resume(&mut state).await?;
        let (sequenced, _) = self.refresh(&mut state).await?;
        Ok(View { state, sequenced })
    }

    /// Waits for every pending transaction.
    pub async fn reconcile(&self) -> Result<(Vec<(StepKind, Outcome)>, View)> {
        let mut state = self.load()?;
        let outcomes = self.resume(&mut state).await?;
        let (sequenced, _) = self.refresh(&mut state).await?;
        Ok((outcomes, View { state, sequenced }))
    }

    /// Submits the active step, together with the steps of its group that
    /// may go out concurrently, and waits for all of them.
    pub async fn step(&self) -> Result<StepReport> {
        let mut state = self.load()?;
        self.resume(&mut state).await?;
        let (sequenced, read) = self.refresh(&mut state).await?;

        let steps = match &sequenced.action {
            Action::Complete => {
                return Ok(StepReport {
                    results: Vec::new(),
                    view: View { state, sequenced },
                });
            }
            Action::Unconfigured => bail!("no pool is configured yet"),
            Action::Invalid(err) => return Err(err.clone().into()),
            Action::Held(err) => return Err(err.clone().into()),
            Action::InFlight(step, id) if sequenced.concurrent.is_empty() => {
                bail!("{step} is still pending as {id}, its outcome is looked up again on the next run")
            }
            // Resubmitting is the only way forward for a stalled relay
            // transaction.
            Action::Stalled(step, _) if sequenced.concurrent.is_empty() => vec![*step],
            _ => sequenced.concurrent.clone(),
        };
        let (pool, snapshot) = read.context("on-chain state is unavailable")?;

        let results = self.submit(&mut state, &steps, &pool, &snapshot).await?;
        let (sequenced, _) = self.refresh(&mut state).await?;
        Ok(StepReport {
            results,
            view: View { state, sequenced },
        })
    }

    /// Executes steps until the flow is complete or one of them fails.
    pub async fn run(&self) -> Result<View> {
        loop {
            let report = self.step().await?;
            if let Some((step, outcome)) = report.failure() {
                bail!("{step} did not succeed: {outcome}");
            }
            if report.view.sequenced.action == Action::Complete {
                return Ok(report.view);
            }
            if report.results.is_empty() {
                bail!("nothing to submit at step {}", report.view.sequenced.index);
            }
        }
    }

    pub fn reset(&self) -> Result<()> {
        self.store.clear(&self.protocol.namespace())?;
        tracing::info!(protocol = %self.protocol, "reset pool creation");
        Ok(())
    }

    async fn resume(&self, state: &mut WizardState) -> Result<Vec<(StepKind, Outcome)>> {
        let outcomes = self.reconciler.reconcile(state).await;
        if !outcomes.is_empty() {
            self.save(state)?;
        }
        Ok(outcomes)
    }

    /// Reads the chain, sequences the steps and stores the derived index.
    /// A failed read keeps the stored index.
    async fn refresh(
        &self,
        state: &mut WizardState,
    ) -> Result<(Sequenced, Option<(ValidatedPool, OnChainSnapshot)>)> {
        let pool = state
            .config
            .as_ref()
            .and_then(|config| validation::validate(state.protocol, config).ok());
        let Some(pool) = pool else {
            // Unconfigured or invalid, the sequencer reports which.
            let sequenced = sequencer::sequence(state, Ok(&OnChainSnapshot::default()));
            return Ok((sequenced, None));
        };

        let reads = call::reads(state, &pool, &self.context());
        let snapshot = self.chain.snapshot(&reads).await.map_err(|err| {
            observe::stale_read(&err);
            ReadError(format!("{err:#}"))
        });
        state.read_error = snapshot.as_ref().err().map(|err| err.0.clone());
        let sequenced = sequencer::sequence(state, snapshot.as_ref());
        if let Some(index) = sequenced.advance_to() {
            if index != state.current_step {
                tracing::debug!(from = state.current_step, to = index, "advancing");
            }
            state.apply(Event::Advanced { index })?;
        }
        self.save(state)?;
        Ok((sequenced, snapshot.ok().map(|snapshot| (pool, snapshot))))
    }

    async fn submit(
        &self,
        state: &mut WizardState,
        steps: &[StepKind],
        pool: &ValidatedPool,
        snapshot: &OnChainSnapshot,
    ) -> Result<Vec<(StepKind, Outcome)>> {
        let ctx = self.context();
        let calls = steps
            .iter()
            .map(|step| {
                call::build(*step, state, pool, snapshot, &ctx)
                    .map(|call| (*step, call))
                    .with_context(|| format!("building {step}"))
            })
            .collect::<Result<Vec<_>>>()?;

        let sent = futures::future::join_all(calls.iter().map(|(step, call)| async move {
            (*step, self.submitter.send(*step, call).await)
        }))
        .await;

        let mut results = Vec::new();
        for (step, result) in sent {
            match result {
                Ok(id) => state.apply(Event::Submitted { step, id })?,
                Err(err) => {
                    let failure = err.failure();
                    state.apply(Event::Failed {
                        step,
                        failure: failure.clone(),
                    })?;
                    results.push((step, Outcome::Failed(failure)));
                }
            }
        }
        // Identifiers are persisted before waiting so an interrupted run
        // resumes them.
        self.save(state)?;

        results.extend(self.reconciler.reconcile(state).await);
        self.save(state)?;
        Ok(results)
    }

    fn context(&self) -> call::Context<'_> {
        call::Context {
            wallet: self.chain.account(),
            contracts: &self.contracts,
            permit_expiration: unix_now()
                .saturating_add(self.permit_lifetime)
                .as_secs(),
        }
    }
}

/// A fresh deployment salt. Including the time makes every configuration a
/// new pool even if the same pool was created before.
fn salt(config: &PoolConfig, account: eth::Address) -> Result<eth::B256> {
    let mut preimage = serde_json::to_vec(config).context("encoding pool configuration")?;
    preimage.extend_from_slice(account.as_slice());
    preimage.extend_from_slice(&unix_now().as_nanos().to_be_bytes());
    Ok(keccak256(preimage))
}

fn unix_now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}
