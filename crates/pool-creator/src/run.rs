use {
    crate::{
        domain::{Action, StepFailure, eclp, pool::PoolParameters},
        flow::{Flow, View},
        infra::{
            self,
            FileStore,
            Store,
            blockchain::{self, Blockchain},
            cli::{Args, Command},
            relay::{self, Relay, SafeRelay},
            submitter::{self, Submitter},
        },
    },
    anyhow::{Context, Result, bail},
    clap::Parser,
    std::{fmt::Write as _, sync::Arc},
    tracing::level_filters::LevelFilter,
};

pub async fn start(args: impl Iterator<Item = String>) {
    let args = Args::parse_from(args);
    // Logs go to stderr, stdout is reserved for command output.
    observe::tracing::initialize(&args.log_filter, LevelFilter::TRACE, args.use_json_logs);
    tracing::info!("running pool creator with validated arguments:\n{}", args);
    if let Err(err) = run(args).await {
        tracing::error!(?err, "pool creator failed");
        std::process::exit(1);
    }
}

pub async fn run(args: Args) -> Result<()> {
    let config = infra::config::load(&args.config).await?;
    let store: Arc<dyn Store> = Arc::new(FileStore::new(&args.state_dir));

    let connect = || flow(&args, &config, store.clone());
    match args.command.clone() {
        Command::Profile { samples } => profile(&config, samples)?,
        Command::Reset => {
            store.clear(&config.protocol.namespace())?;
            println!("reset {} pool creation", config.protocol);
        }
        Command::Status => print!("{}", describe(&connect()?.status().await?)),
        Command::Configure => {
            let pool = config
                .pool
                .clone()
                .context("the config file does not define a pool")?;
            let state = connect()?.configure(pool)?;
            println!(
                "configured {} pool with {} steps",
                state.protocol,
                state.plan().len()
            );
        }
        Command::Step => {
            let report = connect()?.step().await?;
            for (step, outcome) in &report.results {
                println!("{step}: {outcome}");
            }
            print!("{}", describe(&report.view));
            if let Some((step, outcome)) = report.failure() {
                bail!("{step} did not succeed: {outcome}");
            }
        }
        Command::Run => print!("{}", describe(&connect()?.run().await?)),
        Command::Reconcile => {
            let (outcomes, view) = connect()?.reconcile().await?;
            if outcomes.is_empty() {
                println!("no pending transactions");
            }
            for (step, outcome) in &outcomes {
                println!("{step}: {outcome}");
            }
            print!("{}", describe(&view));
        }
    }
    Ok(())
}

fn flow(args: &Args, config: &infra::Config, store: Arc<dyn Store>) -> Result<Flow> {
    let url = args
        .node_url
        .clone()
        .context("--node-url is required to talk to the chain")?;
    // With a relay the Safe owns the tokens and the pool.
    let account = config.relay.as_ref().map(|relay| relay.safe).or(args.account);
    let chain: Arc<dyn Blockchain> = Arc::new(blockchain::Rpc::new(
        url,
        args.private_key.clone(),
        account,
        blockchain::rpc::Config {
            poll_interval: config.polling.receipt_interval,
            receipt_timeout: config.polling.receipt_timeout,
        },
    )?);
    let relay = config
        .relay
        .as_ref()
        .map(|relay| -> Result<Arc<dyn Relay>> {
            let signer = args
                .private_key
                .clone()
                .context("a private key of a Safe owner is required to propose transactions")?;
            Ok(Arc::new(SafeRelay::new(
                relay::Config {
                    url: relay.url.clone(),
                    safe: relay.safe,
                    chain_id: relay.chain_id,
                    timeout: relay.request_timeout,
                },
                signer,
            )))
        })
        .transpose()?;
    let submitter = Submitter::new(
        chain.clone(),
        relay,
        submitter::Config {
            relay_poll_interval: config.polling.relay_interval,
            relay_timeout: config.polling.relay_timeout,
        },
    );
    Ok(Flow::new(
        config.protocol,
        store,
        chain,
        submitter,
        config.contracts.clone(),
        config.permit_lifetime,
    ))
}

fn profile(config: &infra::Config, samples: usize) -> Result<()> {
    let Some(PoolParameters::GyroEclp(inputs)) = config.pool.as_ref().map(|pool| &pool.parameters)
    else {
        bail!("the config file does not define an E-CLP pool");
    };
    let params = eclp::Params::parse(inputs)?;
    tracing::info!(peak = %params.peak_price(), "E-CLP liquidity peak price");
    let points = eclp::liquidity_profile(inputs, samples);
    if points.is_empty() {
        bail!("need at least two samples");
    }
    println!("price,density");
    for point in points {
        println!("{},{}", point.price, point.density);
    }
    Ok(())
}

/// Human readable plan with the status of every step.
fn describe(view: &View) -> String {
    let View { state, sequenced } = view;
    let mut out = String::new();
    let _ = writeln!(out, "protocol: {}", state.protocol);
    match state.deployed_pool {
        Some(pool) => {
            let _ = writeln!(out, "pool: {pool}");
        }
        None => {
            let _ = writeln!(out, "pool: not deployed");
        }
    }
    match &sequenced.action {
        Action::Unconfigured => {
            let _ = writeln!(out, "no pool configured, run `configure` first");
            return out;
        }
        Action::Invalid(err) => {
            let _ = writeln!(out, "invalid configuration: {err}");
            return out;
        }
        Action::Held(err) => {
            let _ = writeln!(out, "{err}; holding at step {}", state.current_step);
            return out;
        }
        _ => {}
    }

    for (position, (step, done)) in sequenced.steps.iter().enumerate() {
        let index = position + 1;
        let status = if *done {
            "done".to_owned()
        } else if index != sequenced.index && !sequenced.concurrent.contains(step) {
            "waiting".to_owned()
        } else {
            match state.record(*step) {
                Some(record) if record.is_stalled() => "stalled, resubmit or reset".to_owned(),
                Some(record) => match (&record.failure, record.submitted) {
                    (Some(failure @ StepFailure::Error(_)), Some(id)) => {
                        format!("pending {id}, outcome unknown ({failure})")
                    }
                    (Some(failure), _) => format!("failed ({failure}), ready to retry"),
                    (None, Some(id)) => format!("pending {id}"),
                    (None, None) => "ready".to_owned(),
                },
                None => "ready".to_owned(),
            }
        };
        let marker = if index == sequenced.index { ">" } else { " " };
        let _ = writeln!(out, "{marker} {index:>2} {:<24} {status}", step.to_string());
    }
    if sequenced.action == Action::Complete {
        let _ = writeln!(out, "pool creation complete");
    }
    out
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::domain::{
            Event,
            OnChainSnapshot,
            Protocol,
            StepKind,
            eth,
            sequencer,
            wizard::tests::configured,
        },
    };

    #[test]
    fn describes_the_plan() {
        let mut state = configured(Protocol::CowAmm, &[60, 40]);
        state
            .apply(Event::Confirmed {
                step: StepKind::Deploy,
                hash: eth::TxHash::repeat_byte(1),
                created_pool: Some(eth::Address::repeat_byte(0xaa)),
            })
            .unwrap();
        let snapshot = OnChainSnapshot {
            pool: Some(Default::default()),
            tokens: vec![Default::default(); 2],
        };
        let sequenced = sequencer::sequence(&state, Ok(&snapshot));

        let text = describe(&View { state, sequenced });
        let lines = text.lines().collect::<Vec<_>>();

        assert_eq!(lines[0], "protocol: cow-amm");
        assert!(lines[2].contains("deploy") && lines[2].ends_with("done"));
        assert!(lines[3].starts_with(">  2 approve[0]"));
        assert!(lines[3].ends_with("ready"));
        // The second approval can go out together with the first.
        assert!(lines[4].ends_with("ready"));
        assert!(lines[5].ends_with("waiting"));
    }

    #[test]
    fn describes_transactions_with_unknown_outcome_as_pending() {
        let mut state = configured(Protocol::CowAmm, &[60, 40]);
        let id = crate::domain::TxIdentifier::Chain(eth::TxHash::repeat_byte(2));
        state
            .apply(Event::Submitted {
                step: StepKind::Deploy,
                id,
            })
            .unwrap();
        state
            .apply(Event::Failed {
                step: StepKind::Deploy,
                failure: StepFailure::Error("no receipt after 300s".to_owned()),
            })
            .unwrap();
        let sequenced = sequencer::sequence(&state, Ok(&OnChainSnapshot::default()));

        let text = describe(&View { state, sequenced });

        let deploy = text.lines().find(|line| line.contains("deploy")).unwrap();
        assert!(deploy.contains("pending"));
        assert!(deploy.contains("outcome unknown (no receipt after 300s)"));
    }

    #[test]
    fn describes_unconfigured_state() {
        let state = crate::domain::WizardState::new(Protocol::BalancerV3);
        let sequenced = sequencer::sequence(&state, Ok(&OnChainSnapshot::default()));
        let text = describe(&View { state, sequenced });
        assert!(text.contains("no pool configured"));
    }
}
