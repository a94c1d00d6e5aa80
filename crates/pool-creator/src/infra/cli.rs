//! Command line arguments.

use {
    crate::domain::eth,
    alloy::signers::local::PrivateKeySigner,
    std::{fmt, path::PathBuf},
    url::Url,
};

/// Creates a CoW AMM or Balancer V3 pool step by step. Progress is stored
/// after every transaction so an interrupted creation resumes where it
/// stopped.
#[derive(Debug, clap::Parser)]
#[command(name = "pool-creator", version)]
pub struct Args {
    /// The TOML file describing contracts, polling and the pool.
    #[clap(long, env = "POOL_CREATOR_CONFIG", default_value = "pool-creator.toml")]
    pub config: PathBuf,

    /// Where the progress of every protocol is stored.
    #[clap(long, env = "POOL_CREATOR_STATE_DIR", default_value = ".pool-creator")]
    pub state_dir: PathBuf,

    /// JSON-RPC endpoint of the chain the pool is created on.
    #[clap(long, env = "NODE_URL")]
    pub node_url: Option<Url>,

    /// Key of the account that sends the transactions, or that proposes them
    /// when a relay is configured.
    #[clap(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<PrivateKeySigner>,

    /// Read the progress of this account without being able to send.
    #[clap(long, env = "ACCOUNT")]
    pub account: Option<eth::Address>,

    #[clap(long, env = "LOG_FILTER", default_value = "warn,pool_creator=info")]
    pub log_filter: String,

    #[clap(long, env = "USE_JSON_LOGS", default_value = "false")]
    pub use_json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, PartialEq, Eq, clap::Subcommand)]
pub enum Command {
    /// Resume pending transactions and show the plan.
    Status,
    /// Validate the pool of the config file and store it.
    Configure,
    /// Submit the active step, or all of its group that can go out together.
    Step,
    /// Submit steps until the pool is created or one of them fails.
    Run,
    /// Wait for transactions submitted in an earlier run.
    Reconcile,
    /// Forget all progress of the configured protocol.
    Reset,
    /// Print the liquidity profile of the configured E-CLP as CSV.
    Profile {
        #[clap(long, default_value_t = 100)]
        samples: usize,
    },
}

impl fmt::Display for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            config,
            state_dir,
            node_url,
            private_key,
            account,
            log_filter,
            use_json_logs,
            command,
        } = self;

        writeln!(f, "config: {}", config.display())?;
        writeln!(f, "state_dir: {}", state_dir.display())?;
        writeln!(f, "node_url: {}", display_option(node_url.as_ref().map(Url::as_str)))?;
        writeln!(
            f,
            "private_key: {}",
            private_key
                .as_ref()
                .map(|signer| format!("SECRET (address {})", signer.address()))
                .unwrap_or_else(|| "None".to_owned())
        )?;
        writeln!(f, "account: {}", display_option(account.map(|a| a.to_string()).as_deref()))?;
        writeln!(f, "log_filter: {log_filter}")?;
        writeln!(f, "use_json_logs: {use_json_logs}")?;
        write!(f, "command: {command:?}")
    }
}

fn display_option(value: Option<&str>) -> &str {
    value.unwrap_or("None")
}
