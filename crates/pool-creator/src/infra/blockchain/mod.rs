//! Access to the chain: simulating and sending transactions, waiting for
//! receipts and reading the state the step sequencer needs.

use {
    crate::domain::{call::Reads, eth, sequencer::OnChainSnapshot},
    anyhow::Result,
};

pub mod contracts;
pub mod rpc;

pub use {contracts::Transaction, rpc::Rpc};

/// The JSON-RPC error code wallets use when the user declines a request.
pub const USER_REJECTED_REQUEST: i64 = 4001;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("the signer rejected the transaction")]
    Rejected,
    #[error("the transaction reverts: {}", reason.as_deref().unwrap_or("no reason given"))]
    Reverted { reason: Option<String> },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The outcome of a mined transaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Receipt {
    pub hash: eth::TxHash,
    pub success: bool,
    /// The pool announced by a factory event in this transaction, if any.
    pub created_pool: Option<eth::Address>,
}

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait::async_trait]
pub trait Blockchain: Send + Sync {
    /// The account whose tokens seed the pool and that ends up owning it.
    fn account(&self) -> eth::Address;

    /// Executes the transaction against the latest block without sending
    /// it.
    async fn simulate(&self, tx: &Transaction) -> Result<(), SendError>;

    /// Signs and broadcasts the transaction.
    async fn send(&self, tx: &Transaction) -> Result<eth::TxHash, SendError>;

    /// Waits until the transaction was mined.
    async fn receipt(&self, hash: eth::TxHash) -> Result<Receipt>;

    async fn snapshot(&self, reads: &Reads) -> Result<OnChainSnapshot>;
}
