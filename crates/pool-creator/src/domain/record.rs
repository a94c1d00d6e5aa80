//! What is known about the transaction of a step.

use {
    crate::domain::eth,
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// The identifier returned when a transaction is handed off. A multisig relay
/// returns its own transaction hash which only later resolves to the hash of
/// the transaction that executed on chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "camelCase")]
pub enum TxIdentifier {
    #[display("{_0}")]
    Chain(eth::TxHash),
    #[display("relay:{_0}")]
    Relay(eth::B256),
}

/// Why the last attempt of a step did not succeed. Never persisted: after a
/// reload the step is simply offered again or re-watched.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StepFailure {
    /// The signer declined the transaction.
    Rejected,
    /// The transaction reverted during simulation or on chain.
    Reverted { reason: Option<String> },
    /// The relay never produced an on-chain transaction.
    Stalled,
    /// Anything else, e.g. the node was unreachable.
    Error(String),
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepFailure::Rejected => f.write_str("rejected by signer"),
            StepFailure::Reverted {
                reason: Some(reason),
            } => write!(f, "reverted: {reason}"),
            StepFailure::Reverted { reason: None } => f.write_str("reverted"),
            StepFailure::Stalled => f.write_str("relay transaction stalled"),
            StepFailure::Error(err) => f.write_str(err),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    /// Set as soon as the transaction was handed off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted: Option<TxIdentifier>,
    /// The hash of the mined transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<eth::TxHash>,
    /// True iff a successful receipt for `confirmed` was observed.
    #[serde(default)]
    pub succeeded: bool,
    /// The relay did not execute `submitted` in time. Kept across reloads so
    /// a later run only looks once instead of waiting all over again.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stalled: bool,
    #[serde(skip)]
    pub failure: Option<StepFailure>,
}

impl TransactionRecord {
    /// A transaction was handed off but its outcome is unknown.
    pub fn is_pending(&self) -> bool {
        self.submitted.is_some() && !self.succeeded && !self.stalled && self.failure.is_none()
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled || matches!(self.failure, Some(StepFailure::Stalled))
    }
}
