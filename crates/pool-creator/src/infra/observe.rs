//! Lifecycle notifications of step transactions. Everything the user should
//! be told about a transaction goes through here so the log reads as one
//! story per step.

use crate::domain::{StepFailure, StepKind, TxIdentifier, eth};

pub fn submitting(step: StepKind) {
    tracing::debug!(%step, "simulating transaction");
}

pub fn pending(step: StepKind, id: TxIdentifier) {
    tracing::info!(%step, %id, "transaction pending");
}

pub fn confirmed(step: StepKind, hash: eth::TxHash) {
    tracing::info!(%step, ?hash, "transaction confirmed");
}

pub fn failed(step: StepKind, failure: &StepFailure) {
    match failure {
        StepFailure::Rejected => tracing::warn!(%step, "transaction rejected by signer"),
        failure => tracing::error!(%step, %failure, "transaction failed"),
    }
}

pub fn stalled(step: StepKind, id: TxIdentifier) {
    tracing::warn!(%step, %id, "relay transaction did not reach the chain");
}

pub fn resuming(step: StepKind, id: TxIdentifier) {
    tracing::info!(%step, %id, "resuming pending transaction");
}

pub fn stale_read(err: &anyhow::Error) {
    tracing::warn!(?err, "could not read on-chain state, keeping stored progress");
}

pub fn persisted(namespace: &str) {
    tracing::trace!(%namespace, "saved wizard state");
}
