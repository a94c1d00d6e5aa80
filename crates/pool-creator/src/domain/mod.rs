pub mod call;
pub mod eclp;
pub mod eth;
pub mod number;
pub mod pool;
pub mod record;
pub mod sequencer;
pub mod step;
pub mod validation;
pub mod wizard;

pub use {
    pool::{PoolConfig, PoolType, Protocol},
    record::{StepFailure, TransactionRecord, TxIdentifier},
    sequencer::{Action, OnChainSnapshot, ReadError, Sequenced},
    step::StepKind,
    validation::{InvalidConfiguration, ValidatedPool},
    wizard::{Event, WizardState},
};
