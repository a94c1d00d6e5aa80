pub mod blockchain;
pub mod cli;
pub mod config;
pub mod observe;
pub mod persistence;
pub mod reconciler;
pub mod relay;
pub mod submitter;

pub use {
    blockchain::Blockchain,
    config::Config,
    persistence::{FileStore, Store},
    reconciler::Reconciler,
    relay::Relay,
    submitter::Submitter,
};
