pub mod domain;
pub mod flow;
pub mod infra;
mod run;

pub use run::{run, start};
