//! Administrative operations over an exercise-evaluation store: fork
//! similarity reports and runtime-environment migration.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod facets;
pub mod forks;
pub mod migrate;
pub mod model;
pub mod pipelines;
pub mod report;
pub mod snapshot;
pub mod store;
pub mod yaml_eq;

pub use error::{Diagnostic, DbopsError, DbopsResult, MatchError};
pub use store::Store;
