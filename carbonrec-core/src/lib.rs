//! # carbonrec-core: experiment harness for recommender training runs
//!
//! Drives an external trainer over a matrix of datasets and models, either once
//! per pair with static parameters or once per point of a hyperparameter grid,
//! and accumulates metrics, resolved parameters and emissions run ids in CSV
//! files laid out as `<root>/<dataset>/<model>/`.
//!
//! The pieces with logic of their own:
//! - [`grid`]: `.hyper` parsing, grid size and grid enumeration
//! - [`results`]: append-only CSV result records
//! - [`folders`]: the `root/dataset/model` layout
//! - [`driver`]: default and tuning sessions with per-pair failure containment

pub mod cache;
pub mod config;
pub mod dataset;
pub mod device;
pub mod driver;
pub mod error;
pub mod folders;
pub mod grid;
pub mod results;
pub mod runner;
pub mod session_log;

// Re-exports
pub use config::{HarnessConfig, TrainingParams, load_config};
pub use device::Device;
pub use driver::{Harness, PairOutcome, SessionStatus};
pub use error::CarbonError;
pub use grid::{HyperGrid, parse_grid, total_iterations};
pub use results::{ResultLog, ResultRecord, append_record};
pub use runner::{CommandTrainer, TrainOutcome, TrainRequest, Trainer};
