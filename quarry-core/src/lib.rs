//! Retrieval-augmented question answering over a relational dataset:
//! configuration, the report planners, and the [`Analyst`] facade that
//! wires knowledge, completion and execution together.

pub mod analyst;
pub mod error;
pub mod planner;
pub mod settings;
pub mod training;

pub use analyst::{build_embedder, open_index, Analyst, AskResult};
pub use error::{AnalystError, ConfigError};
pub use planner::{
    IterativePlanner, PlanError, PlannerDeps, PlannerLimits, SingleShotPlanner, StepProposal,
    TERMINATION_TOKEN,
};
pub use settings::Settings;
pub use training::{import_legacy, train_from_schema};

pub use tokio_util::sync::CancellationToken;
