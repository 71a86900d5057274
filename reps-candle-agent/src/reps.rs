//! Relative entropy policy search (REPS) agent.
mod base;
mod config;
mod dual;
mod fitting;
pub use base::{LearnPhase, Losses, Reps};
pub use config::{Algorithm, ImportanceWeighting, RepsConfig};
pub use dual::{dual_loss, Dual};
pub use fitting::{importance_weights, policy_loss};
