#![warn(missing_docs)]
//! Core of the REPS agents: replay memory, records and the interfaces between
//! agents and environments.
//!
//! Nothing in this crate depends on a tensor backend. Agents implementing
//! [`Agent`] live in backend crates such as `reps-candle-agent`.
pub mod error;
pub mod record;
pub mod replay_memory;

mod base;
pub use base::{Agent, Env, Step, Transition};

mod rollout;
pub use rollout::{rollout_episode, Rollout};
