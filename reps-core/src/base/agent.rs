//! Agent.
use super::Transition;
use crate::record::Record;
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Represents a trainable policy fed with transitions of a behavior policy.
pub trait Agent {
    /// Set the policy to training mode.
    fn train(&mut self);

    /// Set the policy to evaluation mode.
    fn eval(&mut self);

    /// Return if it is in training mode.
    fn is_train(&self) -> bool;

    /// Returns an action for the given state.
    ///
    /// In training mode the action is sampled, otherwise the most probable
    /// action is returned.
    fn act(&mut self, state: &[f32]) -> Result<Vec<f32>>;

    /// Stores a transition. Returns the record of a learning phase if the
    /// transition triggered one.
    fn observe(&mut self, transition: Transition) -> Result<Option<Record>>;

    /// Signals the end of an episode. Returns the record of a learning phase if
    /// the episode count triggered one.
    fn end_episode(&mut self) -> Result<Option<Record>>;

    /// Runs a learning phase on the stored transitions.
    fn learn(&mut self) -> Result<Record>;

    /// Save the parameters of the agent in the given directory.
    fn save_params(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Load the parameters of the agent from the given directory.
    fn load_params(&mut self, path: &Path) -> Result<()>;
}
