//! Environment.
use anyhow::Result;

/// Represents an action, observation and reward tuple `(a_t, s_t+1, r_t)`
/// emitted by an [`Env`] at every interaction step.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Next state.
    pub next_state: Vec<f32>,

    /// Reward.
    pub reward: f32,

    /// Flag denoting if episode is terminated.
    pub is_terminated: bool,

    /// Flag denoting if episode is truncated.
    pub is_truncated: bool,
}

impl Step {
    #[inline]
    /// Terminated or truncated.
    pub fn is_done(&self) -> bool {
        self.is_terminated || self.is_truncated
    }
}

/// Represents an environment, typically an MDP.
///
/// Environments are external collaborators of the agents; this trait is the
/// boundary through which [`rollout_episode`](crate::rollout_episode) drives them.
pub trait Env {
    /// Resets the environment and returns the initial state.
    fn reset(&mut self) -> Result<Vec<f32>>;

    /// Performes an environment step.
    fn step(&mut self, act: &[f32]) -> Result<Step>;
}
