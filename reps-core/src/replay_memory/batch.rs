//! Batch of transitions.
use crate::Transition;

/// A batch of transitions sampled from a [`ReplayMemory`](super::ReplayMemory).
///
/// A batch is created for every sampling call and consumed right away by a
/// loss computation.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Sampled transitions.
    pub observations: Vec<Transition>,

    /// Slot indices of the sampled transitions in the memory.
    pub indices: Vec<usize>,

    /// Per-sample weights. All `1.0` for uniform sampling.
    pub weights: Vec<f32>,
}

impl Batch {
    /// Returns the number of transitions in the batch.
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Returns `true` if the batch has no transitions.
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Returns the rewards of the transitions.
    pub fn rewards(&self) -> Vec<f32> {
        self.observations.iter().map(|tr| tr.reward).collect()
    }
}
