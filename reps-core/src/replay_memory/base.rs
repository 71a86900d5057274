//! Ring buffer of transitions.
use super::{Batch, ReplayMemoryConfig};
use crate::{error::RepsError, Transition};
use anyhow::Result;
use log::trace;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// A fixed-capacity ring buffer of [`Transition`]s.
///
/// The memory has no internal synchronization. Its owner is expected to hold
/// it exclusively while sampling, which [`Agent::learn`](crate::Agent::learn)
/// does by taking `&mut self`.
pub struct ReplayMemory {
    /// Maximum number of transitions that can be stored.
    capacity: usize,

    /// Slot to be written by the next append.
    i: usize,

    /// Storage. Its length is the current number of stored transitions.
    transitions: Vec<Transition>,

    /// Random number generator for sampling.
    rng: StdRng,
}

impl ReplayMemory {
    /// Creates an empty memory with the given configuration.
    pub fn build(config: &ReplayMemoryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            capacity: config.capacity,
            i: 0,
            transitions: Vec::with_capacity(config.capacity),
            rng: StdRng::seed_from_u64(config.seed),
        })
    }

    /// Adds a transition, overwriting the oldest one if the memory is full.
    pub fn append(&mut self, transition: Transition) {
        if self.transitions.len() < self.capacity {
            self.transitions.push(transition);
        } else {
            self.transitions[self.i] = transition;
        }
        self.i = (self.i + 1) % self.capacity;
    }

    /// Samples `batch_size` transitions uniformly at random with replacement.
    ///
    /// # Errors
    ///
    /// Returns [`RepsError::InsufficientData`] if the memory is empty.
    pub fn sample_batch(&mut self, batch_size: usize) -> Result<Batch> {
        let size = self.transitions.len();
        if size == 0 {
            return Err(RepsError::InsufficientData.into());
        }
        trace!("Sample {} transitions out of {}", batch_size, size);

        let indices = (0..batch_size)
            .map(|_| self.rng.gen_range(0..size))
            .collect::<Vec<_>>();
        let observations = indices
            .iter()
            .map(|&ix| self.transitions[ix].clone())
            .collect();

        Ok(Batch {
            observations,
            indices,
            weights: vec![1.0; batch_size],
        })
    }

    /// Removes all transitions.
    pub fn reset(&mut self) {
        self.transitions.clear();
        self.i = 0;
    }

    /// Returns the current number of transitions in the memory.
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// Returns `true` if the memory holds no transitions.
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Returns the maximum number of transitions.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
