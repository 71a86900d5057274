//! Fixed-capacity replay memory of transitions.
//!
//! The memory is a ring buffer: once `capacity` transitions are stored, a new
//! transition overwrites the oldest one. Batches are drawn uniformly at random
//! with replacement from the current contents.
//!
//! ```rust
//! use reps_core::{
//!     replay_memory::{ReplayMemory, ReplayMemoryConfig},
//!     Transition,
//! };
//!
//! let config = ReplayMemoryConfig::default().capacity(100).seed(42);
//! let mut memory = ReplayMemory::build(&config).unwrap();
//! memory.append(Transition::new(vec![0.0], vec![1.0], 1.0, vec![1.0], false));
//!
//! let batch = memory.sample_batch(8).unwrap();
//! assert_eq!(batch.len(), 8);
//! assert!(batch.weights.iter().all(|&w| w == 1.0));
//! ```
mod base;
mod batch;
mod config;
pub use base::ReplayMemory;
pub use batch::Batch;
pub use config::ReplayMemoryConfig;
