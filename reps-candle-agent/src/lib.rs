//! REPS agents implemented with [candle](https://crates.io/crates/candle-core).
//!
//! The crate provides
//! * models mapping states to tensors ([`tabular::Tabular`], [`mlp::Mlp`]),
//! * a state value function ([`value::Value`]) and stochastic policies ([`policy`]),
//! * optimizers with gradient norm clipping ([`opt`]),
//! * the [`reps::Reps`] agent, running relative entropy policy search or its
//!   OptimalIS variant on the transitions of a replay memory.
pub mod mlp;
pub mod model;
pub mod opt;
pub mod policy;
pub mod reps;
pub mod tabular;
mod tensor_batch;
pub mod util;
pub mod value;
use anyhow::Result;
use serde::{Deserialize, Serialize};
pub use tensor_batch::TensorBatch;

#[derive(Clone, Debug, Copy, Deserialize, Serialize, PartialEq, Default)]
/// Device for using candle.
///
/// This enum is added because [`candle_core::Device`] does not support serialization.
pub enum Device {
    /// The main CPU device.
    #[default]
    Cpu,

    /// The GPU device with the given ordinal.
    Cuda(usize),
}

impl Device {
    /// Returns the corresponding [`candle_core::Device`].
    ///
    /// Fails for [`Device::Cuda`] if candle is built without CUDA support.
    pub fn to_candle(self) -> Result<candle_core::Device> {
        match self {
            Self::Cpu => Ok(candle_core::Device::Cpu),
            Self::Cuda(n) => Ok(candle_core::Device::new_cuda(n)?),
        }
    }
}
