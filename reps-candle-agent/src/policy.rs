//! Stochastic policies.
mod base;
mod categorical;
mod gaussian;
pub use base::StochasticPolicy;
pub use categorical::{CategoricalPolicy, CategoricalPolicyConfig};
pub use gaussian::{GaussianPolicy, GaussianPolicyConfig};
