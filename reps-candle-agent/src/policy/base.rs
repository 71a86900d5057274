use anyhow::Result;
use candle_core::{Device, Tensor, Var};
use rand::rngs::StdRng;
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};

/// A parameterized stochastic policy `π_θ(a|s)` trained by weighted maximum likelihood.
///
/// A policy may hold a prior, a frozen copy of itself taken before an update.
/// The prior serves as the reference of a KL penalty keeping the updated
/// policy close to the old one.
pub trait StochasticPolicy: Sized {
    /// Configuration from which the policy is constructed.
    type Config: Clone + Serialize + DeserializeOwned;

    /// Constructs the policy on the given device.
    fn build(config: Self::Config, device: &Device) -> Result<Self>;

    /// Returns `log π(a|s)` of shape `[b]` for states `[b, state_dim]` and actions `[b, action_dim]`.
    fn log_prob(&self, obs: &Tensor, act: &Tensor) -> Result<Tensor>;

    /// Returns `KL(prior(·|s) ‖ self(·|s))` of shape `[b]`.
    ///
    /// No gradient flows into `prior`.
    fn kl_divergence(&self, prior: &Self, obs: &Tensor) -> Result<Tensor>;

    /// Returns an action for a single state of shape `[1, state_dim]`.
    ///
    /// If `train` is `true`, the action is sampled with `rng`. Otherwise the
    /// mode of the distribution is returned.
    fn sample(&self, obs: &Tensor, rng: &mut StdRng, train: bool) -> Result<Vec<f32>>;

    /// Returns the trainable variables, excluding those of the prior.
    fn vars(&self) -> Vec<Var>;

    /// Returns `true` if the policy accepts a prior.
    fn supports_prior(&self) -> bool;

    /// Returns a copy of the policy with its own parameters and no prior.
    fn snapshot(&self) -> Result<Self>;

    /// Returns the attached prior.
    fn prior(&self) -> Option<&Self>;

    /// Attaches a prior, replacing the previous one.
    fn attach_prior(&mut self, prior: Self);

    /// Detaches the prior and returns it.
    fn detach_prior(&mut self) -> Option<Self>;

    /// Save variables to prefix + ".safetensors".
    fn save(&self, prefix: impl AsRef<Path>) -> Result<PathBuf>;

    /// Load variables from prefix + ".safetensors".
    fn load(&mut self, prefix: impl AsRef<Path>) -> Result<()>;

    /// Returns `KL(prior ‖ self)` per state if a prior is attached.
    fn kl_to_prior(&self, obs: &Tensor) -> Result<Option<Tensor>> {
        match self.prior() {
            Some(prior) => Ok(Some(self.kl_divergence(prior, obs)?)),
            None => Ok(None),
        }
    }
}
