//! Configuration of REPS agent.
use crate::{opt::OptimizerConfig, value::ValueConfig, Device};
use anyhow::Result;
use reps_core::{error::RepsError, replay_memory::ReplayMemoryConfig};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Variant of the learning algorithm.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum Algorithm {
    /// Relative entropy policy search. The temperature is a dual variable
    /// optimized jointly with the critic under the KL bound `epsilon`.
    Reps,

    /// OptimalIS. The temperature is fixed to `eta` and only the critic is
    /// optimized. The KL bound is not used.
    OptimalIs {
        /// Temperature.
        eta: f64,
    },
}

/// Normalization of importance weights in policy fitting.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
pub enum ImportanceWeighting {
    /// `w_i = exp(A_i / η)`.
    Raw,

    /// `w_i = N softmax(A / η)_i`, which averages to one over the batch.
    SelfNormalized,
}

/// Returns `true` if `exp(ln(eta))` computed in `f32` is a normal positive number.
///
/// The temperature is stored as `ln(η)` in `f32`, so a value outside this range
/// would turn into `0` or `inf` on the first evaluation.
fn is_representable_temperature(eta: f64) -> bool {
    eta.is_finite() && eta > 0.0 && (eta.ln() as f32).exp().is_normal()
}

/// Configuration of [`Reps`](super::Reps).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct RepsConfig<V, P> {
    /// Configuration of the critic.
    pub value_config: ValueConfig<V>,

    /// Configuration of the policy.
    pub policy_config: P,

    /// Variant of the algorithm.
    pub algorithm: Algorithm,

    /// KL bound.
    pub epsilon: f64,

    /// Discount factor.
    pub gamma: f32,

    /// Initial value of the learned temperature.
    pub eta_init: f64,

    /// If `true`, the dual loss is penalized by the divergence of the batch
    /// weighting `softmax(A / η)` from the uniform weighting.
    pub entropy_regularization: bool,

    /// Coefficient of the entropy penalty.
    pub entropy_coef: f64,

    /// If `false`, the policy fitting phase is skipped.
    pub learn_policy: bool,

    /// Number of gradient steps per phase.
    pub num_iter: usize,

    /// Learning is triggered every this number of episodes. Disabled if `0`.
    pub num_rollouts: usize,

    /// Learning is triggered every this number of environment steps. Disabled if `0`.
    pub train_frequency: usize,

    /// If `true`, the replay memory is cleared after learning.
    pub reset_memory_after_learn: bool,

    /// Maximum of the global gradient norm.
    pub clip_gradient_val: f64,

    /// Batch size.
    pub batch_size: usize,

    /// Configuration of the replay memory.
    pub memory: ReplayMemoryConfig,

    /// Optimizer of the critic and the temperature.
    pub critic_opt_config: OptimizerConfig,

    /// Optimizer of the policy.
    pub policy_opt_config: OptimizerConfig,

    /// Normalization of importance weights.
    pub importance_weighting: ImportanceWeighting,

    /// Coefficient of the KL penalty to the prior in policy fitting.
    pub kl_regularization: f64,

    /// Seed of action sampling.
    pub seed: u64,

    /// Device of the models.
    pub device: Device,
}

impl<V, P: Default> Default for RepsConfig<V, P> {
    fn default() -> Self {
        Self {
            value_config: ValueConfig::default(),
            policy_config: P::default(),
            algorithm: Algorithm::Reps,
            epsilon: 1.0,
            gamma: 0.99,
            eta_init: 1.0,
            entropy_regularization: false,
            entropy_coef: 1.0,
            learn_policy: true,
            num_iter: 200,
            num_rollouts: 15,
            train_frequency: 0,
            reset_memory_after_learn: true,
            clip_gradient_val: 10.0,
            batch_size: 100,
            memory: ReplayMemoryConfig::default(),
            critic_opt_config: OptimizerConfig::default(),
            policy_opt_config: OptimizerConfig::default(),
            importance_weighting: ImportanceWeighting::Raw,
            kl_regularization: 1.0,
            seed: 42,
            device: Device::Cpu,
        }
    }
}

impl<V, P> RepsConfig<V, P>
where
    V: DeserializeOwned + Serialize,
    P: DeserializeOwned + Serialize,
{
    /// Sets the configuration of the critic.
    pub fn value_config(mut self, v: ValueConfig<V>) -> Self {
        self.value_config = v;
        self
    }

    /// Sets the configuration of the policy.
    pub fn policy_config(mut self, v: P) -> Self {
        self.policy_config = v;
        self
    }

    /// Sets the variant of the algorithm.
    pub fn algorithm(mut self, v: Algorithm) -> Self {
        self.algorithm = v;
        self
    }

    /// Sets the KL bound.
    pub fn epsilon(mut self, v: f64) -> Self {
        self.epsilon = v;
        self
    }

    /// Discount factor.
    pub fn discount_factor(mut self, v: f32) -> Self {
        self.gamma = v;
        self
    }

    /// Sets the initial value of the temperature.
    pub fn eta_init(mut self, v: f64) -> Self {
        self.eta_init = v;
        self
    }

    /// Enables the entropy penalty of the dual loss with the given coefficient.
    pub fn entropy_regularization(mut self, v: bool, coef: f64) -> Self {
        self.entropy_regularization = v;
        self.entropy_coef = coef;
        self
    }

    /// Sets if the policy is fitted.
    pub fn learn_policy(mut self, v: bool) -> Self {
        self.learn_policy = v;
        self
    }

    /// Sets the number of gradient steps per phase.
    pub fn num_iter(mut self, v: usize) -> Self {
        self.num_iter = v;
        self
    }

    /// Sets the number of episodes between learning phases.
    pub fn num_rollouts(mut self, v: usize) -> Self {
        self.num_rollouts = v;
        self
    }

    /// Sets the number of environment steps between learning phases.
    pub fn train_frequency(mut self, v: usize) -> Self {
        self.train_frequency = v;
        self
    }

    /// Sets if the replay memory is cleared after learning.
    pub fn reset_memory_after_learn(mut self, v: bool) -> Self {
        self.reset_memory_after_learn = v;
        self
    }

    /// Sets the maximum of the gradient norm.
    pub fn clip_gradient_val(mut self, v: f64) -> Self {
        self.clip_gradient_val = v;
        self
    }

    /// Batch size.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Sets the configuration of the replay memory.
    pub fn memory(mut self, v: ReplayMemoryConfig) -> Self {
        self.memory = v;
        self
    }

    /// Sets the learning rates of the critic and the policy.
    pub fn learning_rates(mut self, critic_lr: f64, policy_lr: f64) -> Self {
        self.critic_opt_config = self.critic_opt_config.learning_rate(critic_lr);
        self.policy_opt_config = self.policy_opt_config.learning_rate(policy_lr);
        self
    }

    /// Sets the optimizer of the critic and the temperature.
    pub fn critic_opt_config(mut self, v: OptimizerConfig) -> Self {
        self.critic_opt_config = v;
        self
    }

    /// Sets the optimizer of the policy.
    pub fn policy_opt_config(mut self, v: OptimizerConfig) -> Self {
        self.policy_opt_config = v;
        self
    }

    /// Sets the normalization of importance weights.
    pub fn importance_weighting(mut self, v: ImportanceWeighting) -> Self {
        self.importance_weighting = v;
        self
    }

    /// Sets the coefficient of the KL penalty to the prior.
    pub fn kl_regularization(mut self, v: f64) -> Self {
        self.kl_regularization = v;
        self
    }

    /// Sets the seed of action sampling.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = v;
        self
    }

    /// Device.
    pub fn device(mut self, v: Device) -> Self {
        self.device = v;
        self
    }

    /// Checks the consistency of the configuration.
    pub fn validate(&self) -> Result<(), RepsError> {
        self.memory.validate()?;
        match self.algorithm {
            Algorithm::Reps => {
                if !(self.epsilon > 0.0 && self.epsilon.is_finite()) {
                    return Err(RepsError::config(format!(
                        "epsilon must be positive and finite, got {}",
                        self.epsilon
                    )));
                }
                if !is_representable_temperature(self.eta_init) {
                    return Err(RepsError::config(format!(
                        "eta_init must be a positive temperature representable in f32, got {}",
                        self.eta_init
                    )));
                }
            }
            Algorithm::OptimalIs { eta } => {
                if !is_representable_temperature(eta) {
                    return Err(RepsError::config(format!(
                        "eta of OptimalIS must be a positive temperature representable in f32, got {}",
                        eta
                    )));
                }
            }
        }
        if self.num_iter < 1 {
            return Err(RepsError::config("num_iter must be at least 1"));
        }
        if self.batch_size < 1 {
            return Err(RepsError::config("batch_size must be at least 1"));
        }
        if self.batch_size > self.memory.capacity {
            return Err(RepsError::config(format!(
                "batch_size {} exceeds the capacity of the memory {}",
                self.batch_size, self.memory.capacity
            )));
        }
        if !(self.clip_gradient_val > 0.0) {
            return Err(RepsError::config("clip_gradient_val must be positive"));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(RepsError::config(format!(
                "gamma must be in [0, 1], got {}",
                self.gamma
            )));
        }
        if self.entropy_coef < 0.0 || self.kl_regularization < 0.0 {
            return Err(RepsError::config(
                "entropy_coef and kl_regularization must not be negative",
            ));
        }
        Ok(())
    }

    /// Loads [`RepsConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`RepsConfig`] as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
