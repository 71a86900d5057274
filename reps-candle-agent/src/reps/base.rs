use super::{importance_weights, policy_loss, Dual, ImportanceWeighting, RepsConfig};
use crate::{
    model::SubModel1,
    opt::{GradNorm, ParamGroup},
    policy::StochasticPolicy,
    util::mean_abs_max,
    value::Value,
    TensorBatch,
};
use anyhow::Result;
use candle_core::{Device, Tensor};
use log::{debug, info};
use rand::{rngs::StdRng, SeedableRng};
use reps_core::{
    error::RepsError,
    record::{Record, RecordValue},
    replay_memory::ReplayMemory,
    Agent, Transition,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Phase of [`Reps::learn()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnPhase {
    /// Not learning. Transitions can be collected.
    Idle,

    /// Optimizing the critic and the temperature on the dual loss.
    DualOptimization,

    /// Fitting the policy to the weighted transitions.
    PolicyFitting,

    /// Clearing the replay memory.
    MemoryReset,
}

/// Values observed in a single gradient step.
#[derive(Debug, Clone, Default)]
pub struct Losses {
    /// Dual loss, in a step of the dual phase.
    pub dual_loss: Option<f32>,

    /// Policy loss, in a step of the policy phase.
    pub policy_loss: Option<f32>,

    /// Mean of the advantages (TD errors) in the batch.
    pub td_error_mean: f32,

    /// Maximum of the absolute advantages in the batch.
    pub td_error_abs_max: f32,

    /// Temperature.
    pub eta: f32,

    /// Maximum of the importance weights, in a step of the policy phase.
    pub weight_max: Option<f32>,

    /// Gradient norm before clipping.
    pub grad_norm: f32,
}

impl Losses {
    /// Converts to [`Record`]. The gradient norm is stored with the given key.
    pub fn to_record(&self, grad_norm_key: &str) -> Record {
        let mut record = Record::from_slice(&[
            ("eta", RecordValue::Scalar(self.eta)),
            ("td_error_mean", RecordValue::Scalar(self.td_error_mean)),
            ("td_error_abs_max", RecordValue::Scalar(self.td_error_abs_max)),
            (grad_norm_key, RecordValue::Scalar(self.grad_norm)),
        ]);
        if let Some(v) = self.weight_max {
            record.insert("weight_max", RecordValue::Scalar(v));
        }
        record
    }
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Relative entropy policy search (REPS) agent and its OptimalIS variant.
///
/// The agent collects transitions in its [`ReplayMemory`] and learns from them
/// in phases:
///
/// ```mermaid
/// stateDiagram-v2
///     [*] --> Idle
///     Idle --> DualOptimization: learn()
///     DualOptimization --> PolicyFitting
///     PolicyFitting --> MemoryReset
///     MemoryReset --> Idle
///     DualOptimization --> Idle: error
///     PolicyFitting --> Idle: error
/// ```
///
/// 1. A copy of the policy is taken as the prior.
/// 2. The critic `V` and the temperature `η` are optimized for `num_iter`
///    steps on the dual loss `η ε + η log mean exp(A / η)`, where
///    `A = r + γ V(s') - V(s)`.
/// 3. The prior is attached to the policy if the policy supports it.
/// 4. The policy is fitted for `num_iter` steps on the weighted negative
///    log-likelihood with weights `exp(A / η)`.
/// 5. The memory is cleared.
///
/// The critic and the temperature share an optimizer, the policy has its own.
/// Gradients are clipped by global norm before every step. A non-finite loss or
/// gradient aborts the phase. Steps already applied are kept.
pub struct Reps<V, P>
where
    V: SubModel1<Input = Tensor, Output = Tensor>,
    V::Config: DeserializeOwned + Serialize + Clone,
    P: StochasticPolicy,
{
    critic: Value<V>,
    policy: P,
    dual: Dual,
    memory: ReplayMemory,
    critic_group: ParamGroup,
    policy_group: ParamGroup,
    learn_policy: bool,
    num_iter: usize,
    num_rollouts: usize,
    train_frequency: usize,
    reset_memory_after_learn: bool,
    batch_size: usize,
    importance_weighting: ImportanceWeighting,
    kl_regularization: f64,
    phase: LearnPhase,
    train: bool,
    rng: StdRng,
    device: Device,
    n_steps: usize,
    n_episodes: usize,
    n_learns: usize,
}

impl<V, P> Reps<V, P>
where
    V: SubModel1<Input = Tensor, Output = Tensor>,
    V::Config: DeserializeOwned + Serialize + Clone,
    P: StochasticPolicy,
{
    /// Constructs [`Reps`] agent.
    ///
    /// # Errors
    ///
    /// Fails with [`RepsError::Configuration`] if the configuration is
    /// inconsistent.
    pub fn build(config: RepsConfig<V::Config, P::Config>) -> Result<Self> {
        config.validate()?;
        let device = config.device.to_candle()?;
        let critic = Value::build(config.value_config, &device)?;
        let policy = P::build(config.policy_config, &device)?;
        let entropy_coef = match config.entropy_regularization {
            true => Some(config.entropy_coef),
            false => None,
        };
        let dual = Dual::build(
            &config.algorithm,
            config.eta_init,
            config.epsilon,
            entropy_coef,
            config.gamma,
            &device,
        )?;

        let critic_group = ParamGroup::new(
            "dual_loss",
            [critic.vars(), dual.vars()].concat(),
            &config.critic_opt_config,
            config.clip_gradient_val,
        )?;
        let policy_group = ParamGroup::new(
            "policy_loss",
            policy.vars(),
            &config.policy_opt_config,
            config.clip_gradient_val,
        )?;
        if !critic_group.is_disjoint(&policy_group) {
            return Err(RepsError::config("critic and policy share parameters").into());
        }
        let memory = ReplayMemory::build(&config.memory)?;

        Ok(Self {
            critic,
            policy,
            dual,
            memory,
            critic_group,
            policy_group,
            learn_policy: config.learn_policy,
            num_iter: config.num_iter,
            num_rollouts: config.num_rollouts,
            train_frequency: config.train_frequency,
            reset_memory_after_learn: config.reset_memory_after_learn,
            batch_size: config.batch_size,
            importance_weighting: config.importance_weighting,
            kl_regularization: config.kl_regularization,
            phase: LearnPhase::Idle,
            train: false,
            rng: StdRng::seed_from_u64(config.seed),
            device,
            n_steps: 0,
            n_episodes: 0,
            n_learns: 0,
        })
    }

    fn sample_batch(&mut self) -> Result<TensorBatch> {
        let batch = self.memory.sample_batch(self.batch_size)?;
        TensorBatch::from_batch(&batch, &self.device)
    }

    fn dual_step(&mut self) -> Result<Losses> {
        let batch = self.sample_batch()?;
        let adv = self.dual.advantage(&self.critic, &batch)?;
        let loss = self.dual.loss(&adv)?;
        let GradNorm { total, .. } = self.critic_group.backward_step(&loss)?;
        let (td_error_mean, td_error_abs_max) = mean_abs_max(&adv.detach())?;

        Ok(Losses {
            dual_loss: Some(loss.to_scalar::<f32>()?),
            td_error_mean,
            td_error_abs_max,
            eta: self.dual.eta_value()?,
            grad_norm: total,
            ..Default::default()
        })
    }

    fn policy_step(&mut self) -> Result<Losses> {
        let batch = self.sample_batch()?;
        let adv = self.dual.advantage(&self.critic, &batch)?.detach();
        let eta = self.dual.eta()?.detach();
        let weights = importance_weights(&adv, &eta, self.importance_weighting)?;
        let loss = policy_loss(&self.policy, &batch, &weights, self.kl_regularization)?;
        let GradNorm { total, .. } = self.policy_group.backward_step(&loss)?;
        let (td_error_mean, td_error_abs_max) = mean_abs_max(&adv)?;
        let weight_max = weights.max(0)?.to_scalar::<f32>()?;

        Ok(Losses {
            policy_loss: Some(loss.to_scalar::<f32>()?),
            td_error_mean,
            td_error_abs_max,
            eta: eta.to_scalar::<f32>()?,
            weight_max: Some(weight_max),
            grad_norm: total,
            ..Default::default()
        })
    }

    fn enter(&mut self, phase: LearnPhase) {
        debug!("{:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn learn_(&mut self) -> Result<Record> {
        info!(
            "Start learning phase {} on {} transitions",
            self.n_learns,
            self.memory.len()
        );
        let mut record = Record::empty();
        let prior = self.policy.snapshot()?;

        self.enter(LearnPhase::DualOptimization);
        let mut dual_losses = Vec::with_capacity(self.num_iter);
        for i in 0..self.num_iter {
            let losses = self.dual_step()?;
            let dual_loss = losses.dual_loss.unwrap_or(f32::NAN);
            debug!(
                "dual step {}: loss = {}, eta = {}, grad_norm = {}",
                i, dual_loss, losses.eta, losses.grad_norm
            );
            dual_losses.push(dual_loss);
            if i + 1 == self.num_iter {
                record.merge_inplace(losses.to_record("grad_norm_critic"));
            }
        }
        record.insert("dual_loss", RecordValue::Array1(dual_losses));
        info!("Dual optimization done, eta = {}", self.dual.eta_value()?);

        self.enter(LearnPhase::PolicyFitting);
        if self.policy.supports_prior() {
            self.policy.attach_prior(prior);
        }
        if self.learn_policy {
            let mut policy_losses = Vec::with_capacity(self.num_iter);
            for i in 0..self.num_iter {
                let losses = self.policy_step()?;
                let policy_loss = losses.policy_loss.unwrap_or(f32::NAN);
                debug!(
                    "policy step {}: loss = {}, grad_norm = {}",
                    i, policy_loss, losses.grad_norm
                );
                policy_losses.push(policy_loss);
                if i + 1 == self.num_iter {
                    let r = losses.to_record("grad_norm_policy");
                    for key in ["weight_max", "grad_norm_policy"].iter() {
                        if let Some(v) = r.get(key) {
                            record.insert(*key, v.clone());
                        }
                    }
                }
            }
            record.insert("policy_loss", RecordValue::Array1(policy_losses));
            info!("Policy fitting done");
        }

        self.enter(LearnPhase::MemoryReset);
        if self.reset_memory_after_learn {
            self.memory.reset();
        }

        Ok(record)
    }

    /// Returns the replay memory.
    pub fn memory(&self) -> &ReplayMemory {
        &self.memory
    }

    /// Returns the policy.
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Returns the critic.
    pub fn critic(&self) -> &Value<V> {
        &self.critic
    }

    /// Returns the dual module.
    pub fn dual(&self) -> &Dual {
        &self.dual
    }

    /// Returns the current temperature.
    pub fn eta(&self) -> Result<f32> {
        self.dual.eta_value()
    }

    /// Returns the current phase. [`LearnPhase::Idle`] outside of [`Agent::learn()`].
    pub fn phase(&self) -> LearnPhase {
        self.phase
    }

    /// Returns the number of completed learning phases.
    pub fn n_learns(&self) -> usize {
        self.n_learns
    }
}

impl<V, P> Agent for Reps<V, P>
where
    V: SubModel1<Input = Tensor, Output = Tensor>,
    V::Config: DeserializeOwned + Serialize + Clone,
    P: StochasticPolicy,
{
    fn train(&mut self) {
        self.train = true;
    }

    fn eval(&mut self) {
        self.train = false;
    }

    fn is_train(&self) -> bool {
        self.train
    }

    fn act(&mut self, state: &[f32]) -> Result<Vec<f32>> {
        let obs = Tensor::from_slice(state, (1, state.len()), &self.device)?;
        self.policy.sample(&obs, &mut self.rng, self.train)
    }

    /// Stores the transition in training mode and learns every
    /// `train_frequency` steps once the memory holds a batch.
    fn observe(&mut self, transition: Transition) -> Result<Option<Record>> {
        if !self.train {
            return Ok(None);
        }
        self.memory.append(transition);
        self.n_steps += 1;

        if self.train_frequency > 0
            && self.n_steps % self.train_frequency == 0
            && self.memory.len() >= self.batch_size
        {
            return Ok(Some(self.learn()?));
        }
        Ok(None)
    }

    /// Learns every `num_rollouts` episodes in training mode.
    fn end_episode(&mut self) -> Result<Option<Record>> {
        if !self.train {
            return Ok(None);
        }
        self.n_episodes += 1;

        if self.num_rollouts > 0 && self.n_episodes % self.num_rollouts == 0 {
            return Ok(Some(self.learn()?));
        }
        Ok(None)
    }

    fn learn(&mut self) -> Result<Record> {
        let result = self.learn_();

        // The prior lives only within a phase
        self.policy.detach_prior();
        self.enter(LearnPhase::Idle);

        let record = result?;
        self.n_learns += 1;
        Ok(record)
    }

    fn save_params(&self, path: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(path)?;

        let mut paths = vec![
            self.critic.save(path.join("critic"))?,
            self.policy.save(path.join("policy"))?,
        ];
        if let Some(p) = self.dual.save(path.join("dual"))? {
            paths.push(p);
        }

        Ok(paths)
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        self.critic.load(path.join("critic"))?;
        self.policy.load(path.join("policy"))?;
        self.dual.load(path.join("dual"))?;

        Ok(())
    }
}
