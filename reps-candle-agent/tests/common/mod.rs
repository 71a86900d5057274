//! A deterministic tabular MDP shared by the integration tests.
#![allow(dead_code)]
use anyhow::{ensure, Result};
use reps_candle_agent::{
    policy::{CategoricalPolicy, CategoricalPolicyConfig},
    reps::{Reps, RepsConfig},
    tabular::{Tabular, TabularConfig},
    value::ValueConfig,
};
use reps_core::{replay_memory::ReplayMemoryConfig, Env, Step};

pub const NUM_STATES: usize = 5;
pub const NUM_ACTIONS: usize = 5;

pub type Agent = Reps<Tabular, CategoricalPolicy<Tabular>>;
pub type Config = RepsConfig<TabularConfig, CategoricalPolicyConfig<TabularConfig>>;

/// Ring of states where action `a` moves from state `s` to `(s + a) % n`.
///
/// With a goal, the reward is `1` on entering the goal, which terminates the
/// episode. Without a goal, every step is rewarded with `1` and episodes are
/// only truncated.
pub struct ChainEnv {
    state: usize,
    goal: Option<usize>,
    max_steps: usize,
    t: usize,
}

impl ChainEnv {
    pub fn new(goal: Option<usize>, max_steps: usize) -> Self {
        Self {
            state: 0,
            goal,
            max_steps,
            t: 0,
        }
    }
}

impl Env for ChainEnv {
    fn reset(&mut self) -> Result<Vec<f32>> {
        self.state = 0;
        self.t = 0;
        Ok(vec![0.0])
    }

    fn step(&mut self, act: &[f32]) -> Result<Step> {
        let a = act[0] as usize;
        ensure!(a < NUM_ACTIONS, "Invalid action {}", a);
        self.state = (self.state + a) % NUM_STATES;
        self.t += 1;

        let (reward, is_terminated) = match self.goal {
            Some(goal) => match self.state == goal {
                true => (1.0, true),
                false => (0.0, false),
            },
            None => (1.0, false),
        };

        Ok(Step {
            next_state: vec![self.state as f32],
            reward,
            is_terminated,
            is_truncated: self.t >= self.max_steps,
        })
    }
}

/// Configuration of a tabular agent with zero-initialized tables.
pub fn tabular_config() -> Config {
    RepsConfig::default()
        .value_config(ValueConfig::default().value_config(TabularConfig::new(NUM_STATES, 1)))
        .policy_config(
            CategoricalPolicyConfig::default()
                .logits_config(TabularConfig::new(NUM_STATES, NUM_ACTIONS)),
        )
        .memory(ReplayMemoryConfig::default().capacity(100).seed(0))
        .batch_size(50)
        .num_rollouts(0)
        .train_frequency(0)
}
