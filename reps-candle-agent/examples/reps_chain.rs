use anyhow::{ensure, Result};
use clap::{Parser, ValueEnum};
use log::info;
use rand::{rngs::StdRng, Rng, SeedableRng};
use reps_candle_agent::{
    opt::OptimizerConfig,
    policy::{CategoricalPolicy, CategoricalPolicyConfig},
    reps::{Algorithm, Reps, RepsConfig},
    tabular::{Tabular, TabularConfig},
    value::ValueConfig,
};
use reps_core::{replay_memory::ReplayMemoryConfig, rollout_episode, Agent, Env, Step};
use std::path::PathBuf;

const NUM_STATES: usize = 5;
const NUM_ACTIONS: usize = 5;
const DISCOUNT_FACTOR: f32 = 0.99;
const MAX_STEPS: usize = 100;
const EPSILON: f64 = 1.0;
const NUM_ITER: usize = 200;
const NUM_ROLLOUTS: usize = 15;
const BATCH_SIZE: usize = 100;
const REPLAY_MEMORY_CAPACITY: usize = 10000;
const LR_CRITIC: f64 = 5e-4;
const LR_POLICY: f64 = 5e-3;
const N_EPISODES_PER_EVAL: usize = 20;

/// MDP with random transitions and rewards, fixed by a seed.
struct RandomMdp {
    transitions: Vec<Vec<usize>>,
    rewards: Vec<Vec<f32>>,
    state: usize,
    t: usize,
    rng: StdRng,
}

impl RandomMdp {
    fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let transitions = (0..NUM_STATES)
            .map(|_| (0..NUM_ACTIONS).map(|_| rng.gen_range(0..NUM_STATES)).collect())
            .collect();
        let rewards = (0..NUM_STATES)
            .map(|_| (0..NUM_ACTIONS).map(|_| rng.gen::<f32>()).collect())
            .collect();
        Self {
            transitions,
            rewards,
            state: 0,
            t: 0,
            rng,
        }
    }
}

impl Env for RandomMdp {
    fn reset(&mut self) -> Result<Vec<f32>> {
        self.state = self.rng.gen_range(0..NUM_STATES);
        self.t = 0;
        Ok(vec![self.state as f32])
    }

    fn step(&mut self, act: &[f32]) -> Result<Step> {
        let a = act[0] as usize;
        ensure!(a < NUM_ACTIONS, "Invalid action {}", a);
        let reward = self.rewards[self.state][a];
        self.state = self.transitions[self.state][a];
        self.t += 1;

        Ok(Step {
            next_state: vec![self.state as f32],
            reward,
            is_terminated: false,
            is_truncated: self.t >= MAX_STEPS,
        })
    }
}

#[derive(Clone, Debug, ValueEnum)]
enum Algo {
    Reps,
    OptimalIs,
}

/// Train REPS or OptimalIS agent in a random tabular MDP
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Algorithm
    #[arg(short, long, value_enum, default_value_t = Algo::Reps)]
    algo: Algo,

    /// Number of training episodes
    #[arg(short, long, default_value_t = 300)]
    episodes: usize,

    /// Temperature of OptimalIS
    #[arg(long, default_value_t = 1.0)]
    eta: f64,

    /// Random seed
    #[arg(short, long, default_value_t = 0)]
    seed: u64,

    /// Directory where the configuration and the parameters are saved
    #[arg(short, long)]
    model_dir: Option<PathBuf>,
}

type Config = RepsConfig<TabularConfig, CategoricalPolicyConfig<TabularConfig>>;

fn create_agent_config(args: &Args) -> Config {
    let algorithm = match args.algo {
        Algo::Reps => Algorithm::Reps,
        Algo::OptimalIs => Algorithm::OptimalIs { eta: args.eta },
    };
    RepsConfig::default()
        .value_config(ValueConfig::default().value_config(TabularConfig::new(NUM_STATES, 1)))
        .policy_config(
            CategoricalPolicyConfig::default()
                .logits_config(TabularConfig::new(NUM_STATES, NUM_ACTIONS)),
        )
        .algorithm(algorithm)
        .epsilon(EPSILON)
        .discount_factor(DISCOUNT_FACTOR)
        .entropy_regularization(true, 1.0)
        .num_iter(NUM_ITER)
        .num_rollouts(NUM_ROLLOUTS)
        .batch_size(BATCH_SIZE)
        .memory(
            ReplayMemoryConfig::default()
                .capacity(REPLAY_MEMORY_CAPACITY)
                .seed(args.seed),
        )
        .critic_opt_config(OptimizerConfig::default().learning_rate(LR_CRITIC))
        .policy_opt_config(OptimizerConfig::default().learning_rate(LR_POLICY))
        .seed(args.seed)
}

fn evaluate<A: Agent>(agent: &mut A, env: &mut RandomMdp) -> Result<f32> {
    agent.eval();
    let mut sum = 0f32;
    for _ in 0..N_EPISODES_PER_EVAL {
        sum += rollout_episode(env, agent, MAX_STEPS, DISCOUNT_FACTOR)?.discounted_return;
    }
    agent.train();
    Ok(sum / N_EPISODES_PER_EVAL as f32)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = create_agent_config(&args);
    if let Some(model_dir) = &args.model_dir {
        std::fs::create_dir_all(model_dir)?;
        config.save(model_dir.join("agent.yaml"))?;
    }
    let mut agent = Reps::<Tabular, CategoricalPolicy<Tabular>>::build(config)?;
    let mut env = RandomMdp::new(args.seed);

    info!("Before training: {}", evaluate(&mut agent, &mut env)?);
    agent.train();
    for episode in 0..args.episodes {
        let rollout = rollout_episode(&mut env, &mut agent, MAX_STEPS, DISCOUNT_FACTOR)?;
        for record in rollout.records.iter() {
            info!(
                "Episode {}: eta = {}, return = {}",
                episode,
                record.get_scalar("eta")?,
                evaluate(&mut agent, &mut env)?
            );
        }
    }

    if let Some(model_dir) = &args.model_dir {
        agent.save_params(model_dir)?;
    }

    Ok(())
}
