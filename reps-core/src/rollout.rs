//! Interaction loop between an [`Env`] and an [`Agent`].
use crate::{record::Record, Agent, Env, Transition};
use anyhow::Result;
use log::{debug, info};

/// Summary of an episode run with [`rollout_episode`].
#[derive(Debug, Default)]
pub struct Rollout {
    /// Discounted sum of rewards.
    pub discounted_return: f32,

    /// Number of environment steps.
    pub steps: usize,

    /// Records of the learning phases triggered during the episode.
    pub records: Vec<Record>,
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Runs a single episode and feeds the transitions to the agent.
///
/// ```mermaid
/// graph LR
///     A[Agent]-->|action|B[Env]
///     B -->|Step|C[Transition]
///     C -->|Agent::observe|A
/// ```
///
/// The episode ends when the environment reports termination or truncation,
/// or after `max_steps` steps. [`Agent::end_episode`] is called in both cases.
/// Learning phases triggered by the agent's collection cadence run inside
/// this function, between two environment steps.
pub fn rollout_episode<E, A>(
    env: &mut E,
    agent: &mut A,
    max_steps: usize,
    gamma: f32,
) -> Result<Rollout>
where
    E: Env,
    A: Agent,
{
    let mut rollout = Rollout::default();
    let mut state = env.reset()?;
    let mut discount = 1f32;

    while rollout.steps < max_steps {
        let action = agent.act(&state)?;
        let step = env.step(&action)?;
        let is_done = step.is_done();

        rollout.discounted_return += discount * step.reward;
        rollout.steps += 1;
        discount *= gamma;

        let next_state = step.next_state.clone();
        let transition = Transition::new(
            state,
            action,
            step.reward,
            step.next_state,
            step.is_terminated,
        );
        if let Some(record) = agent.observe(transition)? {
            debug!("Learning phase triggered at step {}", rollout.steps);
            rollout.records.push(record);
        }

        if is_done {
            break;
        }
        state = next_state;
    }

    if let Some(record) = agent.end_episode()? {
        rollout.records.push(record);
    }
    info!(
        "Episode finished: steps = {}, discounted return = {}",
        rollout.steps, rollout.discounted_return
    );

    Ok(rollout)
}
