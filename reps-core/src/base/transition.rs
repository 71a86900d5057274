//! Transition.

/// A transition `(s_t, a_t, r_t, s_t+1, done_t)` collected from an environment.
///
/// Transitions are immutable once stored in a
/// [`ReplayMemory`](crate::replay_memory::ReplayMemory).
/// Discrete actions are stored as a single element holding the action index.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// State `s_t`.
    pub state: Vec<f32>,

    /// Action `a_t`.
    pub action: Vec<f32>,

    /// Reward `r_t`.
    pub reward: f32,

    /// Next state `s_t+1`.
    pub next_state: Vec<f32>,

    /// `true` if `s_t+1` is terminal. The value of a terminal state is not bootstrapped.
    pub done: bool,
}

impl Transition {
    /// Constructs a [`Transition`].
    pub fn new(
        state: Vec<f32>,
        action: Vec<f32>,
        reward: f32,
        next_state: Vec<f32>,
        done: bool,
    ) -> Self {
        Self {
            state,
            action,
            reward,
            next_state,
            done,
        }
    }
}
