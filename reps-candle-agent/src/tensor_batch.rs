use anyhow::{ensure, Result};
use candle_core::{Device, Tensor};
use reps_core::replay_memory::Batch;

/// Tensors of a sampled [`Batch`] with the batch size `b` in the first dimension.
///
/// [`Batch`]: reps_core::replay_memory::Batch
#[derive(Clone, Debug)]
pub struct TensorBatch {
    /// States, `[b, state_dim]`.
    pub obs: Tensor,

    /// Actions, `[b, action_dim]`.
    pub act: Tensor,

    /// Next states, `[b, state_dim]`.
    pub next_obs: Tensor,

    /// Rewards, `[b]`.
    pub reward: Tensor,

    /// Terminal flags of the next states.
    pub done: Vec<bool>,
}

fn stack(rows: Vec<&[f32]>, what: &str, device: &Device) -> Result<Tensor> {
    let dim = rows.first().map(|r| r.len()).unwrap_or(0);
    ensure!(
        rows.iter().all(|r| r.len() == dim),
        "{} in the batch have different dimensions",
        what
    );
    let batch_size = rows.len();
    let data = rows.concat();
    Ok(Tensor::from_vec(data, (batch_size, dim), device)?)
}

impl TensorBatch {
    /// Converts a [`Batch`] to tensors on the given device.
    pub fn from_batch(batch: &Batch, device: &Device) -> Result<Self> {
        let trs = &batch.observations;
        let obs = stack(trs.iter().map(|t| t.state.as_slice()).collect(), "states", device)?;
        let act = stack(trs.iter().map(|t| t.action.as_slice()).collect(), "actions", device)?;
        let next_obs = stack(
            trs.iter().map(|t| t.next_state.as_slice()).collect(),
            "next states",
            device,
        )?;
        ensure!(
            obs.dims() == next_obs.dims(),
            "states and next states have different dimensions"
        );
        let reward = Tensor::from_vec(batch.rewards(), (trs.len(),), device)?;
        let done = trs.iter().map(|t| t.done).collect();

        Ok(Self {
            obs,
            act,
            next_obs,
            reward,
            done,
        })
    }

    /// Returns the batch size.
    pub fn len(&self) -> usize {
        self.done.len()
    }

    /// Returns `true` if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use reps_core::Transition;

    #[test]
    fn test_from_batch() -> Result<()> {
        let batch = Batch {
            observations: vec![
                Transition::new(vec![0.0, 1.0], vec![2.0], 1.0, vec![1.0, 0.0], false),
                Transition::new(vec![1.0, 0.0], vec![0.0], -1.0, vec![0.0, 1.0], true),
            ],
            indices: vec![0, 1],
            weights: vec![1.0, 1.0],
        };
        let tb = TensorBatch::from_batch(&batch, &Device::Cpu)?;
        assert_eq!(tb.obs.dims(), &[2, 2]);
        assert_eq!(tb.act.to_vec2::<f32>()?, vec![vec![2.0], vec![0.0]]);
        assert_eq!(tb.reward.to_vec1::<f32>()?, vec![1.0, -1.0]);
        assert_eq!(tb.done, vec![false, true]);
        assert_eq!(tb.len(), 2);

        Ok(())
    }

    #[test]
    fn test_inconsistent_dimensions() {
        let batch = Batch {
            observations: vec![
                Transition::new(vec![0.0], vec![0.0], 0.0, vec![1.0], false),
                Transition::new(vec![0.0, 1.0], vec![0.0], 0.0, vec![1.0, 0.0], false),
            ],
            indices: vec![0, 1],
            weights: vec![1.0, 1.0],
        };
        assert!(TensorBatch::from_batch(&batch, &Device::Cpu).is_err());
    }
}
