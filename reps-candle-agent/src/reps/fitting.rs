//! Weighted maximum likelihood fitting of the policy.
use super::ImportanceWeighting;
use crate::{policy::StochasticPolicy, TensorBatch};
use anyhow::Result;
use candle_core::Tensor;
use candle_nn::ops::softmax;
use log::trace;

/// Returns the importance weights of shape `[b]` for advantages of shape `[b]`.
///
/// The weights are detached from the graph, so the critic and the temperature
/// receive no gradient through them.
pub fn importance_weights(
    adv: &Tensor,
    eta: &Tensor,
    weighting: ImportanceWeighting,
) -> Result<Tensor> {
    let scaled = adv.detach().broadcast_div(&eta.detach())?;
    let w = match weighting {
        ImportanceWeighting::Raw => scaled.exp()?,
        ImportanceWeighting::SelfNormalized => {
            let n = scaled.dims1()? as f64;
            softmax(&scaled, 0)?.affine(n, 0.0)?
        }
    };
    Ok(w.detach())
}

/// Returns `-mean_i[w_i log π(a_i|s_i)] + kl_regularization * mean_s KL(prior ‖ π)`.
///
/// The KL term is added only if a prior is attached to the policy and
/// `kl_regularization` is positive.
pub fn policy_loss<P: StochasticPolicy>(
    policy: &P,
    batch: &TensorBatch,
    weights: &Tensor,
    kl_regularization: f64,
) -> Result<Tensor> {
    let logp = policy.log_prob(&batch.obs, &batch.act)?;
    debug_assert_eq!(logp.dims(), weights.dims());
    let mut loss = (logp * weights)?.mean_all()?.affine(-1.0, 0.0)?;

    if kl_regularization > 0.0 {
        if let Some(kl) = policy.kl_to_prior(&batch.obs)? {
            trace!("KL penalty to the prior");
            loss = (loss + kl.mean_all()?.affine(kl_regularization, 0.0)?)?;
        }
    }

    Ok(loss)
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_weights_are_monotonic() -> Result<()> {
        let adv = Tensor::new(&[-3f32, -0.5, 0.0, 0.1, 4.0], &Device::Cpu)?;
        for &eta in [0.1f32, 1.0, 10.0].iter() {
            let eta = Tensor::new(eta, &Device::Cpu)?;
            for &weighting in [ImportanceWeighting::Raw, ImportanceWeighting::SelfNormalized].iter()
            {
                let w = importance_weights(&adv, &eta, weighting)?.to_vec1::<f32>()?;
                assert!(w.windows(2).all(|p| p[0] < p[1]));
            }
        }
        Ok(())
    }

    #[test]
    fn test_raw_and_self_normalized_weights() -> Result<()> {
        let adv = Tensor::new(&[0f32, 1.0, 2.0, 3.0], &Device::Cpu)?;
        let eta = Tensor::new(2f32, &Device::Cpu)?;

        let w = importance_weights(&adv, &eta, ImportanceWeighting::Raw)?.to_vec1::<f32>()?;
        assert!((w[2] - 1f32.exp()).abs() < 1e-6);

        let w = importance_weights(&adv, &eta, ImportanceWeighting::SelfNormalized)?
            .to_vec1::<f32>()?;
        let mean = w.iter().sum::<f32>() / 4.0;
        assert!((mean - 1.0).abs() < 1e-5);
        Ok(())
    }
}
