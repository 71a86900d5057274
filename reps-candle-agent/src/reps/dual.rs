//! Dual function of REPS.
use super::Algorithm;
use crate::{
    model::SubModel1,
    util::{gamma_not_done, log_mean_exp},
    value::Value,
    TensorBatch,
};
use anyhow::Result;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{init::Init, ops::log_softmax, VarBuilder, VarMap};
use log::{info, trace};
use reps_core::error::RepsError;
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};

/// Returns the dual loss `η ε + η log mean_i exp(A_i / η)` of a batch of advantages.
///
/// * `adv` - Advantages of shape `[b]`.
/// * `eta` - Temperature, a 0-dimensional tensor.
/// * `epsilon` - KL bound. If `None`, the term `η ε` is omitted.
/// * `entropy_coef` - If given, `coef * KL(q ‖ uniform)` is added, where
///   `q = softmax(A / η)` is the weighting of the batch induced by the dual.
pub fn dual_loss(
    adv: &Tensor,
    eta: &Tensor,
    epsilon: Option<f64>,
    entropy_coef: Option<f64>,
) -> Result<Tensor> {
    let n = adv.dims1()?;
    let scaled = adv.broadcast_div(eta)?;
    let mut loss = eta.mul(&log_mean_exp(&scaled)?)?;

    if let Some(epsilon) = epsilon {
        loss = (eta.affine(epsilon, 0.0)? + loss)?;
    }

    if let Some(coef) = entropy_coef {
        // KL(q ‖ uniform) = Σ q log q + log N
        let log_q = log_softmax(&scaled, 0)?;
        let kl = (log_q.exp()? * &log_q)?
            .sum_all()?
            .affine(1.0, (n as f64).ln())?;
        trace!("KL of the batch weighting from uniform: {}", kl);
        loss = (loss + kl.affine(coef, 0.0)?)?;
    }

    Ok(loss)
}

/// The temperature `η` of REPS and the dual loss built on it.
///
/// A learned temperature is parameterized as `η = exp(log_η)`, so it stays
/// positive as long as `log_η` is finite.
pub struct Dual {
    varmap: VarMap,
    log_eta: Tensor,
    learned: bool,
    epsilon: Option<f64>,
    entropy_coef: Option<f64>,
    gamma: f32,
}

impl Dual {
    /// Constructs the temperature of the given variant of the algorithm.
    pub fn build(
        algorithm: &Algorithm,
        eta_init: f64,
        epsilon: f64,
        entropy_coef: Option<f64>,
        gamma: f32,
        device: &Device,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let (log_eta, learned, epsilon) = match algorithm {
            Algorithm::Reps => {
                let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
                let log_eta = vb.get_with_hints(1, "log_eta", Init::Const(eta_init.ln()))?;
                (log_eta, true, Some(epsilon))
            }
            Algorithm::OptimalIs { eta } => {
                let log_eta = Tensor::new(&[eta.ln() as f32], device)?;
                (log_eta, false, None)
            }
        };

        Ok(Self {
            varmap,
            log_eta,
            learned,
            epsilon,
            entropy_coef,
            gamma,
        })
    }

    /// Returns the temperature as a 0-dimensional tensor.
    ///
    /// # Errors
    ///
    /// Fails with [`RepsError::NumericalInstability`] if `η` is not finite or
    /// not positive.
    pub fn eta(&self) -> Result<Tensor> {
        let eta = self.log_eta.exp()?.squeeze(0)?;
        let v = eta.to_scalar::<f32>()?;
        if !(v.is_finite() && v > 0.0) {
            return Err(RepsError::numerical("eta", v).into());
        }
        Ok(eta)
    }

    /// Returns the value of the temperature.
    pub fn eta_value(&self) -> Result<f32> {
        Ok(self.eta()?.to_scalar::<f32>()?)
    }

    /// Returns `true` if the temperature is optimized.
    pub fn is_learned(&self) -> bool {
        self.learned
    }

    /// Returns the trainable variables. Empty for a fixed temperature.
    pub fn vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    /// Returns the advantages `r + γ V(s') (1 - done) - V(s)` of shape `[b]`.
    pub fn advantage<V>(&self, critic: &Value<V>, batch: &TensorBatch) -> Result<Tensor>
    where
        V: SubModel1<Input = Tensor, Output = Tensor>,
        V::Config: DeserializeOwned + Serialize + Clone,
    {
        let device = batch.reward.device();
        let gnd = gamma_not_done(self.gamma, &batch.done, device)?;
        let v = critic.forward(&batch.obs)?;
        let v_next = critic.forward(&batch.next_obs)?;
        let adv = ((&batch.reward + (gnd * v_next)?)? - v)?;
        debug_assert_eq!(adv.dims(), &[batch.len()]);
        Ok(adv)
    }

    /// Returns the dual loss of a batch of advantages.
    pub fn loss(&self, adv: &Tensor) -> Result<Tensor> {
        let eta = self.eta()?;
        dual_loss(adv, &eta, self.epsilon, self.entropy_coef)
    }

    /// Saves the temperature to prefix + ".safetensors" if it is learned.
    pub fn save(&self, prefix: impl AsRef<Path>) -> Result<Option<PathBuf>> {
        if !self.learned {
            return Ok(None);
        }
        let mut path = PathBuf::from(prefix.as_ref());
        path.set_extension("safetensors");
        self.varmap.save(path.as_path())?;
        info!("Save temperature to {:?}", path);
        Ok(Some(path))
    }

    /// Loads the temperature from prefix + ".safetensors" if it is learned.
    pub fn load(&mut self, prefix: impl AsRef<Path>) -> Result<()> {
        if !self.learned {
            return Ok(());
        }
        let mut path = PathBuf::from(prefix.as_ref());
        path.set_extension("safetensors");
        self.varmap.load(path.as_path())?;
        info!("Load temperature from {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn scalar(v: f32) -> Result<Tensor> {
        Ok(Tensor::new(v, &Device::Cpu)?)
    }

    #[test]
    fn test_zero_advantage() -> Result<()> {
        let adv = Tensor::zeros(16, DType::F32, &Device::Cpu)?;
        for &eta in [0.1f32, 1.0, 3.7, 250.0].iter() {
            for &epsilon in [0.01f64, 1.0, 5.0].iter() {
                let loss = dual_loss(&adv, &scalar(eta)?, Some(epsilon), None)?;
                assert_eq!(loss.to_scalar::<f32>()?, eta * epsilon as f32);
            }
        }
        Ok(())
    }

    #[test]
    fn test_large_advantages() -> Result<()> {
        let base = [0.3f64, -1.2, 0.7, 0.0, 2.5];
        let k = 1e6;
        let (eta, epsilon) = (2.0f64, 0.5f64);
        let adv = base.iter().map(|a| (a * k) as f32).collect::<Vec<_>>();
        let adv = Tensor::new(adv.as_slice(), &Device::Cpu)?;
        let loss = dual_loss(&adv, &scalar(eta as f32)?, Some(epsilon), None)?;
        let loss = loss.to_scalar::<f32>()? as f64;

        // Reference in f64
        let xs = base.iter().map(|a| a * k / eta).collect::<Vec<_>>();
        let m = xs.iter().cloned().fold(f64::MIN, f64::max);
        let lme = m + (xs.iter().map(|x| (x - m).exp()).sum::<f64>() / xs.len() as f64).ln();
        let expected = eta * epsilon + eta * lme;

        assert!(loss.is_finite());
        assert!(((loss - expected) / expected).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_entropy_regularization() -> Result<()> {
        let eta = scalar(1.0)?;

        // Uniform advantages induce the uniform weighting
        let adv = Tensor::new(&[0.5f32, 0.5, 0.5, 0.5], &Device::Cpu)?;
        let l0 = dual_loss(&adv, &eta, Some(1.0), None)?.to_scalar::<f32>()?;
        let l1 = dual_loss(&adv, &eta, Some(1.0), Some(1.0))?.to_scalar::<f32>()?;
        assert!((l0 - l1).abs() < 1e-5);

        // A concentrated weighting is penalized, at most by log N
        let adv = Tensor::new(&[10f32, 0.0, 0.0, 0.0], &Device::Cpu)?;
        let l0 = dual_loss(&adv, &eta, Some(1.0), None)?.to_scalar::<f32>()?;
        let l1 = dual_loss(&adv, &eta, Some(1.0), Some(1.0))?.to_scalar::<f32>()?;
        assert!(l1 > l0 + 1.0);
        assert!(l1 <= l0 + 4f32.ln() + 1e-5);
        Ok(())
    }

    #[test]
    fn test_fixed_temperature() -> Result<()> {
        let dual = Dual::build(
            &Algorithm::OptimalIs { eta: 0.5 },
            1.0,
            1.0,
            None,
            0.9,
            &Device::Cpu,
        )?;
        assert!(!dual.is_learned());
        assert!(dual.vars().is_empty());
        assert!((dual.eta_value()? - 0.5).abs() < 1e-6);

        // No KL bound term
        let adv = Tensor::zeros(4, DType::F32, &Device::Cpu)?;
        assert_eq!(dual.loss(&adv)?.to_scalar::<f32>()?, 0.0);
        Ok(())
    }

    #[test]
    fn test_non_positive_temperature() -> Result<()> {
        let dual = Dual::build(&Algorithm::Reps, 1.0, 1.0, None, 0.9, &Device::Cpu)?;
        assert_eq!(dual.vars().len(), 1);
        dual.vars()[0].set(&Tensor::new(&[-200f32], &Device::Cpu)?)?;

        let err = dual.eta().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RepsError>(),
            Some(RepsError::NumericalInstability { .. })
        ));
        Ok(())
    }
}
