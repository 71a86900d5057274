//! Optimizers and gradient clipping.
use anyhow::Result;
use candle_core::{backprop::GradStore, DType, Tensor, Var};
use candle_nn::{AdamW, Optimizer as _, ParamsAdamW};
use candle_optimisers::adam::{Adam, ParamsAdam};
use log::{trace, warn};
use reps_core::error::{ensure_finite, RepsError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Configuration of optimizer for training the parameters of an agent.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum OptimizerConfig {
    /// AdamW optimizer.
    AdamW {
        /// Learning rate.
        lr: f64,
        #[serde(default = "default_beta1")]
        /// Decay rate of the first moment.
        beta1: f64,
        #[serde(default = "default_beta2")]
        /// Decay rate of the second moment.
        beta2: f64,
        #[serde(default = "default_eps")]
        /// Term added to the denominator.
        eps: f64,
        #[serde(default = "default_weight_decay")]
        /// Weight decay.
        weight_decay: f64,
    },

    /// Adam optimizer.
    Adam {
        /// Learning rate.
        lr: f64,
    },
}

fn default_beta1() -> f64 {
    ParamsAdamW::default().beta1
}

fn default_beta2() -> f64 {
    ParamsAdamW::default().beta2
}

fn default_eps() -> f64 {
    ParamsAdamW::default().eps
}

fn default_weight_decay() -> f64 {
    ParamsAdamW::default().weight_decay
}

impl OptimizerConfig {
    /// Constructs an optimizer over the given variables.
    pub fn build(&self, vars: Vec<Var>) -> Result<Optimizer> {
        match &self {
            OptimizerConfig::AdamW {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            } => {
                let params = ParamsAdamW {
                    lr: *lr,
                    beta1: *beta1,
                    beta2: *beta2,
                    eps: *eps,
                    weight_decay: *weight_decay,
                };
                let opt = AdamW::new(vars, params)?;
                Ok(Optimizer::AdamW(opt))
            }
            OptimizerConfig::Adam { lr } => {
                let params = ParamsAdam {
                    lr: *lr,
                    ..ParamsAdam::default()
                };
                let opt = Adam::new(vars, params)?;
                Ok(Optimizer::Adam(opt))
            }
        }
    }

    /// Returns the learning rate.
    pub fn lr(&self) -> f64 {
        match self {
            Self::AdamW { lr, .. } => *lr,
            Self::Adam { lr } => *lr,
        }
    }

    /// Override learning rate.
    pub fn learning_rate(self, lr: f64) -> Self {
        match self {
            Self::AdamW {
                lr: _,
                beta1,
                beta2,
                eps,
                weight_decay,
            } => Self::AdamW {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            },
            Self::Adam { lr: _ } => Self::Adam { lr },
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam { lr: 5e-4 }
    }
}

/// Optimizers.
///
/// This is a thin wrapper of optimizers implementing [`candle_nn::Optimizer`].
pub enum Optimizer {
    /// AdamW optimizer.
    AdamW(AdamW),

    /// Adam optimizer.
    Adam(Adam),
}

impl Optimizer {
    /// Applies an update with the given gradients.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        match self {
            Self::AdamW(opt) => Ok(opt.step(grads)?),
            Self::Adam(opt) => Ok(opt.step(grads)?),
        }
    }
}

/// Gradient norms observed in a clipped optimization step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradNorm {
    /// Global norm before clipping.
    pub total: f32,

    /// Global norm after clipping.
    pub clipped: f32,
}

/// Returns the global L2 norm of the gradients of `vars`.
///
/// Variables without a gradient in `grads` are ignored. Squares are summed in
/// `f64`, so norms beyond `sqrt(f32::MAX)` are still finite.
pub fn grad_norm(grads: &GradStore, vars: &[Var]) -> Result<f32> {
    let mut sum_sq = 0f64;
    for var in vars.iter() {
        if let Some(grad) = grads.get(var.as_tensor()) {
            sum_sq += grad
                .to_dtype(DType::F64)?
                .sqr()?
                .sum_all()?
                .to_scalar::<f64>()?;
        }
    }
    Ok(sum_sq.sqrt() as f32)
}

/// Rescales the gradients of `vars` so that their global norm is at most `max_norm`.
pub fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> Result<GradNorm> {
    let total = grad_norm(grads, vars)?;
    ensure_finite("grad_norm", total)?;

    if (total as f64) <= max_norm {
        return Ok(GradNorm {
            total,
            clipped: total,
        });
    }

    let clip_coef = max_norm / (total as f64 + 1e-6);
    if clip_coef < 0.1 {
        warn!("Gradient norm {} is clipped to {}", total, max_norm);
    } else {
        trace!("Clip gradients: norm = {}, coef = {}", total, clip_coef);
    }
    let clipped_grads = vars
        .iter()
        .filter_map(|var| {
            grads
                .get(var.as_tensor())
                .map(|grad| grad.affine(clip_coef, 0.0).map(|g| (var.clone(), g)))
        })
        .collect::<Result<Vec<(Var, Tensor)>, candle_core::Error>>()?;
    for (var, grad) in clipped_grads {
        grads.insert(var.as_tensor(), grad);
    }

    Ok(GradNorm {
        total,
        clipped: (total as f64 * clip_coef) as f32,
    })
}

/// A set of variables updated by its own optimizer.
///
/// An agent holds one group per set of parameters trained against a
/// different loss. Groups never share a variable, so a step of one group
/// leaves the variables of the others untouched.
pub struct ParamGroup {
    name: String,
    vars: Vec<Var>,
    opt: Optimizer,
    clip_gradient_val: f64,
}

impl ParamGroup {
    /// Constructs a group with an optimizer built from `opt_config`.
    pub fn new(
        name: impl Into<String>,
        vars: Vec<Var>,
        opt_config: &OptimizerConfig,
        clip_gradient_val: f64,
    ) -> Result<Self> {
        if !(clip_gradient_val > 0.0) {
            return Err(RepsError::config("clip_gradient_val must be positive").into());
        }
        let opt = opt_config.build(vars.clone())?;

        Ok(Self {
            name: name.into(),
            vars,
            opt,
            clip_gradient_val,
        })
    }

    /// Returns the variables of this group.
    pub fn vars(&self) -> &[Var] {
        &self.vars
    }

    /// Returns `true` if no variable is shared with `other`.
    pub fn is_disjoint(&self, other: &ParamGroup) -> bool {
        let ids = self.vars.iter().map(|v| v.id()).collect::<HashSet<_>>();
        other.vars.iter().all(|v| !ids.contains(&v.id()))
    }

    /// Computes gradients of `loss`, clips them and updates the variables.
    ///
    /// # Errors
    ///
    /// Fails with [`RepsError::NumericalInstability`] without touching the
    /// variables if the loss or the gradient norm is not finite.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<GradNorm> {
        ensure_finite(&self.name, loss.to_scalar::<f32>()?)?;
        let mut grads = loss.backward()?;
        let norm = clip_grad_norm(&mut grads, &self.vars, self.clip_gradient_val)?;
        self.opt.step(&grads)?;
        Ok(norm)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_clip_grad_norm() -> Result<()> {
        let x = Var::new(&[1f32, -2.0, 3.0], &Device::Cpu)?;
        let y = Var::new(&[0.5f32], &Device::Cpu)?;
        let loss = ((x.as_tensor() * 1e6)?.sum_all()? + (y.as_tensor() * 1e6)?.sum_all()?)?;
        let vars = vec![x, y];

        let mut grads = loss.backward()?;
        let norm = clip_grad_norm(&mut grads, &vars, 1.0)?;
        assert!((norm.total - 2e6).abs() / 2e6 < 1e-5);

        let norm_after = grad_norm(&grads, &vars)?;
        assert!(norm_after <= 1.0 + 1e-5);
        assert!((norm_after - norm.clipped).abs() < 1e-4);

        Ok(())
    }

    #[test]
    fn test_small_gradients_are_untouched() -> Result<()> {
        let x = Var::new(&[0.1f32, 0.2], &Device::Cpu)?;
        let loss = x.as_tensor().sum_all()?;
        let vars = vec![x];

        let mut grads = loss.backward()?;
        let norm = clip_grad_norm(&mut grads, &vars, 10.0)?;
        assert_eq!(norm.total, norm.clipped);
        assert_eq!(grad_norm(&grads, &vars)?, norm.total);

        Ok(())
    }

    #[test]
    fn test_param_groups_are_independent() -> Result<()> {
        let a = Var::new(&[1f32], &Device::Cpu)?;
        let b = Var::new(&[1f32], &Device::Cpu)?;
        let opt_config = OptimizerConfig::Adam { lr: 0.1 };
        let mut group_a = ParamGroup::new("a", vec![a.clone()], &opt_config, 1.0)?;
        let group_b = ParamGroup::new("b", vec![b.clone()], &opt_config, 1.0)?;
        assert!(group_a.is_disjoint(&group_b));

        // The loss depends on both variables, only `a` is updated
        let loss = (a.as_tensor() * b.as_tensor())?.sum_all()?;
        group_a.backward_step(&loss)?;

        assert!(a.as_tensor().to_vec1::<f32>()?[0] < 1.0);
        assert_eq!(b.as_tensor().to_vec1::<f32>()?[0], 1.0);

        Ok(())
    }

    #[test]
    fn test_non_finite_loss_is_rejected() -> Result<()> {
        let a = Var::new(&[1f32], &Device::Cpu)?;
        let mut group = ParamGroup::new("loss", vec![a.clone()], &OptimizerConfig::default(), 1.0)?;
        let loss = (a.as_tensor() * f64::INFINITY)?.sum_all()?;

        let err = group.backward_step(&loss).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RepsError>(),
            Some(RepsError::NumericalInstability { .. })
        ));
        assert_eq!(a.as_tensor().to_vec1::<f32>()?[0], 1.0);

        Ok(())
    }
}
