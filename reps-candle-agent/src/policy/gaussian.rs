//! Diagonal Gaussian policy over continuous actions.
use super::StochasticPolicy;
use crate::{
    model::SubModel1,
    util::{copy_vars, reinit_linear_vars},
};
use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor, Var, D};
use candle_nn::{Init, VarBuilder, VarMap};
use log::info;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    f64::consts::PI,
    fs::File,
    io::{BufReader, Write},
    path::{Path, PathBuf},
};

fn default_supports_prior() -> bool {
    true
}

fn default_log_std_min() -> f64 {
    -20.0
}

fn default_log_std_max() -> f64 {
    2.0
}

/// Configuration of [`GaussianPolicy`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct GaussianPolicyConfig<P> {
    /// Configuration of the model outputting the mean of actions.
    pub mean_config: Option<P>,

    /// Dimension of actions.
    pub action_dim: usize,

    /// Initial value of the log standard deviation.
    #[serde(default)]
    pub log_std_init: f64,

    /// Lower bound of the log standard deviation.
    #[serde(default = "default_log_std_min")]
    pub log_std_min: f64,

    /// Upper bound of the log standard deviation.
    #[serde(default = "default_log_std_max")]
    pub log_std_max: f64,

    /// If `false`, no prior is attached and the KL penalty is skipped.
    #[serde(default = "default_supports_prior")]
    pub supports_prior: bool,

    /// If set, weights and biases of linear layers are re-initialized with this seed.
    pub seed: Option<u64>,
}

impl<P> Default for GaussianPolicyConfig<P> {
    fn default() -> Self {
        Self {
            mean_config: None,
            action_dim: 1,
            log_std_init: 0.0,
            log_std_min: default_log_std_min(),
            log_std_max: default_log_std_max(),
            supports_prior: true,
            seed: None,
        }
    }
}

impl<P> GaussianPolicyConfig<P>
where
    P: DeserializeOwned + Serialize,
{
    /// Sets the configuration of the mean model and the dimension of actions.
    pub fn mean_config(mut self, v: P, action_dim: usize) -> Self {
        self.mean_config = Some(v);
        self.action_dim = action_dim;
        self
    }

    /// Sets the initial value of the log standard deviation.
    pub fn log_std_init(mut self, v: f64) -> Self {
        self.log_std_init = v;
        self
    }

    /// Sets if the policy accepts a prior.
    pub fn supports_prior(mut self, v: bool) -> Self {
        self.supports_prior = v;
        self
    }

    /// Sets the seed of parameter initialization.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Loads [`GaussianPolicyConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`GaussianPolicyConfig`] as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Policy `π(a|s) = N(a; μ(s), diag(σ²))` with a state-independent `σ`.
pub struct GaussianPolicy<P>
where
    P: SubModel1<Input = Tensor, Output = Tensor>,
    P::Config: DeserializeOwned + Serialize + Clone,
{
    config: GaussianPolicyConfig<P::Config>,
    device: Device,
    varmap: VarMap,
    mean: P,
    log_std: Tensor,
    prior: Option<Box<Self>>,
}

impl<P> GaussianPolicy<P>
where
    P: SubModel1<Input = Tensor, Output = Tensor>,
    P::Config: DeserializeOwned + Serialize + Clone,
{
    /// Returns the mean `[b, action_dim]` and the clamped log standard deviation `[action_dim]`.
    pub fn forward(&self, obs: &Tensor) -> Result<(Tensor, Tensor)> {
        let mean = self.mean.forward(obs)?;
        let log_std = self
            .log_std
            .clamp(self.config.log_std_min, self.config.log_std_max)?;
        Ok((mean, log_std))
    }
}

impl<P> StochasticPolicy for GaussianPolicy<P>
where
    P: SubModel1<Input = Tensor, Output = Tensor>,
    P::Config: DeserializeOwned + Serialize + Clone,
{
    type Config = GaussianPolicyConfig<P::Config>;

    fn build(config: Self::Config, device: &Device) -> Result<Self> {
        let mean_config = config
            .mean_config
            .clone()
            .context("mean_config is not set.")?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device).set_prefix("policy");
        let mean = P::build(vb.clone(), mean_config)?;
        let log_std = vb.get_with_hints(
            (config.action_dim,),
            "log_std",
            Init::Const(config.log_std_init),
        )?;
        if let Some(seed) = config.seed {
            reinit_linear_vars(&varmap, seed)?;
        }

        Ok(Self {
            config,
            device: device.clone(),
            varmap,
            mean,
            log_std,
            prior: None,
        })
    }

    fn log_prob(&self, obs: &Tensor, act: &Tensor) -> Result<Tensor> {
        let (mean, log_std) = self.forward(obs)?;
        let act = act.to_device(&self.device)?;
        let z = act.broadcast_sub(&mean)?.broadcast_div(&log_std.exp()?)?;
        let lp = (z.sqr()?.affine(-0.5, -0.5 * (2.0 * PI).ln())?).broadcast_sub(&log_std)?;
        Ok(lp.sum(D::Minus1)?)
    }

    fn kl_divergence(&self, prior: &Self, obs: &Tensor) -> Result<Tensor> {
        let (mean_p, log_std_p) = prior.forward(obs)?;
        let (mean_p, log_std_p) = (mean_p.detach(), log_std_p.detach());
        let (mean, log_std) = self.forward(obs)?;

        // log σ - log σ_p + (σ_p² + (μ_p - μ)²) / (2σ²) - 1/2
        let var = (&log_std * 2.0)?.exp()?;
        let var_p = (&log_std_p * 2.0)?.exp()?;
        let diff_sq = (mean_p - mean)?.sqr()?;
        let ratio = diff_sq.broadcast_add(&var_p)?.broadcast_div(&(var * 2.0)?)?;
        let kl = ratio
            .broadcast_add(&(log_std - log_std_p)?)?
            .affine(1.0, -0.5)?;
        Ok(kl.sum(D::Minus1)?)
    }

    fn sample(&self, obs: &Tensor, rng: &mut StdRng, train: bool) -> Result<Vec<f32>> {
        let (mean, log_std) = self.forward(obs)?;
        let mean = mean.squeeze(0)?.to_vec1::<f32>()?;
        if !train {
            return Ok(mean);
        }
        let std = log_std.exp()?.to_vec1::<f32>()?;
        Ok(mean
            .iter()
            .zip(std.iter())
            .map(|(m, s)| {
                let e: f32 = StandardNormal.sample(&mut *rng);
                m + s * e
            })
            .collect())
    }

    fn vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    fn supports_prior(&self) -> bool {
        self.config.supports_prior
    }

    fn snapshot(&self) -> Result<Self> {
        let copy = Self::build(self.config.clone(), &self.device)?;
        copy_vars(&copy.varmap, &self.varmap)?;
        Ok(copy)
    }

    fn prior(&self) -> Option<&Self> {
        self.prior.as_deref()
    }

    fn attach_prior(&mut self, prior: Self) {
        self.prior = Some(Box::new(prior));
    }

    fn detach_prior(&mut self) -> Option<Self> {
        self.prior.take().map(|p| *p)
    }

    fn save(&self, prefix: impl AsRef<Path>) -> Result<PathBuf> {
        let mut path = PathBuf::from(prefix.as_ref());
        path.set_extension("safetensors");
        self.varmap.save(path.as_path())?;
        info!("Save policy parameters to {:?}", path);

        Ok(path)
    }

    fn load(&mut self, prefix: impl AsRef<Path>) -> Result<()> {
        let mut path = PathBuf::from(prefix.as_ref());
        path.set_extension("safetensors");
        self.varmap.load(path.as_path())?;
        info!("Load policy parameters from {:?}", path);

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mlp::{Mlp, MlpConfig};
    use rand::SeedableRng;

    fn policy(log_std_init: f64) -> Result<GaussianPolicy<Mlp>> {
        let config = GaussianPolicyConfig::default()
            .mean_config(MlpConfig::new(2, vec![4], 2, false), 2)
            .log_std_init(log_std_init)
            .seed(1);
        GaussianPolicy::<Mlp>::build(config, &Device::Cpu)
    }

    #[test]
    fn test_log_prob_at_mean() -> Result<()> {
        let policy = policy(0.0)?;
        let obs = Tensor::new(&[[0.5f32, -1.0]], &Device::Cpu)?;
        let (mean, _) = policy.forward(&obs)?;
        let lp = policy.log_prob(&obs, &mean)?.to_vec1::<f32>()?;

        // Two dimensions of the standard normal density at zero
        let expected = -(2.0 * PI).ln() as f32;
        assert!((lp[0] - expected).abs() < 1e-5);

        Ok(())
    }

    #[test]
    fn test_kl_divergence() -> Result<()> {
        let policy = policy(0.0)?;
        let prior = policy.snapshot()?;
        let obs = Tensor::new(&[[0.5f32, -1.0], [1.0, 2.0]], &Device::Cpu)?;
        let kl = policy.kl_divergence(&prior, &obs)?.to_vec1::<f32>()?;
        assert!(kl.iter().all(|v| v.abs() < 1e-5));

        // Only the standard deviations differ: KL = Σ (log σ - log σ_p + σ_p²/(2σ²) - 1/2)
        let wider = policy(1.0)?;
        let kl = wider.kl_divergence(&prior, &obs)?.to_vec1::<f32>()?;
        let expected = 2.0 * (1.0 + (-2f32).exp() / 2.0 - 0.5);
        assert!(kl.iter().all(|v| (v - expected).abs() < 1e-5));

        Ok(())
    }

    #[test]
    fn test_sample() -> Result<()> {
        let policy = policy(-20.0)?;
        let mut rng = StdRng::seed_from_u64(0);
        let obs = Tensor::new(&[[0.5f32, -1.0]], &Device::Cpu)?;
        let mode = policy.sample(&obs, &mut rng, false)?;
        let a = policy.sample(&obs, &mut rng, true)?;
        assert_eq!(a.len(), 2);
        assert!(mode.iter().zip(a.iter()).all(|(m, a)| (m - a).abs() < 1e-6));

        Ok(())
    }
}
