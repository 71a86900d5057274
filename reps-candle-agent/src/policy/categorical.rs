//! Categorical policy over a finite set of actions.
use super::StochasticPolicy;
use crate::{
    model::SubModel1,
    util::{copy_vars, reinit_linear_vars},
};
use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor, Var, D};
use candle_nn::{
    ops::{log_softmax, softmax},
    VarBuilder, VarMap,
};
use log::info;
use rand::{distributions::WeightedIndex, prelude::Distribution, rngs::StdRng};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::{Path, PathBuf},
};

fn default_supports_prior() -> bool {
    true
}

/// Configuration of [`CategoricalPolicy`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct CategoricalPolicyConfig<P> {
    /// Configuration of the model outputting the logits of actions.
    pub logits_config: Option<P>,

    /// If `false`, no prior is attached and the KL penalty is skipped.
    #[serde(default = "default_supports_prior")]
    pub supports_prior: bool,

    /// If set, weights and biases of linear layers are re-initialized with this seed.
    pub seed: Option<u64>,
}

impl<P> Default for CategoricalPolicyConfig<P> {
    fn default() -> Self {
        Self {
            logits_config: None,
            supports_prior: true,
            seed: None,
        }
    }
}

impl<P> CategoricalPolicyConfig<P>
where
    P: DeserializeOwned + Serialize,
{
    /// Sets the configuration of the logits model.
    pub fn logits_config(mut self, v: P) -> Self {
        self.logits_config = Some(v);
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

    /// Loads [`CategoricalPolicyConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`CategoricalPolicyConfig`] as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Policy `π(a|s) = softmax(f(s))_a` over actions `0..n`.
///
/// Actions are given as tensors of shape `[b, 1]` holding the action indices.
pub struct CategoricalPolicy<P>
where
    P: SubModel1<Input = Tensor, Output = Tensor>,
    P::Config: DeserializeOwned + Serialize + Clone,
{
    config: CategoricalPolicyConfig<P::Config>,
    device: Device,
    varmap: VarMap,
    logits: P,
    prior: Option<Box<Self>>,
}

impl<P> CategoricalPolicy<P>
where
    P: SubModel1<Input = Tensor, Output = Tensor>,
    P::Config: DeserializeOwned + Serialize + Clone,
{
    /// Returns the log probabilities of all actions, `[b, n]`.
    pub fn log_probs(&self, obs: &Tensor) -> Result<Tensor> {
        Ok(log_softmax(&self.logits.forward(obs)?, D::Minus1)?)
    }
}

impl<P> StochasticPolicy for CategoricalPolicy<P>
where
    P: SubModel1<Input = Tensor, Output = Tensor>,
    P::Config: DeserializeOwned + Serialize + Clone,
{
    type Config = CategoricalPolicyConfig<P::Config>;

    fn build(config: Self::Config, device: &Device) -> Result<Self> {
        let logits_config = config
            .logits_config
            .clone()
            .context("logits_config is not set.")?;
        let varmap = VarMap::new();
        let logits = {
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, device).set_prefix("policy");
            P::build(vb, logits_config)?
        };
        if let Some(seed) = config.seed {
            reinit_linear_vars(&varmap, seed)?;
        }

        Ok(Self {
            config,
            device: device.clone(),
            varmap,
            logits,
            prior: None,
        })
    }

    fn log_prob(&self, obs: &Tensor, act: &Tensor) -> Result<Tensor> {
        let ixs = act.to_device(&self.device)?.to_dtype(DType::U32)?;
        Ok(self.log_probs(obs)?.gather(&ixs, 1)?.squeeze(1)?)
    }

    fn kl_divergence(&self, prior: &Self, obs: &Tensor) -> Result<Tensor> {
        let log_p_prior = prior.log_probs(obs)?.detach();
        let log_p = self.log_probs(obs)?;
        let kl = (log_p_prior.exp()? * (&log_p_prior - log_p)?)?.sum(D::Minus1)?;
        Ok(kl)
    }

    fn sample(&self, obs: &Tensor, rng: &mut StdRng, train: bool) -> Result<Vec<f32>> {
        let logits = self.logits.forward(obs)?.squeeze(0)?;
        let a = match train {
            true => {
                let probs = softmax(&logits, D::Minus1)?.to_vec1::<f32>()?;
                WeightedIndex::new(&probs)?.sample(rng)
            }
            false => logits.argmax(D::Minus1)?.to_scalar::<u32>()? as usize,
        };
        Ok(vec![a as f32])
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
    use crate::tabular::{Tabular, TabularConfig};
    use rand::SeedableRng;

    fn policy() -> Result<CategoricalPolicy<Tabular>> {
        let config = CategoricalPolicyConfig::default().logits_config(TabularConfig::new(2, 3));
        let policy = CategoricalPolicy::<Tabular>::build(config, &Device::Cpu)?;
        policy.varmap.data().lock().unwrap()["policy.table"].set(&Tensor::new(
            &[[0f32, 1.0, 2.0], [0.0, 0.0, 0.0]],
            &Device::Cpu,
        )?)?;
        Ok(policy)
    }

    #[test]
    fn test_log_prob() -> Result<()> {
        let policy = policy()?;
        let obs = Tensor::new(&[[1f32], [0.0]], &Device::Cpu)?;
        let act = Tensor::new(&[[0f32], [2.0]], &Device::Cpu)?;
        let lp = policy.log_prob(&obs, &act)?.to_vec1::<f32>()?;

        assert!((lp[0] - (1f32 / 3.0).ln()).abs() < 1e-6);
        let z = 1f32 + 1f32.exp() + 2f32.exp();
        assert!((lp[1] - (2f32.exp() / z).ln()).abs() < 1e-6);

        Ok(())
    }

    #[test]
    fn test_snapshot_is_independent() -> Result<()> {
        let mut policy = policy()?;
        let obs = Tensor::new(&[[0f32], [1.0]], &Device::Cpu)?;
        let prior = policy.snapshot()?;
        assert!(prior.prior().is_none());
        policy.attach_prior(prior);

        // Identical policies have zero divergence
        let kl = policy.kl_to_prior(&obs)?.unwrap().to_vec1::<f32>()?;
        assert!(kl.iter().all(|v| v.abs() < 1e-6));

        // An update of the policy leaves the prior untouched
        policy.varmap.data().lock().unwrap()["policy.table"]
            .set(&Tensor::zeros((2, 3), DType::F32, &Device::Cpu)?)?;
        let kl = policy.kl_to_prior(&obs)?.unwrap().to_vec1::<f32>()?;
        assert!(kl[0] > 0.1);
        assert!(kl[1].abs() < 1e-6);

        assert!(policy.detach_prior().is_some());
        assert!(policy.kl_to_prior(&obs)?.is_none());

        Ok(())
    }

    #[test]
    fn test_sample() -> Result<()> {
        let policy = policy()?;
        let mut rng = StdRng::seed_from_u64(42);
        let obs = Tensor::new(&[[0f32]], &Device::Cpu)?;
        assert_eq!(policy.sample(&obs, &mut rng, false)?, vec![2.0]);

        let mut counts = [0usize; 3];
        for _ in 0..300 {
            let a = policy.sample(&obs, &mut rng, true)?[0] as usize;
            counts[a] += 1;
        }
        assert!(counts[2] > counts[0]);

        Ok(())
    }
}
