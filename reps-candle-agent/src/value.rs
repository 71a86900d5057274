//! State value function.
use crate::{model::SubModel1, util::reinit_linear_vars};
use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor, Var, D};
use candle_nn::{VarBuilder, VarMap};
use log::info;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::{Path, PathBuf},
};

/// Configuration of [`Value`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ValueConfig<P> {
    /// Configuration of value function network.
    pub value_config: Option<P>,

    /// If set, weights and biases of linear layers are re-initialized with this seed.
    pub seed: Option<u64>,
}

impl<Q> Default for ValueConfig<Q> {
    fn default() -> Self {
        Self {
            value_config: None,
            seed: None,
        }
    }
}

impl<P> ValueConfig<P>
where
    P: DeserializeOwned + Serialize,
{
    /// Sets configurations for value function network.
    pub fn value_config(mut self, v: P) -> Self {
        self.value_config = Some(v);
        self
    }

    /// Sets the seed of parameter initialization.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Loads [`ValueConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`ValueConfig`] as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// State value function `V(s)`, the critic of REPS.
///
/// The model must output a tensor of shape `[b, 1]`.
pub struct Value<P>
where
    P: SubModel1<Input = Tensor, Output = Tensor>,
{
    varmap: VarMap,
    value: P,
}

impl<P> Value<P>
where
    P: SubModel1<Input = Tensor, Output = Tensor>,
    P::Config: DeserializeOwned + Serialize + Clone,
{
    /// Constructs [`Value`].
    pub fn build(config: ValueConfig<P::Config>, device: &Device) -> Result<Value<P>> {
        let value_config = config.value_config.context("value_config is not set.")?;
        let varmap = VarMap::new();
        let value = {
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, device).set_prefix("value");
            P::build(vb, value_config)?
        };
        if let Some(seed) = config.seed {
            reinit_linear_vars(&varmap, seed)?;
        }

        Ok(Self { varmap, value })
    }

    /// Returns the state values of shape `[b]`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        Ok(self.value.forward(x)?.squeeze(D::Minus1)?)
    }

    /// Returns the variables of the value function.
    pub fn vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    /// Save variables to prefix + ".safetensors".
    pub fn save(&self, prefix: impl AsRef<Path>) -> Result<PathBuf> {
        let mut path = PathBuf::from(prefix.as_ref());
        path.set_extension("safetensors");
        self.varmap.save(path.as_path())?;
        info!("Save value function parameters to {:?}", path);

        Ok(path)
    }

    /// Load variables from prefix + ".safetensors".
    pub fn load(&mut self, prefix: impl AsRef<Path>) -> Result<()> {
        let mut path = PathBuf::from(prefix.as_ref());
        path.set_extension("safetensors");
        self.varmap.load(path.as_path())?;
        info!("Load value function parameters from {:?}", path);

        Ok(())
    }
}
