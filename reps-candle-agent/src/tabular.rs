//! Tabular model.
use crate::model::SubModel1;
use anyhow::{ensure, Result};
use candle_core::{DType, Tensor};
use candle_nn::{Init, VarBuilder};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`Tabular`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct TabularConfig {
    /// Number of states.
    pub num_states: usize,

    /// Number of outputs per state, e.g. `1` for a value function or the
    /// number of actions for the logits of a policy.
    pub out_dim: usize,

    /// Initial value of all entries.
    #[serde(default)]
    pub init: f64,
}

impl TabularConfig {
    /// Creates a configuration with entries initialized to zero.
    pub fn new(num_states: usize, out_dim: usize) -> Self {
        Self {
            num_states,
            out_dim,
            init: 0.0,
        }
    }

    /// Sets the initial value of the entries.
    pub fn init(mut self, v: f64) -> Self {
        self.init = v;
        self
    }

    /// Loads [`TabularConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`TabularConfig`] as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// A table of shape `[num_states, out_dim]` looked up by state.
///
/// The input is either the index of the state, `[b, 1]`, or its one-hot
/// encoding, `[b, num_states]`. The output is `[b, out_dim]`.
pub struct Tabular {
    config: TabularConfig,
    table: Tensor,
}

impl SubModel1 for Tabular {
    type Config = TabularConfig;
    type Input = Tensor;
    type Output = Tensor;

    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self> {
        let table = vb.get_with_hints(
            (config.num_states, config.out_dim),
            "table",
            Init::Const(config.init),
        )?;
        Ok(Self { config, table })
    }

    fn forward(&self, xs: &Self::Input) -> Result<Self::Output> {
        let (_, dim) = xs.dims2()?;
        let xs = xs.to_device(self.table.device())?;

        if dim == 1 && self.config.num_states != 1 {
            let ixs = xs.flatten_all()?.to_dtype(DType::U32)?;
            Ok(self.table.index_select(&ixs, 0)?)
        } else {
            ensure!(
                dim == self.config.num_states,
                "Expected one-hot states of dimension {}, got {}",
                self.config.num_states,
                dim
            );
            Ok(xs.matmul(&self.table)?)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    #[test]
    fn test_index_and_one_hot_agree() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = Tabular::build(vb.pp("tab"), TabularConfig::new(3, 2))?;
        varmap.data().lock().unwrap()["tab.table"].set(&Tensor::new(
            &[[0f32, 1.0], [2.0, 3.0], [4.0, 5.0]],
            &Device::Cpu,
        )?)?;

        let ixs = Tensor::new(&[[2f32], [0.0]], &Device::Cpu)?;
        let one_hot = Tensor::new(&[[0f32, 0.0, 1.0], [1.0, 0.0, 0.0]], &Device::Cpu)?;
        let expected = vec![vec![4.0, 5.0], vec![0.0, 1.0]];
        assert_eq!(model.forward(&ixs)?.to_vec2::<f32>()?, expected);
        assert_eq!(model.forward(&one_hot)?.to_vec2::<f32>()?, expected);

        Ok(())
    }

    #[test]
    fn test_wrong_dimension() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = Tabular::build(vb, TabularConfig::new(3, 1).init(0.5))?;
        assert!(model.forward(&Tensor::zeros((4, 2), DType::F32, &Device::Cpu)?).is_err());
        Ok(())
    }
}
