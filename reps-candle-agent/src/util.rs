//! Utilities.
use anyhow::{Context, Result};
use candle_core::{Device, Tensor, D};
use candle_nn::VarMap;
use log::trace;
use rand::{rngs::StdRng, Rng, SeedableRng};
use reps_core::error::RepsError;

/// Copies the values of all variables of `src` into the variables of `dest`
/// with the same names.
///
/// The variables of `dest` keep their own storage, so later updates of `src`
/// are not visible through `dest`.
pub fn copy_vars(dest: &VarMap, src: &VarMap) -> Result<()> {
    let dest = dest
        .data()
        .lock()
        .map_err(|_| anyhow::anyhow!("VarMap lock poisoned"))?;
    let src = src
        .data()
        .lock()
        .map_err(|_| anyhow::anyhow!("VarMap lock poisoned"))?;
    trace!("Copy {} variables", dest.len());

    for (k_dest, v_dest) in dest.iter() {
        let v_src = src
            .get(k_dest)
            .with_context(|| format!("Variable {} is missing in the source", k_dest))?;
        v_dest.set(&v_src.as_tensor().copy()?)?;
    }

    Ok(())
}

/// Re-initializes weights and biases of linear layers with a seeded generator.
///
/// Values are drawn from `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`. Variables are
/// visited in the order of their names, so the same seed gives the same
/// parameters. Other variables, e.g. log standard deviations, are left as is.
pub fn reinit_linear_vars(varmap: &VarMap, seed: u64) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = varmap
        .data()
        .lock()
        .map_err(|_| anyhow::anyhow!("VarMap lock poisoned"))?;
    let mut names = data.keys().cloned().collect::<Vec<_>>();
    names.sort();

    for name in names.iter() {
        let var = &data[name];
        let dims = var.dims().to_vec();
        let fan_in = if name.ends_with("weight") && dims.len() == 2 {
            dims[1]
        } else if name.ends_with("bias") && dims.len() == 1 {
            // Same bound as the weight of the layer
            let weight = format!("{}weight", name.trim_end_matches("bias"));
            match data.get(&weight).map(|w| w.dims().to_vec()) {
                Some(w) if w.len() == 2 => w[1],
                _ => dims[0],
            }
        } else {
            continue;
        };
        let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
        let values = (0..var.elem_count())
            .map(|_| rng.gen_range(-bound..bound))
            .collect::<Vec<f32>>();
        var.set(&Tensor::from_vec(values, dims, var.device())?)?;
    }

    Ok(())
}

/// Returns `log(mean(exp(x)))` of a 1-dimensional tensor as a 0-dimensional tensor.
///
/// The maximum of `x` is subtracted before exponentiation, so the result is
/// finite for any finite input.
pub fn log_mean_exp(x: &Tensor) -> Result<Tensor> {
    let n = x.dims1()?;
    if n == 0 {
        return Err(RepsError::InsufficientData.into());
    }
    let max = x.max(0)?.detach();
    let sum = x.broadcast_sub(&max)?.exp()?.sum_all()?;
    let n = Tensor::new(n as f32, x.device())?;
    Ok((sum.div(&n)?.log()? + max)?)
}

/// Returns `gamma * (1 - done)` as a tensor of shape `[batch_size]`.
pub fn gamma_not_done(gamma: f32, done: &[bool], device: &Device) -> Result<Tensor> {
    let batch_size = done.len();
    let not_done = done
        .iter()
        .map(|&d| if d { 0f32 } else { gamma })
        .collect::<Vec<_>>();
    Ok(Tensor::from_vec(not_done, (batch_size,), device)?)
}

/// Returns the mean and the maximum of the absolute values of a 1-dimensional tensor.
pub fn mean_abs_max(t: &Tensor) -> Result<(f32, f32)> {
    let mean = t.mean_all()?.to_scalar::<f32>()?;
    let abs_max = t.abs()?.max(D::Minus1)?.to_scalar::<f32>()?;
    Ok((mean, abs_max))
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::DType;
    use candle_nn::{Init, VarBuilder};

    #[test]
    fn test_copy_vars_is_deep() -> Result<()> {
        let vm_src = VarMap::new();
        vm_src.get((3,), "var1", Init::Const(1.0), DType::F32, &Device::Cpu)?;
        let vm_dest = VarMap::new();
        vm_dest.get((3,), "var1", Init::Const(0.0), DType::F32, &Device::Cpu)?;

        copy_vars(&vm_dest, &vm_src)?;
        let v_dest = vm_dest.data().lock().unwrap()["var1"].clone();
        assert_eq!(v_dest.as_tensor().to_vec1::<f32>()?, vec![1.0; 3]);

        // Update of the source does not leak into the copy
        let v_src = vm_src.data().lock().unwrap()["var1"].clone();
        v_src.set(&Tensor::new(&[5f32, 5.0, 5.0], &Device::Cpu)?)?;
        assert_eq!(v_dest.as_tensor().to_vec1::<f32>()?, vec![1.0; 3]);

        Ok(())
    }

    #[test]
    fn test_reinit_linear_vars_is_reproducible() -> Result<()> {
        let build = || -> Result<VarMap> {
            let vm = VarMap::new();
            let vb = VarBuilder::from_varmap(&vm, DType::F32, &Device::Cpu);
            candle_nn::linear(4, 3, vb.pp("layer"))?;
            reinit_linear_vars(&vm, 7)?;
            Ok(vm)
        };
        let (vm1, vm2) = (build()?, build()?);
        let w1 = vm1.data().lock().unwrap()["layer.weight"].as_tensor().clone();
        let w2 = vm2.data().lock().unwrap()["layer.weight"].as_tensor().clone();
        assert_eq!(w1.to_vec2::<f32>()?, w2.to_vec2::<f32>()?);
        assert!(w1
            .flatten_all()?
            .to_vec1::<f32>()?
            .iter()
            .all(|w| w.abs() <= 0.5));

        Ok(())
    }

    #[test]
    fn test_log_mean_exp_large_values() -> Result<()> {
        let x = [1e6f32, 1e6 - 1.0, -1e6];
        let t = Tensor::new(&x, &Device::Cpu)?;
        let lme = log_mean_exp(&t)?.to_scalar::<f32>()?;

        let xs = x.iter().map(|&v| v as f64).collect::<Vec<_>>();
        let m = xs.iter().cloned().fold(f64::MIN, f64::max);
        let expected = m + (xs.iter().map(|v| (v - m).exp()).sum::<f64>() / 3.0).ln();
        assert!(((lme as f64 - expected) / expected).abs() < 1e-6);

        Ok(())
    }

    #[test]
    fn test_gamma_not_done() -> Result<()> {
        let t = gamma_not_done(0.9, &[false, true, false], &Device::Cpu)?;
        assert_eq!(t.to_vec1::<f32>()?, vec![0.9, 0.0, 0.9]);
        Ok(())
    }
}
