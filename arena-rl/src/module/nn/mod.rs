use burn::{
    prelude::*,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
};

use crate::{environment::Observation, Error, Result};

pub mod actor_critic;
pub mod multi_layer_perceptron;
pub mod q_network;
pub mod target_model;

/// Stack a batch of flat observations into a `[batch, features]` tensor.
pub fn observation_tensor<B: Backend>(observations: &[Observation], device: &B::Device) -> Result<Tensor<B, 2>> {
    let width = observations.first().map(Vec::len).unwrap_or(0);
    let mut flat = Vec::with_capacity(observations.len() * width);
    for observation in observations {
        if observation.len() != width {
            return Err(Error::ShapeMismatch {
                expected: width,
                actual: observation.len(),
            });
        }
        flat.extend_from_slice(observation);
    }
    Ok(Tensor::from_data(TensorData::new(flat, [observations.len(), width]), device))
}

/// Full-precision binary record of a module's parameters.
pub fn record_bytes<B: Backend, M: Module<B>>(module: M) -> Result<Vec<u8>> {
    BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(module.into_record(), ())
        .map_err(|e| Error::Recorder(format!("{e:?}")))
}

/// Load parameters written by [`record_bytes`] into `module`.
pub fn load_record_bytes<B: Backend, M: Module<B>>(module: M, bytes: Vec<u8>, device: &B::Device) -> Result<M> {
    let record = BinBytesRecorder::<FullPrecisionSettings>::default()
        .load(bytes, device)
        .map_err(|e| Error::Recorder(format!("{e:?}")))?;
    Ok(module.load_record(record))
}

pub(crate) fn float_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| Error::Tensor(format!("{e:?}")))
}

pub(crate) fn int_vec<B: Backend, const D: usize>(tensor: Tensor<B, D, Int>) -> Result<Vec<i64>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| Error::Tensor(format!("{e:?}")))
}

pub(crate) fn module_device<B: Backend, M: Module<B>>(module: &M) -> Result<B::Device> {
    module
        .devices()
        .into_iter()
        .next()
        .ok_or_else(|| Error::Tensor("module has no parameters".into()))
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;

    #[test]
    fn test_observation_tensor_shape() {
        let device = Default::default();
        let tensor = observation_tensor::<NdArray>(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]], &device).unwrap();
        assert_eq!(tensor.dims(), [2, 3]);
        assert_eq!(float_vec(tensor).unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_observation_tensor_rejects_ragged_batch() {
        let device = Default::default();
        let result = observation_tensor::<NdArray>(&[vec![1.0, 2.0], vec![4.0]], &device);
        assert!(matches!(result, Err(Error::ShapeMismatch { expected: 2, actual: 1 })));
    }
}
