use std::{collections::HashMap, fs, path::Path};

use bytemuck::Pod;
use half::{bf16, f16};
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{
    error::{ModelErr, ShapeMismatchErr},
    marshal::{ShapeEntry, Tensor},
};

/// A persisted model binary in safetensors format.
///
/// The bytes are validated once on construction, every accessor re-parses
/// the header lazily.
#[derive(Debug, Clone)]
pub struct ModelFile {
    bytes: Vec<u8>,
}

impl ModelFile {
    /// Wraps raw model bytes, checking they are a valid safetensors file.
    ///
    /// # Args
    /// * `bytes` - The model binary.
    ///
    /// # Returns
    /// A new `ModelFile` or a `ModelErr::Format` if the bytes aren't readable.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ModelErr> {
        SafeTensors::deserialize(&bytes)?;
        Ok(Self { bytes })
    }

    pub fn open(path: &Path) -> Result<Self, ModelErr> {
        Self::from_bytes(fs::read(path)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Lists the model's floating point tensors as a shape manifest, ordered
    /// by name. Integer buffers such as step counters aren't weights.
    pub fn manifest(&self) -> Result<Vec<ShapeEntry>, ModelErr> {
        let tensors = SafeTensors::deserialize(&self.bytes)?;

        let mut manifest: Vec<_> = tensors
            .tensors()
            .into_iter()
            .filter(|(_, view)| is_float(view.dtype()))
            .map(|(name, view)| ShapeEntry::new(name, view.shape().to_vec()))
            .collect();

        manifest.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(manifest)
    }

    /// Reads the model's weights into a single flat vector.
    ///
    /// # Args
    /// * `manifest` - The order in which tensors are concatenated.
    ///
    /// # Returns
    /// The flat weight vector, or an error if a tensor is missing, differs in
    /// shape or isn't a floating point tensor.
    pub fn flat_weights(&self, manifest: &[ShapeEntry]) -> Result<Vec<f64>, ModelErr> {
        let tensors = SafeTensors::deserialize(&self.bytes)?;
        let mut flat = Vec::new();

        for entry in manifest {
            let view = lookup(&tensors, entry)?;
            flat.extend(decode(&entry.name, view.dtype(), view.data())?);
        }

        Ok(flat)
    }

    /// Rewrites the model with new values for the manifest's tensors.
    ///
    /// Tensors are matched by name, each keeps its original dtype. Tensors
    /// not named in the manifest are copied untouched.
    ///
    /// # Args
    /// * `manifest` - The shape manifest the tensors were rebuilt with.
    /// * `tensors` - The rebuilt tensors, one per manifest entry.
    ///
    /// # Returns
    /// The serialized model with the new weights.
    pub fn inject(&self, manifest: &[ShapeEntry], tensors: &[Tensor]) -> Result<Vec<u8>, ModelErr> {
        if manifest.len() != tensors.len() {
            return Err(ModelErr::Shape(ShapeMismatchErr::Length {
                got: tensors.len(),
                expected: manifest.len(),
            }));
        }

        let original = SafeTensors::deserialize(&self.bytes)?;
        let mut replaced = HashMap::with_capacity(manifest.len());

        for (entry, tensor) in manifest.iter().zip(tensors) {
            let view = lookup(&original, entry)?;
            if view.shape() != tensor.shape() {
                return Err(ModelErr::Shape(ShapeMismatchErr::Tensor {
                    entry: entry.name.clone(),
                    got: tensor.shape().to_vec(),
                    expected: view.shape().to_vec(),
                }));
            }

            let data = encode(&entry.name, view.dtype(), tensor)?;
            replaced.insert(entry.name.as_str(), (view.dtype(), data));
        }

        let mut views = Vec::new();
        for (name, view) in original.tensors() {
            let view = match replaced.get(name.as_str()) {
                Some((dtype, data)) => TensorView::new(*dtype, view.shape().to_vec(), data)?,
                None => view,
            };
            views.push((name, view));
        }

        Ok(safetensors::serialize(views, &None)?)
    }
}

fn lookup<'a>(tensors: &SafeTensors<'a>, entry: &ShapeEntry) -> Result<TensorView<'a>, ModelErr> {
    let view = tensors
        .tensor(&entry.name)
        .map_err(|_| ModelErr::UnknownTensor(entry.name.clone()))?;

    if view.shape() != entry.shape.as_slice() {
        return Err(ModelErr::Shape(ShapeMismatchErr::Tensor {
            entry: entry.name.clone(),
            got: view.shape().to_vec(),
            expected: entry.shape.clone(),
        }));
    }

    Ok(view)
}

/// Whether tensors of `dtype` carry trainable weights.
pub(crate) fn is_float(dtype: Dtype) -> bool {
    matches!(dtype, Dtype::F64 | Dtype::F32 | Dtype::F16 | Dtype::BF16)
}

fn unsupported(name: &str, dtype: Dtype) -> ModelErr {
    ModelErr::UnsupportedDtype {
        tensor: name.to_string(),
        dtype: format!("{dtype:?}"),
    }
}

fn decode(name: &str, dtype: Dtype, data: &[u8]) -> Result<Vec<f64>, ModelErr> {
    let values = match dtype {
        Dtype::F64 => read::<f64>(data, |x| x),
        Dtype::F32 => read::<f32>(data, f64::from),
        Dtype::F16 => read::<f16>(data, f16::to_f64),
        Dtype::BF16 => read::<bf16>(data, bf16::to_f64),
        other => return Err(unsupported(name, other)),
    };

    Ok(values)
}

fn encode(name: &str, dtype: Dtype, tensor: &Tensor) -> Result<Vec<u8>, ModelErr> {
    let values = tensor.iter().copied();

    let data = match dtype {
        Dtype::F64 => write::<f64>(values, |x| x),
        Dtype::F32 => write::<f32>(values, |x| x as f32),
        Dtype::F16 => write::<f16>(values, f16::from_f64),
        Dtype::BF16 => write::<bf16>(values, bf16::from_f64),
        other => return Err(unsupported(name, other)),
    };

    Ok(data)
}

// Safetensors data is little-endian, as are the hosts this runs on.
fn read<T: Pod>(data: &[u8], to_f64: impl Fn(T) -> f64) -> Vec<f64> {
    data.chunks_exact(size_of::<T>())
        .map(|chunk| to_f64(bytemuck::pod_read_unaligned(chunk)))
        .collect()
}

fn write<T: Pod>(values: impl Iterator<Item = f64>, from_f64: impl Fn(f64) -> T) -> Vec<u8> {
    let values: Vec<T> = values.map(from_f64).collect();
    bytemuck::cast_slice(&values).to_vec()
}

#[cfg(test)]
pub(crate) mod tests {
    use ndarray::arr2;

    use super::*;
    use crate::marshal::reshape;

    /// Builds a small two-tensor model: `dense/kernel` [2, 2] as f32 and
    /// `dense/bias` [2] as f64.
    pub(crate) fn dense_model() -> Vec<u8> {
        let kernel: Vec<u8> = bytemuck::cast_slice(&[1.0f32, 2.0, 3.0, 4.0]).to_vec();
        let bias: Vec<u8> = bytemuck::cast_slice(&[0.5f64, -0.5]).to_vec();

        let views = vec![
            (
                "dense/kernel",
                TensorView::new(Dtype::F32, vec![2, 2], &kernel).unwrap(),
            ),
            (
                "dense/bias",
                TensorView::new(Dtype::F64, vec![2], &bias).unwrap(),
            ),
        ];

        safetensors::serialize(views, &None).unwrap()
    }

    /// A batch norm layer: `bn.weight` [2] as f32 next to the integer
    /// `bn.num_batches_tracked` scalar.
    pub(crate) fn batch_norm_model() -> Vec<u8> {
        let weight: Vec<u8> = bytemuck::cast_slice(&[1.0f32, 0.5]).to_vec();
        let tracked: Vec<u8> = bytemuck::cast_slice(&[42i64]).to_vec();

        let views = vec![
            (
                "bn.weight",
                TensorView::new(Dtype::F32, vec![2], &weight).unwrap(),
            ),
            (
                "bn.num_batches_tracked",
                TensorView::new(Dtype::I64, vec![], &tracked).unwrap(),
            ),
        ];

        safetensors::serialize(views, &None).unwrap()
    }

    #[test]
    fn rejects_garbage() {
        let err = ModelFile::from_bytes(b"definitely not a model".to_vec()).unwrap_err();
        assert!(matches!(err, ModelErr::Format(_)));
    }

    #[test]
    fn manifest_is_sorted_by_name() {
        let model = ModelFile::from_bytes(dense_model()).unwrap();
        assert_eq!(
            model.manifest().unwrap(),
            vec![
                ShapeEntry::new("dense/bias", vec![2]),
                ShapeEntry::new("dense/kernel", vec![2, 2]),
            ]
        );
    }

    #[test]
    fn integer_buffers_are_carried_untouched() {
        let model = ModelFile::from_bytes(batch_norm_model()).unwrap();
        let manifest = model.manifest().unwrap();
        assert_eq!(manifest, vec![ShapeEntry::new("bn.weight", vec![2])]);
        assert_eq!(model.flat_weights(&manifest).unwrap(), vec![1.0, 0.5]);

        let tensors = reshape(&[3.0, 4.0], &manifest).unwrap();
        let bytes = model.inject(&manifest, &tensors).unwrap();

        let parsed = SafeTensors::deserialize(&bytes).unwrap();
        let tracked = parsed.tensor("bn.num_batches_tracked").unwrap();
        assert_eq!(tracked.dtype(), Dtype::I64);
        assert_eq!(tracked.data(), 42i64.to_le_bytes().as_slice());
    }

    #[test]
    fn flat_weights_follow_manifest_order() {
        let model = ModelFile::from_bytes(dense_model()).unwrap();
        let manifest = model.manifest().unwrap();

        let flat = model.flat_weights(&manifest).unwrap();
        assert_eq!(flat, vec![0.5, -0.5, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn inject_replaces_values_and_keeps_dtypes() {
        let model = ModelFile::from_bytes(dense_model()).unwrap();
        let manifest = model.manifest().unwrap();
        let tensors = reshape(&[9.0, 8.0, 7.0, 6.0, 5.0, 4.0], &manifest).unwrap();

        let bytes = model.inject(&manifest, &tensors).unwrap();
        let injected = ModelFile::from_bytes(bytes).unwrap();

        assert_eq!(
            injected.flat_weights(&manifest).unwrap(),
            vec![9.0, 8.0, 7.0, 6.0, 5.0, 4.0]
        );

        let parsed = SafeTensors::deserialize(injected.as_bytes()).unwrap();
        assert_eq!(parsed.tensor("dense/kernel").unwrap().dtype(), Dtype::F32);
        assert_eq!(parsed.tensor("dense/bias").unwrap().dtype(), Dtype::F64);
    }

    #[test]
    fn inject_rejects_unknown_tensor() {
        let model = ModelFile::from_bytes(dense_model()).unwrap();
        let manifest = vec![ShapeEntry::new("conv/kernel", vec![2, 2])];
        let tensors = vec![arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn()];

        let err = model.inject(&manifest, &tensors).unwrap_err();
        assert!(matches!(err, ModelErr::UnknownTensor(name) if name == "conv/kernel"));
    }

    #[test]
    fn inject_rejects_mismatched_shape() {
        let model = ModelFile::from_bytes(dense_model()).unwrap();
        let manifest = vec![ShapeEntry::new("dense/kernel", vec![4])];
        let tensors = reshape(&[1.0, 2.0, 3.0, 4.0], &manifest).unwrap();

        let err = model.inject(&manifest, &tensors).unwrap_err();
        assert!(matches!(err, ModelErr::Shape(ShapeMismatchErr::Tensor { .. })));
    }
}
