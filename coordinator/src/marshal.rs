use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::ShapeMismatchErr;

/// A model tensor rebuilt from the flat weight vector.
pub type Tensor = ArrayD<f64>;

/// A named tensor shape, one entry of the shape manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeEntry {
    pub name: String,
    pub shape: Vec<usize>,
}

impl ShapeEntry {
    pub fn new<S: Into<String>>(name: S, shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            shape,
        }
    }

    /// Number of elements the entry spans in the flat vector.
    ///
    /// # Returns
    /// The product of the shape's dimensions, or an error if any dimension is
    /// zero or the product overflows.
    pub fn size(&self) -> Result<usize, ShapeMismatchErr> {
        if self.shape.contains(&0) {
            return Err(ShapeMismatchErr::EmptyShape {
                entry: self.name.clone(),
            });
        }

        self.shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| ShapeMismatchErr::Overflow {
                entry: self.name.clone(),
            })
    }
}

/// Total amount of values a flat vector must hold for `manifest`.
///
/// # Args
/// * `manifest` - The ordered shape manifest.
///
/// # Returns
/// The sum of every entry's size or the first invalid entry's error.
pub fn total_len(manifest: &[ShapeEntry]) -> Result<usize, ShapeMismatchErr> {
    manifest.iter().try_fold(0usize, |acc, entry| {
        acc.checked_add(entry.size()?)
            .ok_or_else(|| ShapeMismatchErr::Overflow {
                entry: entry.name.clone(),
            })
    })
}

/// Rebuilds the model's tensors from a flat weight vector.
///
/// The manifest is walked in order, each entry takes the next `size` values
/// starting at a running offset. The whole vector must be consumed.
///
/// # Args
/// * `flat` - The flat weight vector.
/// * `manifest` - The ordered shape manifest.
///
/// # Returns
/// One tensor per manifest entry, in manifest order.
///
/// # Errors
/// A `ShapeMismatchErr` if an entry is zero-sized, the vector runs out
/// before the manifest does, or values are left once it's done.
pub fn reshape(flat: &[f64], manifest: &[ShapeEntry]) -> Result<Vec<Tensor>, ShapeMismatchErr> {
    let mut tensors = Vec::with_capacity(manifest.len());
    let mut offset = 0;

    for entry in manifest {
        let size = entry.size()?;
        let available = flat.len() - offset;

        if size > available {
            return Err(ShapeMismatchErr::Underrun {
                entry: entry.name.clone(),
                needed: size,
                available,
            });
        }

        let values = flat[offset..offset + size].to_vec();
        // The slice length equals the shape's product, checked just above.
        let tensor = Tensor::from_shape_vec(IxDyn(&entry.shape), values).map_err(|_| {
            ShapeMismatchErr::Overflow {
                entry: entry.name.clone(),
            }
        })?;

        tensors.push(tensor);
        offset += size;
    }

    if offset != flat.len() {
        return Err(ShapeMismatchErr::Leftover {
            consumed: offset,
            len: flat.len(),
        });
    }

    Ok(tensors)
}

/// Concatenates tensors back into a flat vector, row-major.
pub fn flatten(tensors: &[Tensor]) -> Vec<f64> {
    let len: usize = tensors.iter().map(Tensor::len).sum();
    let mut flat = Vec::with_capacity(len);

    for tensor in tensors {
        flat.extend(tensor.iter().copied());
    }

    flat
}
