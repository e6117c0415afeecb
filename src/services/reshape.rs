use crate::services::vector_math::normalize;
use ndarray::{s, Array1, ArrayView1};
use ndarray_rand::rand_distr::StandardNormal;
use rand::Rng;

/// How a vector from a previous generation is carried over to a new feature
/// count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorTransform {
    /// Same feature count: the vector is reused as-is.
    Identity,
    /// Fewer features: keep the leading dimensions, then renormalize.
    Truncate { to: usize },
    /// More features: keep every old dimension, fill the new ones with
    /// Gaussian noise, then renormalize.
    Extend { from: usize, to: usize },
}

impl VectorTransform {
    pub fn between(old_features: usize, new_features: usize) -> Self {
        if old_features > new_features {
            VectorTransform::Truncate { to: new_features }
        } else if old_features < new_features {
            VectorTransform::Extend {
                from: old_features,
                to: new_features,
            }
        } else {
            VectorTransform::Identity
        }
    }

    pub fn apply<R: Rng + ?Sized>(&self, vector: ArrayView1<f32>, rng: &mut R) -> Array1<f32> {
        match *self {
            VectorTransform::Identity => vector.to_owned(),
            VectorTransform::Truncate { to } => {
                let mut smaller = vector.slice(s![..to]).to_owned();
                normalize(smaller.view_mut());
                smaller
            }
            VectorTransform::Extend { from, to } => {
                let mut larger = Array1::<f32>::zeros(to);
                larger.slice_mut(s![..from]).assign(&vector);
                for value in larger.slice_mut(s![from..]).iter_mut() {
                    *value = rng.sample::<f64, _>(StandardNormal) as f32;
                }
                normalize(larger.view_mut());
                larger
            }
        }
    }
}
