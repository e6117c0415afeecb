use ndarray::{Array1, ArrayView1, ArrayViewMut1};
use ndarray_rand::rand_distr::StandardNormal;
use rand::Rng;

/// How many of the existing vectors a candidate is compared against.
const FAR_FROM_SAMPLES: usize = 100;
/// Candidates drawn before settling for the best one seen.
const FAR_FROM_ATTEMPTS: usize = 20;
/// Squared distance at which a candidate is far enough: 60 degrees between
/// unit vectors.
const FAR_ENOUGH_DIST_SQUARED: f64 = 1.0;

pub fn dot(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| x as f64 * y as f64)
        .sum()
}

pub fn norm(a: ArrayView1<f32>) -> f64 {
    dot(a, a).sqrt()
}

/// Scales `a` to unit length. A zero vector is left untouched.
pub fn normalize(mut a: ArrayViewMut1<f32>) {
    let norm = norm(a.view());
    if norm > 0.0 {
        a.mapv_inplace(|v| (v as f64 / norm) as f32);
    }
}

fn dist_squared(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum()
}

/// A vector drawn uniformly from the unit sphere.
pub fn random_unit_vector<R: Rng + ?Sized>(dimensions: usize, rng: &mut R) -> Array1<f32> {
    loop {
        let mut vector: Array1<f32> =
            Array1::from_shape_fn(dimensions, |_| rng.sample::<f64, _>(StandardNormal) as f32);
        if dimensions == 0 || norm(vector.view()) > 0.0 {
            normalize(vector.view_mut());
            return vector;
        }
    }
}

/// A random unit vector that tries to keep away from a sample of `far_from`.
///
/// Each candidate is compared with up to 100 randomly picked vectors; the
/// first whose nearest sampled neighbour is far enough wins, otherwise the
/// best of a bounded number of candidates is returned.
pub fn random_unit_vector_far_from<R: Rng + ?Sized>(
    dimensions: usize,
    far_from: &[Array1<f32>],
    rng: &mut R,
) -> Array1<f32> {
    if far_from.is_empty() {
        return random_unit_vector(dimensions, rng);
    }
    let num_samples = far_from.len().min(FAR_FROM_SAMPLES);
    let mut best: Option<(f64, Array1<f32>)> = None;
    for _ in 0..FAR_FROM_ATTEMPTS {
        let candidate = random_unit_vector(dimensions, rng);
        let smallest = (0..num_samples)
            .map(|_| {
                let other = &far_from[rng.gen_range(0..far_from.len())];
                dist_squared(candidate.view(), other.view())
            })
            .fold(f64::INFINITY, f64::min);
        if smallest >= FAR_ENOUGH_DIST_SQUARED {
            return candidate;
        }
        if best.as_ref().map_or(true, |(d, _)| smallest > *d) {
            best = Some((smallest, candidate));
        }
    }
    match best {
        Some((_, vector)) => vector,
        None => random_unit_vector(dimensions, rng),
    }
}

/// Picks roughly `n` of the `size` items yielded by `stream`, each with
/// probability `n / size`. Everything is taken when `size <= n`.
pub fn choose_about_n_from_stream<T, I, R>(n: usize, stream: I, size: usize, rng: &mut R) -> Vec<T>
where
    I: IntoIterator<Item = T>,
    R: Rng + ?Sized,
{
    if size <= n {
        return stream.into_iter().collect();
    }
    let p = n as f64 / size as f64;
    stream
        .into_iter()
        .filter(|_| rng.gen_bool(p))
        .collect()
}
