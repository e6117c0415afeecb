//! Alternating least squares for implicit feedback, after Hu, Koren and
//! Volinsky, "Collaborative Filtering for Implicit Feedback Datasets".
//!
//! The coordinator alternates between solving X (rows) from a fixed Y
//! (columns) and Y from X. Each phase builds the Gram matrix of the fixed
//! side once, then fans disjoint chunks of the target arena out to a rayon
//! pool and waits for all of them before the next phase starts.

use crate::models::config::AlsConfig;
use crate::models::error::{Error, Result};
use crate::models::factors::FactorMatrix;
use crate::models::ratings::{SparseRatingMatrix, SparseVector};
use crate::services::convergence::ConvergenceSample;
use crate::services::gram::regularized_gram;
use crate::services::memory::{self, MemoryProbe, ProcMemoryProbe};
use crate::services::reshape::VectorTransform;
use crate::services::solver::{work_units, FactorSolver, SolverParams, WORK_UNIT_SIZE};
use crate::services::vector_math::{dot, random_unit_vector_far_from};
use ndarray::{Array1, Array2, ArrayViewMut2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::atomic::{AtomicUsize, Ordering};

const LOG_INTERVAL: usize = 100_000;
const MAX_FAR_FROM_VECTORS: usize = 100_000;

/// Where the coordinator is in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlsState {
    Idle,
    Initializing,
    IteratingX,
    IteratingY,
    TestingConvergence,
    Finished,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlsOutcome {
    Converged { iterations: usize },
    ReachedIterationLimit { iterations: usize },
    /// The convergence statistic was not finite; factors from the last
    /// completed iteration are kept.
    Aborted { iterations: usize, convergence: f64 },
    /// Iteration was disabled and X was solved once from the initial Y.
    SolvedXOnly,
}

impl AlsOutcome {
    pub fn iterations(&self) -> usize {
        match *self {
            AlsOutcome::Converged { iterations }
            | AlsOutcome::ReachedIterationLimit { iterations }
            | AlsOutcome::Aborted { iterations, .. } => iterations,
            AlsOutcome::SolvedXOnly => 0,
        }
    }
}

pub struct ALS {
    config: AlsConfig,
    ratings: SparseRatingMatrix,
    previous_y: Option<FactorMatrix>,
    x: Option<FactorMatrix>,
    y: Option<FactorMatrix>,
    convergence_history: Vec<f64>,
    state: AlsState,
    memory_probe: Box<dyn MemoryProbe>,
}

impl ALS {
    /// Fails with `InvalidArgument` when `features` is zero, the threshold is
    /// outside (0, 1) or zero threads are requested.
    pub fn new(ratings: SparseRatingMatrix, config: AlsConfig) -> Result<Self> {
        config.validate()?;
        Ok(ALS {
            config,
            ratings,
            previous_y: None,
            x: None,
            y: None,
            convergence_history: Vec::new(),
            state: AlsState::Idle,
            memory_probe: Box::new(ProcMemoryProbe),
        })
    }

    /// Starts the next run from a previous generation's Y, typically the
    /// result of an earlier run. Its feature count may differ.
    pub fn set_previous_y(&mut self, previous_y: FactorMatrix) {
        self.previous_y = Some(previous_y);
    }

    pub fn set_memory_probe(&mut self, probe: Box<dyn MemoryProbe>) {
        self.memory_probe = probe;
    }

    pub fn config(&self) -> &AlsConfig {
        &self.config
    }

    pub fn ratings(&self) -> &SparseRatingMatrix {
        &self.ratings
    }

    pub fn x(&self) -> Option<&FactorMatrix> {
        self.x.as_ref()
    }

    pub fn y(&self) -> Option<&FactorMatrix> {
        self.y.as_ref()
    }

    pub fn into_factors(self) -> Option<(FactorMatrix, FactorMatrix)> {
        self.x.zip(self.y)
    }

    pub fn state(&self) -> AlsState {
        self.state
    }

    /// Weighted mean estimate change of every completed iteration.
    pub fn convergence_history(&self) -> &[f64] {
        &self.convergence_history
    }

    /// Runs the optimization until it converges, hits the iteration limit or
    /// becomes numerically unstable. A failing work unit aborts the run and
    /// leaves the previous factors in place.
    pub fn fit(&mut self) -> Result<AlsOutcome> {
        self.state = AlsState::Initializing;
        self.convergence_history.clear();
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut x = FactorMatrix::zeros(self.ratings.row_ids(), self.config.features);
        let random_y = self.previous_y.as_ref().map_or(true, |y| y.is_empty());
        let mut y = self.construct_initial_y(&mut rng);

        let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("ALS-{}", i));
        if let Some(threads) = self.config.threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder.build()?;
        log::info!("Iterating using {} threads", pool.current_num_threads());

        let result = self.iterate(&pool, &mut x, &mut y, random_y, &mut rng);
        self.state = AlsState::Finished;
        let outcome = result?;
        self.x = Some(x);
        self.y = Some(y);
        Ok(outcome)
    }

    fn iterate(
        &mut self,
        pool: &ThreadPool,
        x: &mut FactorMatrix,
        y: &mut FactorMatrix,
        random_y: bool,
        rng: &mut StdRng,
    ) -> Result<AlsOutcome> {
        if !self.config.iterate {
            // only useful with a Y that was fixed ahead of time
            self.iterate_x_from_y(pool, x, y)?;
            return Ok(AlsOutcome::SolvedXOnly);
        }

        let mut sample = ConvergenceSample::draw(&self.ratings, rng);
        let mut iteration = 0;
        loop {
            self.iterate_x_from_y(pool, x, y)?;
            self.iterate_y_from_x(pool, x, y)?;

            self.state = AlsState::TestingConvergence;
            let diff = sample.update(x, y);
            let convergence = diff.result();
            self.convergence_history.push(convergence);

            iteration += 1;
            log::info!("Finished iteration {}", iteration);
            if self.config.max_iterations > 0 && iteration >= self.config.max_iterations {
                log::info!("Reached iteration limit");
                return Ok(AlsOutcome::ReachedIterationLimit {
                    iterations: iteration,
                });
            }
            log::info!("Avg absolute difference in estimate vs prior iteration: {}", diff);
            if !convergence.is_finite() {
                log::warn!("Invalid convergence value, aborting iteration! {}", convergence);
                return Ok(AlsOutcome::Aborted {
                    iterations: iteration,
                    convergence,
                });
            }
            // a random starting point never converges after one iteration
            if !(random_y && iteration == 1) && convergence < self.config.convergence_threshold {
                log::info!("Converged");
                return Ok(AlsOutcome::Converged {
                    iterations: iteration,
                });
            }
        }
    }

    fn construct_initial_y<R: Rng>(&self, rng: &mut R) -> FactorMatrix {
        let features = self.config.features;
        let mut ids: Vec<u64> = self.ratings.column_ids().to_vec();
        let mut vectors: Vec<Option<Array1<f32>>> = vec![None; ids.len()];
        let mut recent_vectors: Vec<Array1<f32>> = Vec::new();

        match self.previous_y.as_ref().filter(|y| !y.is_empty()) {
            None => log::info!("Starting from new, random Y matrix"),
            Some(previous) => {
                let transform = VectorTransform::between(previous.features(), features);
                match transform {
                    VectorTransform::Truncate { .. } => log::info!(
                        "Feature count has decreased to {}, projecting down previous generation's Y matrix",
                        features
                    ),
                    VectorTransform::Extend { .. } => log::info!(
                        "Feature count has increased to {}, using previous generation's Y matrix as subspace",
                        features
                    ),
                    VectorTransform::Identity => {
                        log::info!("Starting from previous generation's Y matrix")
                    }
                }
                for (id, vector) in previous.iter() {
                    let reshaped = transform.apply(vector, rng);
                    if recent_vectors.len() < MAX_FAR_FROM_VECTORS {
                        recent_vectors.push(reshaped.clone());
                    }
                    // ids unknown to R are carried along but never solved
                    match self.ratings.column_slot(id) {
                        Some(slot) => vectors[slot] = Some(reshaped),
                        None => {
                            ids.push(id);
                            vectors.push(Some(reshaped));
                        }
                    }
                }
            }
        }

        let mut values = Array2::<f32>::zeros((ids.len(), features));
        for (slot, vector) in vectors.into_iter().enumerate() {
            let vector = match vector {
                Some(vector) => vector,
                None => {
                    let vector = random_unit_vector_far_from(features, &recent_vectors, rng);
                    if recent_vectors.len() < MAX_FAR_FROM_VECTORS {
                        recent_vectors.push(vector.clone());
                    }
                    vector
                }
            };
            values.row_mut(slot).assign(&vector);
            if (slot + 1) % LOG_INTERVAL == 0 {
                log::info!("Computed {} initial Y rows", slot + 1);
            }
        }
        log::info!("Constructed initial Y");
        FactorMatrix::from_parts(ids, values)
    }

    /// Runs one phase computing X from Y.
    fn iterate_x_from_y(&mut self, pool: &ThreadPool, x: &mut FactorMatrix, y: &FactorMatrix) -> Result<()> {
        self.state = AlsState::IteratingX;
        solve_side(
            pool,
            &self.config,
            self.memory_probe.as_ref(),
            "X",
            self.ratings.rows(),
            y,
            x,
        )
    }

    /// Runs one phase computing Y from X.
    fn iterate_y_from_x(&mut self, pool: &ThreadPool, x: &FactorMatrix, y: &mut FactorMatrix) -> Result<()> {
        self.state = AlsState::IteratingY;
        solve_side(
            pool,
            &self.config,
            self.memory_probe.as_ref(),
            "Y",
            self.ratings.columns(),
            x,
            y,
        )
    }

    /// Predicted score of `row_id` for `column_id` after a run.
    pub fn estimate(&self, row_id: u64, column_id: u64) -> Option<f64> {
        let x = self.x.as_ref()?.get(row_id)?;
        let y = self.y.as_ref()?.get(column_id)?;
        Some(dot(x, y))
    }

    /// The `n` highest scoring columns for `row_id`, best first.
    pub fn recommend(&self, row_id: u64, n: usize) -> Vec<(u64, f64)> {
        let (Some(x), Some(y)) = (self.x.as_ref(), self.y.as_ref()) else {
            log::warn!("Model not trained yet");
            return Vec::new();
        };
        let Some(row_vector) = x.get(row_id) else {
            log::warn!("Row ID not found: {}", row_id);
            return Vec::new();
        };
        let mut scores: Vec<(u64, f64)> = y
            .iter()
            .map(|(column_id, column_vector)| (column_id, dot(row_vector, column_vector)))
            .collect();
        scores.sort_by(|a, b| b.1.total_cmp(&a.1));
        scores.truncate(n);
        scores
    }
}

/// Solves the first `neighbours.len()` slots of `target` from `fixed`.
///
/// Work units cover disjoint slot ranges, so every task owns its chunk of
/// the arena outright. The call returns only after all units finish; the
/// first failure stops further units from being scheduled. Progress is
/// logged every `LOG_INTERVAL` ids and once more when the phase ends.
fn solve_side(
    pool: &ThreadPool,
    config: &AlsConfig,
    probe: &dyn MemoryProbe,
    label: &str,
    neighbours: &[SparseVector],
    fixed: &FactorMatrix,
    target: &mut FactorMatrix,
) -> Result<()> {
    let gram = regularized_gram(fixed.values());
    let solver = FactorSolver::new(SolverParams::from(config), fixed.values(), &gram);

    let units = work_units(neighbours.len());
    let (mut solved, _carried) = target.values_mut().split_at(Axis(0), neighbours.len());
    let chunks: Vec<ArrayViewMut2<f32>> = solved
        .axis_chunks_iter_mut(Axis(0), WORK_UNIT_SIZE)
        .collect();
    if chunks.len() != units.len() {
        return Err(Error::WorkerFailure(format!(
            "{} work units for {} chunks",
            units.len(),
            chunks.len()
        )));
    }

    let processed = AtomicUsize::new(0);
    pool.install(|| {
        units
            .into_par_iter()
            .zip(chunks)
            .try_for_each(|(unit, chunk)| {
                let size = unit.len();
                solver.solve_unit(&neighbours[unit], chunk)?;
                let before = processed.fetch_add(size, Ordering::Relaxed);
                if (before + size) / LOG_INTERVAL > before / LOG_INTERVAL {
                    memory::log_progress(probe, label, before + size);
                }
                Ok::<(), Error>(())
            })
    })?;

    let total = processed.into_inner();
    if total % LOG_INTERVAL != 0 {
        memory::log_progress(probe, label, total);
    }
    Ok(())
}
