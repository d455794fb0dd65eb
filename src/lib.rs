use std::time::Instant;

use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use scoped_pool::Pool;
use serde_derive::{Deserialize, Serialize};

pub mod error;
pub mod evaluation;
pub mod io;
mod linalg;
pub mod model;
pub mod recommend;
pub mod stats;
pub mod types;
pub mod utils;

#[cfg(test)]
mod usage_tests;

pub use error::{Error, Result};
pub use model::Model;
pub use stats::{build, IndexMap};
pub use types::{FactorMatrix, RawInteraction, Recommendation, ScoredItem, UtilityMatrix};

use linalg::NotPositiveDefinite;
use types::Entries;

/// Upper bound of the uniform distribution used to initialize the factors.
const INIT_SCALE: f64 = 0.01;

/// Settings of a training run. `alpha` is applied by `stats::build`, the solver only sees the
/// resulting confidences, but it is kept here so that a persisted model records it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub factors: usize,
    pub regularization: f64,
    pub alpha: f64,
    pub iterations: usize,
    pub seed: u64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters {
            factors: 50,
            regularization: 0.1,
            alpha: 15.0,
            iterations: 15,
            seed: 42,
        }
    }
}

impl Hyperparameters {

    pub fn factors(mut self, factors: usize) -> Self {
        self.factors = factors;
        self
    }

    pub fn regularization(mut self, regularization: f64) -> Self {
        self.regularization = regularization;
        self
    }

    pub fn alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.factors == 0 {
            return Err(Error::validation("the number of factors must be positive"));
        }
        if self.iterations == 0 {
            return Err(Error::validation("the number of iterations must be positive"));
        }
        if !(self.regularization.is_finite() && self.regularization >= 0.0) {
            return Err(Error::validation(format!(
                "regularization must be non-negative and finite, got {}", self.regularization)));
        }
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return Err(Error::validation(format!(
                "alpha must be positive and finite, got {}", self.alpha)));
        }
        Ok(())
    }
}

/// Which factor matrix a half-step recomputes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Users,
    Items,
}

/// Shuts the worker threads down once training is over.
pub(crate) struct WorkerPool {
    pub(crate) pool: Pool,
    workers: usize,
}

impl WorkerPool {
    pub(crate) fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        WorkerPool { pool: Pool::new(workers), workers }
    }

    /// Rows per worker so that `num_rows > 0` rows are spread over all workers.
    pub(crate) fn block_size(&self, num_rows: usize) -> usize {
        ((num_rows + self.workers - 1) / self.workers).max(1)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.pool.shutdown();
    }
}

/// Implicit-feedback ALS as an explicit state machine. Each `step` runs a user half-step
/// followed by an item half-step. There is no convergence test: `factorize` runs exactly the
/// configured number of alternations and returns whatever state results.
pub struct Alternation<'a> {
    matrix: &'a UtilityMatrix,
    hyper: Hyperparameters,
    workers: WorkerPool,
    user_factors: FactorMatrix,
    item_factors: FactorMatrix,
    iterations_done: usize,
}

impl<'a> Alternation<'a> {

    /// Draws the initial factors, users first, from a generator seeded with `hyper.seed`.
    pub fn new(matrix: &'a UtilityMatrix, hyper: Hyperparameters, pool_size: usize) -> Result<Self> {

        hyper.validate()?;

        let mut rng = XorShiftRng::seed_from_u64(hyper.seed);
        let k = hyper.factors;

        let user_factors = random_factors(matrix.num_users(), k, &mut rng);
        let item_factors = random_factors(matrix.num_items(), k, &mut rng);

        Ok(Alternation {
            matrix,
            hyper,
            workers: WorkerPool::new(pool_size),
            user_factors,
            item_factors,
            iterations_done: 0,
        })
    }

    pub fn iterations_done(&self) -> usize {
        self.iterations_done
    }

    pub fn user_factors(&self) -> &FactorMatrix {
        &self.user_factors
    }

    pub fn item_factors(&self) -> &FactorMatrix {
        &self.item_factors
    }

    /// Recomputes every user row while the item factors stay fixed.
    pub fn update_users(&mut self) -> Result<()> {
        self.half_step(Phase::Users)
    }

    /// Recomputes every item row while the user factors stay fixed.
    pub fn update_items(&mut self) -> Result<()> {
        self.half_step(Phase::Items)
    }

    /// One full alternation.
    pub fn step(&mut self) -> Result<()> {
        self.update_users()?;
        self.update_items()?;
        self.iterations_done += 1;
        Ok(())
    }

    pub fn finish(self) -> (FactorMatrix, FactorMatrix) {
        (self.user_factors, self.item_factors)
    }

    fn half_step(&mut self, phase: Phase) -> Result<()> {

        let start = Instant::now();

        let fixed = match phase {
            Phase::Users => &self.item_factors,
            Phase::Items => &self.user_factors,
        };

        let updated = solve_rows(
            &self.workers,
            self.matrix,
            phase,
            fixed,
            self.hyper.regularization,
        )?;

        match phase {
            Phase::Users => self.user_factors = updated,
            Phase::Items => self.item_factors = updated,
        }

        tracing::debug!(
            phase = ?phase,
            iteration = self.iterations_done + 1,
            millis = utils::to_millis(start.elapsed()),
            "finished half-step"
        );

        Ok(())
    }
}

fn random_factors<R: Rng>(rows: usize, k: usize, rng: &mut R) -> FactorMatrix {
    Array2::from_shape_fn((rows, k), |_| rng.gen_range(0.0..INIT_SCALE))
}

/// Trains user and item factors on a confidence matrix, running exactly `hyper.iterations`
/// alternations. Identical inputs yield bit-identical factors, regardless of `pool_size`.
pub fn factorize(
    matrix: &UtilityMatrix,
    hyper: &Hyperparameters,
    pool_size: usize,
) -> Result<(FactorMatrix, FactorMatrix)> {

    let start = Instant::now();
    let mut alternation = Alternation::new(matrix, hyper.clone(), pool_size)?;

    while alternation.iterations_done() < hyper.iterations {
        alternation.step()?;
    }

    tracing::info!(
        users = matrix.num_users(),
        items = matrix.num_items(),
        factors = hyper.factors,
        iterations = hyper.iterations,
        millis = utils::to_millis(start.elapsed()),
        "finished ALS training"
    );

    Ok(alternation.finish())
}

/// Solves all rows of one half-step. Every worker reads the same snapshot `fixed` and writes a
/// disjoint block of rows of a fresh matrix, the end of `pool.scoped` is the barrier.
fn solve_rows(
    workers: &WorkerPool,
    matrix: &UtilityMatrix,
    phase: Phase,
    fixed: &FactorMatrix,
    regularization: f64,
) -> Result<FactorMatrix> {

    let num_rows = match phase {
        Phase::Users => matrix.num_users(),
        Phase::Items => matrix.num_items(),
    };

    let mut updated = FactorMatrix::zeros((num_rows, fixed.ncols()));

    if num_rows == 0 {
        return Ok(updated);
    }

    // Shared by all rows of this half-step
    let gram = linalg::gram(fixed.view());

    let block_size = workers.block_size(num_rows);
    let num_blocks = (num_rows + block_size - 1) / block_size;
    let mut failures: Vec<Option<Error>> = (0..num_blocks).map(|_| None).collect();

    workers.pool.scoped(|scope| {
        let blocks = updated.axis_chunks_iter_mut(Axis(0), block_size).enumerate();

        for ((block, mut rows), failure) in blocks.zip(failures.iter_mut()) {

            let gram = &gram;

            scope.execute(move || {
                let first_row = block * block_size;

                for (offset, mut row) in rows.outer_iter_mut().enumerate() {
                    let index = first_row + offset;

                    let entries = match phase {
                        Phase::Users => matrix.user_entries(index),
                        Phase::Items => matrix.item_entries(index),
                    };

                    match solve_row(gram, fixed, entries, regularization) {
                        Ok(solution) => row.assign(&solution),
                        Err(NotPositiveDefinite { pivot, value }) => {
                            *failure = Some(Error::Numerical {
                                row: index,
                                reason: format!(
                                    "{:?} system not positive definite, pivot {} is {}",
                                    phase, pivot, value),
                            });
                            return;
                        },
                    }
                }
            });
        }
    });

    match failures.into_iter().flatten().next() {
        Some(failure) => Err(failure),
        None => Ok(updated),
    }
}

/// Solves `(F^T F + F^T (C - I) F + λI) x = F^T C p` for a single row. `gram` is the shared
/// `F^T F`; the correction and the right hand side only touch the observed entries, whose
/// preference is 1.
fn solve_row(
    gram: &Array2<f64>,
    fixed: &FactorMatrix,
    entries: Entries,
    regularization: f64,
) -> std::result::Result<Array1<f64>, NotPositiveDefinite> {

    let k = gram.nrows();
    let mut a = gram.clone();
    let mut b = Array1::<f64>::zeros(k);

    for (other, confidence) in entries {
        let factors = fixed.row(other);
        linalg::add_scaled_outer(&mut a, factors, confidence - 1.0);
        b.scaled_add(confidence, &factors);
    }

    for i in 0..k {
        a[[i, i]] += regularization;
    }

    linalg::cholesky_solve(&a, &b)
}
