/**
 * NextBasket
 * Copyright (C) 2018 Sebastian Schelter
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program. If not, see <http://www.gnu.org/licenses/>.
 */

use fnv::FnvHashSet;
use serde_derive::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::recommend;
use crate::stats::IndexMap;
use crate::types::{FactorMatrix, Recommendation, UtilityMatrix};
use crate::{factorize, Hyperparameters};

/// Bumped whenever the serialized layout changes.
pub const FORMAT_VERSION: u32 = 1;

/// A trained factorization together with the settings that produced it. Immutable once built;
/// retraining produces a new model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model {
    hyperparameters: Hyperparameters,
    user_factors: FactorMatrix,
    item_factors: FactorMatrix,
}

impl Model {

    pub fn new(
        hyperparameters: Hyperparameters,
        user_factors: FactorMatrix,
        item_factors: FactorMatrix,
    ) -> Result<Self> {
        let model = Model { hyperparameters, user_factors, item_factors };
        model.check_dimensions()?;
        Ok(model)
    }

    /// Runs ALS on `matrix` with `pool_size` worker threads.
    pub fn train(matrix: &UtilityMatrix, hyperparameters: Hyperparameters, pool_size: usize) -> Result<Self> {
        let (user_factors, item_factors) = factorize(matrix, &hyperparameters, pool_size)?;
        Model::new(hyperparameters, user_factors, item_factors)
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyperparameters
    }

    pub fn user_factors(&self) -> &FactorMatrix {
        &self.user_factors
    }

    pub fn item_factors(&self) -> &FactorMatrix {
        &self.item_factors
    }

    pub fn num_users(&self) -> usize {
        self.user_factors.nrows()
    }

    pub fn num_items(&self) -> usize {
        self.item_factors.nrows()
    }

    fn check_dimensions(&self) -> Result<()> {
        let k = self.hyperparameters.factors;

        if self.user_factors.ncols() != k || self.item_factors.ncols() != k {
            return Err(Error::shape(format!(
                "expected {} factors, got {} for users and {} for items",
                k, self.user_factors.ncols(), self.item_factors.ncols())));
        }
        Ok(())
    }

    /// The factor matrices must have one row per mapped user and item.
    pub fn check_shape(&self, users: &IndexMap, items: &IndexMap) -> Result<()> {
        if self.num_users() != users.len() {
            return Err(Error::shape(format!(
                "{} user factor rows for {} users", self.num_users(), users.len())));
        }
        if self.num_items() != items.len() {
            return Err(Error::shape(format!(
                "{} item factor rows for {} items", self.num_items(), items.len())));
        }
        Ok(())
    }

    /// Predicted preference `x_u . y_i`.
    pub fn score(&self, user: u32, item: u32) -> Result<f64> {
        if user as usize >= self.num_users() || item as usize >= self.num_items() {
            return Err(Error::validation(format!("no factors for user {} and item {}", user, item)));
        }
        Ok(self.user_factors.row(user as usize).dot(&self.item_factors.row(item as usize)))
    }

    pub fn recommend(&self, user: u32, n: usize, exclude: Option<&FnvHashSet<u32>>) -> Result<Recommendation> {
        recommend::recommend(user, &self.user_factors, &self.item_factors, n, exclude)
    }

    /// Binary layout (bincode, little endian, fixed-width integers): the `u32` format version,
    /// the hyperparameters in declaration order (factors, regularization, alpha, iterations,
    /// seed), then the user and item factor matrices as ndarray's serde form of version byte,
    /// dimensions and row-major `f64` data. Floats are stored bit for bit.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&(FORMAT_VERSION, self))?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (version, model): (u32, Model) = bincode::deserialize(bytes)?;

        if version != FORMAT_VERSION {
            return Err(Error::validation(format!(
                "unsupported model format version {}, expected {}", version, FORMAT_VERSION)));
        }

        model.check_dimensions()?;
        Ok(model)
    }
}
