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

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the in-memory core. None of these are retried internally.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input, e.g. negative counts or ids unknown to the training data.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Matrix dimensions that disagree with each other or with the index maps.
    #[error("Shape error: {0}")]
    Shape(String),

    /// A per-row normal equation system that is not positive definite. Use a
    /// regularization > 0 and retrain.
    #[error("Numerical error in row {row}: {reason}")]
    Numerical { row: usize, reason: String },

    /// Bytes that do not decode into a model.
    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

impl Error {
    pub(crate) fn validation<S: Into<String>>(message: S) -> Self {
        Error::Validation(message.into())
    }

    pub(crate) fn shape<S: Into<String>>(message: S) -> Self {
        Error::Shape(message.into())
    }
}
