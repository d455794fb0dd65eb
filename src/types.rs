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

use std::cmp::Ordering;
use std::slice;

use fnv::FnvHashSet;
use ndarray::Array2;
use serde_derive::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::stats::dense_index;

/// Dense (entity_count x k) matrix of latent factors, one row per user or item.
pub type FactorMatrix = Array2<f64>;

/// Per-user sets of item indices, e.g. purchase histories.
pub type SparseBinaryMatrix = Vec<FnvHashSet<u32>>;

/// A single observed event: `user_id` bought `count` units of `item_id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawInteraction {
    pub user_id: u64,
    pub item_id: u64,
    pub count: i64,
}

impl RawInteraction {
    pub fn new(user_id: u64, item_id: u64, count: i64) -> Self {
        RawInteraction { user_id, item_id, count }
    }
}

/// Sparse (item x user) matrix of confidences. The values are stored once, ordered by item,
/// and a second index structure orders the same values by user, so that both per-item and
/// per-user slices are available without copying the value array.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UtilityMatrix {
    num_items: usize,
    num_users: usize,
    item_pointers: Vec<usize>,
    user_indices: Vec<u32>,
    values: Vec<f64>,
    user_pointers: Vec<usize>,
    item_indices: Vec<u32>,
    value_positions: Vec<usize>,
    item_totals: Vec<u64>,
    alpha: f64,
}

impl UtilityMatrix {

    /// Expects at most one entry per (item, user) cell.
    pub(crate) fn from_entries(
        num_items: usize,
        num_users: usize,
        mut entries: Vec<(u32, u32, f64)>,
        item_totals: Vec<u64>,
        alpha: f64,
    ) -> Self {

        entries.sort_by_key(|&(item, user, _)| (item, user));

        let mut item_pointers = vec![0; num_items + 1];
        let mut user_pointers = vec![0; num_users + 1];

        for &(item, user, _) in entries.iter() {
            item_pointers[item as usize + 1] += 1;
            user_pointers[user as usize + 1] += 1;
        }

        for index in 0..num_items {
            item_pointers[index + 1] += item_pointers[index];
        }
        for index in 0..num_users {
            user_pointers[index + 1] += user_pointers[index];
        }

        let user_indices: Vec<u32> = entries.iter().map(|&(_, user, _)| user).collect();
        let values: Vec<f64> = entries.iter().map(|&(_, _, value)| value).collect();

        // Walking the entries in item order keeps item indices sorted within each user
        let mut item_indices = vec![0; entries.len()];
        let mut value_positions = vec![0; entries.len()];
        let mut next_slot = user_pointers.clone();

        for (position, &(item, user, _)) in entries.iter().enumerate() {
            let slot = next_slot[user as usize];
            item_indices[slot] = item;
            value_positions[slot] = position;
            next_slot[user as usize] += 1;
        }

        UtilityMatrix {
            num_items,
            num_users,
            item_pointers,
            user_indices,
            values,
            user_pointers,
            item_indices,
            value_positions,
            item_totals,
            alpha,
        }
    }

    pub fn num_items(&self) -> usize {
        self.num_items
    }

    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Number of stored (observed) cells.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// The confidence scale the entries were built with.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Summed raw counts per item index over the whole training data.
    pub fn item_totals(&self) -> &[u64] {
        &self.item_totals
    }

    /// Confidence of a cell, `None` for unobserved cells (implicit confidence 1, preference 0).
    pub fn get(&self, item: usize, user: usize) -> Option<f64> {
        if item >= self.num_items || user >= self.num_users {
            return None;
        }

        let start = self.item_pointers[item];
        let end = self.item_pointers[item + 1];

        self.user_indices[start..end]
            .binary_search(&(user as u32))
            .ok()
            .map(|offset| self.values[start + offset])
    }

    /// (user_index, confidence) pairs of one item, ascending by user.
    pub fn item_entries(&self, item: usize) -> Entries {
        let start = self.item_pointers[item];
        let end = self.item_pointers[item + 1];

        Entries {
            indices: self.user_indices[start..end].iter(),
            positions: Positions::Contiguous(start),
            values: &self.values,
        }
    }

    /// (item_index, confidence) pairs of one user, ascending by item.
    pub fn user_entries(&self, user: usize) -> Entries {
        let start = self.user_pointers[user];
        let end = self.user_pointers[user + 1];

        Entries {
            indices: self.item_indices[start..end].iter(),
            positions: Positions::Indirect(self.value_positions[start..end].iter()),
            values: &self.values,
        }
    }

    /// The set of purchased item indices for every user index.
    pub fn user_histories(&self) -> SparseBinaryMatrix {
        (0..self.num_users)
            .map(|user| {
                let start = self.user_pointers[user];
                let end = self.user_pointers[user + 1];
                self.item_indices[start..end].iter().cloned().collect()
            })
            .collect()
    }

    /// Verifies that the index structures agree with each other, e.g. after deserialization.
    pub fn check_consistency(&self) -> Result<()> {

        let nnz = self.values.len();

        // Dense indices are u32
        if dense_index(self.num_items).is_err() || dense_index(self.num_users).is_err() {
            return Err(Error::shape(format!(
                "{} x {} exceeds the u32 index space", self.num_items, self.num_users)));
        }

        if self.item_pointers.len() != self.num_items + 1
            || self.user_pointers.len() != self.num_users + 1 {
            return Err(Error::shape("pointer arrays do not match the matrix dimensions"));
        }

        if self.item_pointers[self.num_items] != nnz || self.user_pointers[self.num_users] != nnz
            || self.user_indices.len() != nnz || self.item_indices.len() != nnz
            || self.value_positions.len() != nnz {
            return Err(Error::shape(format!("index structures disagree on {} entries", nnz)));
        }

        let ascending = |pointers: &[usize]| pointers.windows(2).all(|pair| pair[0] <= pair[1]);
        if !ascending(&self.item_pointers) || !ascending(&self.user_pointers) {
            return Err(Error::shape("pointer arrays are not ascending"));
        }

        if self.item_totals.len() != self.num_items {
            return Err(Error::shape(format!(
                "{} item totals for {} items", self.item_totals.len(), self.num_items)));
        }

        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return Err(Error::shape(format!("invalid confidence scale {}", self.alpha)));
        }

        let users_in_range = self.user_indices.iter().all(|&user| (user as usize) < self.num_users);
        let items_in_range = self.item_indices.iter().all(|&item| (item as usize) < self.num_items);
        let positions_in_range = self.value_positions.iter().all(|&position| position < nnz);

        if !users_in_range || !items_in_range || !positions_in_range {
            return Err(Error::shape("index out of range in utility matrix"));
        }

        // `get` binary-searches the users of an item
        for item in 0..self.num_items {
            let users = &self.user_indices[self.item_pointers[item]..self.item_pointers[item + 1]];
            if !users.windows(2).all(|pair| pair[0] < pair[1]) {
                return Err(Error::shape(format!("users of item {} are not strictly ascending", item)));
            }
        }

        // Every user slot must point at the cell of the same (item, user) pair, each cell once
        let mut visited = vec![false; nnz];

        for user in 0..self.num_users {
            for slot in self.user_pointers[user]..self.user_pointers[user + 1] {
                let item = self.item_indices[slot] as usize;
                let position = self.value_positions[slot];

                let inside_item = position >= self.item_pointers[item]
                    && position < self.item_pointers[item + 1];

                if !inside_item || self.user_indices[position] as usize != user || visited[position] {
                    return Err(Error::shape(format!(
                        "orientations disagree on item {} and user {}", item, user)));
                }
                visited[position] = true;
            }
        }

        if let Some(value) = self.values.iter().find(|value| !(value.is_finite() && **value > 1.0)) {
            return Err(Error::shape(format!("stored confidence {} is not above 1", value)));
        }

        Ok(())
    }
}

enum Positions<'a> {
    Contiguous(usize),
    Indirect(slice::Iter<'a, usize>),
}

/// Iterator over the stored cells of one row or column of a `UtilityMatrix`.
pub struct Entries<'a> {
    indices: slice::Iter<'a, u32>,
    positions: Positions<'a>,
    values: &'a [f64],
}

impl<'a> Iterator for Entries<'a> {
    type Item = (usize, f64);

    fn next(&mut self) -> Option<(usize, f64)> {
        let index = *self.indices.next()?;

        let position = match self.positions {
            Positions::Contiguous(ref mut next) => {
                let position = *next;
                *next += 1;
                position
            },
            Positions::Indirect(ref mut positions) => *positions.next()?,
        };

        Some((index as usize, self.values[position]))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.indices.size_hint()
    }
}

impl<'a> ExactSizeIterator for Entries<'a> {}

/// An item with its score. The ordering is reversed so that a max-heap keeps the worst of the
/// current top-n at its top: higher scores come first, ties go to the lower item index.
#[derive(PartialEq, Clone, Copy, Debug)]
pub struct ScoredItem {
    pub item: u32,
    pub score: f64,
}

/// There is no total order on floating point numbers, incomparable scores count as equal.
fn cmp_reverse(scored_item_a: &ScoredItem, scored_item_b: &ScoredItem) -> Ordering {
    match scored_item_b.score.partial_cmp(&scored_item_a.score) {
        Some(Ordering::Less) => Ordering::Less,
        Some(Ordering::Greater) => Ordering::Greater,
        _ => scored_item_a.item.cmp(&scored_item_b.item),
    }
}

impl Eq for ScoredItem {}

impl Ord for ScoredItem {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_reverse(self, other)
    }
}

impl PartialOrd for ScoredItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(cmp_reverse(self, other))
    }
}

/// Ranked items for a single user, best first.
#[derive(Clone, Debug, PartialEq)]
pub struct Recommendation {
    pub user_index: u32,
    pub items: Vec<ScoredItem>,
}

impl Recommendation {
    pub fn item_indices(&self) -> Vec<u32> {
        self.items.iter().map(|scored_item| scored_item.item).collect()
    }
}


#[cfg(test)]
mod tests {

    use std::collections::BinaryHeap;
    use super::{ScoredItem, UtilityMatrix};
    use crate::error::Error;

    fn example_matrix() -> UtilityMatrix {
        // (item, user, confidence)
        let entries = vec![
            (2, 0, 4.0),
            (0, 1, 2.0),
            (0, 0, 3.0),
            (1, 2, 5.0),
            (2, 2, 6.0),
        ];
        UtilityMatrix::from_entries(3, 4, entries, vec![3, 2, 7], 1.0)
    }

    #[test]
    fn scored_item_ordering_reversed() {
        let item_a = ScoredItem { item: 1, score: 0.5 };
        let item_b = ScoredItem { item: 2, score: 1.5 };
        let item_c = ScoredItem { item: 3, score: 0.3 };

        assert!(item_a > item_b);
        assert!(item_a < item_c);
        assert!(item_b < item_c);
    }

    #[test]
    fn ties_prefer_lower_item_index() {
        let item_a = ScoredItem { item: 7, score: 1.0 };
        let item_b = ScoredItem { item: 3, score: 1.0 };

        assert!(item_b < item_a);

        let heap: BinaryHeap<ScoredItem> = vec![item_a, item_b].into_iter().collect();
        let sorted = heap.into_sorted_vec();
        assert_eq!(sorted[0].item, 3);
        assert_eq!(sorted[1].item, 7);
    }

    #[test]
    fn both_orientations_share_values() {
        let matrix = example_matrix();

        assert_eq!(matrix.nnz(), 5);
        assert_eq!(matrix.num_items(), 3);
        assert_eq!(matrix.num_users(), 4);

        let item_zero: Vec<(usize, f64)> = matrix.item_entries(0).collect();
        assert_eq!(item_zero, vec![(0, 3.0), (1, 2.0)]);

        let user_two: Vec<(usize, f64)> = matrix.user_entries(2).collect();
        assert_eq!(user_two, vec![(1, 5.0), (2, 6.0)]);

        let user_zero: Vec<(usize, f64)> = matrix.user_entries(0).collect();
        assert_eq!(user_zero, vec![(0, 3.0), (2, 4.0)]);

        assert_eq!(matrix.user_entries(3).len(), 0);
        assert!(matrix.check_consistency().is_ok());
    }

    /* Round-trips the matrix through JSON and lets `tamper` edit the fields on the way. */
    fn tampered<F>(tamper: F) -> UtilityMatrix where F: FnOnce(&mut serde_json::Value) {
        let mut json = serde_json::to_value(&example_matrix()).unwrap();
        tamper(&mut json);
        serde_json::from_value(json).unwrap()
    }

    fn assert_shape_error(matrix: &UtilityMatrix) {
        match matrix.check_consistency() {
            Err(Error::Shape(_)) => {},
            other => panic!("expected a shape error, got {:?}", other),
        }
    }

    #[test]
    fn untouched_matrix_passes_after_round_trip() {
        assert!(tampered(|_| {}).check_consistency().is_ok());
    }

    #[test]
    fn orientations_must_describe_the_same_cells() {
        // User 0 holds items 0 and 2 at value positions 0 and 3, swapping them crosses the items
        let swapped = tampered(|json| {
            let positions = json["value_positions"].as_array_mut().unwrap();
            positions.swap(0, 1);
        });
        assert_shape_error(&swapped);

        // Both slots of user 2 point at the same cell
        let duplicated = tampered(|json| {
            json["value_positions"][4] = json["value_positions"][3].clone();
        });
        assert_shape_error(&duplicated);
    }

    #[test]
    fn users_of_an_item_must_ascend() {
        let unsorted = tampered(|json| {
            let users = json["user_indices"].as_array_mut().unwrap();
            users.swap(0, 1);
        });
        assert_shape_error(&unsorted);
    }

    #[test]
    fn confidences_must_exceed_one() {
        assert_shape_error(&tampered(|json| json["values"][0] = serde_json::json!(0.5)));
        assert_shape_error(&tampered(|json| json["values"][2] = serde_json::json!(-2.0)));
        assert_shape_error(&tampered(|json| json["values"][4] = serde_json::json!(1.0)));
    }

    #[test]
    fn point_lookups() {
        let matrix = example_matrix();

        assert_eq!(matrix.get(2, 2), Some(6.0));
        assert_eq!(matrix.get(1, 0), None);
        assert_eq!(matrix.get(9, 0), None);
    }

    #[test]
    fn histories_per_user() {
        let histories = example_matrix().user_histories();

        assert_eq!(histories.len(), 4);
        assert!(histories[0].contains(&0) && histories[0].contains(&2));
        assert_eq!(histories[1].len(), 1);
        assert!(histories[3].is_empty());
    }
}
