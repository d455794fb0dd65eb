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

use std::collections::BTreeMap;
use std::convert::TryFrom;

use fnv::FnvHashMap;
use serde_derive::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{RawInteraction, UtilityMatrix};

/// Bijection between sparse raw ids and dense indices `0..len()`. Indices are assigned in
/// ascending order of the raw ids, so rebuilding from the same ids yields the same map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexMap {
    ids: Vec<u64>,
    indices: FnvHashMap<u64, u32>,
}

impl IndexMap {

    pub fn from_ids<I>(raw_ids: I) -> Result<Self> where I: IntoIterator<Item=u64> {

        let mut ids: Vec<u64> = raw_ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();

        let mut indices: FnvHashMap<u64, u32> =
            FnvHashMap::with_capacity_and_hasher(ids.len(), Default::default());

        for (index, id) in ids.iter().enumerate() {
            indices.insert(*id, dense_index(index)?);
        }

        Ok(IndexMap { ids, indices })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn encode(&self, id: u64) -> Option<u32> {
        self.indices.get(&id).cloned()
    }

    pub fn decode(&self, index: u32) -> Option<u64> {
        self.ids.get(index as usize).cloned()
    }

    /// Raw ids in index order.
    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    /// Verifies that the ids ascend strictly and that the lookup table is their inverse, e.g.
    /// after deserialization.
    pub fn check_consistency(&self) -> Result<()> {

        if !self.ids.windows(2).all(|pair| pair[0] < pair[1]) {
            return Err(Error::shape("raw ids are not strictly ascending"));
        }

        if self.indices.len() != self.ids.len() {
            return Err(Error::shape(format!(
                "{} lookup entries for {} ids", self.indices.len(), self.ids.len())));
        }

        for (index, id) in self.ids.iter().enumerate() {
            if self.indices.get(id).map(|&mapped| mapped as usize) != Some(index) {
                return Err(Error::shape(format!("id {} does not map back to index {}", id, index)));
            }
        }

        Ok(())
    }
}

/// Dense `u32` index of a position, an error once `u32` cannot address it.
pub(crate) fn dense_index(index: usize) -> Result<u32> {
    u32::try_from(index).map_err(|_| {
        Error::validation(format!("index {} exceeds the u32 index space", index))
    })
}

/// Confidence of an observed cell, `1 + alpha * count`.
pub fn confidence(count: u64, alpha: f64) -> f64 {
    1.0 + alpha * count as f64
}

/// Aggregates raw interactions into a confidence-weighted (item x user) matrix. Counts of
/// repeated (user, item) pairs are summed. Pairs with a total count of zero register their ids
/// but store no entry.
pub fn build<I>(interactions: I, alpha: f64) -> Result<(UtilityMatrix, IndexMap, IndexMap)>
    where I: IntoIterator<Item=RawInteraction> {

    if !(alpha.is_finite() && alpha > 0.0) {
        return Err(Error::validation(format!("alpha must be positive and finite, got {}", alpha)));
    }

    // Ordered by (user, item) so the aggregation does not depend on input order
    let mut counts: BTreeMap<(u64, u64), u64> = BTreeMap::new();
    let mut num_interactions: u64 = 0;

    for interaction in interactions {

        if interaction.count < 0 {
            return Err(Error::validation(format!(
                "negative count {} for user {} and item {}",
                interaction.count, interaction.user_id, interaction.item_id)));
        }

        let total = counts.entry((interaction.user_id, interaction.item_id)).or_insert(0);
        *total = total.checked_add(interaction.count as u64).ok_or_else(|| {
            Error::validation(format!(
                "count overflow for user {} and item {}", interaction.user_id, interaction.item_id))
        })?;

        num_interactions += 1;
    }

    let users = IndexMap::from_ids(counts.keys().map(|&(user_id, _)| user_id))?;
    let items = IndexMap::from_ids(counts.keys().map(|&(_, item_id)| item_id))?;

    let mut item_totals = vec![0_u64; items.len()];
    let mut entries: Vec<(u32, u32, f64)> = Vec::with_capacity(counts.len());

    for (&(user_id, item_id), &count) in counts.iter() {

        if count == 0 {
            continue;
        }

        // Both ids were registered from the same keys above
        let (user, item) = match (users.encode(user_id), items.encode(item_id)) {
            (Some(user), Some(item)) => (user, item),
            _ => return Err(Error::validation(format!("unmapped pair ({}, {})", user_id, item_id))),
        };

        item_totals[item as usize] += count;
        entries.push((item, user, confidence(count, alpha)));
    }

    let matrix = UtilityMatrix::from_entries(items.len(), users.len(), entries, item_totals, alpha);

    tracing::info!(
        interactions = num_interactions,
        users = users.len(),
        items = items.len(),
        nnz = matrix.nnz(),
        "built utility matrix"
    );

    Ok((matrix, users, items))
}
