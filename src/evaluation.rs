use std::collections::BTreeMap;
use std::time::Instant;

use fnv::{FnvHashMap, FnvHashSet};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use serde_derive::Serialize;

use crate::error::{Error, Result};
use crate::model::Model;
use crate::recommend;
use crate::stats::IndexMap;
use crate::types::UtilityMatrix;
use crate::utils;

/// Recall of a single user under both predictors.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EvalRecord {
    pub user_id: u64,
    pub recall_model: f64,
    pub recall_baseline: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EvalSummary {
    pub records: Vec<EvalRecord>,
    pub mean_recall_model: f64,
    pub mean_recall_baseline: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EvalOptions {
    /// Length of both ranked lists.
    pub n: usize,
    /// Share of the basket users to evaluate, in (0, 1].
    pub sample_fraction: f64,
    pub sample_seed: u64,
}

impl Default for EvalOptions {
    fn default() -> Self {
        EvalOptions { n: 10, sample_fraction: 1.0, sample_seed: 42 }
    }
}

/// `|actual ∩ predicted| / |actual|`, and 0 for an empty `actual`.
pub fn recall(actual: &FnvHashSet<u32>, predicted: &FnvHashSet<u32>) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }

    let hits = actual.intersection(predicted).count();
    hits as f64 / actual.len() as f64
}

/// Held-out baskets, one per user, keyed by raw user id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Baskets {
    baskets: BTreeMap<u64, FnvHashSet<u64>>,
}

impl Baskets {

    /// Groups `(order_id, user_id, item_id)` rows. Every order must belong to a single user and
    /// every user must have a single held-out order.
    pub fn from_rows<I>(rows: I) -> Result<Self> where I: IntoIterator<Item=(u64, u64, u64)> {

        let mut order_of_user: FnvHashMap<u64, u64> = FnvHashMap::default();
        let mut user_of_order: FnvHashMap<u64, u64> = FnvHashMap::default();
        let mut baskets: BTreeMap<u64, FnvHashSet<u64>> = BTreeMap::new();

        for (order_id, user_id, item_id) in rows {

            let known_user = *user_of_order.entry(order_id).or_insert(user_id);
            if known_user != user_id {
                return Err(Error::validation(format!(
                    "order {} belongs to users {} and {}", order_id, known_user, user_id)));
            }

            let known_order = *order_of_user.entry(user_id).or_insert(order_id);
            if known_order != order_id {
                return Err(Error::validation(format!(
                    "user {} has held-out orders {} and {}", user_id, known_order, order_id)));
            }

            baskets.entry(user_id).or_insert_with(FnvHashSet::default).insert(item_id);
        }

        Ok(Baskets { baskets })
    }

    pub fn len(&self) -> usize {
        self.baskets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baskets.is_empty()
    }

    pub fn get(&self, user_id: u64) -> Option<&FnvHashSet<u64>> {
        self.baskets.get(&user_id)
    }

    /// Ascending raw user ids.
    pub fn user_ids(&self) -> Vec<u64> {
        self.baskets.keys().cloned().collect()
    }
}

impl From<BTreeMap<u64, FnvHashSet<u64>>> for Baskets {
    fn from(baskets: BTreeMap<u64, FnvHashSet<u64>>) -> Self {
        Baskets { baskets }
    }
}

/// Deterministic subsample of `ceil(fraction * len)` user ids, returned in ascending order.
pub fn sample_users(user_ids: &[u64], fraction: f64, seed: u64) -> Result<Vec<u64>> {

    if !(fraction > 0.0 && fraction <= 1.0) {
        return Err(Error::validation(format!("sample fraction must be in (0, 1], got {}", fraction)));
    }

    let mut sampled: Vec<u64> = user_ids.to_vec();
    sampled.sort_unstable();

    if fraction < 1.0 {
        let size = (fraction * sampled.len() as f64).ceil() as usize;
        let mut rng = XorShiftRng::seed_from_u64(seed);
        sampled.shuffle(&mut rng);
        sampled.truncate(size);
        sampled.sort_unstable();
    }

    Ok(sampled)
}

/// Compares the model against the popularity baseline on the novel items of each sampled
/// user's held-out basket, i.e. the items the user never bought in the training data.
pub fn evaluate(
    baskets: &Baskets,
    matrix: &UtilityMatrix,
    users: &IndexMap,
    items: &IndexMap,
    model: &Model,
    options: &EvalOptions,
) -> Result<EvalSummary> {

    let start = Instant::now();

    model.check_shape(users, items)?;

    if matrix.num_users() != users.len() || matrix.num_items() != items.len() {
        return Err(Error::shape(format!(
            "utility matrix is {} x {}, index maps cover {} items and {} users",
            matrix.num_items(), matrix.num_users(), items.len(), users.len())));
    }

    let histories = matrix.user_histories();

    let popular: FnvHashSet<u32> = recommend::popular_items(matrix, options.n)?
        .into_iter()
        .map(|scored_item| scored_item.item)
        .collect();

    let sampled = sample_users(&baskets.user_ids(), options.sample_fraction, options.sample_seed)?;
    let mut records = Vec::with_capacity(sampled.len());

    for user_id in sampled {

        let user = users.encode(user_id).ok_or_else(|| {
            Error::validation(format!("user {} of a held-out basket is unknown", user_id))
        })?;

        let history = &histories[user as usize];
        let mut novel: FnvHashSet<u32> = FnvHashSet::default();

        for item_id in baskets.get(user_id).into_iter().flatten() {
            let item = items.encode(*item_id).ok_or_else(|| {
                Error::validation(format!("item {} in the basket of user {} is unknown", item_id, user_id))
            })?;

            if !history.contains(&item) {
                novel.insert(item);
            }
        }

        let recommended: FnvHashSet<u32> = recommend::recommend(
            user,
            model.user_factors(),
            model.item_factors(),
            options.n,
            Some(history),
        )?.item_indices().into_iter().collect();

        records.push(EvalRecord {
            user_id,
            recall_model: recall(&novel, &recommended),
            recall_baseline: recall(&novel, &popular),
        });
    }

    let mean = |recalls: Vec<f64>| {
        if recalls.is_empty() { 0.0 } else { recalls.iter().sum::<f64>() / recalls.len() as f64 }
    };

    let mean_recall_model = mean(records.iter().map(|record| record.recall_model).collect());
    let mean_recall_baseline = mean(records.iter().map(|record| record.recall_baseline).collect());

    tracing::info!(
        users = records.len(),
        mean_recall_model,
        mean_recall_baseline,
        millis = utils::to_millis(start.elapsed()),
        "finished evaluation"
    );

    Ok(EvalSummary { records, mean_recall_model, mean_recall_baseline })
}


#[cfg(test)]
mod tests {

    use std::collections::BTreeMap;

    use fnv::FnvHashSet;
    use ndarray::arr2;

    use super::{evaluate, recall, sample_users, Baskets, EvalOptions};
    use crate::error::Error;
    use crate::model::Model;
    use crate::stats::build;
    use crate::types::RawInteraction;
    use crate::Hyperparameters;

    fn set(items: &[u32]) -> FnvHashSet<u32> {
        items.iter().cloned().collect()
    }

    #[test]
    fn recall_of_partial_overlap() {
        assert_eq!(recall(&set(&[1, 2, 3]), &set(&[2, 3, 4, 5])), 2.0 / 3.0);
    }

    #[test]
    fn recall_edge_cases() {
        assert_eq!(recall(&set(&[]), &set(&[1, 2])), 0.0);
        assert_eq!(recall(&set(&[]), &set(&[])), 0.0);
        assert_eq!(recall(&set(&[4, 8]), &set(&[4, 8])), 1.0);
        assert_eq!(recall(&set(&[4, 8]), &set(&[])), 0.0);
    }

    #[test]
    fn recall_grows_with_predictions() {
        let actual = set(&[1, 2, 3, 4]);
        let mut predicted = FnvHashSet::default();
        let mut previous = recall(&actual, &predicted);

        for item in &[7, 2, 9, 4, 1, 3] {
            predicted.insert(*item);
            let current = recall(&actual, &predicted);
            assert!(current >= previous);
            previous = current;
        }
        assert_eq!(previous, 1.0);
    }

    #[test]
    fn baskets_group_rows_per_user() {
        let baskets = Baskets::from_rows(vec![(1, 10, 100), (1, 10, 101), (2, 20, 100)]).unwrap();

        assert_eq!(baskets.len(), 2);
        assert_eq!(baskets.user_ids(), vec![10, 20]);
        assert_eq!(baskets.get(10).unwrap().len(), 2);
    }

    #[test]
    fn baskets_need_one_order_per_user() {
        match Baskets::from_rows(vec![(1, 10, 100), (2, 10, 101)]) {
            Err(Error::Validation(_)) => {},
            other => panic!("expected a validation error, got {:?}", other),
        }
        assert!(Baskets::from_rows(vec![(1, 10, 100), (1, 11, 101)]).is_err());
    }

    #[test]
    fn sampling_is_deterministic() {
        let user_ids: Vec<u64> = (0..100).map(|user| user * 3).collect();

        let sample_a = sample_users(&user_ids, 0.25, 11).unwrap();
        let sample_b = sample_users(&user_ids, 0.25, 11).unwrap();

        assert_eq!(sample_a, sample_b);
        assert_eq!(sample_a.len(), 25);
        assert!(sample_a.windows(2).all(|pair| pair[0] < pair[1]));

        assert_eq!(sample_users(&user_ids, 1.0, 11).unwrap(), user_ids);
        assert!(sample_users(&user_ids, 0.0, 11).is_err());
        assert!(sample_users(&user_ids, 1.5, 11).is_err());
    }

    #[test]
    fn matrix_must_match_the_index_maps() {
        let (matrix, _, _) = build(vec![
            RawInteraction::new(1, 10, 1),
            RawInteraction::new(2, 20, 1),
        ], 15.0).unwrap();

        // Index maps and model of a run that saw a third user
        let (_, users, items) = build(vec![
            RawInteraction::new(1, 10, 1),
            RawInteraction::new(2, 20, 1),
            RawInteraction::new(3, 20, 2),
        ], 15.0).unwrap();

        let model = Model::new(
            Hyperparameters::default().factors(1),
            arr2(&[[1.0], [1.0], [1.0]]),
            arr2(&[[1.0], [2.0]]),
        ).unwrap();

        let mut held_out = BTreeMap::new();
        held_out.insert(1, vec![20].into_iter().collect());
        let baskets = Baskets::from(held_out);

        match evaluate(&baskets, &matrix, &users, &items, &model, &EvalOptions::default()) {
            Err(Error::Shape(_)) => {},
            other => panic!("expected a shape error, got {:?}", other),
        }
    }

    #[test]
    fn evaluates_both_predictors() {
        // Item 100 is the most popular one, users 2 and 3 never bought it
        let interactions = vec![
            RawInteraction::new(1, 100, 5),
            RawInteraction::new(1, 200, 1),
            RawInteraction::new(2, 200, 1),
            RawInteraction::new(2, 300, 1),
            RawInteraction::new(3, 300, 2),
            RawInteraction::new(4, 100, 3),
        ];
        let (matrix, users, items) = build(interactions, 15.0).unwrap();

        // User factors in the same one-dimensional space as the items, favoring item 100
        let model = Model::new(
            Hyperparameters::default().factors(1),
            arr2(&[[1.0], [1.0], [1.0], [1.0]]),
            arr2(&[[3.0], [2.0], [1.0]]),
        ).unwrap();

        let mut held_out = BTreeMap::new();
        held_out.insert(2, vec![100, 200].into_iter().collect());
        held_out.insert(3, vec![300].into_iter().collect());
        let baskets = Baskets::from(held_out);

        let options = EvalOptions { n: 1, sample_fraction: 1.0, sample_seed: 0 };
        let summary = evaluate(&baskets, &matrix, &users, &items, &model, &options).unwrap();

        assert_eq!(summary.records.len(), 2);

        // User 2 bought 200 before, so only 100 is novel and both predictors find it
        assert_eq!(summary.records[0].user_id, 2);
        assert_eq!(summary.records[0].recall_model, 1.0);
        assert_eq!(summary.records[0].recall_baseline, 1.0);

        // User 3 has nothing novel
        assert_eq!(summary.records[1].recall_model, 0.0);
        assert_eq!(summary.records[1].recall_baseline, 0.0);

        assert_eq!(summary.mean_recall_model, 0.5);
        assert_eq!(summary.mean_recall_baseline, 0.5);
    }

    #[test]
    fn unknown_basket_ids_are_rejected() {
        let interactions = vec![RawInteraction::new(1, 100, 1), RawInteraction::new(2, 200, 1)];
        let (matrix, users, items) = build(interactions, 15.0).unwrap();
        let model = Model::new(
            Hyperparameters::default().factors(1),
            arr2(&[[1.0], [1.0]]),
            arr2(&[[1.0], [1.0]]),
        ).unwrap();

        let unknown_user = Baskets::from_rows(vec![(1, 99, 100)]).unwrap();
        let unknown_item = Baskets::from_rows(vec![(1, 1, 999)]).unwrap();
        let options = EvalOptions::default();

        assert!(evaluate(&unknown_user, &matrix, &users, &items, &model, &options).is_err());
        assert!(evaluate(&unknown_item, &matrix, &users, &items, &model, &options).is_err());
    }
}
