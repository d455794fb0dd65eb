use std::collections::BinaryHeap;

use fnv::FnvHashSet;
use ndarray::ArrayView1;

use crate::error::{Error, Result};
use crate::stats::dense_index;
use crate::types::{FactorMatrix, Recommendation, ScoredItem, SparseBinaryMatrix, UtilityMatrix};
use crate::WorkerPool;

/// Keeps the `n` best candidates, best first. Ties go to the lower item index.
pub fn top_n<I>(candidates: I, n: usize) -> Vec<ScoredItem> where I: IntoIterator<Item=ScoredItem> {

    if n == 0 {
        return Vec::new();
    }

    let mut heap = BinaryHeap::with_capacity(n);

    for scored_item in candidates {
        if heap.len() < n {
            heap.push(scored_item);
        } else if let Some(mut top) = heap.peek_mut() {
            if scored_item < *top {
                *top = scored_item;
            }
        }
    }

    heap.into_sorted_vec()
}

fn check_factor_shapes(user_factors: &FactorMatrix, item_factors: &FactorMatrix) -> Result<()> {
    if user_factors.ncols() != item_factors.ncols() {
        return Err(Error::shape(format!(
            "user factors have {} columns, item factors {}",
            user_factors.ncols(), item_factors.ncols())));
    }
    // Every row index must fit a dense u32 index
    dense_index(user_factors.nrows())?;
    dense_index(item_factors.nrows())?;
    Ok(())
}

/// Scores every item with `x_u . y_i` and keeps the `n` best. Excluded items are removed
/// before ranking, so `n` items come back whenever `n` non-excluded items exist. Expects
/// factors that passed `check_factor_shapes`.
fn rank(
    user: ArrayView1<f64>,
    item_factors: &FactorMatrix,
    n: usize,
    exclude: Option<&FnvHashSet<u32>>,
) -> Vec<ScoredItem> {

    let scores = item_factors.dot(&user);

    let candidates = scores.iter()
        .enumerate()
        .map(|(item, score)| ScoredItem { item: item as u32, score: *score })
        .filter(|scored_item| match exclude {
            Some(excluded) => !excluded.contains(&scored_item.item),
            None => true,
        });

    top_n(candidates, n)
}

/// Top-`n` items for a single user index.
pub fn recommend(
    user_index: u32,
    user_factors: &FactorMatrix,
    item_factors: &FactorMatrix,
    n: usize,
    exclude: Option<&FnvHashSet<u32>>,
) -> Result<Recommendation> {

    check_factor_shapes(user_factors, item_factors)?;

    if user_index as usize >= user_factors.nrows() {
        return Err(Error::validation(format!(
            "user index {} out of range for {} users", user_index, user_factors.nrows())));
    }

    let items = rank(user_factors.row(user_index as usize), item_factors, n, exclude);

    Ok(Recommendation { user_index, items })
}

/// Top-`n` items for every user, excluding each user's history. Users are spread over
/// `pool_size` worker threads.
pub fn recommend_all(
    user_factors: &FactorMatrix,
    item_factors: &FactorMatrix,
    n: usize,
    histories: &SparseBinaryMatrix,
    pool_size: usize,
) -> Result<Vec<Recommendation>> {

    check_factor_shapes(user_factors, item_factors)?;

    let num_users = user_factors.nrows();

    if histories.len() != num_users {
        return Err(Error::shape(format!(
            "{} histories for {} users", histories.len(), num_users)));
    }

    let mut recommendations: Vec<Recommendation> = (0..num_users)
        .map(|user| Recommendation { user_index: user as u32, items: Vec::new() })
        .collect();

    if num_users == 0 {
        return Ok(recommendations);
    }

    let workers = WorkerPool::new(pool_size);
    let block_size = workers.block_size(num_users);

    workers.pool.scoped(|scope| {
        for block in recommendations.chunks_mut(block_size) {
            scope.execute(move || {
                for recommendation in block.iter_mut() {
                    let user = recommendation.user_index as usize;
                    recommendation.items =
                        rank(user_factors.row(user), item_factors, n, Some(&histories[user]));
                }
            });
        }
    });

    Ok(recommendations)
}

/// The non-personalized baseline: the `n` items with the highest summed counts in the
/// training data, identical for every user.
pub fn popular_items(matrix: &UtilityMatrix, n: usize) -> Result<Vec<ScoredItem>> {

    dense_index(matrix.item_totals().len())?;

    let candidates = matrix.item_totals()
        .iter()
        .enumerate()
        .map(|(item, total)| ScoredItem { item: item as u32, score: *total as f64 });

    Ok(top_n(candidates, n))
}


#[cfg(test)]
mod tests {

    use fnv::FnvHashSet;
    use ndarray::{arr2, Array2};

    use super::{popular_items, recommend, recommend_all, top_n};
    use crate::error::Error;
    use crate::stats::build;
    use crate::types::{RawInteraction, ScoredItem};

    #[test]
    fn topk() {
        let items = vec![
            ScoredItem { item: 1, score: 0.5 },
            ScoredItem { item: 2, score: 1.5 },
            ScoredItem { item: 3, score: 0.3 },
            ScoredItem { item: 4, score: 3.5 },
            ScoredItem { item: 5, score: 2.5 },
        ];

        let top = top_n(items, 3);

        let ranked: Vec<u32> = top.iter().map(|scored_item| scored_item.item).collect();
        assert_eq!(ranked, vec![4, 5, 2]);
        assert!(top_n(Vec::new(), 3).is_empty());
    }

    #[test]
    fn topk_breaks_ties_by_item_index() {
        let items = vec![
            ScoredItem { item: 9, score: 1.0 },
            ScoredItem { item: 2, score: 1.0 },
            ScoredItem { item: 5, score: 1.0 },
            ScoredItem { item: 7, score: 2.0 },
        ];

        let ranked: Vec<u32> = top_n(items, 3).iter().map(|scored_item| scored_item.item).collect();
        assert_eq!(ranked, vec![7, 2, 5]);
    }

    #[test]
    fn scores_are_dot_products() {
        let users = arr2(&[[1.0, 0.0], [0.5, 2.0]]);
        let items = arr2(&[[1.0, 1.0], [0.0, 3.0], [2.0, 0.0]]);

        let recommendation = recommend(1, &users, &items, 2, None).unwrap();

        assert_eq!(recommendation.user_index, 1);
        assert_eq!(recommendation.item_indices(), vec![1, 0]);
        assert_eq!(recommendation.items[0].score, 6.0);
        assert_eq!(recommendation.items[1].score, 2.5);
    }

    #[test]
    fn excluded_items_are_never_recommended() {
        let users = arr2(&[[1.0, 0.0]]);
        let items = arr2(&[[3.0, 0.0], [2.0, 0.0], [1.0, 0.0], [0.5, 0.0]]);
        let history: FnvHashSet<u32> = vec![0, 2].into_iter().collect();

        let recommendation = recommend(0, &users, &items, 2, Some(&history)).unwrap();

        assert_eq!(recommendation.item_indices(), vec![1, 3]);

        let everything = recommend(0, &users, &items, 10, Some(&history)).unwrap();
        assert_eq!(everything.items.len(), 2);
    }

    #[test]
    fn batch_recommendations_exclude_histories() {
        let users = arr2(&[[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]);
        let items = arr2(&[[1.0, 0.2], [0.1, 1.0], [0.6, 0.6], [0.0, 0.0]]);
        let histories = vec![
            vec![0].into_iter().collect(),
            vec![1, 2].into_iter().collect(),
            FnvHashSet::default(),
        ];

        let recommendations = recommend_all(&users, &items, 2, &histories, 2).unwrap();

        assert_eq!(recommendations.len(), 3);
        for recommendation in &recommendations {
            let history = &histories[recommendation.user_index as usize];
            assert!(recommendation.items.iter().all(|scored_item| !history.contains(&scored_item.item)));
            assert_eq!(recommendation.items.len(), 2);
        }
        assert_eq!(recommendations[0].item_indices(), vec![2, 1]);
    }

    #[test]
    fn mismatched_factors_are_rejected() {
        let users = arr2(&[[1.0, 0.0]]);
        let items = arr2(&[[1.0], [2.0]]);

        match recommend(0, &users, &items, 1, None) {
            Err(Error::Shape(_)) => {},
            other => panic!("expected a shape error, got {:?}", other),
        }
        assert!(recommend(3, &users, &arr2(&[[1.0, 1.0]]), 1, None).is_err());
    }

    #[test]
    fn row_counts_beyond_u32_are_rejected() {
        // Zero columns, so nothing is allocated
        let users = Array2::<f64>::zeros((u32::max_value() as usize + 1, 0));
        let items = Array2::<f64>::zeros((3, 0));

        match recommend(0, &users, &items, 1, None) {
            Err(Error::Validation(_)) => {},
            other => panic!("expected a validation error, got {:?}", other),
        }
    }

    #[test]
    fn most_popular_item_comes_first() {
        let interactions = vec![
            RawInteraction::new(1, 100, 1),
            RawInteraction::new(1, 200, 5),
            RawInteraction::new(2, 200, 2),
            RawInteraction::new(2, 300, 3),
            RawInteraction::new(3, 100, 2),
        ];
        let (matrix, _, items) = build(interactions, 15.0).unwrap();

        let popular = popular_items(&matrix, 2).unwrap();

        assert_eq!(popular[0].item, items.encode(200).unwrap());
        assert_eq!(popular[0].score, 7.0);
        // 100 and 300 are tied with 3 purchases each
        assert_eq!(popular[1].item, items.encode(100).unwrap());
    }
}
