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

#[cfg(test)]
mod tests {

    use crate::evaluation::{self, Baskets, EvalOptions};
    use crate::recommend;
    use crate::{build, Hyperparameters, Model, RawInteraction};

    const MILK: u64 = 24852;

    /* Every user buys milk, plus a few items from one of two aisles. */
    fn purchases() -> Vec<RawInteraction> {
        let mut interactions = Vec::new();

        for user_id in 1..=30_u64 {
            interactions.push(RawInteraction::new(user_id, MILK, 3));

            let aisle_start = if user_id % 2 == 0 { 100 } else { 200 };
            for offset in 0..4_u64 {
                if (user_id + offset) % 3 != 0 {
                    interactions.push(RawInteraction::new(user_id, aisle_start + offset, 1));
                }
            }
        }

        interactions
    }

    #[test]
    fn programmatic_usage() {

        /* Our input data comprises purchase counts between users and products. Repeated
           (user, product) pairs are summed while the confidence matrix is built, and the raw
           ids are mapped to dense indices in ascending order. */
        let (matrix, users, items) = build(purchases(), 15.0).unwrap();

        println!(
            "Found {} purchased (user, product) pairs between {} users and {} products.",
            matrix.nnz(),
            users.len(),
            items.len(),
        );

        /* We factorize the confidence matrix into user and item factors. */
        let hyper = Hyperparameters::default()
            .factors(4)
            .regularization(0.1)
            .alpha(15.0)
            .iterations(8)
            .seed(1);

        let model = Model::train(&matrix, hyper.clone(), 2).unwrap();
        model.check_shape(&users, &items).unwrap();

        /* Recommendations exclude everything a user bought before. */
        let histories = matrix.user_histories();
        let recommendations =
            recommend::recommend_all(model.user_factors(), model.item_factors(), 3, &histories, 2)
                .unwrap();

        for recommendation in recommendations.iter() {
            let history = &histories[recommendation.user_index as usize];
            assert!(recommendation.items.iter().all(|scored_item| !history.contains(&scored_item.item)));
            assert!(recommendation.items.windows(2).all(|pair| pair[0].score >= pair[1].score));
        }

        /* The most frequent product heads the popularity baseline for everyone. */
        let popular = recommend::popular_items(&matrix, 3).unwrap();
        assert_eq!(popular[0].item, items.encode(MILK).unwrap());

        /* Held-out baskets: every user buys their whole aisle, so the novel items are the ones
           from their aisle they skipped before. */
        let mut rows = Vec::new();
        for user_id in 1..=30_u64 {
            let order_id = 1000 + user_id;
            let aisle_start = if user_id % 2 == 0 { 100 } else { 200 };
            for offset in 0..4_u64 {
                rows.push((order_id, user_id, aisle_start + offset));
            }
        }
        let baskets = Baskets::from_rows(rows).unwrap();

        let options = EvalOptions { n: 2, sample_fraction: 0.5, sample_seed: 3 };
        let summary =
            evaluation::evaluate(&baskets, &matrix, &users, &items, &model, &options).unwrap();

        assert_eq!(summary.records.len(), 15);
        assert!(summary.mean_recall_model >= 0.0 && summary.mean_recall_model <= 1.0);

        /* Everyone bought milk before, so the baseline only hits with its second item. */
        assert!(summary.mean_recall_model >= summary.mean_recall_baseline);

        println!(
            "Mean recall@2: model {:.3}, popularity baseline {:.3}",
            summary.mean_recall_model,
            summary.mean_recall_baseline,
        );

        /* Retraining with the same settings reproduces the persisted model exactly. */
        let restored = Model::deserialize(&model.serialize().unwrap()).unwrap();
        assert_eq!(restored, Model::train(&matrix, hyper, 4).unwrap());
    }
}
