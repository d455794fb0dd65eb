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

use std::error::Error;
use std::fs::File;
use std::io;
use std::io::prelude::*;
use std::io::{stdout, BufReader, BufWriter};
use std::path::Path;

use fnv::FnvHashMap;
use serde_derive::{Deserialize, Serialize};

use crate::evaluation::EvalRecord;
use crate::model::Model;
use crate::stats::IndexMap;
use crate::types::{RawInteraction, Recommendation, UtilityMatrix};

/// Reads a CSV input file with a header line and comma separation.
pub fn csv_reader<P: AsRef<Path>>(file: P) -> Result<csv::Reader<File>, csv::Error> {
    let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b',')
        .from_path(file)?;

    Ok(reader)
}

#[derive(Deserialize)]
struct InteractionRecord {
    user_id: u64,
    item_id: u64,
    quantity: i64,
}

#[derive(Deserialize)]
struct BasketRecord {
    order_id: u64,
    user_id: u64,
    item_id: u64,
}

#[derive(Deserialize)]
struct ProductRecord {
    item_id: u64,
    name: String,
}

/// Interactions from columns `user_id`, `item_id` and `quantity`.
pub fn read_interactions<R: io::Read>(
    reader: &mut csv::Reader<R>,
) -> Result<Vec<RawInteraction>, csv::Error> {
    reader.deserialize()
        .map(|result| {
            let record: InteractionRecord = result?;
            Ok(RawInteraction::new(record.user_id, record.item_id, record.quantity))
        })
        .collect()
}

/// Held-out basket rows `(order_id, user_id, item_id)` from the columns of the same names.
pub fn read_basket_rows<R: io::Read>(
    reader: &mut csv::Reader<R>,
) -> Result<Vec<(u64, u64, u64)>, csv::Error> {
    reader.deserialize()
        .map(|result| {
            let record: BasketRecord = result?;
            Ok((record.order_id, record.user_id, record.item_id))
        })
        .collect()
}

/// Display names from columns `item_id` and `name`, only used for human-readable output.
pub fn read_product_names<R: io::Read>(
    reader: &mut csv::Reader<R>,
) -> Result<FnvHashMap<u64, String>, csv::Error> {
    reader.deserialize()
        .map(|result| {
            let record: ProductRecord = result?;
            Ok((record.item_id, record.name))
        })
        .collect()
}

/// Persists the utility matrix with both index structures and both index maps, so that
/// indices stay stable across reloads.
pub fn write_matrix<P: AsRef<Path>>(
    path: P,
    matrix: &UtilityMatrix,
    users: &IndexMap,
    items: &IndexMap,
) -> bincode::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(&mut writer, &(matrix, users, items))?;
    writer.flush()?;
    Ok(())
}

pub fn read_matrix<P: AsRef<Path>>(path: P) -> bincode::Result<(UtilityMatrix, IndexMap, IndexMap)> {
    let reader = BufReader::new(File::open(path)?);
    bincode::deserialize_from(reader)
}

pub fn write_model<P: AsRef<Path>>(path: P, model: &Model) -> Result<(), Box<dyn Error>> {
    let bytes = model.serialize()?;
    let mut file = File::create(path)?;
    file.write_all(&bytes)?;
    Ok(())
}

pub fn read_model<P: AsRef<Path>>(path: P) -> Result<Model, Box<dyn Error>> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    Ok(Model::deserialize(&bytes)?)
}

fn output(path: Option<String>) -> io::Result<Box<dyn Write>> {
    let out: Box<dyn Write> = match path {
        Some(path) => Box::new(BufWriter::new(File::create(&Path::new(&path))?)),
        _ => Box::new(stdout()),
    };
    Ok(out)
}

/// Struct used for JSON serialization of recommendations. Field names will be used in JSON.
#[derive(Serialize)]
struct RecommendedItem<'a> {
    item_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    score: f64,
}

#[derive(Serialize)]
struct Recommendations<'a> {
    for_user: u64,
    recommended_items: Vec<RecommendedItem<'a>>,
}

/// Output recommendations in JSON lines format, using the raw identifiers and, if available,
/// product names. If a `recommendations_path` is supplied, we write to a file at the specified
/// path, otherwise, we output to stdout.
pub fn write_recommendations(
    recommendations: &[Recommendation],
    users: &IndexMap,
    items: &IndexMap,
    names: Option<&FnvHashMap<u64, String>>,
    recommendations_path: Option<String>,
) -> io::Result<()> {

    let mut out = output(recommendations_path)?;

    for recommendation in recommendations {

        let for_user = users.decode(recommendation.user_index).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput,
                format!("unmapped user index {}", recommendation.user_index))
        })?;

        let mut recommended_items = Vec::with_capacity(recommendation.items.len());

        for scored_item in recommendation.items.iter() {
            let item_id = items.decode(scored_item.item).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput,
                    format!("unmapped item index {}", scored_item.item))
            })?;

            let name = names
                .and_then(|names| names.get(&item_id))
                .map(|name| name.as_str());

            recommended_items.push(RecommendedItem { item_id, name, score: scored_item.score });
        }

        let line = serde_json::to_string(&Recommendations { for_user, recommended_items })?;
        writeln!(out, "{}", line)?;
    }

    out.flush()
}

/// Output per-user evaluation records in JSON lines format, to a file or stdout.
pub fn write_eval_records(records: &[EvalRecord], records_path: Option<String>) -> io::Result<()> {

    let mut out = output(records_path)?;

    for record in records {
        writeln!(out, "{}", serde_json::to_string(record)?)?;
    }

    out.flush()
}
