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

use std::env;
use std::error::Error;
use std::process;
use std::time::Instant;

use getopts::Options;

use nextbasket::io;
use nextbasket::recommend;
use nextbasket::utils;

fn main() {

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optopt("m", "matrix", "Path of the utility matrix written by the trainer (optional, \
        defaults to utility_matrix.bin).", "PATH");
    opts.optopt("o", "model", "Path of the trained model (optional, defaults to model.bin).",
        "PATH");
    opts.optopt("n", "num-items", "Number of items to recommend per user (optional, defaults to \
        10).", "NUMBER");
    opts.optopt("u", "user", "Only recommend for the user with this id (optional, recommends for \
        all users by default).", "ID");
    opts.optopt("", "products", "Product names file (optional). CSV with a header line and the \
        columns item_id and name.", "PATH");
    opts.optopt("w", "outputfile", "Output file name (optional, output will be written to stdout \
        by default).", "PATH");
    opts.optopt("p", "threads", "Number of worker threads (optional, defaults to the number of \
        cpus).", "NUMBER");
    opts.optflag("h", "help", "Print this help menu");

    let matches = match opts.parse(&args[1..]) {
        Ok(matches) => matches,
        Err(failure) => {
            let hint = failure.to_string();
            return print_usage_and_exit(&program, &opts, Some(&hint))
        },
    };

    if matches.opt_present("h") {
        return print_usage_and_exit(&program, &opts, None);
    }

    let n: usize = match matches.opt_get_default("n", 10) {
        Ok(n) => n,
        Err(failure) => {
            let hint = format!("Problem with option 'n': {}", failure.to_string());
            return print_usage_and_exit(&program, &opts, Some(&hint))
        },
    };

    let user_id: Option<u64> = match matches.opt_get("u") {
        Ok(user_id) => user_id,
        Err(failure) => {
            let hint = format!("Problem with option 'u': {}", failure.to_string());
            return print_usage_and_exit(&program, &opts, Some(&hint))
        },
    };

    let threads: usize = match matches.opt_get_default("p", num_cpus::get()) {
        Ok(threads) => threads,
        Err(failure) => {
            let hint = format!("Problem with option 'p': {}", failure.to_string());
            return print_usage_and_exit(&program, &opts, Some(&hint))
        },
    };

    let matrix_path = matches.opt_str("m").unwrap_or_else(|| String::from("utility_matrix.bin"));
    let model_path = matches.opt_str("o").unwrap_or_else(|| String::from("model.bin"));
    let products_path = matches.opt_str("products");
    let recommendations_path = matches.opt_str("w");

    utils::init_logging();

    let result = recommend_items(
        &matrix_path,
        &model_path,
        n,
        user_id,
        products_path,
        threads,
        recommendations_path,
    );

    if let Err(failure) = result {
        eprintln!("{}", failure);
        process::exit(1);
    }
}

fn print_usage_and_exit(
    program: &str,
    opts: &Options,
    hint: Option<&str>
) {

    if let Some(hint) = hint {
        eprintln!("\n{}\n", hint);
    }

    let brief = format!("Usage: {} [options]", program);
    eprint!("{}", opts.usage(&brief));

    process::exit(if hint.is_some() { 2 } else { 0 });
}

fn recommend_items(
    matrix_path: &str,
    model_path: &str,
    n: usize,
    user_id: Option<u64>,
    products_path: Option<String>,
    threads: usize,
    recommendations_path: Option<String>,
) -> Result<(), Box<dyn Error>> {

    let (matrix, users, items) = io::read_matrix(matrix_path)?;
    matrix.check_consistency()?;
    users.check_consistency()?;
    items.check_consistency()?;

    let model = io::read_model(model_path)?;
    model.check_shape(&users, &items)?;

    let names = match products_path {
        Some(path) => Some(io::read_product_names(&mut io::csv_reader(&path)?)?),
        None => None,
    };

    let histories = matrix.user_histories();
    let start = Instant::now();

    let recommendations = match user_id {
        Some(user_id) => {
            let user = users.encode(user_id)
                .ok_or_else(|| format!("User {} does not occur in the training data.", user_id))?;

            vec![model.recommend(user, n, Some(&histories[user as usize]))?]
        },
        None => recommend::recommend_all(
            model.user_factors(),
            model.item_factors(),
            n,
            &histories,
            threads,
        )?,
    };

    tracing::info!(
        users = recommendations.len(),
        millis = utils::to_millis(start.elapsed()),
        "computed recommendations"
    );

    io::write_recommendations(&recommendations, &users, &items, names.as_ref(), recommendations_path)?;

    Ok(())
}
