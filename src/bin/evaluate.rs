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

use getopts::Options;

use nextbasket::evaluation::{self, Baskets, EvalOptions};
use nextbasket::io;
use nextbasket::utils;

fn main() {

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optopt("b", "baskets", "Held-out baskets file name (required). CSV with a header line \
        and the columns order_id, user_id and item_id, at most one order per user.", "PATH");
    opts.optopt("m", "matrix", "Path of the utility matrix written by the trainer (optional, \
        defaults to utility_matrix.bin).", "PATH");
    opts.optopt("o", "model", "Path of the trained model (optional, defaults to model.bin).",
        "PATH");
    opts.optopt("n", "num-items", "Length of the recommendation lists (optional, defaults to 10).",
        "NUMBER");
    opts.optopt("", "sample-fraction", "Share of the basket users to evaluate (optional, \
        defaults to 1).", "NUMBER");
    opts.optopt("", "sample-seed", "Seed for sampling the users (optional, defaults to 42).",
        "NUMBER");
    opts.optopt("r", "records", "Output file name for the per-user recalls (optional, they are \
        not written by default).", "PATH");
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

    let baskets_path = match matches.opt_str("b") {
        Some(path) => path,
        None => return print_usage_and_exit(
            &program,
            &opts,
            Some("Please specify a baskets file via --baskets."),
        ),
    };

    let defaults = EvalOptions::default();

    let n: usize = match matches.opt_get_default("n", defaults.n) {
        Ok(n) => n,
        Err(failure) => {
            let hint = format!("Problem with option 'n': {}", failure.to_string());
            return print_usage_and_exit(&program, &opts, Some(&hint))
        },
    };

    let sample_fraction: f64 =
        match matches.opt_get_default("sample-fraction", defaults.sample_fraction) {
            Ok(fraction) => fraction,
            Err(failure) => {
                let hint = format!("Problem with option 'sample-fraction': {}", failure.to_string());
                return print_usage_and_exit(&program, &opts, Some(&hint))
            },
        };

    let sample_seed: u64 = match matches.opt_get_default("sample-seed", defaults.sample_seed) {
        Ok(seed) => seed,
        Err(failure) => {
            let hint = format!("Problem with option 'sample-seed': {}", failure.to_string());
            return print_usage_and_exit(&program, &opts, Some(&hint))
        },
    };

    let matrix_path = matches.opt_str("m").unwrap_or_else(|| String::from("utility_matrix.bin"));
    let model_path = matches.opt_str("o").unwrap_or_else(|| String::from("model.bin"));
    let records_path = matches.opt_str("r");

    utils::init_logging();

    let options = EvalOptions { n, sample_fraction, sample_seed };

    if let Err(failure) =
        evaluate(&baskets_path, &matrix_path, &model_path, &options, records_path) {
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

fn evaluate(
    baskets_path: &str,
    matrix_path: &str,
    model_path: &str,
    options: &EvalOptions,
    records_path: Option<String>,
) -> Result<(), Box<dyn Error>> {

    let (matrix, users, items) = io::read_matrix(matrix_path)?;
    matrix.check_consistency()?;
    users.check_consistency()?;
    items.check_consistency()?;

    let model = io::read_model(model_path)?;

    tracing::info!(path = baskets_path, "reading held-out baskets");
    let rows = io::read_basket_rows(&mut io::csv_reader(baskets_path)?)?;
    let baskets = Baskets::from_rows(rows)?;

    let summary = evaluation::evaluate(&baskets, &matrix, &users, &items, &model, options)?;

    if records_path.is_some() {
        io::write_eval_records(&summary.records, records_path)?;
    }

    println!("Evaluated {} users with recall@{}", summary.records.len(), options.n);
    println!("ALS model:           {:.4}", summary.mean_recall_model);
    println!("Popularity baseline: {:.4}", summary.mean_recall_baseline);

    Ok(())
}
