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
use std::path::Path;
use std::process;
use std::time::Instant;

use getopts::{Matches, Options};

use nextbasket::io;
use nextbasket::utils;
use nextbasket::{Hyperparameters, IndexMap, Model, UtilityMatrix};

fn main() {

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optopt("i", "interactions", "Interactions file name (required unless the utility matrix \
        already exists). CSV with a header line and the columns user_id, item_id and quantity.",
        "PATH");
    opts.optopt("m", "matrix", "Path of the cached utility matrix (optional, defaults to \
        utility_matrix.bin). Built from the interactions if missing.", "PATH");
    opts.optopt("o", "model", "Path of the trained model (optional, defaults to model.bin).",
        "PATH");
    opts.optopt("k", "factors", "Number of latent factors (optional, defaults to 50).", "NUMBER");
    opts.optopt("l", "lambda", "Regularization strength (optional, defaults to 0.1).", "NUMBER");
    opts.optopt("a", "alpha", "Confidence scale (optional, defaults to 15).", "NUMBER");
    opts.optopt("t", "iterations", "Number of alternations (optional, defaults to 15).", "NUMBER");
    opts.optopt("s", "seed", "Seed for the factor initialization (optional, defaults to 42).",
        "NUMBER");
    opts.optopt("p", "threads", "Number of worker threads (optional, defaults to the number of \
        cpus).", "NUMBER");
    opts.optflag("f", "force", "Rebuild the utility matrix and retrain the model even if they \
        exist already.");
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

    let hyper = match hyperparameters(&matches) {
        Ok(hyper) => hyper,
        Err(hint) => return print_usage_and_exit(&program, &opts, Some(&hint)),
    };

    let threads: usize = match matches.opt_get_default("p", num_cpus::get()) {
        Ok(threads) => threads,
        Err(failure) => {
            let hint = format!("Problem with option 'p': {}", failure.to_string());
            return print_usage_and_exit(&program, &opts, Some(&hint))
        },
    };

    let interactions_path = matches.opt_str("i");
    let matrix_path = matches.opt_str("m").unwrap_or_else(|| String::from("utility_matrix.bin"));
    let model_path = matches.opt_str("o").unwrap_or_else(|| String::from("model.bin"));
    let force = matches.opt_present("f");

    utils::init_logging();

    if let Err(failure) =
        train(interactions_path, &matrix_path, &model_path, hyper, threads, force) {
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

fn hyperparameters(matches: &Matches) -> Result<Hyperparameters, String> {

    let defaults = Hyperparameters::default();
    let problem = |option: &str, failure: String| format!("Problem with option '{}': {}", option, failure);

    let hyper = Hyperparameters {
        factors: matches.opt_get_default("k", defaults.factors)
            .map_err(|failure| problem("k", failure.to_string()))?,
        regularization: matches.opt_get_default("l", defaults.regularization)
            .map_err(|failure| problem("l", failure.to_string()))?,
        alpha: matches.opt_get_default("a", defaults.alpha)
            .map_err(|failure| problem("a", failure.to_string()))?,
        iterations: matches.opt_get_default("t", defaults.iterations)
            .map_err(|failure| problem("t", failure.to_string()))?,
        seed: matches.opt_get_default("s", defaults.seed)
            .map_err(|failure| problem("s", failure.to_string()))?,
    };

    hyper.validate().map_err(|failure| failure.to_string())?;

    Ok(hyper)
}

fn train(
    interactions_path: Option<String>,
    matrix_path: &str,
    model_path: &str,
    hyper: Hyperparameters,
    threads: usize,
    force: bool,
) -> Result<(), Box<dyn Error>> {

    let (matrix, users, items, rebuilt) =
        matrix(interactions_path, matrix_path, hyper.alpha, force)?;

    if !force && !rebuilt && Path::new(model_path).exists() {
        let model = io::read_model(model_path)?;

        if model.hyperparameters() == &hyper && model.check_shape(&users, &items).is_ok() {
            tracing::info!(path = model_path, "model is up to date, nothing to train");
            return Ok(());
        }

        tracing::info!(path = model_path, "model does not match the settings, retraining");
    }

    let start = Instant::now();
    let model = Model::train(&matrix, hyper, threads)?;

    tracing::info!(
        users = model.num_users(),
        items = model.num_items(),
        millis = utils::to_millis(start.elapsed()),
        "trained model"
    );

    io::write_model(model_path, &model)?;
    tracing::info!(path = model_path, "wrote model");

    Ok(())
}

/// Loads the cached utility matrix, or builds and caches it when it is missing, was built with
/// a different alpha or a rebuild is forced. Also reports whether it was rebuilt.
fn matrix(
    interactions_path: Option<String>,
    matrix_path: &str,
    alpha: f64,
    force: bool,
) -> Result<(UtilityMatrix, IndexMap, IndexMap, bool), Box<dyn Error>> {

    if !force && Path::new(matrix_path).exists() {
        let (matrix, users, items) = io::read_matrix(matrix_path)?;
        matrix.check_consistency()?;
        users.check_consistency()?;
        items.check_consistency()?;

        if matrix.alpha() == alpha {
            tracing::info!(
                path = matrix_path,
                users = users.len(),
                items = items.len(),
                "loaded utility matrix"
            );
            return Ok((matrix, users, items, false));
        }

        tracing::info!(path = matrix_path, cached = matrix.alpha(), alpha, "alpha changed, rebuilding");
    }

    let interactions_path = interactions_path
        .ok_or("Please specify an interactions file via --interactions.")?;

    tracing::info!(path = %interactions_path, "reading interactions");
    let interactions = io::read_interactions(&mut io::csv_reader(&interactions_path)?)?;

    let (matrix, users, items) = nextbasket::build(interactions, alpha)?;

    io::write_matrix(matrix_path, &matrix, &users, &items)?;
    tracing::info!(path = matrix_path, "wrote utility matrix");

    Ok((matrix, users, items, true))
}
