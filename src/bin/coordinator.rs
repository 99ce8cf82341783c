use std::path::Path;
use std::process;

use clap::{App, Arg};
use log::{error, info};

use meshvote::config::CoordinatorConfig;
use meshvote::coordinator::Coordinator;
use meshvote::logging;

fn main() {
    let matches = App::new("coordinator")
        .about("Brokers a majority vote among a fixed number of participants")
        .arg(Arg::with_name("config")
            .long("config")
            .value_name("FILE")
            .help("Reads the configuration from a TOML file")
            .takes_value(true))
        .arg(Arg::with_name("ARGS")
            .help("<port> <participants> <option>...")
            .multiple(true)
            .required_unless("config"))
        .get_matches();

    let config = match matches.value_of("config") {
        Some(path) => CoordinatorConfig::load(Path::new(path)),
        None => {
            let args: Vec<&str> = matches.values_of("ARGS").map(|v| v.collect()).unwrap_or_default();
            CoordinatorConfig::from_args(&args)
        }
    };

    logging::init("coordinator");

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    match Coordinator::bind(config).and_then(|c| c.run()) {
        Ok(option) => info!("Vote complete: {}", option),
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}
