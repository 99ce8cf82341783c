use std::path::Path;
use std::process;

use clap::{App, Arg};
use log::{error, info};

use meshvote::config::ParticipantConfig;
use meshvote::logging;
use meshvote::participant::Participant;

fn main() {
    let matches = App::new("participant")
        .about("Takes part in a coordinated majority vote")
        .arg(Arg::with_name("config")
            .long("config")
            .value_name("FILE")
            .help("Reads the configuration from a TOML file")
            .takes_value(true))
        .arg(Arg::with_name("ARGS")
            .help("<coordinator port> <port> <timeout ms> <failure condition 0|1|2>")
            .multiple(true)
            .required_unless("config"))
        .get_matches();

    let config = match matches.value_of("config") {
        Some(path) => ParticipantConfig::load(Path::new(path)),
        None => {
            let args: Vec<&str> = matches.values_of("ARGS").map(|v| v.collect()).unwrap_or_default();
            ParticipantConfig::from_args(&args)
        }
    };

    let config = match config {
        Ok(c) => {
            logging::init(&format!("participant {}", c.port));
            c
        },
        Err(e) => {
            logging::init("participant");
            error!("{}", e);
            process::exit(1);
        }
    };

    match Participant::bind(config).and_then(|p| p.run()) {
        Ok(option) => info!("Vote complete: {}", option),
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}
