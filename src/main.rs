//! devmon: development-time supervisor core for node scripts.
//!
//! This is the entry point of the application. It disambiguates the hybrid
//! command line (supervisor options, node options, script, script arguments),
//! resolves the layered configuration, and launches the script. The
//! interesting parts live in `cli` and `config`.

mod cli;
mod config;
mod error;
mod process;

use std::env;
use std::process::exit;

use log::debug;

use crate::config::Schema;
use crate::error::Error;

fn main() {
    env_logger::init();

    let argv: Vec<String> = env::args().skip(1).collect();
    let schema = Schema::builtin();
    let cmd = match cli::parse(&schema, &argv) {
        Ok(cmd) => cmd,
        Err(Error::Usage) => {
            eprintln!("{}", Error::Usage);
            exit(2);
        }
        Err(err) => {
            let err = anyhow::Error::from(err);
            eprintln!("devmon: {err:#}");
            exit(1);
        }
    };
    debug!("effective config: {:?}", cmd.opts);

    match process::run(&cmd) {
        Ok(code) => exit(code),
        Err(err) => {
            eprintln!("devmon: {err:#}");
            exit(1);
        }
    }
}
