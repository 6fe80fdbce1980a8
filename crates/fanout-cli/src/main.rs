use clap::error::ErrorKind;
use clap::Parser;

mod cli;

use crate::cli::Cli;

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    if let Err(e) = fanout_core::logging::init(cli.log.as_deref()) {
        eprintln!("fanout: log file unavailable ({}), using stderr", e);
        fanout_core::logging::init_stderr();
    }

    if let Err(err) = cli.run() {
        eprintln!("fanout error: {:#}", err);
        std::process::exit(1);
    }
}
