//! `vkcube`: a spinning, vertex-lit cube on whatever display is available
//!
//! Without `-m` the back-ends are tried in order Wayland, XCB, KMS and
//! headless. Settings from the TOML file named by `VKCUBE_CONFIG` are
//! applied first, command-line flags on top.

mod cli;

use std::process::ExitCode;

use cube_engine::foundation::logging;
use cube_engine::prelude::*;

use cli::CliArgs;

fn main() -> ExitCode {
    logging::init(log::LevelFilter::Warn);

    let args = match CliArgs::parse_from(std::env::args_os()) {
        Ok(args) => args,
        Err(e) => {
            eprint!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match run_cube(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cube(args: CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = CubeConfig::from_env()?;
    args.apply(&mut config);
    config.validate()?;
    debug!("Starting with display mode {}", config.display_mode);

    let backend = init_display(&config)?;
    run(backend)?;
    Ok(())
}
