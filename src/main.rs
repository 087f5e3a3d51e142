use std::{
    path::{Path, PathBuf},
    process,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

use vfdlink::acquisition::Acquisition;
use vfdlink::config::{self, MainConfig};
use vfdlink::registers::RegisterMap;
use vfdlink::signals::{create_user_signals, MainSignals, SignalRegistry};
use vfdlink::transport::RtuSession;

fn parse_args() -> ArgMatches {
    Command::new("vfdlink")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Polls a VFD over Modbus RTU and publishes its registers as named typed signals")
        .arg(
            Arg::new("check")
                .long("check")
                .short('c')
                .help("Check the config file for errors and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .short('d')
                .help("Log raw Modbus frames at debug level")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("new")
                .long("new")
                .short('n')
                .help("Write a blank config file and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .help("Path to the config file")
                .value_name("CONFIG")
                .required(true),
        )
        .get_matches()
}

/// Default log filter when `RUST_LOG` is unset: `-d` must dump raw
/// frames without any extra environment setup.
fn default_log_filter(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

fn main() {
    let matches = parse_args();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_log_filter(matches.get_flag("debug"))),
    )
    .init();
    let path = PathBuf::from(matches.get_one::<String>("config").unwrap());

    if matches.get_flag("new") {
        match config::write_blank_config(&path) {
            Ok(()) => {
                println!("Blank config written to {}", path.display());
                process::exit(0);
            }
            Err(err) => {
                eprintln!("Failed to write blank config: {err:#}");
                process::exit(1);
            }
        }
    }

    let config = match config::load_config(&path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Config error: {err:#}");
            process::exit(1);
        }
    };

    if matches.get_flag("check") {
        println!("{}: no errors found", path.display());
        process::exit(0);
    }

    if let Err(err) = run(config, matches.get_flag("debug"), &path) {
        log::error!("fatal: {err:#}");
        eprintln!("Fatal error: {err:#}");
        process::exit(1);
    }
}

/// Ordered fallible startup, then the acquisition loop until a
/// termination request. Each startup step owns what it created, so a
/// failure part-way through tears down exactly the resources acquired so
/// far on the way out.
fn run(config: MainConfig, debug: bool, path: &Path) -> Result<()> {
    log::info!("loaded {}", path.display());

    let map = RegisterMap::from_config(&config);
    let mut registry = SignalRegistry::new(&config.component);
    let main_signals = MainSignals::create(&mut registry)?;
    let user_signals = create_user_signals(&mut registry, map.users())?;
    log::info!("{}: published {} signals", config.component, registry.len());

    let mut session = RtuSession::new(&config.rs485, debug);
    session
        .connect()
        .with_context(|| format!("failed to open RTU session on {}", config.rs485.device))?;
    main_signals.is_connected.set(true);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        let component = config.component.clone();
        // SIGINT and SIGTERM both land here; the flag is observed at the
        // next sweep boundary, never mid-sweep.
        ctrlc::set_handler(move || {
            log::info!("{component}: close request received");
            stop.store(true, Ordering::SeqCst);
        })
        .context("failed to install termination handler")?;
    }

    let mut acquisition = Acquisition::new(
        session,
        config.rs485.clone(),
        map,
        main_signals,
        user_signals,
    )?;
    acquisition.run(&stop);
    acquisition.shutdown();
    log::info!("{}: application closed", config.component);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_lowers_the_default_log_filter() {
        assert_eq!(default_log_filter(true), "debug");
        assert_eq!(default_log_filter(false), "info");
    }
}
