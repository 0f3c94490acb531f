//! Command-line interface handling for the Warden node.
//!
//! This module provides command-line argument parsing using the `clap`
//! crate; every option here overrides the corresponding configuration-file
//! setting.

use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the TCP bind address
    pub tcp_bind: Option<String>,
    /// Optional override for the WebSocket bind address
    pub ws_bind: Option<String>,
    /// Optional override for the worker count
    pub workers: Option<usize>,
    /// Optional override for the log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    /// Parses command line arguments using clap.
    pub fn parse() -> Self {
        let matches = Command::new("Warden Node")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Multi-node game request server")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Path to the configuration file")
                    .default_value("warden.toml"),
            )
            .arg(
                Arg::new("tcp-bind")
                    .long("tcp-bind")
                    .value_name("ADDR")
                    .help("TCP bind address, e.g. 0.0.0.0:7600"),
            )
            .arg(
                Arg::new("ws-bind")
                    .long("ws-bind")
                    .value_name("ADDR")
                    .help("WebSocket bind address, e.g. 0.0.0.0:7601"),
            )
            .arg(
                Arg::new("workers")
                    .long("workers")
                    .value_name("N")
                    .value_parser(clap::value_parser!(usize))
                    .help("Number of worker tasks"),
            )
            .arg(
                Arg::new("log-level")
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level: trace, debug, info, warn, error"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .action(ArgAction::SetTrue)
                    .help("Emit logs as JSON"),
            )
            .get_matches();

        Self {
            config_path: PathBuf::from(
                matches
                    .get_one::<String>("config")
                    .map(String::as_str)
                    .unwrap_or("warden.toml"),
            ),
            tcp_bind: matches.get_one::<String>("tcp-bind").cloned(),
            ws_bind: matches.get_one::<String>("ws-bind").cloned(),
            workers: matches.get_one::<usize>("workers").copied(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}
