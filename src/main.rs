//! ptyrun - run a command attached to a pseudo-terminal
//!
//! Terminal-aware programs buffer differently, suppress prompts, or hang
//! waiting for a controlling terminal when their streams are pipes. ptyrun
//! allocates a PTY, runs the target program on it, and relays bytes between
//! the target and its own standard streams, so the target behaves as if a
//! person ran it even under CI or an orchestration script.
//!
//! # Features
//!
//! - **PTY illusion**: the child gets a controlling terminal and a TERM value
//! - **Escape stripping**: CSI/OSC/DCS sequences removed from captured output
//! - **Wall-clock timeout**: SIGTERM, a grace period, then SIGKILL; exit 124
//! - **Interactive passthrough**: raw-mode stdin relay and window-size
//!   propagation when run from a real terminal
//!
//! # Quick Start
//!
//! ```text
//! ptyrun -p "summarize this repo"     # default target (claude)
//! ptyrun -b htop -t 5 --keep-ansi     # any program, 5s limit, raw output
//! ptyrun -b python -- -i script.py    # -- guards the target's own flags
//! ```
//!
//! # Exit codes
//!
//! | Code | Meaning |
//! |---------|--------------------------------------------------|
//! | child's | normal completion (signal deaths as 128+signal)  |
//! | 124     | wall-clock timeout elapsed                       |
//! | 2       | usage error                                      |
//! | 1       | PTY allocation or spawn failure                  |
//!
//! Configuration: `~/.ptyrun/config.toml`

mod config;
mod core;

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, DEFAULT_BIN, DEFAULT_TERM};
use crate::core::session::{Session, SessionOptions};

#[derive(Parser, Debug)]
#[command(
    name = "ptyrun",
    version,
    about = "Run a command attached to a pseudo-terminal",
    after_help = "Configuration: ~/.ptyrun/config.toml\n\
                  Exit codes: the target's own code, or 124 when the timeout elapses"
)]
struct Cli {
    /// Target program to run on the pseudo-terminal
    #[arg(short = 'b', long, env = "PTYRUN_BIN")]
    bin: Option<String>,

    /// Working directory for the target
    #[arg(long, value_name = "DIR")]
    cwd: Option<PathBuf>,

    /// Wall-clock limit in seconds (fractions allowed)
    #[arg(short = 't', long, value_name = "SECS")]
    timeout: Option<f64>,

    /// Strip escape sequences from the target's output (default)
    #[arg(long, overrides_with = "keep_ansi")]
    strip_ansi: bool,

    /// Pass escape sequences through unmodified
    #[arg(long, overrides_with = "strip_ansi")]
    keep_ansi: bool,

    /// Arguments passed through to the target program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGS")]
    args: Vec<String>,
}

fn main() {
    init_logging();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!("fatal: {err:#}");
            eprintln!("ptyrun: {err:#}");
            std::process::exit(1);
        }
    }
}

/// Diagnostics go to stderr; stdout carries the relayed stream
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let file_config = Config::load();

    // Command line (including PTYRUN_BIN) overrides the config file
    let program = cli
        .bin
        .or(file_config.bin)
        .unwrap_or_else(|| DEFAULT_BIN.to_string());
    let strip_escapes = strip_choice(cli.strip_ansi, cli.keep_ansi, file_config.strip_ansi);
    let timeout = timeout_duration(cli.timeout.or(file_config.timeout));
    let term = file_config.term.unwrap_or_else(|| DEFAULT_TERM.to_string());

    // clap has already consumed a single leading `--`; everything captured
    // belongs to the target verbatim
    let args = cli.args;
    if args.is_empty() {
        Cli::command()
            .error(
                clap::error::ErrorKind::MissingRequiredArgument,
                "no arguments for the target program",
            )
            .exit();
    }

    let mut env: Vec<(OsString, OsString)> = std::env::vars_os().collect();
    ensure_term(&mut env, &term);

    debug!(%program, ?timeout, strip_escapes, "starting session");

    let session = Session::new(SessionOptions {
        program,
        args,
        cwd: cli.cwd,
        timeout,
        env,
        strip_escapes,
    });
    let code = session.run().context("session failed")?;
    Ok(code)
}

/// Resolve the stripping toggle; the flags override each other, later wins
fn strip_choice(strip_flag: bool, keep_flag: bool, from_config: Option<bool>) -> bool {
    if keep_flag {
        false
    } else if strip_flag {
        true
    } else {
        from_config.unwrap_or(true)
    }
}

/// Add TERM when the inherited environment lacks one
fn ensure_term(env: &mut Vec<(OsString, OsString)>, term: &str) {
    if env.iter().any(|(name, _)| name.as_os_str() == OsStr::new("TERM")) {
        return;
    }
    env.push((OsString::from("TERM"), OsString::from(term)));
}

/// Interpret a float-seconds timeout; zero and unusable values disable it
fn timeout_duration(secs: Option<f64>) -> Option<Duration> {
    let secs = secs?;
    match Duration::try_from_secs_f64(secs) {
        Ok(limit) if !limit.is_zero() => Some(limit),
        _ => {
            warn!(secs, "ignoring unusable timeout value");
            None
        }
    }
}
