//! One-shot gate binary.
//!
//! Prints `true` and exits with 0 if access was granted, prints `false` and exits with 1
//! otherwise. Typing `q` or Esc followed by Enter cancels the capture.
use std::{io::BufRead, process::ExitCode, thread};

use anyhow::Result;
use clap::Parser;
use env_logger::TimestampPrecision;
use face_gate::{config::GateArgs, gate::CancelToken};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    #[clap(flatten)]
    gate: GateArgs,
}

const ESC: char = '\u{1b}';

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let mut gate = args.gate.build_context()?;
    spawn_cancel_listener(gate.cancel_token());

    let outcome = gate.verify();
    println!("{}", outcome.granted());

    Ok(match outcome.granted() {
        true => ExitCode::SUCCESS,
        false => ExitCode::FAILURE,
    })
}

/// Cancel on `q` or Esc from stdin. The thread ends with the process.
fn spawn_cancel_listener(cancel: CancelToken) {
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let key = line.trim();
            if key.eq_ignore_ascii_case("q") || key.starts_with(ESC) {
                log::info!("Cancel requested from keyboard");
                cancel.cancel();
            }
        }
    });
}
