//! Client for the gate server, for use from the dashboard side.
//!
//! Requests one verification and exits with 0 if access was granted. Any failure to reach the
//! gate counts as not granted.
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use common::protocol::VerifyResponse;
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address of the gate server to connect to
    #[clap(long, default_value = "127.0.0.1:3000")]
    address: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one face verification
    Verify,
    /// Cancel a running verification
    Cancel,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let client = reqwest::Client::new();
    let base_url = format!("http://{}", args.address);

    match args.command {
        Command::Verify => match verify(&client, &base_url).await {
            Ok(response) => {
                log::info!(
                    "Verdict: {} ({}), identity {:?}, confidence {:?}",
                    response.granted,
                    response.reason,
                    response.identity,
                    response.confidence
                );
                println!("{}", response.granted);
                match response.granted {
                    true => ExitCode::SUCCESS,
                    false => ExitCode::FAILURE,
                }
            }
            Err(err) => {
                log::error!("Error requesting verification from {}: {:#}", base_url, err);
                println!("false");
                ExitCode::FAILURE
            }
        },
        Command::Cancel => match cancel(&client, &base_url).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                log::error!("Error cancelling verification at {}: {:#}", base_url, err);
                ExitCode::FAILURE
            }
        },
    }
}

async fn verify(client: &reqwest::Client, base_url: &str) -> Result<VerifyResponse> {
    let response = client
        .post(format!("{base_url}/verify"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(response)
}

async fn cancel(client: &reqwest::Client, base_url: &str) -> Result<()> {
    client
        .post(format!("{base_url}/cancel"))
        .send()
        .await?
        .error_for_status()?;

    Ok(())
}
