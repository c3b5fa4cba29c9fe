//! Gate server binary.
//!
//! Serves `/verify` for the dashboard's privileged action.
use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use env_logger::TimestampPrecision;
use face_gate::{
    config::GateArgs,
    endpoints::{router, GateHandle},
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve the gate on
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    #[clap(flatten)]
    gate: GateArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    // Model, labels and camera are loaded once for the lifetime of the server
    let gate = args.gate.build_context()?;
    let app = router(GateHandle::new(gate));

    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving gate on {}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
