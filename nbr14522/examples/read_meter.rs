//! Read a meter over a serial port
//!
//! ```text
//! cargo run -p nbr14522 --example read_meter -- /dev/ttyUSB0 14 2012345600
//! ```
//!
//! Each hex argument becomes one command block (zero padded) and every
//! command is run in turn. Every block received is printed as hex.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use nbr14522::{CommandBlock, Reader};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<bool> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 {
        eprintln!("Usage: read_meter <port> <hex-command>...");
        return Ok(false);
    }

    let port = &args[0];
    let commands = args[1..]
        .iter()
        .map(|arg| CommandBlock::from_hex(arg).with_context(|| format!("Bad command {:?}", arg)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut reader = Reader::serial();
    reader
        .open(port, 9600)
        .with_context(|| format!("Failed to open {}", port))?;

    for command in commands {
        println!("> {}", command.to_hex());

        let outcome = reader
            .read_paced(
                command,
                |block| println!("< {}", hex::encode_upper(block.as_bytes())),
                Some(Duration::from_secs(60)),
                Duration::from_millis(1),
            )
            .await?;

        println!("{}", outcome);
    }

    reader.close()?;
    Ok(true)
}
