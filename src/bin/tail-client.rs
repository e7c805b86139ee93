use std::io::Write;

use clap::Parser;
use color_eyre::Result;
use serial_hub::client::ClientHandle;
use tracing::{info, warn, Level};

/// Tails every device of a running server.
/// Prints lines as they are pushed, optionally sending a single command first.
#[derive(Parser, Debug)]
struct Args {
    /// Server address.
    #[arg(short, long, default_value = "localhost")]
    address: String,

    /// Server port.
    #[arg(short, long, default_value_t = serial_hub::server::DEFAULT_PORT)]
    port: u16,

    /// Only print lines of this device.
    #[arg(short, long)]
    device: Option<String>,

    /// Send this command to `--device` before tailing.
    #[arg(short, long, requires = "device")]
    command: Option<String>,
}

async fn run(args: Args) -> Result<()> {
    let mut client = ClientHandle::new(&args.address, args.port).await?;

    if let (Some(device), Some(cmd)) = (&args.device, &args.command) {
        let reply = client.command(device, cmd).await?;
        info!(%reply, "Command sent");
    }

    let mut stdout = std::io::stdout();

    loop {
        let line = client.next_line().await?;

        if matches!(&args.device, Some(device) if device != &line.device) {
            continue;
        }

        write!(stdout, "{}: {}", line.device, line.text)?;
        stdout.flush()?;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    serial_hub::logging::init(Level::INFO, None).await;

    let args = Args::parse();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        result = run(args) => {
            warn!(?result, "Connection ended");
            result?;
        }
    }

    Ok(())
}

