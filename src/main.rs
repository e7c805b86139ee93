use clap::Parser;
use color_eyre::Result;
use serial_hub::{cli, config::Config, logging, server};
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use tracing::{debug, error, info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = cli::Cli::parse();

    if let Some(command) = cli.command {
        cli::handle_command(command);

        return Ok(());
    }

    logging::init(
        cli.log_level,
        cli.log_file.map(|dir| (Level::DEBUG, dir)),
    )
    .await;

    let config = if let Some(config_path) = cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)?
    } else {
        debug!("Default config");
        Config::default()
    };

    let port = cli.port.unwrap_or(config.port);
    let shutdown = CancellationToken::new();
    let server = server::run_on_port(config, port, shutdown.clone());
    tokio::pin!(server);

    #[cfg(unix)]
    let mut hangup = signal(SignalKind::hangup())?;

    #[cfg(unix)]
    let hangup = hangup.recv();

    #[cfg(not(unix))]
    let hangup = std::future::pending::<Option<()>>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        _ = hangup => {
            info!("Told to hang up, quitting")
        }
        result = &mut server => {
            error!(?result, "Server returned");
            logging::shutdown();
            return Err(color_eyre::eyre::eyre!("Server stopped unexpectedly: {result:?}"));
        }
    }

    // Let readers stop and lines in flight reach subscribers.
    shutdown.cancel();
    server.await?;

    logging::shutdown();

    Ok(())
}
