#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use axum::http::StatusCode;
use color_eyre::Result;
use futures::{SinkExt, StreamExt};
use serial_hub::{
    actions::{CommandReply, Reason, ServerMessage},
    config::Config,
    device::Device,
    error::Error,
    mock::MockOpener,
};
use tempfile::TempDir;
use tokio::{net::TcpStream, sync::oneshot, task::JoinHandle, time::timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{info, Level};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A server on an arbitrary port, backed by mocked devices.
pub struct TestServer {
    pub port: u16,
    pub opener: MockOpener,
    pub logs: TempDir,
    pub shutdown: CancellationToken,
    pub server: JoinHandle<Result<(), Error>>,
    // Readers run on the blocking pool, which the test runtime waits on when it shuts down.
    _stop_on_drop: DropGuard,
}

impl TestServer {
    /// Start with the given `(name, path)` devices.
    /// Only paths starting with `/mock/` are plugged in, others fail to open.
    pub async fn start(devices: &[(&str, &str)]) -> Result<Self> {
        serial_hub::logging::init(Level::DEBUG, None).await;

        let logs = tempfile::tempdir()?;
        let opener = MockOpener::default();

        for (_, path) in devices {
            if path.starts_with("/mock/") {
                opener.add(path);
            }
        }

        let config = Config {
            devices: devices
                .iter()
                .map(|(name, path)| Device::new(name, path, 115_200))
                .collect(),
            auto_detect: None,
            log_dir: logs.path().to_owned(),
            read_timeout_ms: 20,
            ..Default::default()
        };

        let (port_tx, port_rx) = oneshot::channel();
        let shutdown = CancellationToken::new();

        let server = tokio::spawn(serial_hub::server::run_any_port(
            config,
            Arc::new(opener.clone()),
            port_tx,
            shutdown.clone(),
        ));

        let port = port_rx
            .await
            .expect("Server should reply with allocated port");

        Ok(Self {
            port,
            opener,
            logs,
            _stop_on_drop: shutdown.clone().drop_guard(),
            shutdown,
            server,
        })
    }

    /// Connect a websocket, and make sure it is subscribed before returning.
    pub async fn connect(&self) -> Result<Client> {
        info!("Connecting to server on port {}", self.port);
        let (mut stream, http_response) =
            tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{}/ws", self.port)).await?;

        assert_eq!(http_response.status(), StatusCode::SWITCHING_PROTOCOLS);

        // The socket subscribes before it reads, so any reply means lines will follow.
        let reply = send_receive(&mut stream, r#"{"device": "", "cmd": ""}"#).await?;
        assert!(matches!(
            reply,
            ServerMessage::Reply(CommandReply::Error {
                reason: Reason::UnknownDevice,
                ..
            })
        ));

        Ok(stream)
    }

    /// Read the whole log of a device.
    pub fn log(&self, device: &str) -> String {
        std::fs::read_to_string(self.logs.path().join(format!("{device}.log"))).unwrap_or_default()
    }
}

pub async fn receive(client: &mut Client) -> Result<ServerMessage> {
    let message = timeout(Duration::from_secs(5), client.next())
        .await?
        .ok_or_else(|| color_eyre::eyre::eyre!("Stream closed"))??;

    let message = message.to_text()?;
    let message = serde_json::from_str(message)?;

    Ok(message)
}

pub async fn send_receive(client: &mut Client, to_send: &str) -> Result<ServerMessage> {
    client
        .send(tungstenite::Message::Text(to_send.to_owned()))
        .await?;
    receive(client).await
}

/// Send a command and wait for its reply, skipping any lines in between.
pub async fn command(client: &mut Client, to_send: &str) -> Result<CommandReply> {
    client
        .send(tungstenite::Message::Text(to_send.to_owned()))
        .await?;

    loop {
        if let ServerMessage::Reply(reply) = receive(client).await? {
            return Ok(reply);
        }
    }
}
