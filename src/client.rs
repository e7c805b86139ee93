use std::{
    collections::VecDeque,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{channel::mpsc, Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, warn};
use tungstenite::Message;

use crate::{
    actions::{Command, CommandReply, LineEvent, ServerMessage},
    error::Error,
};

/// A websocket client of the server.
///
/// Lines pushed by the server are kept while waiting for a command reply,
/// so [`ClientHandle::next_line`] still sees them afterwards.
pub struct ClientHandle {
    tx: ClientHandleTx,
    rx: ClientHandleRx,
    pending: VecDeque<LineEvent>,
}

struct Client {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    writer: mpsc::UnboundedSender<ServerMessage>,
    reader: mpsc::UnboundedReceiver<Command>,
}

impl Client {
    async fn run(self) {
        let (mut ws_tx, mut ws_rx) = self.stream.split();

        let mut commands_rx = self.reader;
        let mut messages_tx = self.writer;

        let commands_handle = tokio::spawn(async move {
            while let Some(command) = commands_rx.next().await {
                if let Err(e) = ws_tx.send(Message::Text(command.serialize())).await {
                    error!(?e, "Could not send command to server");
                    break;
                }
            }
        });

        let messages_handle = tokio::spawn(async move {
            while let Some(Ok(message)) = ws_rx.next().await {
                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(_) => {
                        debug!("Server closed the socket");
                        break;
                    }
                    _ => continue,
                };

                let message: ServerMessage = match serde_json::from_str(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        error!(?e, ?text, "Could not deserialize message");
                        break;
                    }
                };

                if let Err(e) = messages_tx.send(message).await {
                    debug!(?e, "Client handle gone");
                    break;
                }
            }
        });

        tokio::select! {
            _ = commands_handle => {
                debug!("Commands loop returned");
            },
            _ = messages_handle => {
                debug!("Messages loop returned");
            },
        }
    }
}

/// The clonable sender the client can use to send commands to the server.
#[derive(Debug, Clone)]
pub struct ClientHandleTx(mpsc::UnboundedSender<Command>);

impl ClientHandleTx {
    /// Send a command without waiting for the reply.
    pub async fn send_command(&mut self, command: Command) -> Result<(), Error> {
        self.send(command)
            .await
            .map_err(|e| Error::WebsocketIssue(e.to_string()))
    }
}

impl Sink<Command> for ClientHandleTx {
    type Error = mpsc::SendError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.0.poll_ready(cx)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Command) -> Result<(), Self::Error> {
        self.0.start_send_unpin(item)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.0.poll_flush_unpin(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.0.poll_close_unpin(cx)
    }
}

/// The single receiver a client has for messages from the server.
#[derive(Debug)]
pub struct ClientHandleRx(mpsc::UnboundedReceiver<ServerMessage>);

impl ClientHandleRx {
    /// Await the next message from the transport.
    pub async fn next_message(&mut self) -> Result<ServerMessage, Error> {
        self.next()
            .await
            .ok_or_else(|| Error::WebsocketIssue("Connection closed".into()))
    }
}

impl Stream for ClientHandleRx {
    type Item = ServerMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.poll_next_unpin(cx)
    }
}

impl ClientHandle {
    /// Connect to the server at `address:port`.
    pub async fn new(address: &str, port: u16) -> Result<Self, Error> {
        let (stream, _) =
            tokio_tungstenite::connect_async(format!("ws://{address}:{port}/ws")).await?;

        let (command_tx, command_rx) = mpsc::unbounded();
        let (message_tx, message_rx) = mpsc::unbounded();

        let client = Client {
            writer: message_tx,
            reader: command_rx,
            stream,
        };

        tokio::spawn(async move { client.run().await });

        Ok(Self {
            tx: ClientHandleTx(command_tx),
            rx: ClientHandleRx(message_rx),
            pending: VecDeque::new(),
        })
    }

    /// Send a command to a device and wait for the server's reply.
    pub async fn command(&mut self, device: &str, cmd: &str) -> Result<CommandReply, Error> {
        self.tx.send_command(Command::new(device, cmd)).await?;

        loop {
            match self.rx.next_message().await? {
                ServerMessage::Reply(reply) => return Ok(reply),
                ServerMessage::Line(line) => self.pending.push_back(line),
            }
        }
    }

    /// Wait for the next line any device printed.
    pub async fn next_line(&mut self) -> Result<LineEvent, Error> {
        if let Some(line) = self.pending.pop_front() {
            return Ok(line);
        }

        loop {
            match self.rx.next_message().await? {
                ServerMessage::Line(line) => return Ok(line),
                ServerMessage::Reply(reply) => warn!(%reply, "Reply nobody waited for"),
            }
        }
    }
}
