use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, WebSocketUpgrade,
    },
    response::IntoResponse,
    Extension, TypedHeader,
};
use futures::{sink::Sink, stream::Stream, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::{
    actions::{Command, CommandReply, LineEvent, ServerMessage},
    bridge::BridgeHandle,
    error::Error,
};

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    user_agent: Option<TypedHeader<headers::UserAgent>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(handle): Extension<BridgeHandle>,
) -> impl IntoResponse {
    if let Some(TypedHeader(user_agent)) = user_agent {
        info!("`{}`@`{addr}` connected", user_agent.as_str());
    }

    ws.on_upgrade(move |socket| {
        let span = info_span!("Peer", %addr);

        handle_websocket(socket, handle).instrument(span)
    })
}

/// Route every command the peer sends, replying on the same socket.
pub(crate) async fn read<S>(
    mut receiver: S,
    replies: mpsc::UnboundedSender<CommandReply>,
    handle: BridgeHandle,
) where
    S: Unpin,
    S: Stream<Item = Result<Message, axum::Error>>,
{
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(request_text) => {
                trace!(%request_text, "peer request");

                let reply: CommandReply = match serde_json::from_str::<Command>(&request_text) {
                    Ok(command) => handle.route(command).await.into(),
                    Err(e) => CommandReply::from(Error::BadJson {
                        request: request_text,
                        problem: e.to_string(),
                    }),
                };

                if replies.send(reply).is_err() {
                    debug!("Writer gone");
                    break;
                }
            }
            Message::Binary(_) => {
                debug!("client sent binary data");
            }
            Message::Ping(_) => {
                debug!("socket ping");
            }
            Message::Pong(_) => {
                debug!("socket pong");
            }
            Message::Close(_) => {
                debug!("client disconnected");
            }
        }
    }

    debug!("no more stuff");
}

/// Push lines and command replies to the peer.
///
/// Ends when the subscription does, which happens when the peer lagged too far behind
/// or the server shuts down. The peer is told by closing the socket.
pub(crate) async fn write(
    mut sender: impl Sink<Message> + Unpin,
    mut lines: mpsc::Receiver<Arc<LineEvent>>,
    mut replies: mpsc::UnboundedReceiver<CommandReply>,
) {
    loop {
        let message = tokio::select! {
            line = lines.recv() => match line {
                Some(line) => ServerMessage::Line(LineEvent::clone(&line)),
                None => {
                    debug!("Subscription ended, closing");
                    let _ = sender.send(Message::Close(None)).await;
                    return;
                }
            },
            reply = replies.recv() => match reply {
                Some(reply) => {
                    match &reply {
                        CommandReply::Ok => debug!("Reply: <{reply}>"),
                        CommandReply::Error { .. } => info!("Error reply: <{reply}>"),
                    }
                    ServerMessage::Reply(reply)
                }
                None => return,
            },
        };

        let message = serde_json::to_string(&message).expect("Serialize should work");

        if sender.send(Message::Text(message)).await.is_err() {
            debug!("client disconnected");
            return;
        }
        trace!("Message flushed");
    }
}

pub(crate) async fn handle_websocket(websocket: WebSocket, handle: BridgeHandle) {
    let (stream_sender, stream_receiver) = websocket.split();
    let (reply_sender, reply_receiver) = mpsc::unbounded_channel::<CommandReply>();

    let (id, lines) = handle.subscribe();
    debug!(%id, "Subscribed");

    let read_handle = tokio::spawn(
        read(stream_receiver, reply_sender, handle.clone()).instrument(info_span!("Read")),
    );
    let write_handle = tokio::spawn(
        write(stream_sender, lines, reply_receiver).instrument(info_span!("Write")),
    );

    match read_handle.await {
        Ok(()) => debug!("Read task joined"),
        Err(e) => warn!("Read task join error: {e:?}"),
    }

    // The hub may have dropped us already.
    handle.unsubscribe(id);

    debug!("Aborting write task");
    // This ensures the underlying TCP connection gets closed,
    // which signals the peer that the session is over.
    write_handle.abort();
}
