use std::time::Duration;

use color_eyre::Result;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serial_hub::{actions::ServerMessage, client::ClientHandle};

mod common;
use common::*;

fn line(message: ServerMessage) -> (String, String) {
    match message {
        ServerMessage::Line(line) => (line.device, line.text),
        ServerMessage::Reply(reply) => panic!("Expected a line, got reply {reply}"),
    }
}

#[tokio::test]
async fn line_reaches_client_and_log() -> Result<()> {
    let server = TestServer::start(&[("d1", "/mock/1")]).await?;
    let mut client = server.connect().await?;

    server.opener.get("/mock/1").unwrap().feed("hello\r\n");

    let (device, text) = line(receive(&mut client).await?);

    assert_eq!(device, "d1");
    assert!(text.starts_with('['));
    assert!(text.ends_with("] hello\n"));
    assert_eq!(server.log("d1"), text);

    Ok(())
}

#[tokio::test]
async fn every_client_gets_every_line() -> Result<()> {
    let server = TestServer::start(&[("d1", "/mock/1"), ("d2", "/mock/2")]).await?;
    let mut clients = vec![server.connect().await?, server.connect().await?];

    server.opener.get("/mock/1").unwrap().feed("from one\n");

    for client in &mut clients {
        let (device, text) = line(receive(client).await?);
        assert_eq!(device, "d1");
        assert!(text.ends_with("] from one\n"));
    }

    server.opener.get("/mock/2").unwrap().feed("from two\n");

    for client in &mut clients {
        let (device, text) = line(receive(client).await?);
        assert_eq!(device, "d2");
        assert!(text.ends_with("] from two\n"));
    }

    Ok(())
}

#[tokio::test]
async fn leaving_client_does_not_bother_others() -> Result<()> {
    let server = TestServer::start(&[("d1", "/mock/1")]).await?;
    let leaving = server.connect().await?;
    let mut staying = server.connect().await?;

    drop(leaving);

    let mock = server.opener.get("/mock/1").unwrap();
    for i in 0..10 {
        mock.feed(format!("line {i}\n"));
    }

    for i in 0..10 {
        let (_, text) = line(receive(&mut staying).await?);
        assert!(text.ends_with(&format!("] line {i}\n")));
    }

    Ok(())
}

#[tokio::test]
async fn client_handle_tails_lines() -> Result<()> {
    let server = TestServer::start(&[("d1", "/mock/1")]).await?;
    let mut client = ClientHandle::new("127.0.0.1", server.port).await?;

    // Any reply means the socket is subscribed.
    assert!(!client.command("ghost", "hi").await?.is_ok());

    let mock = server.opener.get("/mock/1").unwrap();
    let words = lipsum::lipsum_words(20)
        .split_whitespace()
        .map(ToOwned::to_owned)
        .collect::<Vec<_>>();

    for word in &words {
        mock.feed(format!("{word}\r\n"));
    }

    let mut received = vec![];
    for _ in &words {
        let line = tokio::time::timeout(Duration::from_secs(5), client.next_line()).await??;
        received.push(line.text.split_once("] ").unwrap().1.trim_end().to_owned());
    }

    assert_eq!(received, words);

    Ok(())
}

#[tokio::test]
async fn shutdown_closes_clients() -> Result<()> {
    let server = TestServer::start(&[("d1", "/mock/1")]).await?;
    let mut client = server.connect().await?;

    server.shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(5), server.server).await???;

    // A close frame, then nothing.
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(message)) = client.next().await {
            if message.is_close() {
                break;
            }
        }
    })
    .await;

    assert!(closed.is_ok());

    Ok(())
}
