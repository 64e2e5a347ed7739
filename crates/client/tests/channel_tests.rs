//! Progress channel reconnection tests against a scripted WebSocket server.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use stemwell_client::{ChannelConfig, ChannelEvent, ProgressChannel, SessionStore};
use stemwell_core::{JobId, Message, StemSet};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

fn fast_config() -> ChannelConfig {
    ChannelConfig {
        base_backoff: Duration::from_millis(10),
        max_attempts: 3,
    }
}

fn complete_message() -> Message {
    Message::Complete {
        artifacts: StemSet::build(|k| format!("/stems/x/{}", k.file_name())),
    }
}

fn text(message: &Message) -> WsMessage {
    WsMessage::Text(serde_json::to_string(message).unwrap().into())
}

#[tokio::test]
async fn delivers_messages_until_terminal() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(text(&Message::Progress {
            percent: 20.0,
            status: "separating".to_string(),
        }))
        .await
        .unwrap();
        ws.send(text(&complete_message())).await.unwrap();
    });

    let mut channel = ProgressChannel::connect(&format!("ws://{addr}")).await.unwrap();

    match channel.recv().await {
        Some(ChannelEvent::Message(Message::Progress { percent, .. })) => {
            assert_eq!(percent, 20.0);
        }
        other => panic!("expected progress, got {other:?}"),
    }
    match channel.recv().await {
        Some(ChannelEvent::Message(message)) => assert!(message.is_terminal()),
        other => panic!("expected terminal, got {other:?}"),
    }
    assert!(channel.recv().await.is_none(), "channel completes after terminal");
}

#[tokio::test]
async fn server_ping_is_answered_not_forwarded() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(text(&Message::Ping)).await.unwrap();

        // Expect a pong back before finishing the job.
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(raw))) => {
                    let message: Message = serde_json::from_str(&raw).unwrap();
                    assert_eq!(message, Message::Pong);
                    break;
                }
                Some(Ok(_)) => continue,
                other => panic!("expected pong, got {other:?}"),
            }
        }
        ws.send(text(&complete_message())).await.unwrap();
    });

    let mut channel = ProgressChannel::connect(&format!("ws://{addr}")).await.unwrap();

    // The first consumer-visible event is the terminal, not the ping.
    match channel.recv().await {
        Some(ChannelEvent::Message(message)) => assert!(message.is_terminal()),
        other => panic!("expected terminal, got {other:?}"),
    }
}

#[tokio::test]
async fn reconnects_after_abrupt_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(AtomicUsize::new(0));

    let server_accepts = accepts.clone();
    tokio::spawn(async move {
        // First connection: one progress message, then drop without close.
        let (stream, _) = listener.accept().await.unwrap();
        server_accepts.fetch_add(1, Ordering::SeqCst);
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(text(&Message::Progress {
            percent: 20.0,
            status: "separating".to_string(),
        }))
        .await
        .unwrap();
        drop(ws);

        // Second connection: replay snapshot plus the terminal.
        let (stream, _) = listener.accept().await.unwrap();
        server_accepts.fetch_add(1, Ordering::SeqCst);
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(text(&Message::Progress {
            percent: 20.0,
            status: "separating".to_string(),
        }))
        .await
        .unwrap();
        ws.send(text(&complete_message())).await.unwrap();
    });

    let mut channel =
        ProgressChannel::connect_with(&format!("ws://{addr}"), fast_config(), None)
            .await
            .unwrap();

    let mut saw_reconnecting = false;
    let mut saw_terminal = false;
    while let Some(event) = channel.recv().await {
        match event {
            ChannelEvent::Reconnecting { .. } => saw_reconnecting = true,
            ChannelEvent::Message(message) if message.is_terminal() => saw_terminal = true,
            ChannelEvent::Message(_) => {}
            ChannelEvent::Disconnected => panic!("retries should not exhaust"),
        }
    }
    assert!(saw_reconnecting, "client reconnected transparently");
    assert!(saw_terminal);
    assert_eq!(accepts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn explicit_close_suppresses_reconnection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(AtomicUsize::new(0));

    let server_accepts = accepts.clone();
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            server_accepts.fetch_add(1, Ordering::SeqCst);
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(text(&Message::Progress {
                percent: 20.0,
                status: "separating".to_string(),
            }))
            .await
            .unwrap();
            // Keep the connection open until the client acts.
            while ws.next().await.is_some() {}
        }
    });

    let mut channel =
        ProgressChannel::connect_with(&format!("ws://{addr}"), fast_config(), None)
            .await
            .unwrap();
    assert!(matches!(
        channel.recv().await,
        Some(ChannelEvent::Message(Message::Progress { .. }))
    ));

    channel.close().await;

    // Give any stray reconnect attempt time to show up.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 1, "no reconnect after close");
}

#[tokio::test]
async fn exhausted_retries_report_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(text(&Message::Progress {
            percent: 20.0,
            status: "separating".to_string(),
        }))
        .await
        .unwrap();
        // Drop both the connection and the listener; reconnects get
        // connection refused.
        drop(ws);
        drop(listener);
    });

    let mut channel =
        ProgressChannel::connect_with(&format!("ws://{addr}"), fast_config(), None)
            .await
            .unwrap();

    let mut attempts = 0;
    let mut disconnected = false;
    while let Some(event) = channel.recv().await {
        match event {
            ChannelEvent::Reconnecting { attempt } => attempts = attempt,
            ChannelEvent::Disconnected => disconnected = true,
            ChannelEvent::Message(_) => {}
        }
    }
    assert!(disconnected, "caller told to resubmit");
    assert_eq!(attempts, 3, "all attempts consumed");
}

#[tokio::test]
async fn terminal_clears_resume_record() {
    let temp = tempfile::tempdir().unwrap();
    let session = SessionStore::new(temp.path().join("session.json"));
    session.save(JobId::new()).await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(text(&complete_message())).await.unwrap();
    });

    let mut channel = ProgressChannel::connect_with(
        &format!("ws://{addr}"),
        fast_config(),
        Some(session.clone()),
    )
    .await
    .unwrap();

    while channel.recv().await.is_some() {}

    // The channel clears the record once the terminal is delivered.
    for _ in 0..50 {
        if session.resume().await.unwrap().is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("resume record was not cleared after terminal");
}
