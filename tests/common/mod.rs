#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};

#[derive(Debug, Clone)]
enum ServerCommand {
    Push(String),
    Close,
}

/// Telemetry peer on 127.0.0.1 that records what clients send.
pub struct TestServer {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<String>>>,
    commands: broadcast::Sender<ServerCommand>,
    accept_task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        let (commands, _) = broadcast::channel(32);

        let accept_task = {
            let accepted = accepted.clone();
            let received = received.clone();
            let commands = commands.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let Ok(ws) = accept_async(stream).await else {
                        continue;
                    };
                    let mut rx = commands.subscribe();
                    accepted.fetch_add(1, Ordering::SeqCst);
                    let received = received.clone();
                    tokio::spawn(async move {
                        let (mut write, mut read) = ws.split();
                        loop {
                            tokio::select! {
                                command = rx.recv() => match command {
                                    Ok(ServerCommand::Push(text)) => {
                                        if write.send(Message::Text(text)).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(ServerCommand::Close) | Err(_) => {
                                        let _ = write
                                            .send(Message::Close(Some(CloseFrame {
                                                code: CloseCode::Away,
                                                reason: "server going away".into(),
                                            })))
                                            .await;
                                        break;
                                    }
                                },
                                message = read.next() => match message {
                                    Some(Ok(Message::Text(text))) => {
                                        received.lock().unwrap().push(text);
                                    }
                                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                    Some(Ok(_)) => {}
                                },
                            }
                        }
                    });
                }
            })
        };

        Self {
            addr,
            accepted,
            received,
            commands,
            accept_task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Send `frame` to every open connection.
    pub fn push(&self, frame: &str) {
        let _ = self.commands.send(ServerCommand::Push(frame.to_string()));
    }

    /// Close every open connection with code 1001.
    pub fn close_all(&self) {
        let _ = self.commands.send(ServerCommand::Close);
    }

    /// Close every connection and stop accepting new ones.
    pub fn shutdown(&self) {
        self.close_all();
        self.accept_task.abort();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Poll `condition` every 10ms until it holds, panicking after `limit`.
pub async fn eventually(limit: Duration, what: &str, mut condition: impl FnMut() -> bool) {
    let result = tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {}", what);
}
