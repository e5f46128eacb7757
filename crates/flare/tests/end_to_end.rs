//! End-to-end test against a minimal Phoenix-style server over a real
//! WebSocket: join, push, reply, and broadcast.

use std::time::Duration;

use flare::prelude::*;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// Accepts one client. Replies `ok` to every push and re-broadcasts
/// `new_msg` payloads to the topic. Returns the address and a receiver
/// for the request path the client connected with.
async fn phoenix_server() -> (std::net::SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (paths_tx, paths) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let _ = paths_tx.send(request.uri().to_string());
            Ok(response)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();

        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let frame: Value = serde_json::from_str(text.as_str()).unwrap();
            let topic = frame[2].clone();
            let event = frame[3].as_str().unwrap_or_default().to_owned();

            let reply = json!([
                frame[0],
                frame[1],
                topic,
                "phx_reply",
                { "status": "ok", "response": { "event": event } }
            ]);
            ws.send(Message::Text(reply.to_string().into())).await.unwrap();

            if event == "new_msg" {
                let body: Value = serde_json::from_str(frame[4].as_str().unwrap()).unwrap();
                let broadcast = json!([null, null, topic, "new_msg", body]);
                ws.send(Message::Text(broadcast.to_string().into()))
                    .await
                    .unwrap();
            }
        }
    });

    (addr, paths)
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("arrives in time")
        .expect("sender alive")
}

#[tokio::test]
async fn test_join_push_and_broadcast_over_websocket() {
    let (addr, mut paths) = phoenix_server().await;

    let socket = Socket::builder(format!("ws://{addr}/socket"))
        .param("token", "abc")
        .build()
        .expect("valid endpoint");
    socket.connect();
    assert_eq!(next(&mut paths).await, "/socket/websocket?vsn=2.0.0&token=abc");

    let (tx, mut events) = mpsc::unbounded_channel::<String>();

    let lobby = socket.channel("room:lobby", "{}");
    let on_msg = tx.clone();
    lobby.on("new_msg", move |msg| {
        let _ = on_msg.send(format!("broadcast:{}", msg.payload()));
    });

    let joined = tx.clone();
    let _join = lobby.join().receive(PushStatus::Ok, move |resp| {
        let _ = joined.send(format!("joined:{resp}"));
    });
    assert_eq!(next(&mut events).await, r#"joined:{"event":"phx_join"}"#);
    assert_eq!(lobby.state().await.unwrap(), ChannelState::Joined);

    let replied = tx.clone();
    let _push = lobby
        .push_json("new_msg", &json!({ "body": "hi" }))
        .unwrap()
        .receive(PushStatus::Ok, move |resp| {
            let _ = replied.send(format!("reply:{resp}"));
        });

    let mut got = vec![next(&mut events).await, next(&mut events).await];
    got.sort();
    assert_eq!(
        got,
        vec![
            r#"broadcast:{"body":"hi"}"#.to_owned(),
            r#"reply:{"event":"new_msg"}"#.to_owned(),
        ]
    );

    socket.disconnect().await.unwrap();
    assert_eq!(
        socket.connection_state().await.unwrap(),
        ConnectionState::Closed
    );
}
