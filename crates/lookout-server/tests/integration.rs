//! End-to-end tests using a real WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use lookout_inspector::ContentWindow;
use lookout_inspector::memory::{DocumentSpec, MemoryWindow};
use lookout_server::LookoutServer;
use lookout_settings::LookoutSettings;
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Boot a test server and return the WS URL and the server.
async fn boot_server() -> (String, Arc<LookoutServer>) {
    let mut settings = LookoutSettings::default();
    settings.server.port = 0;
    let window: Arc<dyn ContentWindow> =
        Arc::new(MemoryWindow::from_spec(&DocumentSpec::sample()));
    let server = Arc::new(LookoutServer::new(settings, vec![window]));
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = server.clone();
    let _ = tokio::spawn(async move { serving.serve(listener).await });
    (format!("ws://{addr}/ws"), server)
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(url)).await.unwrap().unwrap();
    ws
}

async fn recv(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn request(ws: &mut WsStream, packet: Value) -> Value {
    ws.send(Message::text(packet.to_string())).await.unwrap();
    recv(ws).await
}

/// Connect, consume the greeting and return `(ws, inspector actor)`.
async fn attach(url: &str) -> (WsStream, String) {
    let mut ws = connect(url).await;
    let greeting = recv(&mut ws).await;
    assert_eq!(greeting["from"], "root");
    let tabs = request(&mut ws, json!({"to": "root", "type": "listTabs"})).await;
    let inspector = tabs["tabs"][0]["inspectorActor"].as_str().unwrap().to_owned();
    (ws, inspector)
}

#[tokio::test]
async fn greeting_on_connect() {
    let (url, _server) = boot_server().await;
    let mut ws = connect(&url).await;
    let greeting = recv(&mut ws).await;
    assert_eq!(
        greeting,
        json!({"from": "root", "applicationType": "browser", "traits": {}})
    );
}

#[tokio::test]
async fn list_tabs_then_walk() {
    let (url, _server) = boot_server().await;
    let mut ws = connect(&url).await;
    let _ = recv(&mut ws).await;

    let tabs = request(&mut ws, json!({"to": "root", "type": "listTabs"})).await;
    assert_eq!(tabs["from"], "root");
    assert_eq!(tabs["selected"], 0);
    let tab = &tabs["tabs"][0];
    assert_eq!(tab["title"], "Lookout sample");
    assert_eq!(tab["url"], "about:lookout");
    assert!(tab["actor"].as_str().unwrap().starts_with("conn0.tab"));

    let inspector = tab["inspectorActor"].as_str().unwrap();
    let walker = request(&mut ws, json!({"to": inspector, "type": "getWalker"})).await;
    let walker = walker["actor"].as_str().unwrap().to_owned();
    assert!(walker.starts_with("conn0.domwalker"));

    let root = request(&mut ws, json!({"to": walker, "type": "root"})).await;
    assert_eq!(root["root"]["nodeType"], 9);
    let token = root["root"]["actor"].as_str().unwrap();

    let children = request(&mut ws, json!({"to": walker, "type": "children", "node": token})).await;
    assert_eq!(children["from"], walker.as_str());
    assert_eq!(children["hasFirst"], true);
    assert_eq!(children["hasLast"], true);
    let names: Vec<&str> = children["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["nodeName"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["html", "HTML"]);
}

#[tokio::test]
async fn protocol_errors_reach_the_client() {
    let (url, _server) = boot_server().await;
    let (mut ws, inspector) = attach(&url).await;

    let unknown = request(&mut ws, json!({"to": "conn0.nobody1", "type": "root"})).await;
    assert_eq!(unknown["error"], "noSuchActor");
    assert_eq!(unknown["from"], "conn0.nobody1");

    let bad_type = request(&mut ws, json!({"to": inspector, "type": "explode"})).await;
    assert_eq!(bad_type["error"], "unrecognizedPacketType");

    ws.send(Message::text("{not json")).await.unwrap();
    let garbled = recv(&mut ws).await;
    assert_eq!(garbled["error"], "notParseable");
    assert_eq!(garbled["from"], "root");

    let walker = request(&mut ws, json!({"to": inspector, "type": "getWalker"})).await;
    let walker = walker["actor"].as_str().unwrap();
    let stale = request(
        &mut ws,
        json!({"to": walker, "type": "children", "node": format!("{walker}.99")}),
    )
    .await;
    assert_eq!(stale["error"], "noSuchNode");
}

#[tokio::test]
async fn connections_get_distinct_prefixes() {
    let (url, server) = boot_server().await;
    let (_a, first) = attach(&url).await;
    let (_b, second) = attach(&url).await;
    assert!(first.starts_with("conn0."));
    assert!(second.starts_with("conn1."));
    assert_eq!(server.state().connection_count(), 2);
}

#[tokio::test]
async fn actors_are_scoped_to_their_connection() {
    let (url, _server) = boot_server().await;
    let (_a, inspector) = attach(&url).await;
    let (mut b, _) = attach(&url).await;
    let foreign = request(&mut b, json!({"to": inspector, "type": "getWalker"})).await;
    assert_eq!(foreign["error"], "noSuchActor");
}

#[tokio::test]
async fn shutdown_closes_sessions() {
    let (url, server) = boot_server().await;
    let (mut ws, _) = attach(&url).await;
    server.shutdown_token().cancel();
    let closed = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_) | Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}
