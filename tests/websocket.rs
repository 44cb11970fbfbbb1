//! WebSocket clients and servers over loopback, driven through the bridge.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use netbridge::net::ConnectionId;
use netbridge::{Bridge, Handle, MessageMode, Param, WsEvent};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

mod common;

type Events = Arc<Mutex<Vec<(String, Vec<Param>)>>>;

fn record(bridge: &Bridge, handle: Handle, server: bool, events: &Events) {
    for (event, name) in [
        (WsEvent::Open, "open"),
        (WsEvent::Message, "message"),
        (WsEvent::Close, "close"),
        (WsEvent::Error, "error"),
    ] {
        let sink = Arc::clone(events);
        let listener: netbridge::Listener = Arc::new(move |_: &Bridge, params: &[Param]| {
            sink.lock().unwrap().push((name.to_string(), params.to_vec()));
        });
        if server {
            bridge.ws_server_on(handle, event, listener).unwrap();
        } else {
            bridge.ws_client_on(handle, event, listener).unwrap();
        }
    }
}

fn count(events: &Events, name: &str) -> usize {
    events.lock().unwrap().iter().filter(|(n, _)| n == name).count()
}

fn start_echo_server(bridge: &Bridge) -> (Handle, std::net::SocketAddr) {
    let server = bridge.ws_server_create("127.0.0.1", 0);
    bridge
        .ws_server_on(
            server,
            WsEvent::Message,
            Arc::new(|bridge: &Bridge, params: &[Param]| {
                let client = bridge.ws_client(params[1].as_handle().unwrap()).unwrap();
                assert!(client.send(params[2].as_str().unwrap()));
            }),
        )
        .unwrap();
    let addr = bridge.ws_server_start(server).unwrap();
    (server, addr)
}

#[test]
fn test_document_round_trip_through_echo_server() {
    let bridge = Bridge::with_defaults().unwrap();
    let (_server, addr) = start_echo_server(&bridge);

    let original = json!({"id": 7, "items": [1.5, "two", null], "nested": {"ok": true}});
    let sent = bridge.json_create(original.clone());
    let payload = bridge.json_serialize(sent).unwrap();

    let client = bridge
        .ws_client_create(&format!("ws://{addr}/"), MessageMode::Json)
        .unwrap();
    bridge
        .ws_client_on(
            client,
            WsEvent::Open,
            Arc::new(move |bridge: &Bridge, params: &[Param]| {
                let client = bridge.ws_client(params[0].as_handle().unwrap()).unwrap();
                assert!(client.send(payload.as_str()));
            }),
        )
        .unwrap();

    let received: Arc<Mutex<Option<(serde_json::Value, i64)>>> = Arc::default();
    let sink = Arc::clone(&received);
    bridge
        .ws_client_on(
            client,
            WsEvent::Message,
            Arc::new(move |bridge: &Bridge, params: &[Param]| {
                let doc = params[1].as_handle().unwrap();
                let value = (*bridge.json_value(doc).unwrap()).clone();
                *sink.lock().unwrap() = Some((value, params[2].as_cell().unwrap()));
            }),
        )
        .unwrap();
    bridge.ws_client_connect(client).unwrap();

    assert!(common::drain_until(&bridge, || received.lock().unwrap().is_some()));
    let (value, len) = received.lock().unwrap().clone().unwrap();
    assert_eq!(value, original);
    assert_eq!(len, bridge.json_serialize(sent).unwrap().len() as i64 + 1);
}

#[test]
fn test_broadcast_reaches_every_client_once() {
    let bridge = Bridge::with_defaults().unwrap();
    let server = bridge.ws_server_create("127.0.0.1", 0);
    let server_events: Events = Arc::default();
    record(&bridge, server, true, &server_events);
    let addr = bridge.ws_server_start(server).unwrap();

    let client_events: Vec<Events> = (0..3).map(|_| Events::default()).collect();
    let clients: Vec<Handle> = client_events
        .iter()
        .map(|events| {
            let client = bridge
                .ws_client_create(&format!("ws://{addr}/"), MessageMode::Text)
                .unwrap();
            record(&bridge, client, false, events);
            bridge.ws_client_connect(client).unwrap();
            client
        })
        .collect();

    assert!(common::drain_until(&bridge, || {
        count(&server_events, "open") == 3 && client_events.iter().all(|e| count(e, "open") == 1)
    }));

    let session = bridge.ws_server(server).unwrap();
    assert_eq!(session.client_ids().len(), 3);
    assert_eq!(session.broadcast("ping"), 3);

    assert!(common::drain_until(&bridge, || {
        client_events.iter().all(|e| count(e, "message") == 1)
    }));
    common::drain_for(&bridge, Duration::from_millis(100));

    for (client, events) in clients.iter().zip(&client_events) {
        let events = events.lock().unwrap();
        let messages: Vec<_> = events.iter().filter(|(n, _)| n == "message").collect();
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].1,
            vec![Param::Handle(*client), Param::Str("ping".into()), Param::Cell(5)]
        );
    }

    // Each accepted connection reported its own id and remote address.
    let opens: Vec<Vec<Param>> = server_events
        .lock()
        .unwrap()
        .iter()
        .filter(|(n, _)| n == "open")
        .map(|(_, p)| p.clone())
        .collect();
    let mut ids: Vec<String> = opens.iter().map(|p| p[2].as_str().unwrap().to_string()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
    for params in &opens {
        assert_eq!(params[0], Param::Handle(server));
        assert!(params[1].as_str().unwrap().starts_with("127.0.0.1:"));
    }
}

#[test]
fn test_message_forwarding_carries_handshake_headers() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let bridge = Bridge::with_defaults().unwrap();
    let server = bridge.ws_server_create("127.0.0.1", 0);

    let seen: Arc<Mutex<Option<(Option<String>, String, i64)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    bridge
        .ws_server_on(
            server,
            WsEvent::Message,
            Arc::new(move |bridge: &Bridge, params: &[Param]| {
                let client = bridge.ws_client(params[1].as_handle().unwrap()).unwrap();
                client.send("welcome");
                *sink.lock().unwrap() = Some((
                    client.header("x-client"),
                    params[2].as_str().unwrap().to_string(),
                    params[3].as_cell().unwrap(),
                ));
            }),
        )
        .unwrap();
    let addr = bridge.ws_server_start(server).unwrap();

    let mut request = format!("ws://{addr}/chat").into_client_request().unwrap();
    request.headers_mut().insert("X-Client", "alpha".parse().unwrap());
    let (mut ws, _) = rt.block_on(tokio_tungstenite::connect_async(request)).unwrap();
    rt.block_on(ws.send(Message::text("hello"))).unwrap();

    assert!(common::drain_until(&bridge, || seen.lock().unwrap().is_some()));
    let (header, text, len) = seen.lock().unwrap().clone().unwrap();
    assert_eq!(header.as_deref(), Some("alpha"));
    assert_eq!(text, "hello");
    assert_eq!(len, 5);

    let reply = rt.block_on(ws.next()).unwrap().unwrap();
    assert_eq!(reply, Message::text("welcome"));
}

#[test]
fn test_error_without_close_forgets_headers() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let bridge = Bridge::with_defaults().unwrap();
    let server = bridge.ws_server_create("127.0.0.1", 0);
    let events: Events = Arc::default();
    record(&bridge, server, true, &events);
    let addr = bridge.ws_server_start(server).unwrap();

    let mut request = format!("ws://{addr}/").into_client_request().unwrap();
    request.headers_mut().insert("X-Client", "beta".parse().unwrap());
    let (mut ws, _) = rt.block_on(tokio_tungstenite::connect_async(request)).unwrap();

    assert!(common::drain_until(&bridge, || count(&events, "open") == 1));
    let id: ConnectionId = events.lock().unwrap()[0].1[2].as_str().unwrap().parse().unwrap();

    // Masked frame with a reserved opcode: a protocol error, not a close.
    rt.block_on(async {
        let stream = match ws.get_mut() {
            tokio_tungstenite::MaybeTlsStream::Plain(stream) => stream,
            _ => unreachable!(),
        };
        stream.write_all(&[0x83, 0x80, 0, 0, 0, 0]).await.unwrap();
        stream.flush().await.unwrap();
    });

    assert!(common::drain_until(&bridge, || count(&events, "error") == 1));
    common::drain_for(&bridge, Duration::from_millis(100));

    let session = bridge.ws_server(server).unwrap();
    assert!(session.connection_headers(id).is_none());
    assert_eq!(count(&events, "close"), 0);

    let events = events.lock().unwrap();
    let (_, params) = events.iter().find(|(n, _)| n == "error").unwrap();
    assert_eq!(params.len(), 4);
    assert_eq!(params[0], Param::Handle(server));
    assert_eq!(params[3], Param::Str(id.to_string()));
}

#[test]
fn test_close_follows_open_exactly_once() {
    let bridge = Bridge::with_defaults().unwrap();
    let (_server, addr) = start_echo_server(&bridge);

    let client = bridge
        .ws_client_create(&format!("ws://{addr}/"), MessageMode::Text)
        .unwrap();
    let events: Events = Arc::default();
    record(&bridge, client, false, &events);
    bridge
        .ws_client_on(
            client,
            WsEvent::Open,
            Arc::new({
                let sink = Arc::clone(&events);
                move |bridge: &Bridge, params: &[Param]| {
                    sink.lock().unwrap().push(("open".into(), params.to_vec()));
                    let session = bridge.ws_client(params[0].as_handle().unwrap()).unwrap();
                    assert!(session.is_connected());
                    assert!(session.close(4000, "done"));
                    assert!(!session.send("too late"));
                }
            }),
        )
        .unwrap();
    bridge.ws_client_connect(client).unwrap();

    assert!(common::drain_until(&bridge, || count(&events, "close") == 1));
    common::drain_for(&bridge, Duration::from_millis(100));

    let events = events.lock().unwrap();
    let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["open", "close"]);
    assert_eq!(
        events[1].1,
        vec![Param::Handle(client), Param::Cell(4000), Param::Str("done".into())]
    );
}

#[test]
fn test_connect_failure_reports_error_only() {
    let bridge = Bridge::with_defaults().unwrap();
    let port = common::closed_port();
    let client = bridge
        .ws_client_create(&format!("ws://127.0.0.1:{port}/"), MessageMode::Text)
        .unwrap();
    let events: Events = Arc::default();
    record(&bridge, client, false, &events);
    bridge.ws_client_connect(client).unwrap();
    assert!(matches!(
        bridge.ws_client_connect(client),
        Err(netbridge::BridgeError::AlreadyConnected(_))
    ));

    assert!(common::drain_until(&bridge, || count(&events, "error") == 1));
    common::drain_for(&bridge, Duration::from_millis(100));
    assert_eq!(count(&events, "open"), 0);
    assert_eq!(count(&events, "close"), 0);
}

#[test]
fn test_send_to_and_disconnect() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let bridge = Bridge::with_defaults().unwrap();
    let server = bridge.ws_server_create("127.0.0.1", 0);
    let events: Events = Arc::default();
    record(&bridge, server, true, &events);
    let addr = bridge.ws_server_start(server).unwrap();

    let (mut ws, _) = rt
        .block_on(tokio_tungstenite::connect_async(format!("ws://{addr}/")))
        .unwrap();
    assert!(common::drain_until(&bridge, || count(&events, "open") == 1));
    let id: ConnectionId = events.lock().unwrap()[0].1[2].as_str().unwrap().parse().unwrap();

    let session = bridge.ws_server(server).unwrap();
    assert!(session.send_to(id, "direct"));
    assert!(!session.send_to(ConnectionId::new(), "nobody"));
    assert_eq!(rt.block_on(ws.next()).unwrap().unwrap(), Message::text("direct"));

    assert!(session.disconnect(id));
    let frame = rt.block_on(ws.next()).unwrap().unwrap();
    assert!(matches!(frame, Message::Close(_)));
    drop(ws);

    assert!(common::drain_until(&bridge, || count(&events, "close") == 1));
    assert!(session.connection_headers(id).is_none());
    assert!(common::drain_until(&bridge, || session.client_ids().is_empty()));
}

#[test]
fn test_stop_releases_port_silently() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let bridge = Bridge::with_defaults().unwrap();
    let server = bridge.ws_server_create("127.0.0.1", 0);
    let events: Events = Arc::default();
    record(&bridge, server, true, &events);
    let addr = bridge.ws_server_start(server).unwrap();

    let (mut ws, _) = rt
        .block_on(tokio_tungstenite::connect_async(format!("ws://{addr}/")))
        .unwrap();
    assert!(common::drain_until(&bridge, || count(&events, "open") == 1));

    bridge.ws_server_stop(server).unwrap();
    let frame = rt.block_on(ws.next()).unwrap().unwrap();
    assert!(matches!(frame, Message::Close(_)));

    common::drain_for(&bridge, Duration::from_millis(100));
    assert_eq!(count(&events, "close"), 0);
    assert!(!bridge.ws_server(server).unwrap().is_running());
    assert!(std::net::TcpListener::bind(addr).is_ok());
}

#[test]
fn test_disconnect_drops_client_that_ignores_close() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut config = netbridge::BridgeConfig::default();
    config.websocket.server.close_timeout_ms = 200;
    let bridge = Bridge::new(config).unwrap();
    let server = bridge.ws_server_create("127.0.0.1", 0);
    let events: Events = Arc::default();
    record(&bridge, server, true, &events);
    let addr = bridge.ws_server_start(server).unwrap();

    // Hand-rolled upgrade; after it the peer never reads or writes again.
    let _socket = rt.block_on(async {
        use tokio::io::AsyncReadExt;
        let mut socket = tokio::net::TcpStream::connect(addr).await.unwrap();
        let upgrade = format!(
            "GET / HTTP/1.1\r\nHost: {addr}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n"
        );
        socket.write_all(upgrade.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        let mut byte = [0u8; 1];
        while !response.ends_with(b"\r\n\r\n") {
            socket.read_exact(&mut byte).await.unwrap();
            response.push(byte[0]);
        }
        assert!(response.starts_with(b"HTTP/1.1 101"));
        socket
    });

    assert!(common::drain_until(&bridge, || count(&events, "open") == 1));
    let id: ConnectionId = events.lock().unwrap()[0].1[2].as_str().unwrap().parse().unwrap();

    let session = bridge.ws_server(server).unwrap();
    assert!(session.disconnect(id));
    assert!(common::drain_until(&bridge, || session.client_ids().is_empty()));
    assert_eq!(session.connection_count(), 0);

    assert!(common::drain_until(&bridge, || count(&events, "close") == 1));
    let events = events.lock().unwrap();
    let (_, params) = events.iter().find(|(n, _)| n == "close").unwrap();
    assert_eq!(params[1], Param::Cell(1006));
    assert_eq!(params[4], Param::Str(id.to_string()));
}
