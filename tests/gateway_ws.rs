//! End-to-end tests: a standard streaming-socket client against the gateway
//! loop driving the simulated drive over real TCP.

#![allow(clippy::panic)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use drive_gateway::domain::DriveParams;
use drive_gateway::link::SimulatedDrive;
use drive_gateway::service::{BroadcastLoop, DriveController, LoopSettings};
use drive_gateway::ws::{SessionRegistry, SessionSettings};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Gateway {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

async fn start_gateway(max_clients: usize) -> Gateway {
    let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind failed");
    };
    let Ok(controller) = DriveController::new(SimulatedDrive::new(), DriveParams::default()) else {
        panic!("default params are valid");
    };
    let registry = SessionRegistry::new(max_clients, SessionSettings::default());
    let settings = LoopSettings {
        tick_interval: Duration::from_millis(5),
        poll_interval: Duration::from_millis(20),
        broadcast_interval: Duration::from_millis(50),
    };
    let mut gateway = BroadcastLoop::new(listener, controller, registry, settings);
    let Ok(addr) = gateway.local_addr() else {
        panic!("no local address");
    };

    let (shutdown, signal) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        gateway
            .run_until(async {
                let _ = signal.await;
            })
            .await;
    });
    Gateway {
        addr,
        shutdown,
        task,
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let Ok((ws, _response)) = connect_async(format!("ws://{addr}/")).await else {
        panic!("upgrade failed");
    };
    ws
}

fn json(message: &Message) -> Option<Value> {
    let Message::Text(text) = message else {
        return None;
    };
    serde_json::from_str(text.as_str()).ok()
}

/// Reads until `accept` matches, failing after a few seconds.
async fn wait_for(ws: &mut Client, accept: impl Fn(&Message) -> bool) -> Message {
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(message)) = ws.next().await {
            if accept(&message) {
                return Some(message);
            }
        }
        None
    })
    .await;
    match found {
        Ok(Some(message)) => message,
        _ => panic!("expected message not received"),
    }
}

async fn wait_for_json(ws: &mut Client, accept: impl Fn(&Value) -> bool) -> Value {
    let message = wait_for(ws, |m| json(m).is_some_and(|v| accept(&v))).await;
    json(&message).unwrap_or_default()
}

async fn send_json(ws: &mut Client, text: &str) {
    let Ok(()) = ws.send(Message::text(text)).await else {
        panic!("send failed");
    };
}

#[tokio::test]
async fn status_is_broadcast_after_upgrade() {
    let gateway = start_gateway(4).await;
    let mut ws = connect(gateway.addr).await;

    let status = wait_for_json(&mut ws, |v| v.get("connected") == Some(&Value::Bool(true))).await;
    for field in ["running", "fault", "frequency", "target", "current", "voltage", "statusWord"] {
        assert!(status.get(field).is_some(), "missing {field}");
    }
    assert_eq!(status.get("fault"), Some(&Value::Bool(false)));
}

#[tokio::test]
async fn commands_are_acknowledged_and_reach_the_drive() {
    let gateway = start_gateway(4).await;
    let mut ws = connect(gateway.addr).await;
    let _ = wait_for_json(&mut ws, |v| v.get("connected") == Some(&Value::Bool(true))).await;

    send_json(&mut ws, r#"{"cmd":"setFreq","frequency":75}"#).await;
    let _ = wait_for_json(&mut ws, |v| v.get("status").and_then(Value::as_str) == Some("frequency set")).await;

    send_json(&mut ws, r#"{"cmd":"start"}"#).await;
    let _ = wait_for_json(&mut ws, |v| v.get("status").and_then(Value::as_str) == Some("started")).await;

    let running = wait_for_json(&mut ws, |v| {
        v.get("running") == Some(&Value::Bool(true))
            && v.get("target").and_then(Value::as_f64) == Some(60.0)
    })
    .await;
    assert!(running.get("frequency").and_then(Value::as_f64).is_some_and(|hz| hz > 0.0));

    send_json(&mut ws, r#"{"cmd":"stop"}"#).await;
    let _ = wait_for_json(&mut ws, |v| v.get("status").and_then(Value::as_str) == Some("stopped")).await;
}

#[tokio::test]
async fn invalid_command_gets_error_reply() {
    let gateway = start_gateway(4).await;
    let mut ws = connect(gateway.addr).await;

    send_json(&mut ws, r#"{"cmd":"launch"}"#).await;
    let reply = wait_for_json(&mut ws, |v| v.get("error").is_some()).await;
    assert!(
        reply
            .get("error")
            .and_then(Value::as_str)
            .is_some_and(|e| e.starts_with("invalid command"))
    );
}

#[tokio::test]
async fn ping_is_answered_with_identical_pong() {
    let gateway = start_gateway(4).await;
    let mut ws = connect(gateway.addr).await;

    let Ok(()) = ws.send(Message::Ping(vec![1u8, 2, 3].into())).await else {
        panic!("ping failed");
    };
    let pong = wait_for(&mut ws, |m| matches!(m, Message::Pong(_))).await;
    let Message::Pong(payload) = pong else {
        panic!("not a pong");
    };
    assert_eq!(payload.as_ref(), &[1u8, 2, 3][..]);
}

#[tokio::test]
async fn connection_over_capacity_is_refused() {
    let gateway = start_gateway(1).await;
    let _first = connect(gateway.addr).await;

    let second = tokio::time::timeout(
        Duration::from_secs(5),
        connect_async(format!("ws://{}/", gateway.addr)),
    )
    .await;
    assert!(matches!(second, Ok(Err(_))));
}

#[tokio::test]
async fn client_close_is_echoed() {
    let gateway = start_gateway(4).await;
    let mut ws = connect(gateway.addr).await;

    let Ok(()) = ws.close(None).await else {
        panic!("close failed");
    };
    let _ = wait_for(&mut ws, |m| matches!(m, Message::Close(_))).await;
}

#[tokio::test]
async fn shutdown_closes_sessions_with_going_away() {
    let gateway = start_gateway(4).await;
    let mut ws = connect(gateway.addr).await;
    let _ = wait_for_json(&mut ws, |v| v.get("statusWord").is_some()).await;

    let _ = gateway.shutdown.send(());
    let close = wait_for(&mut ws, |m| matches!(m, Message::Close(_))).await;
    let Message::Close(Some(frame)) = close else {
        panic!("close frame without status code");
    };
    assert_eq!(u16::from(frame.code), 1001);

    let Ok(()) = gateway.task.await else {
        panic!("gateway task panicked");
    };
}
