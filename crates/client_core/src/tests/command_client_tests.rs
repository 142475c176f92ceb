use super::*;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{Method as HttpMethod, StatusCode, Uri},
    Router,
};
use tokio::{net::TcpListener, sync::Mutex};

use crate::error::CommandFailure;

#[derive(Clone, Default)]
struct RecordedCalls {
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

async fn record_call(
    State(state): State<RecordedCalls>,
    method: HttpMethod,
    uri: Uri,
) -> (StatusCode, String) {
    let target = match uri.query() {
        Some(query) => format!("{}?{query}", uri.path()),
        None => uri.path().to_string(),
    };
    state.calls.lock().await.push((method.to_string(), target));
    if uri.path() == "/laser" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "laser fault".to_string());
    }
    if uri.path() == "/status" {
        return (StatusCode::OK, r#"{"frames":12}"#.to_string());
    }
    (StatusCode::OK, "ok".to_string())
}

async fn spawn_command_server() -> anyhow::Result<(String, RecordedCalls)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = RecordedCalls::default();
    let app = Router::new().fallback(record_call).with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), state))
}

#[tokio::test]
async fn issues_each_command_with_expected_method_path_and_query() {
    let (server_url, recorded) = spawn_command_server().await.expect("spawn server");
    let client = CommandClient::new(&format!("{server_url}/"), Duration::from_secs(5))
        .expect("client");

    client.start_stream().await.expect("start stream");
    client.stop_stream().await.expect("stop stream");
    client.start_session("trial 1").await.expect("start session");
    client.stop_session().await.expect("stop session");
    client.reconnect_camera().await.expect("reconnect");
    client.set_hardware_trigger(true).await.expect("trigger on");
    client.set_hardware_trigger(false).await.expect("trigger off");
    let status = client.get_status().await.expect("status");
    assert_eq!(status.status, 200);
    assert_eq!(status.body, r#"{"frames":12}"#);

    let calls = recorded.calls.lock().await.clone();
    let expected: Vec<(String, String)> = [
        ("POST", "/start"),
        ("POST", "/stop"),
        ("POST", "/session/start?name=trial+1"),
        ("POST", "/session/stop"),
        ("POST", "/reconnect"),
        ("POST", "/trigger?enable=1"),
        ("POST", "/trigger?enable=0"),
        ("GET", "/status"),
    ]
    .into_iter()
    .map(|(m, p)| (m.to_string(), p.to_string()))
    .collect();
    assert_eq!(calls, expected);
}

#[tokio::test]
async fn server_error_status_maps_to_remote_command_error() {
    let (server_url, recorded) = spawn_command_server().await.expect("spawn server");
    let client = CommandClient::new(&server_url, Duration::from_secs(5)).expect("client");

    let err = client.set_laser(true).await.expect_err("laser must fail");
    assert_eq!(err.operation, CommandOp::SetLaser);
    assert!(matches!(err.cause, CommandFailure::Http(_)));
    assert!(err.to_string().contains("set_laser"), "{err}");

    let calls = recorded.calls.lock().await.clone();
    assert_eq!(
        calls,
        vec![("POST".to_string(), "/laser?on=1".to_string())],
        "no retry is attempted"
    );
}

#[tokio::test]
async fn unreachable_server_maps_to_remote_command_error() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let client =
        CommandClient::new(&format!("http://{addr}"), Duration::from_secs(2)).expect("client");
    let err = client.start_session("x").await.expect_err("must fail");
    assert_eq!(err.operation, CommandOp::StartSession);
    match &err.cause {
        CommandFailure::Unavailable(message) => {
            assert!(message.contains(&addr.to_string()), "{message}");
        }
        other => panic!("expected an unreachable server, got {other:?}"),
    }
}

#[test]
fn rejects_non_http_base_url() {
    assert!(CommandClient::new("ws://localhost:9002", Duration::from_secs(1)).is_err());
    assert!(CommandClient::new("not a url", Duration::from_secs(1)).is_err());
}

#[test]
fn command_ops_have_stable_names() {
    assert_eq!(
        RemoteCommand::SetLaser { on: false }.op().to_string(),
        "set_laser"
    );
    assert_eq!(RemoteCommand::GetStatus.op(), CommandOp::GetStatus);
    assert_eq!(
        RemoteCommand::StartSession {
            name: "a".to_string()
        }
        .query(),
        vec![("name", "a".to_string())]
    );
}
