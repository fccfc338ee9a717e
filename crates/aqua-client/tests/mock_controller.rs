//! DeviceClient against an in-process stand-in for the controller API.

use aqua_client::{
    AddressSource, ClientConfig, ClientError, ControllerAddress, DeviceClient, LightMode,
};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    path: String,
    body: Value,
}

/// Controller API with one controller, `aqua`, answering on a local port.
#[derive(Clone)]
struct MockController {
    state: Arc<Mutex<Value>>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockController {
    async fn start(values: Value) -> (Self, String) {
        let mock = Self {
            state: Arc::new(Mutex::new(json!({ "controllerId": "aqua", "values": values }))),
            requests: Arc::new(Mutex::new(Vec::new())),
        };

        let shared = mock.clone();
        let make_service = make_service_fn(move |_conn| {
            let mock = shared.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let mock = mock.clone();
                    async move { Ok::<_, Infallible>(mock.handle(req).await) }
                }))
            }
        });
        let addr: SocketAddr = ([127, 0, 0, 1], 0).into();
        let server = Server::bind(&addr).serve(make_service);
        let port = server.local_addr().port();
        tokio::spawn(server);

        (mock, format!("127.0.0.1:{port}/api"))
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let bytes = hyper::body::to_bytes(req.into_body()).await.unwrap();
        let body: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        let (status, reply) = match (&method, path.as_str()) {
            (&Method::GET, "/api/controller/aqua") => {
                (StatusCode::OK, self.state.lock().unwrap().to_string())
            }
            (&Method::POST, "/api/updateController") => {
                let mut state = self.state.lock().unwrap();
                if let Some(update) = body["values"].as_object() {
                    for (name, value) in update {
                        state["values"][name] = value.clone();
                    }
                }
                (StatusCode::OK, "{}".to_string())
            }
            _ => (StatusCode::NOT_FOUND, "{}".to_string()),
        };
        self.requests.lock().unwrap().push(Recorded {
            method: method.to_string(),
            path,
            body,
        });

        Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(Body::from(reply))
            .unwrap()
    }
}

fn client(base: &str, controller_id: &str) -> DeviceClient {
    let address = ControllerAddress::parse(base, AddressSource::CommandLine).unwrap();
    DeviceClient::new(address, controller_id, &ClientConfig::default()).unwrap()
}

#[tokio::test]
async fn test_get_state() {
    let (_mock, base) = MockController::start(json!({ "sunlight": 1, "temp_water": 25.1 })).await;

    let state = client(&base, "aqua").get_state().await.unwrap();

    assert_eq!(state.controller_id.as_deref(), Some("aqua"));
    assert_eq!(state.light_mode(), LightMode::Sun);
    assert_eq!(state.number("temp_water"), Some(25.1));
}

#[tokio::test]
async fn test_set_light_posts_then_refetches() {
    let (mock, base) = MockController::start(json!({ "sunlight": 1, "moonlight": 0 })).await;

    let state = client(&base, "aqua").set_light(LightMode::Moon).await.unwrap();

    assert_eq!(state.light_mode(), LightMode::Moon);
    let requests = mock.requests();
    let summary: Vec<(&str, &str)> = requests
        .iter()
        .map(|r| (r.method.as_str(), r.path.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("GET", "/api/controller/aqua"),
            ("POST", "/api/updateController"),
            ("GET", "/api/controller/aqua"),
        ]
    );
    assert_eq!(
        requests[1].body,
        json!({ "controllerId": "aqua", "values": { "moonlight": 1, "sunlight": 0 } })
    );
}

#[tokio::test]
async fn test_top_off_sends_duration() {
    let (mock, base) = MockController::start(json!({})).await;

    let state = client(&base, "aqua")
        .top_off(Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(state.number("top_off_duration"), Some(30.0));
    assert_eq!(
        mock.requests()[0].body,
        json!({ "controllerId": "aqua", "values": { "top_off_duration": 30 } })
    );
}

#[tokio::test]
async fn test_send_values_with_large_body() {
    let (mock, base) = MockController::start(json!({})).await;
    let values: aqua_client::ControllerValues = (0..200)
        .map(|i| (format!("channel_{i:03}"), json!(format!("setting-{i}"))))
        .collect();

    let state = client(&base, "aqua").send_values(&values).await.unwrap();

    assert_eq!(state.values.len(), 200);
    assert_eq!(state.value("channel_199"), Some(&json!("setting-199")));
    assert_eq!(mock.requests()[0].body["values"].as_object().map(|v| v.len()), Some(200));
}

#[tokio::test]
async fn test_unknown_controller_is_status_error() {
    let (_mock, base) = MockController::start(json!({})).await;

    let err = client(&base, "reef").get_state().await.unwrap_err();

    match err {
        ClientError::Status { status, url } => {
            assert_eq!(status, 404);
            assert!(url.ends_with("/api/controller/reef"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_controller() {
    // Bind and drop to get a port nobody listens on
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let err = client(&format!("127.0.0.1:{port}/api"), "aqua")
        .get_state()
        .await
        .unwrap_err();

    assert!(err.is_unreachable(), "unexpected error {err:?}");
}
