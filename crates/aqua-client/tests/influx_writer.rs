//! InfluxWriter against an in-process `/write` endpoint.

use aqua_client::{ClientError, InfluxWriter, MeasurementSink, DEFAULT_WRITE_TIMEOUT};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// (method, path and query, body) of every request.
type Received = Arc<Mutex<Vec<(String, String, String)>>>;

async fn start_influx(status: StatusCode) -> (Received, String) {
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let shared = received.clone();
    let make_service = make_service_fn(move |_conn| {
        let received = shared.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let received = received.clone();
                async move {
                    let method = req.method().to_string();
                    let target = req
                        .uri()
                        .path_and_query()
                        .map(ToString::to_string)
                        .unwrap_or_default();
                    let body = hyper::body::to_bytes(req.into_body()).await.unwrap();
                    received.lock().unwrap().push((
                        method,
                        target,
                        String::from_utf8_lossy(&body).into_owned(),
                    ));
                    Ok::<_, Infallible>(
                        Response::builder()
                            .status(status)
                            .body(Body::empty())
                            .unwrap(),
                    )
                }
            }))
        }
    });
    let addr: SocketAddr = ([127, 0, 0, 1], 0).into();
    let server = Server::bind(&addr).serve(make_service);
    let port = server.local_addr().port();
    tokio::spawn(server);
    (received, format!("http://127.0.0.1:{port}"))
}

#[tokio::test]
async fn test_writes_line_protocol_point() {
    let (received, base) = start_influx(StatusCode::NO_CONTENT).await;
    let writer = InfluxWriter::new(&base, "aquarium", DEFAULT_WRITE_TIMEOUT).unwrap();

    writer.write_temperature(24.25).await.unwrap();

    assert_eq!(
        *received.lock().unwrap(),
        vec![(
            "POST".to_string(),
            "/write?db=aquarium".to_string(),
            "temp,name=water value=24.25".to_string(),
        )]
    );
}

#[tokio::test]
async fn test_rejected_write_is_status_error() {
    let (_received, base) = start_influx(StatusCode::NOT_FOUND).await;
    let writer = InfluxWriter::new(&format!("{base}/"), "missing", DEFAULT_WRITE_TIMEOUT).unwrap();

    let err = writer.write_temperature(24.0).await.unwrap_err();

    match err {
        ClientError::Status { status, url } => {
            assert_eq!(status, 404);
            assert!(url.ends_with("/write?db=missing"), "{url}");
        }
        other => panic!("unexpected error {other:?}"),
    }
}
