//! End-to-end requests through the gateway router against the echo service.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode, header};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use tower::ServiceExt;
use wseb_gateway_server::{GatewayConfig, GatewayState, create_router};

const HOST: &str = "gw.test";
const NOOP: &[u8] = b"\x0100\xFF";
const RECONNECT: &[u8] = b"\x0101\xFF";
const CLOSE: &[u8] = b"\x0102\xFF";
const HELLO: &[u8] = b"\x81\x05hello";

struct Gateway {
    state: Arc<GatewayState>,
    router: Router,
}

impl Gateway {
    fn new(config: GatewayConfig) -> Self {
        let state = Arc::new(GatewayState::new(config));
        let router = create_router(Arc::clone(&state));
        Self { state, router }
    }

    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Create a session and return its (upstream, downstream) paths.
    async fn create(&self, headers: &[(&str, &str)]) -> (String, String) {
        let response = self
            .send(request(Method::POST, "/echo/;e/cb", headers, Body::empty()))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = body_bytes(response).await;
        let text = std::str::from_utf8(&body).unwrap();
        let urls: Vec<&str> = text.lines().collect();
        assert_eq!(urls.len(), 2);

        let prefix = format!("http://{HOST}");
        (
            urls[0].strip_prefix(&prefix).unwrap().to_string(),
            urls[1].strip_prefix(&prefix).unwrap().to_string(),
        )
    }

    async fn wait_for_sessions(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.state.registry().session_count() != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    /// Wait until a downstream carrier is attached to the session at `path`.
    async fn wait_for_poll(&self, path: &str) {
        let path = wseb_proto::EndpointPath::parse(path).unwrap();
        let session = self.state.registry().lookup(&path).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while session.current_writer().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}

fn request(method: Method, uri: &str, headers: &[(&str, &str)], body: Body) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::HOST, HOST);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(body).unwrap()
}

async fn body_bytes(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

async fn next_chunk(body: &mut Body) -> Option<Bytes> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
            .await
            .unwrap()?
            .unwrap();
        if let Ok(data) = frame.into_data() {
            return Some(data);
        }
    }
}

const COMPLIANT: [(&str, &str); 2] = [("X-WebSocket-Version", "wseb-1.0"), ("X-Sequence-No", "0")];

// ==================== Create Tests ====================

#[tokio::test]
async fn test_create_returns_session_urls() {
    let gateway = Gateway::new(GatewayConfig::default());

    let (upstream, downstream) = gateway.create(&COMPLIANT).await;

    assert!(upstream.starts_with("/echo/;e/ub/"));
    assert!(downstream.starts_with("/echo/;e/db/"));
    assert_eq!(
        upstream.trim_start_matches("/echo/;e/ub/"),
        downstream.trim_start_matches("/echo/;e/db/")
    );
    assert_eq!(gateway.state.registry().session_count(), 1);
}

#[tokio::test]
async fn test_create_with_bad_version_rejected() {
    let gateway = Gateway::new(GatewayConfig::default());

    let response = gateway
        .send(request(
            Method::POST,
            "/echo/;e/cb",
            &[("X-WebSocket-Version", "wseb-9")],
            Body::empty(),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(gateway.state.registry().session_count(), 0);
}

// ==================== Streaming Tests ====================

#[tokio::test]
async fn test_upstream_message_echoed_downstream() {
    let gateway = Gateway::new(GatewayConfig::default());
    let (upstream, downstream) = gateway.create(&COMPLIANT).await;

    let response = gateway
        .send(request(
            Method::GET,
            &downstream,
            &[("X-Sequence-No", "1")],
            Body::empty(),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/octet-stream"
    );
    assert_eq!(response.headers()["X-Idle-Timeout"], "60");
    let mut body = response.into_body();

    let posted = gateway
        .send(request(
            Method::POST,
            &upstream,
            &[
                ("X-Sequence-No", "1"),
                ("Content-Type", "application/octet-stream"),
            ],
            Body::from(HELLO),
        ))
        .await;
    assert_eq!(posted.status(), StatusCode::OK);

    assert_eq!(&next_chunk(&mut body).await.unwrap()[..], HELLO);
}

#[tokio::test]
async fn test_second_downstream_reconnects_first() {
    let gateway = Gateway::new(GatewayConfig::default());
    let (_, downstream) = gateway.create(&COMPLIANT).await;

    let first = gateway
        .send(request(
            Method::GET,
            &downstream,
            &[("X-Sequence-No", "1")],
            Body::empty(),
        ))
        .await;
    let second = gateway
        .send(request(
            Method::GET,
            &downstream,
            &[("X-Sequence-No", "2")],
            Body::empty(),
        ))
        .await;

    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(&body_bytes(first).await[..], RECONNECT);
}

#[tokio::test]
async fn test_client_close_ends_session() {
    let gateway = Gateway::new(GatewayConfig::default());
    let (upstream, downstream) = gateway.create(&COMPLIANT).await;

    let response = gateway
        .send(request(
            Method::GET,
            &downstream,
            &[("X-Sequence-No", "1")],
            Body::empty(),
        ))
        .await;
    let mut body = response.into_body();

    gateway
        .send(request(
            Method::POST,
            &upstream,
            &[
                ("X-Sequence-No", "1"),
                ("Content-Type", "application/octet-stream"),
            ],
            Body::from(CLOSE),
        ))
        .await;

    assert_eq!(&next_chunk(&mut body).await.unwrap()[..], CLOSE);
    assert!(next_chunk(&mut body).await.is_none());
    gateway.wait_for_sessions(0).await;

    let gone = gateway
        .send(request(
            Method::GET,
            &downstream,
            &[("X-Sequence-No", "2")],
            Body::empty(),
        ))
        .await;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_text_transport_round_trip() {
    let gateway = Gateway::new(GatewayConfig::default());
    let response = gateway
        .send(request(Method::POST, "/echo/;e/ct", &COMPLIANT, Body::empty()))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_bytes(response).await;
    let urls: Vec<String> = std::str::from_utf8(&body)
        .unwrap()
        .lines()
        .map(|url| url.trim_start_matches("http://gw.test").to_string())
        .collect();
    assert!(urls[0].starts_with("/echo/;e/ut/"));
    assert!(urls[1].starts_with("/echo/;e/dt/"));

    let response = gateway
        .send(request(
            Method::GET,
            &urls[1],
            &[("X-Sequence-No", "1")],
            Body::empty(),
        ))
        .await;
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain;charset=utf-8"
    );
    let mut body = response.into_body();

    // each frame byte travels as the code point of the same value
    let encoded = "\u{81}\u{5}hello";
    gateway
        .send(request(
            Method::POST,
            &urls[0],
            &[
                ("X-Sequence-No", "1"),
                ("Content-Type", "text/plain; charset=utf-8"),
            ],
            Body::from(encoded),
        ))
        .await;

    assert_eq!(&next_chunk(&mut body).await.unwrap()[..], encoded.as_bytes());
}

// ==================== Violation Tests ====================

#[tokio::test]
async fn test_empty_upstream_resets_session() {
    let gateway = Gateway::new(GatewayConfig::default());
    let (upstream, _) = gateway.create(&COMPLIANT).await;

    let response = gateway
        .send(request(
            Method::POST,
            &upstream,
            &[
                ("X-Sequence-No", "1"),
                ("Content-Type", "application/octet-stream"),
                ("Content-Length", "0"),
            ],
            Body::empty(),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()[header::CONNECTION], "close");
    gateway.wait_for_sessions(0).await;
}

#[tokio::test]
async fn test_out_of_order_downstream_resets_session() {
    let gateway = Gateway::new(GatewayConfig::default());
    let (_, downstream) = gateway.create(&COMPLIANT).await;

    let response = gateway
        .send(request(
            Method::GET,
            &downstream,
            &[("X-Sequence-No", "7")],
            Body::empty(),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    gateway.wait_for_sessions(0).await;
}

#[tokio::test]
async fn test_malformed_downstream_sequence_resets_session() {
    let gateway = Gateway::new(GatewayConfig::default());
    let (_, downstream) = gateway.create(&COMPLIANT).await;

    let response = gateway
        .send(request(
            Method::GET,
            &downstream,
            &[("X-Sequence-No", "abc")],
            Body::empty(),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    gateway.wait_for_sessions(0).await;
}

#[tokio::test]
async fn test_undecodable_upstream_resets_session() {
    let gateway = Gateway::new(GatewayConfig::default());
    let (upstream, _) = gateway.create(&COMPLIANT).await;

    let response = gateway
        .send(request(
            Method::POST,
            &upstream,
            &[
                ("X-Sequence-No", "1"),
                ("Content-Type", "application/octet-stream"),
            ],
            Body::from(&b"\x42\x00"[..]),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    gateway.wait_for_sessions(0).await;
}

// ==================== Long Polling Tests ====================

#[tokio::test]
async fn test_legacy_long_polling_round_trip() {
    let gateway = Arc::new(Gateway::new(GatewayConfig::default()));
    let (upstream, downstream) = gateway.create(&[]).await;

    let poll = tokio::spawn({
        let gateway = Arc::clone(&gateway);
        let uri = format!("{downstream}?.kb=0");
        async move {
            gateway
                .send(request(Method::GET, &uri, &[], Body::empty()))
                .await
        }
    });
    gateway.wait_for_poll(&downstream).await;

    let posted = gateway
        .send(request(Method::POST, &upstream, &[], Body::from(HELLO)))
        .await;
    assert_eq!(posted.status(), StatusCode::OK);

    let response = poll.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONNECTION], "close");
    let body = body_bytes(response).await;
    assert_eq!(&body[..], [NOOP, HELLO, RECONNECT].concat());
}

#[tokio::test]
async fn test_server_close_completes_long_poll() {
    let gateway = Arc::new(Gateway::new(GatewayConfig::default()));
    let (upstream, downstream) = gateway.create(&COMPLIANT).await;

    let poll = tokio::spawn({
        let gateway = Arc::clone(&gateway);
        let uri = format!("{downstream}?.kb=0");
        async move {
            gateway
                .send(request(
                    Method::GET,
                    &uri,
                    &[("X-Sequence-No", "1")],
                    Body::empty(),
                ))
                .await
        }
    });
    gateway.wait_for_poll(&downstream).await;

    let path = wseb_proto::EndpointPath::parse(&downstream).unwrap();
    gateway.state.registry().lookup(&path).unwrap().close();

    let response = tokio::time::timeout(Duration::from_secs(1), poll)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&body_bytes(response).await[..], CLOSE);

    let posted = gateway
        .send(request(
            Method::POST,
            &upstream,
            &[
                ("X-Sequence-No", "1"),
                ("Content-Type", "application/octet-stream"),
            ],
            Body::from(CLOSE),
        ))
        .await;
    assert_eq!(posted.status(), StatusCode::OK);
    gateway.wait_for_sessions(0).await;
}

// ==================== Redirect Tests ====================

#[tokio::test]
async fn test_downstream_redirected_to_secure_endpoint() {
    let config = GatewayConfig::default().with_secure_redirect_authority("secure.gw.test");
    let gateway = Gateway::new(config);
    let (_, downstream) = gateway.create(&[]).await;

    let response = gateway
        .send(request(Method::GET, &downstream, &[], Body::empty()))
        .await;

    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        response.headers()[header::LOCATION],
        format!("https://secure.gw.test{downstream}").as_str()
    );
}

#[tokio::test]
async fn test_same_scheme_only_skips_redirect() {
    let config = GatewayConfig::default().with_secure_redirect_authority("secure.gw.test");
    let gateway = Gateway::new(config);
    let (upstream, downstream) = gateway.create(&[]).await;

    let poll = gateway.send(request(
        Method::GET,
        &format!("{downstream}?.kd=s"),
        &[],
        Body::empty(),
    ));
    let post = async {
        gateway.wait_for_poll(&downstream).await;
        gateway
            .send(request(Method::POST, &upstream, &[], Body::from(HELLO)))
            .await
    };
    let (response, posted) = tokio::join!(poll, post);

    assert_eq!(posted.status(), StatusCode::OK);
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        &body_bytes(response).await[..],
        [NOOP, HELLO, RECONNECT].concat()
    );
}
