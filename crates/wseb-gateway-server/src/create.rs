//! Create handshake.
//!
//! One request per session at `<base>/;e/c<transport>`. Every header is
//! validated before anything is allocated, so a rejected create leaves no
//! trace. On success the session is spawned, its upstream and downstream
//! paths are bound, the service receives the application side, and the
//! client gets both URLs back.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::Response;
use tracing::info;
use wseb_proto::headers::{
    parse_accept_commands, split_list, ACCEPT_COMMANDS, ACCEPT_PING, SEQUENCE_NO,
    WEBSOCKET_EXTENSIONS, WEBSOCKET_PROTOCOL, WEBSOCKET_VERSION,
};
use wseb_proto::{EndpointPath, ProtoError, ProtocolMode};
use wseb_session::{EmulatedSession, SessionOptions};

use crate::error::{GatewayError, GatewayResult};
use crate::request::{authority, header_str, header_values, sequence_no};
use crate::state::GatewayState;

const TEXT_PLAIN: &str = "text/plain;charset=UTF-8";

/// Negotiated parameters of a create request.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Handshake {
    mode: ProtocolMode,
    initial_sequence: u64,
    ping_enabled: bool,
    protocols: Vec<String>,
    extensions: Vec<String>,
}

fn validate(state: &GatewayState, request: &Request) -> GatewayResult<Handshake> {
    let headers = request.headers();
    let mode = ProtocolMode::from_version(header_str(headers, WEBSOCKET_VERSION)?)?;

    if mode == ProtocolMode::Legacy && state.config().require_compliant {
        return Err(GatewayError::BadRequest(format!(
            "missing {WEBSOCKET_VERSION} header"
        )));
    }

    let method = request.method();
    let method_ok =
        *method == Method::POST || (*method == Method::GET && mode == ProtocolMode::Legacy);
    if !method_ok {
        return Err(GatewayError::BadRequest(format!(
            "create does not accept {method}"
        )));
    }

    let declared = sequence_no(headers)?;
    let initial_sequence = match (declared, mode.validates_sequence()) {
        (Some(n), _) => n,
        (None, false) => 0,
        (None, true) => {
            return Err(ProtoError::MissingHeader(SEQUENCE_NO).into());
        }
    };

    let ping_enabled = parse_accept_commands(header_str(headers, ACCEPT_COMMANDS)?)?;
    let protocols = split_list(header_values(headers, WEBSOCKET_PROTOCOL));
    let extensions = split_list(header_values(headers, WEBSOCKET_EXTENSIONS));

    Ok(Handshake {
        mode,
        initial_sequence,
        ping_enabled,
        protocols,
        extensions,
    })
}

/// Body of a successful create: the upstream URL, then the downstream URL
/// unless it is the same.
pub(crate) fn create_body(upstream: &str, downstream: &str) -> String {
    if upstream == downstream {
        format!("{upstream}\n")
    } else {
        format!("{upstream}\n{downstream}\n")
    }
}

/// Handle a create request.
pub async fn handle(
    state: &GatewayState,
    path: &EndpointPath,
    request: Request,
) -> GatewayResult<Response> {
    let service = state
        .registry()
        .service(&path.base)
        .ok_or_else(|| GatewayError::NotFound(path.to_string()))?;

    let handshake = validate(state, &request)?;
    let host = authority(request.headers(), request.uri())
        .unwrap_or_else(|| state.config().bind_addr.to_string());

    let subprotocol = service.select_protocol(&handshake.protocols);
    let extensions = state.extensions().negotiate(&handshake.extensions);

    let options = SessionOptions::new(handshake.mode, state.config().session.clone())
        .with_transport(path.transport)
        .with_initial_sequence(handshake.initial_sequence)
        .with_ping(handshake.ping_enabled)
        .with_subprotocol(subprotocol.clone())
        .with_extensions(extensions.clone());
    let (handle, connection) = EmulatedSession::spawn(options, state.tracker().clone());
    let id = handle.id().clone();

    state.registry().bind(path, handle);
    service.acceptor.accept(connection);

    let scheme = &state.config().public_scheme;
    let upstream = format!("{scheme}://{host}{}", path.upstream(id.as_str()));
    let downstream = format!("{scheme}://{host}{}", path.downstream(id.as_str()));

    info!(
        session_id = %id,
        service = %path.base,
        mode = ?handshake.mode,
        subprotocol = subprotocol.as_deref().unwrap_or(""),
        "Session created"
    );

    let mut builder = Response::builder()
        .status(StatusCode::CREATED)
        .header(header::CONTENT_TYPE, TEXT_PLAIN)
        .header(header::CACHE_CONTROL, "no-cache");
    if let Some(protocol) = &subprotocol {
        builder = builder.header(WEBSOCKET_PROTOCOL, header_value(protocol)?);
    }
    if !extensions.is_empty() {
        builder = builder.header(WEBSOCKET_EXTENSIONS, header_value(&extensions.join(", "))?);
    }
    if handshake.ping_enabled {
        builder = builder.header(ACCEPT_COMMANDS, ACCEPT_PING);
    }

    builder
        .body(Body::from(create_body(&upstream, &downstream)))
        .map_err(|e| GatewayError::Internal(e.to_string()))
}

fn header_value(value: &str) -> GatewayResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| GatewayError::Internal(e.to_string()))
}
