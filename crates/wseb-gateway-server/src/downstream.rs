//! Downstream carriers: server to client.
//!
//! Each request offers itself to the session as writer. Streaming carriers
//! return their response at once and the body follows the session's writes;
//! long-polling carriers collect everything the session writes until it lets
//! go of them, so the response carries a content length and the connection is
//! not reused.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::Response;
use bytes::BytesMut;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};
use wseb_proto::headers::{content_type_padding, CONTENT_TYPE_PADDING, IDLE_TIMEOUT};
use wseb_proto::text::TEXT_PLAIN_UTF8;
use wseb_proto::{DownstreamParams, EndpointPath, TransportKind};
use wseb_session::{BodyEncoding, DownstreamAttachment, PollingMode, WriterParams};

use crate::error::{GatewayError, GatewayResult};
use crate::request::{sequence_no, violation};
use crate::state::GatewayState;

const OCTET_STREAM: &str = "application/octet-stream";

/// Polling mode for a carrier: streaming unless the gateway forbids it or
/// the client refused the secure redirect.
pub(crate) fn polling_mode(state: &GatewayState, params: &DownstreamParams) -> PollingMode {
    if state.config().allow_streaming && !params.same_scheme_only {
        PollingMode::Streaming
    } else {
        PollingMode::LongPolling
    }
}

/// Location of the secure endpoint, when this carrier must move there.
fn secure_redirect(
    state: &GatewayState,
    params: &DownstreamParams,
    request: &Request,
) -> Option<String> {
    let authority = state.config().secure_redirect_authority.as_deref()?;
    if state.config().public_scheme == "https" || params.same_scheme_only {
        return None;
    }
    let path_and_query = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path().to_string(), ToString::to_string);
    Some(format!("https://{authority}{path_and_query}"))
}

fn header_name(name: &str) -> GatewayResult<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| GatewayError::Internal(e.to_string()))
}

fn response_headers(
    state: &GatewayState,
    params: &DownstreamParams,
    writer: &WriterParams,
    idle_timeout_secs: u64,
) -> GatewayResult<Vec<(HeaderName, HeaderValue)>> {
    let content_type = params
        .content_type
        .clone()
        .unwrap_or_else(|| match writer.transport {
            TransportKind::Text => TEXT_PLAIN_UTF8.to_string(),
            TransportKind::Binary => OCTET_STREAM.to_string(),
        });
    let cache_control = params
        .cache_control
        .clone()
        .unwrap_or_else(|| state.config().cache_control.clone());

    let value = |v: &str| {
        HeaderValue::from_str(v)
            .map_err(|_| GatewayError::BadRequest(format!("invalid header value {v:?}")))
    };

    let mut headers = vec![
        (header::CONTENT_TYPE, value(&content_type)?),
        (header::CACHE_CONTROL, value(&cache_control)?),
        (header_name(IDLE_TIMEOUT)?, HeaderValue::from(idle_timeout_secs)),
        (
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ),
    ];
    if params.nosniff_padding {
        headers.push((
            header_name(CONTENT_TYPE_PADDING)?,
            value(&content_type_padding())?,
        ));
    }
    if writer.encoding == BodyEncoding::Gzip {
        headers.push((header::CONTENT_ENCODING, HeaderValue::from_static("gzip")));
    }
    if writer.is_long_polling() {
        headers.push((header::CONNECTION, HeaderValue::from_static("close")));
    }
    Ok(headers)
}

async fn collect(mut attachment: DownstreamAttachment) -> Body {
    let mut buf = BytesMut::new();
    while let Some(chunk) = attachment.body.recv().await {
        buf.extend_from_slice(&chunk);
    }
    Body::from(buf.freeze())
}

fn stream(attachment: DownstreamAttachment) -> Body {
    Body::from_stream(ReceiverStream::new(attachment.body).map(Ok::<_, Infallible>))
}

/// Handle a downstream request.
pub async fn handle(
    state: &GatewayState,
    path: &EndpointPath,
    request: Request,
) -> GatewayResult<Response> {
    let session = state
        .registry()
        .lookup(path)
        .ok_or_else(|| GatewayError::NotFound(path.to_string()))?;

    if !matches!(*request.method(), Method::GET | Method::POST) {
        return Err(GatewayError::BadRequest(format!(
            "downstream does not accept {}",
            request.method()
        )));
    }

    let params = DownstreamParams::from_query(request.uri().query())?;
    if let Some(location) = secure_redirect(state, &params, &request) {
        debug!(session_id = %session.id(), %location, "Redirecting downstream to secure endpoint");
        return Err(GatewayError::Redirect(location));
    }

    let declared = match sequence_no(request.headers()) {
        Ok(declared) => declared,
        Err(err) => return Err(violation(&session, &err.to_string())),
    };
    let polling = polling_mode(state, &params);
    let writer = WriterParams::from_query(&params, polling, session.info().transport);
    let headers = response_headers(
        state,
        &params,
        &writer,
        session.info().client_idle_timeout.as_secs(),
    )?;

    let attachment = session.attach_writer(writer.clone(), declared).await?;
    info!(
        session_id = %session.id(),
        carrier = %attachment.id,
        polling = ?writer.polling,
        state = ?attachment.state,
        "Downstream request accepted"
    );

    let body = if writer.is_long_polling() {
        collect(attachment).await
    } else {
        stream(attachment)
    };

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().extend(headers);
    Ok(response)
}
