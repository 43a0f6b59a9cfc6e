//! Upstream carriers: client to server.
//!
//! Each POST attaches as the session's reader, decodes its body into frames
//! and forwards them: messages to the application, commands to the session.
//! Request-level violations reset the session before any body is read; a body
//! that fails to decode resets it as lost connectivity.

use axum::extract::Request;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::BytesMut;
use futures::StreamExt;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};
use wseb_proto::text::is_utf8_text_plain;
use wseb_proto::{Command, EndpointPath, Frame, FrameDecoder, TransportKind, Utf8TextDecoder};
use wseb_session::{ReaderGuard, SessionError, SessionHandle, SessionResult};

use crate::error::{GatewayError, GatewayResult};
use crate::request::{header_str, sequence_no, violation};
use crate::state::GatewayState;

/// How an upstream body ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyEnd {
    /// The body was fully read.
    Drained,
    /// The client sent CLOSE.
    Close,
    /// The client sent RECONNECT and will open a new upstream.
    Reconnect,
}

/// Check the request line and headers. Returns whether the body goes through
/// the UTF-8 text transport.
fn check_request(session: &SessionHandle, request: &Request) -> GatewayResult<bool> {
    if request.method() != Method::POST {
        return Err(violation(
            session,
            &format!("upstream does not accept {}", request.method()),
        ));
    }

    let content_length = header_str(request.headers(), header::CONTENT_LENGTH.as_str())
        .map_err(|_| violation(session, "invalid content length"))?;
    if content_length.is_some_and(|v| v.trim() == "0") {
        return Err(violation(session, "content length must not be zero"));
    }

    let content_type = header_str(request.headers(), header::CONTENT_TYPE.as_str())
        .map_err(|_| violation(session, "invalid content type"))?;
    let info = session.info();
    if content_type.is_none() && info.mode.requires_content_type() {
        return Err(violation(session, "content type is required"));
    }

    Ok(info.transport == TransportKind::Text && content_type.is_some_and(is_utf8_text_plain))
}

async fn forward(
    reader: &ReaderGuard,
    decoder: &mut FrameDecoder,
    buf: &mut BytesMut,
) -> SessionResult<Option<BodyEnd>> {
    while let Some(frame) = decoder.decode(buf)? {
        match frame {
            Frame::Message(message) => reader.deliver(message).await?,
            Frame::Command(Command::Close) => {
                reader.command(Command::Close)?;
                return Ok(Some(BodyEnd::Close));
            }
            Frame::Command(Command::Reconnect) => return Ok(Some(BodyEnd::Reconnect)),
            Frame::Command(command) => reader.command(command)?,
        }
    }
    Ok(None)
}

async fn read_body(
    reader: &ReaderGuard,
    request: Request,
    text: bool,
    max_frame_size: usize,
) -> SessionResult<BodyEnd> {
    let mut decoder = FrameDecoder::with_max_frame_size(max_frame_size);
    let mut text_decoder = text.then(Utf8TextDecoder::new);
    let mut buf = BytesMut::new();
    let mut body = request.into_body().into_data_stream();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| SessionError::network(e.to_string()))?;
        match text_decoder.as_mut() {
            Some(text) => text.decode(&chunk, &mut buf)?,
            None => buf.extend_from_slice(&chunk),
        }
        if let Some(end) = forward(reader, &mut decoder, &mut buf).await? {
            return Ok(end);
        }
    }

    if !buf.is_empty() || text_decoder.as_ref().is_some_and(Utf8TextDecoder::has_partial) {
        return Err(SessionError::network("upstream body ends inside a frame"));
    }
    Ok(BodyEnd::Drained)
}

/// Handle an upstream request.
pub async fn handle(
    state: &GatewayState,
    path: &EndpointPath,
    request: Request,
) -> GatewayResult<Response> {
    let session = state
        .registry()
        .lookup(path)
        .ok_or_else(|| GatewayError::NotFound(path.to_string()))?;

    let text = check_request(&session, &request)?;
    let declared = match sequence_no(request.headers()) {
        Ok(declared) => declared,
        Err(err) => {
            return Err(violation(&session, &err.to_string()));
        }
    };

    let reader = session.attach_reader(declared).await?;
    let carrier = reader.id();

    match read_body(&reader, request, text, session.info().max_frame_size).await {
        Ok(end) => {
            debug!(session_id = %session.id(), %carrier, ?end, "Upstream request complete");
            reader.finish(Ok(()));
            Ok((StatusCode::OK, [(header::CACHE_CONTROL, "no-cache")]).into_response())
        }
        Err(SessionError::Closed) => {
            reader.finish(Ok(()));
            Err(GatewayError::Session(SessionError::Closed))
        }
        Err(err) => {
            warn!(session_id = %session.id(), %carrier, error = %err, "Upstream request failed");
            reader.finish(Err(err.clone()));
            Err(GatewayError::Session(err))
        }
    }
}
