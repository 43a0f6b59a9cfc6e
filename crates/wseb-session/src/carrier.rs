//! Downstream carriers and the exclusive writer slot.

use std::io::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use wseb_proto::text::encode_utf8_text;
use wseb_proto::{Command, DownstreamParams, TransportKind};

use crate::error::{SessionError, SessionResult};
use crate::id::CarrierId;
use crate::padding::{Padding, PaddingState};

/// How a downstream carrier delivers data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingMode {
    /// One response stays open and carries many deliveries.
    Streaming,
    /// The response completes after each delivery; the client re-polls.
    LongPolling,
}

/// Content encoding applied to a downstream body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyEncoding {
    /// Bytes as framed.
    #[default]
    Identity,
    /// gzip with a sync flush after every write.
    Gzip,
}

/// Delivery parameters of one downstream carrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterParams {
    /// Streaming or long-polling.
    pub polling: PollingMode,
    /// Bytes after which the session forces a reconnect.
    pub client_buffer: Option<u64>,
    /// Filler policy.
    pub padding: Padding,
    /// Delay before the carrier receives data.
    pub flush_delay: Option<Duration>,
    /// Keepalive interval override.
    pub keepalive: Option<Duration>,
    /// Body encoding.
    pub encoding: BodyEncoding,
    /// Whether frames go through the UTF-8 text transport.
    pub transport: TransportKind,
}

impl WriterParams {
    /// Streaming binary delivery with no padding.
    #[must_use]
    pub const fn streaming() -> Self {
        Self {
            polling: PollingMode::Streaming,
            client_buffer: None,
            padding: Padding::None,
            flush_delay: None,
            keepalive: None,
            encoding: BodyEncoding::Identity,
            transport: TransportKind::Binary,
        }
    }

    /// Long-polling binary delivery: the buffer threshold is zero.
    #[must_use]
    pub const fn long_polling() -> Self {
        Self {
            polling: PollingMode::LongPolling,
            client_buffer: Some(0),
            ..Self::streaming()
        }
    }

    /// Derive parameters from downstream query parameters.
    ///
    /// A zero `.kb` selects long-polling regardless of `polling`.
    #[must_use]
    pub fn from_query(
        params: &DownstreamParams,
        polling: PollingMode,
        transport: TransportKind,
    ) -> Self {
        let polling = if params.requests_long_polling() {
            PollingMode::LongPolling
        } else {
            polling
        };
        let client_buffer = match polling {
            PollingMode::LongPolling => Some(0),
            PollingMode::Streaming => params.client_buffer,
        };
        let (padding, encoding) = match (params.block_padding, params.padding) {
            (Some(size), _) if size > 0 => (Padding::Block { size }, BodyEncoding::Gzip),
            (_, Some(target)) if target > 0 => (Padding::Shortfall { target }, BodyEncoding::Identity),
            _ => (Padding::None, BodyEncoding::Identity),
        };
        Self {
            polling,
            client_buffer,
            padding,
            flush_delay: params.flush_delay.filter(|d| !d.is_zero()),
            keepalive: params.keepalive.filter(|d| !d.is_zero()),
            encoding,
            transport,
        }
    }

    /// Set the client buffer threshold.
    #[must_use]
    pub const fn with_client_buffer(mut self, bytes: u64) -> Self {
        self.client_buffer = Some(bytes);
        self
    }

    /// Set the padding policy.
    #[must_use]
    pub const fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    /// Set the flush delay.
    #[must_use]
    pub const fn with_flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay = Some(delay);
        self
    }

    /// Set the keepalive interval.
    #[must_use]
    pub const fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = Some(interval);
        self
    }

    /// Set the body encoding.
    #[must_use]
    pub const fn with_encoding(mut self, encoding: BodyEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the transport kind.
    #[must_use]
    pub const fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Whether this carrier long-polls.
    #[must_use]
    pub fn is_long_polling(&self) -> bool {
        self.polling == PollingMode::LongPolling
    }
}

impl Default for WriterParams {
    fn default() -> Self {
        Self::streaming()
    }
}

/// Applies the text transport and content encoding to frame bytes.
struct BodyEncoder {
    text: bool,
    gzip: Option<GzEncoder<Vec<u8>>>,
}

impl BodyEncoder {
    fn new(params: &WriterParams) -> Self {
        let gzip = (params.encoding == BodyEncoding::Gzip)
            .then(|| GzEncoder::new(Vec::new(), Compression::fast()));
        Self {
            text: params.transport == TransportKind::Text,
            gzip,
        }
    }

    fn encode(&mut self, frame: &[u8]) -> SessionResult<Bytes> {
        let bytes = if self.text {
            encode_utf8_text(frame)
        } else {
            Bytes::copy_from_slice(frame)
        };
        let Some(gzip) = self.gzip.as_mut() else {
            return Ok(bytes);
        };
        gzip.write_all(&bytes)
            .and_then(|()| gzip.flush())
            .map_err(|e| SessionError::network(format!("gzip: {e}")))?;
        Ok(Bytes::from(std::mem::take(gzip.get_mut())))
    }

    fn finish(&mut self, tail: &[u8]) -> Bytes {
        let mut out = BytesMut::new();
        match self.encode(tail) {
            Ok(bytes) => out.extend_from_slice(&bytes),
            Err(e) => debug!(error = %e, "Failed to encode final frame"),
        }
        if let Some(gzip) = self.gzip.as_mut() {
            if gzip.try_finish().is_ok() {
                out.extend_from_slice(gzip.get_ref());
                gzip.get_mut().clear();
            }
        }
        out.freeze()
    }
}

/// Why a write did not reach the carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteError {
    /// The carrier's buffer is full; retry once it drains.
    Full,
    /// The carrier is gone.
    Closed,
}

/// A downstream carrier held by the session.
pub(crate) struct WriterCarrier {
    id: CarrierId,
    sink: mpsc::Sender<Bytes>,
    encoder: BodyEncoder,
    params: WriterParams,
    padding: PaddingState,
    bytes_written: u64,
    keepalive_mark: u64,
    ready: bool,
    // Dropping this stops the carrier's close watcher.
    _release: oneshot::Sender<()>,
}

impl WriterCarrier {
    pub(crate) fn new(
        id: CarrierId,
        sink: mpsc::Sender<Bytes>,
        params: WriterParams,
        release: oneshot::Sender<()>,
    ) -> Self {
        Self {
            id,
            sink,
            encoder: BodyEncoder::new(&params),
            padding: PaddingState::new(params.padding),
            params,
            bytes_written: 0,
            keepalive_mark: 0,
            ready: true,
            _release: release,
        }
    }

    pub(crate) const fn id(&self) -> CarrierId {
        self.id
    }

    pub(crate) const fn params(&self) -> &WriterParams {
        &self.params
    }

    pub(crate) const fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub(crate) const fn is_ready(&self) -> bool {
        self.ready
    }

    pub(crate) fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub(crate) fn sink(&self) -> &mpsc::Sender<Bytes> {
        &self.sink
    }

    /// Whether the client buffer threshold has been reached.
    pub(crate) fn buffer_exhausted(&self) -> bool {
        self.params
            .client_buffer
            .is_some_and(|threshold| self.bytes_written >= threshold)
    }

    /// Write one frame without waiting.
    pub(crate) fn try_write(&mut self, frame: &[u8]) -> Result<(), WriteError> {
        let permit = self.sink.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => WriteError::Full,
            mpsc::error::TrySendError::Closed(()) => WriteError::Closed,
        })?;
        let bytes = self.encoder.encode(frame).map_err(|_| WriteError::Closed)?;
        permit.send(bytes);
        self.bytes_written += frame.len() as u64;
        Ok(())
    }

    /// Write a command, ignoring failures.
    pub(crate) fn write_command(&mut self, command: Command) -> bool {
        let mut buf = BytesMut::with_capacity(command.encoded_len());
        command.encode(&mut buf);
        self.try_write(&buf).is_ok()
    }

    /// Write a NOOP when nothing was written since the previous keepalive.
    pub(crate) fn keepalive(&mut self) {
        if self.bytes_written == self.keepalive_mark && !self.write_command(Command::Noop) {
            debug!(carrier = %self.id, "Keepalive NOOP not written");
        }
        self.keepalive_mark = self.bytes_written;
    }

    /// Write any filler due after an idle drain pass.
    pub(crate) fn pad(&mut self) {
        let Some(filler) = self.padding.filler(self.bytes_written) else {
            return;
        };
        if self.try_write(&filler).is_err() {
            debug!(carrier = %self.id, "Padding not written");
        }
        self.padding.mark(self.bytes_written);
    }

    /// End the carrier, optionally writing a final command first.
    ///
    /// The body ends once the last chunk is delivered and every sender is
    /// dropped.
    pub(crate) fn finish(mut self, command: Option<Command>) {
        let mut tail = BytesMut::new();
        if let Some(command) = command {
            command.encode(&mut tail);
        }
        let bytes = self.encoder.finish(&tail);
        if bytes.is_empty() {
            return;
        }
        match self.sink.try_send(bytes) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(bytes)) => {
                let sink = self.sink.clone();
                tokio::spawn(async move {
                    let _ = sink.send(bytes).await;
                });
            }
        }
    }
}

impl std::fmt::Debug for WriterCarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterCarrier")
            .field("id", &self.id)
            .field("params", &self.params)
            .field("bytes_written", &self.bytes_written)
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}

/// Identity of the attached writer, swapped with compare-and-set.
///
/// The session actor is the only writer; handles read it without a round
/// trip. A detach only succeeds for the carrier that is actually attached.
#[derive(Debug, Default)]
pub struct WriterSlot(AtomicU64);

impl WriterSlot {
    /// Create an empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// The attached writer, if any.
    #[must_use]
    pub fn current(&self) -> Option<CarrierId> {
        CarrierId::from_raw(self.0.load(Ordering::Acquire))
    }

    /// Attach `id` if the slot is empty.
    pub fn install(&self, id: CarrierId) -> bool {
        self.0
            .compare_exchange(0, id.get(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Detach `id` if it is the attached writer.
    pub fn release(&self, id: CarrierId) -> bool {
        self.0
            .compare_exchange(id.get(), 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read as _;

    use flate2::read::GzDecoder;

    use super::*;

    fn carrier(params: WriterParams, capacity: usize) -> (WriterCarrier, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (release, _) = oneshot::channel();
        (WriterCarrier::new(CarrierId::next(), tx, params, release), rx)
    }

    // ==================== WriterParams Tests ====================

    #[test]
    fn test_params_zero_buffer_forces_long_polling() {
        let query = DownstreamParams::from_query(Some(".kb=0")).unwrap();
        let params = WriterParams::from_query(&query, PollingMode::Streaming, TransportKind::Binary);
        assert_eq!(params.polling, PollingMode::LongPolling);
        assert_eq!(params.client_buffer, Some(0));
    }

    #[test]
    fn test_params_long_polling_threshold_is_zero() {
        let query = DownstreamParams::from_query(Some(".kb=64")).unwrap();
        let params =
            WriterParams::from_query(&query, PollingMode::LongPolling, TransportKind::Binary);
        assert_eq!(params.client_buffer, Some(0));
    }

    #[test]
    fn test_params_block_padding_implies_gzip() {
        let query = DownstreamParams::from_query(Some(".kbp=512&.kp=10")).unwrap();
        let params = WriterParams::from_query(&query, PollingMode::Streaming, TransportKind::Binary);
        assert_eq!(params.padding, Padding::Block { size: 512 });
        assert_eq!(params.encoding, BodyEncoding::Gzip);
    }

    #[test]
    fn test_params_streaming_buffer() {
        let query = DownstreamParams::from_query(Some(".kb=2&.kp=10")).unwrap();
        let params = WriterParams::from_query(&query, PollingMode::Streaming, TransportKind::Text);
        assert_eq!(params.client_buffer, Some(2048));
        assert_eq!(params.padding, Padding::Shortfall { target: 10 });
        assert_eq!(params.transport, TransportKind::Text);
    }

    // ==================== WriterCarrier Tests ====================

    #[test]
    fn test_write_counts_bytes_and_threshold() {
        let (mut carrier, mut rx) = carrier(WriterParams::streaming().with_client_buffer(4), 4);
        carrier.try_write(b"abc").unwrap();
        assert!(!carrier.buffer_exhausted());
        carrier.try_write(b"d").unwrap();
        assert!(carrier.buffer_exhausted());
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"abc"));
    }

    #[test]
    fn test_write_full_and_closed() {
        let (mut carrier, rx) = carrier(WriterParams::streaming(), 1);
        carrier.try_write(b"a").unwrap();
        assert_eq!(carrier.try_write(b"b"), Err(WriteError::Full));
        drop(rx);
        assert_eq!(carrier.try_write(b"c"), Err(WriteError::Closed));
        assert_eq!(carrier.bytes_written(), 1);
    }

    #[test]
    fn test_text_transport_encoding() {
        let params = WriterParams::streaming().with_transport(TransportKind::Text);
        let (mut carrier, mut rx) = carrier(params, 4);
        carrier.write_command(Command::Ping);
        assert_eq!(&rx.try_recv().unwrap()[..], &[0xC2, 0x89, 0x00]);
    }

    #[test]
    fn test_keepalive_only_when_idle() {
        let (mut carrier, mut rx) = carrier(WriterParams::streaming(), 8);
        carrier.keepalive();
        assert_eq!(&rx.try_recv().unwrap()[..], b"\x0100\xFF");

        carrier.try_write(b"data").unwrap();
        carrier.keepalive();
        rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_finish_writes_reconnect() {
        let (carrier, mut rx) = carrier(WriterParams::streaming(), 4);
        carrier.finish(Some(Command::Reconnect));
        assert_eq!(&rx.try_recv().unwrap()[..], b"\x0101\xFF");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_gzip_stream_decodes() {
        let params = WriterParams::streaming().with_encoding(BodyEncoding::Gzip);
        let (mut carrier, mut rx) = carrier(params, 8);
        carrier.try_write(b"\x80\x02hi").unwrap();
        carrier.finish(Some(Command::Reconnect));

        let mut body = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            body.extend_from_slice(&chunk);
        }
        let mut decoded = Vec::new();
        GzDecoder::new(&body[..]).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, b"\x80\x02hi\x0101\xFF");
    }

    // ==================== WriterSlot Tests ====================

    #[test]
    fn test_slot_compare_and_set() {
        let slot = WriterSlot::new();
        let a = CarrierId::next();
        let b = CarrierId::next();

        assert!(slot.install(a));
        assert!(!slot.install(b));
        assert!(!slot.release(b));
        assert_eq!(slot.current(), Some(a));
        assert!(slot.release(a));
        assert_eq!(slot.current(), None);
    }
}
