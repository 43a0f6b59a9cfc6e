//! Application-facing ends of a session.

use tokio::sync::mpsc;
use wseb_proto::{Command, Message};

use crate::error::{SessionError, SessionResult};
use crate::id::{CarrierId, SessionId};
use crate::session::{InboundSender, SessionEvent, SessionHandle, SessionInfo, Termination};

/// The application's view of an emulated session: a full-duplex message
/// channel that survives carrier swaps.
#[derive(Debug)]
pub struct WsebConnection {
    sender: ConnectionSender,
    receiver: ConnectionReceiver,
}

impl WsebConnection {
    pub(crate) fn new(
        handle: SessionHandle,
        outbound: mpsc::Sender<Message>,
        inbound: mpsc::Receiver<SessionResult<Message>>,
    ) -> Self {
        Self {
            sender: ConnectionSender { outbound, handle },
            receiver: ConnectionReceiver { inbound },
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        self.sender.handle.id()
    }

    /// Negotiated session facts.
    #[must_use]
    pub fn info(&self) -> &SessionInfo {
        self.sender.handle.info()
    }

    /// Send a message to the client. Waits while the outbound queue is above
    /// its high-water mark.
    ///
    /// # Errors
    ///
    /// Returns `Closed` once the session is closing or has ended.
    pub async fn send(&self, message: impl Into<Message>) -> SessionResult<()> {
        self.sender.send(message).await
    }

    /// Receive the next client message. `None` after a clean close; an error
    /// item when the session was reset or timed out.
    pub async fn recv(&mut self) -> Option<SessionResult<Message>> {
        self.receiver.recv().await
    }

    /// Start the close handshake.
    pub fn close(&self) {
        self.sender.close();
    }

    /// Wait for the session to end.
    pub async fn closed(&self) -> Termination {
        self.sender.handle.terminated().await
    }

    /// Split into independently owned halves.
    #[must_use]
    pub fn split(self) -> (ConnectionSender, ConnectionReceiver) {
        (self.sender, self.receiver)
    }
}

/// Sending half of a [`WsebConnection`].
#[derive(Debug, Clone)]
pub struct ConnectionSender {
    outbound: mpsc::Sender<Message>,
    handle: SessionHandle,
}

impl ConnectionSender {
    /// Send a message to the client.
    ///
    /// # Errors
    ///
    /// Returns `Closed` once the session is closing or has ended.
    pub async fn send(&self, message: impl Into<Message>) -> SessionResult<()> {
        let snapshot = self.handle.snapshot();
        if snapshot.termination.is_some() || snapshot.close.is_closing() {
            return Err(SessionError::Closed);
        }
        self.outbound
            .send(message.into())
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Start the close handshake.
    pub fn close(&self) {
        self.handle.close();
    }

    /// Wait for the session to end.
    pub async fn closed(&self) -> Termination {
        self.handle.terminated().await
    }
}

/// Receiving half of a [`WsebConnection`].
#[derive(Debug)]
pub struct ConnectionReceiver {
    inbound: mpsc::Receiver<SessionResult<Message>>,
}

impl ConnectionReceiver {
    /// Receive the next client message.
    pub async fn recv(&mut self) -> Option<SessionResult<Message>> {
        self.inbound.recv().await
    }
}

/// An attached upstream carrier.
///
/// Messages go straight into the application's inbound channel; commands
/// go through the session. Dropping the guard without [`Self::finish`]
/// detaches the reader as a network loss.
#[derive(Debug)]
pub struct ReaderGuard {
    id: CarrierId,
    inbound: InboundSender,
    handle: SessionHandle,
    finished: bool,
}

impl ReaderGuard {
    pub(crate) const fn new(id: CarrierId, inbound: InboundSender, handle: SessionHandle) -> Self {
        Self {
            id,
            inbound,
            handle,
            finished: false,
        }
    }

    /// Carrier id.
    #[must_use]
    pub const fn id(&self) -> CarrierId {
        self.id
    }

    /// The session this reader feeds.
    #[must_use]
    pub const fn session(&self) -> &SessionHandle {
        &self.handle
    }

    /// Deliver a message to the application, waiting for room.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the application is gone.
    pub async fn deliver(&self, message: Message) -> SessionResult<()> {
        self.handle.touch();
        self.inbound
            .send(Ok(message))
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Forward a command received on this carrier.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the session has ended.
    pub fn command(&self, command: Command) -> SessionResult<()> {
        self.handle.touch();
        self.handle.post(SessionEvent::ReaderCommand(self.id, command))
    }

    /// Detach with the carrier's outcome.
    pub fn finish(mut self, result: SessionResult<()>) {
        self.finished = true;
        let _ = self.handle.post(SessionEvent::ReaderDetached {
            id: self.id,
            result,
        });
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.handle.post(SessionEvent::ReaderDetached {
                id: self.id,
                result: Err(SessionError::network("upstream carrier dropped")),
            });
        }
    }
}
