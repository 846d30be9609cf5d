//! Connection driver
//!
//! Owns the read half of one socket and the session parsed from it. Each
//! chunk read is fed through the session in arrival order: binary bytes go
//! to the active transfer, text bytes are split into frames which are
//! decoded and dispatched one at a time.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf};
use tokio::task::JoinHandle;

use cm_core::{LimitsConfig, TerminalConfig};
use cm_protocol::{decode, next_frame_from, ControlMessage, ProtocolError};

use crate::dispatch::{DispatchContext, Registry};
use crate::error::EngineError;
use crate::outbound::{spawn_writer, Outbound};
use crate::pty::{NativePtyHost, PtyHost};
use crate::session::Session;
use crate::storage::{FsStorage, Storage};
use crate::terminal::TerminalBridge;
use crate::transfer::TransferOutcome;

/// How long the writer may take to drain after the connection closes
const WRITER_GRACE: Duration = Duration::from_secs(5);

/// External services a connection depends on
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn Storage>,
    pub pty: Arc<dyn PtyHost>,
    pub terminal: TerminalConfig,
    pub limits: LimitsConfig,
}

impl Collaborators {
    /// Local file system and native pty
    pub fn native(terminal: TerminalConfig, limits: LimitsConfig) -> Self {
        Self {
            storage: Arc::new(FsStorage::new()),
            pty: Arc::new(NativePtyHost::new()),
            terminal,
            limits,
        }
    }
}

/// One open connection to the controller
pub struct Connection<R> {
    reader: R,
    registry: Arc<Registry>,
    storage: Arc<dyn Storage>,
    limits: LimitsConfig,
    session: Session,
    terminal: TerminalBridge,
    outbound: Outbound,
    writer: JoinHandle<Result<(), EngineError>>,
}

impl<S> Connection<ReadHalf<S>>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Split a duplex stream into a connection
    pub fn from_stream(stream: S, registry: Arc<Registry>, collaborators: Collaborators) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer, registry, collaborators)
    }
}

impl<R> Connection<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Create a connection over separate read and write halves
    pub fn new<W>(
        reader: R,
        writer: W,
        registry: Arc<Registry>,
        collaborators: Collaborators,
    ) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let Collaborators {
            storage,
            pty,
            terminal,
            limits,
        } = collaborators;
        let (outbound, writer) = spawn_writer(writer, limits.outbound_queue);

        Self {
            reader,
            registry,
            storage,
            limits,
            session: Session::new(),
            terminal: TerminalBridge::new(pty, terminal),
            outbound,
            writer,
        }
    }

    /// Handle for sending messages on this connection
    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    /// Parsing state, for inspection
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Ingest one chunk of bytes as read from the socket.
    ///
    /// Returns once every complete frame in the chunk has been dispatched
    /// and every binary byte written to its sink.
    pub async fn feed(&mut self, mut input: Bytes) -> Result<(), EngineError> {
        tracing::trace!("Read {} bytes", input.len());

        loop {
            // Binary bytes go to the active transfer first
            if let Some(transfer) = self.session.transfer_mut() {
                match transfer.feed(input).await? {
                    TransferOutcome::InProgress => return Ok(()),
                    TransferOutcome::Completed {
                        remainder,
                        awaiting_delimiter,
                    } => {
                        if let Some(done) = self.session.complete_transfer(awaiting_delimiter) {
                            tracing::info!(
                                "Received {} bytes into {:?}",
                                done.declared_size(),
                                done.target()
                            );
                        }
                        self.outbound.send(ControlMessage::FileReceiveEnd).await?;

                        // Whatever followed the span is text again
                        input = remainder;
                    }
                }
            }

            match self.read_text(input).await? {
                Some(rest) => input = rest,
                None => return Ok(()),
            }
        }
    }

    /// Dispatch every complete frame in `input`.
    ///
    /// Returns the unread bytes if a frame switched the session to binary.
    async fn read_text(&mut self, input: Bytes) -> Result<Option<Bytes>, EngineError> {
        // The carry never holds a delimiter, so only new bytes need scanning
        let mut scanned = self.session.carry().len();
        let mut buffer = self.session.take_text(input)?;

        while let Some(frame) = next_frame_from(&mut buffer, scanned) {
            scanned = 0;
            if frame.is_empty() {
                tracing::trace!("Skipping empty frame");
                continue;
            }

            let message = decode(&frame)?;
            self.dispatch(message).await?;

            // The rest of the buffer belongs to the new transfer
            if self.session.is_binary() {
                tracing::debug!("Switched to binary with {} bytes pending", buffer.len());
                return Ok(Some(buffer.freeze()));
            }
        }

        // Unterminated tail: keep it unless it can never become a frame
        if buffer.len() > self.limits.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: buffer.len(),
                max: self.limits.max_frame_size,
            }
            .into());
        }

        self.session.restore_carry(buffer);
        Ok(None)
    }

    async fn dispatch(&mut self, message: ControlMessage) -> Result<(), EngineError> {
        let mut ctx = DispatchContext {
            session: &mut self.session,
            outbound: &self.outbound,
            storage: self.storage.as_ref(),
            terminal: &mut self.terminal,
        };
        self.registry.dispatch(message, &mut ctx).await
    }

    /// Read until the peer closes or a fatal fault, then close.
    pub async fn run(mut self) -> Result<(), EngineError> {
        tracing::info!("Connection established");
        let mut buf = BytesMut::with_capacity(self.limits.read_buffer_size);

        let result = loop {
            buf.reserve(self.limits.read_buffer_size);
            match self.reader.read_buf(&mut buf).await {
                Ok(0) => {
                    tracing::info!("Controller closed the connection");
                    break Ok(());
                }
                Ok(_) => {
                    let chunk = buf.split().freeze();
                    if let Err(e) = self.feed(chunk).await {
                        break Err(e);
                    }
                }
                Err(e) => break Err(EngineError::Io(e)),
            }
        };

        if let Err(e) = &result {
            tracing::error!("Connection failed: {}", e);
        }
        let closed = self.close().await;

        match (result, closed) {
            // The writer's own error explains why the channel closed
            (Err(EngineError::OutboundClosed), Err(e)) => Err(e),
            (Err(e), _) => Err(e),
            (Ok(()), closed) => closed,
        }
    }

    /// Release every handle and drain the writer
    pub async fn close(mut self) -> Result<(), EngineError> {
        self.session.close();
        self.terminal.shutdown().await;

        let Self {
            outbound,
            mut writer,
            ..
        } = self;
        drop(outbound);

        match tokio::time::timeout(WRITER_GRACE, &mut writer).await {
            Ok(Ok(result)) => {
                tracing::debug!("Connection closed");
                result
            }
            Ok(Err(e)) => Err(EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                e,
            ))),
            Err(_) => {
                tracing::warn!("Outbound writer did not drain in time, aborting");
                writer.abort();
                Ok(())
            }
        }
    }
}
