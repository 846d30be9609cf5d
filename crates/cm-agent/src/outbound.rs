//! Serialized write side of a connection
//!
//! Exactly one task owns the socket's write half. Everything the agent
//! sends, from handlers and from the terminal bridge alike, goes through an
//! [`Outbound`] handle into that task's queue, so a file payload is never
//! interleaved with a terminal message.

use futures::SinkExt;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;

use cm_protocol::{ControlCodec, ControlMessage, DELIMITER};

use crate::error::EngineError;
use crate::storage::Source;

/// Item queued for the writer task
#[derive(Debug)]
pub enum OutboundItem {
    /// A control message
    Message(ControlMessage),
    /// A previously announced binary span
    Payload(Source),
}

/// Cloneable handle for queuing outbound writes
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<OutboundItem>,
}

impl Outbound {
    /// Queue a control message
    pub async fn send(&self, message: ControlMessage) -> Result<(), EngineError> {
        tracing::trace!("Queuing outbound {}", message.kind());
        self.tx
            .send(OutboundItem::Message(message))
            .await
            .map_err(|_| EngineError::OutboundClosed)
    }

    /// Queue the bytes of an announced source
    pub async fn send_payload(&self, source: Source) -> Result<(), EngineError> {
        self.tx
            .send(OutboundItem::Payload(source))
            .await
            .map_err(|_| EngineError::OutboundClosed)
    }
}

/// Spawn the writer task for `writer`.
///
/// The task ends once every [`Outbound`] handle is dropped and the queue
/// is drained, or at the first write error.
pub fn spawn_writer<W>(
    writer: W,
    capacity: usize,
) -> (Outbound, JoinHandle<Result<(), EngineError>>)
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel(capacity);
    let handle = tokio::spawn(write_loop(writer, rx));
    (Outbound { tx }, handle)
}

async fn write_loop<W>(writer: W, mut rx: mpsc::Receiver<OutboundItem>) -> Result<(), EngineError>
where
    W: AsyncWrite + Unpin,
{
    let mut framed = FramedWrite::new(writer, ControlCodec::new());

    while let Some(item) = rx.recv().await {
        match item {
            OutboundItem::Message(message) => {
                framed.send(message).await?;
            }
            OutboundItem::Payload(source) => {
                // Buffered frames must reach the wire before the raw span
                framed.flush().await?;
                write_payload(framed.get_mut(), source).await?;
            }
        }
    }

    framed.flush().await?;
    framed.get_mut().shutdown().await?;
    tracing::debug!("Outbound writer finished");
    Ok(())
}

/// Copy exactly the announced bytes of `source`, then the delimiter
async fn write_payload<W>(writer: &mut W, source: Source) -> Result<(), EngineError>
where
    W: AsyncWrite + Unpin,
{
    let Source { path, size, reader } = source;
    let mut limited = reader.take(size);

    let copied = tokio::io::copy(&mut limited, writer)
        .await
        .map_err(|source| EngineError::SourceRead {
            path: path.clone(),
            source,
        })?;

    if copied != size {
        return Err(EngineError::SourceTruncated {
            expected: size,
            actual: copied,
        });
    }

    writer.write_all(&[DELIMITER]).await?;
    writer.flush().await?;
    tracing::info!("Sent {} bytes from {:?}", copied, path);
    Ok(())
}
