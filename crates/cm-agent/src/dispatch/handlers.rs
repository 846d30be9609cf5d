//! Handlers for the controller-to-agent message kinds

use std::num::NonZeroU64;
use std::path::PathBuf;

use async_trait::async_trait;

use cm_protocol::{ControlMessage, ProtocolError, TerminalSize};

use super::{DispatchContext, Handler};
use crate::error::EngineError;
use crate::transfer::Transfer;

fn misrouted(handler: &str, message: &ControlMessage) -> EngineError {
    ProtocolError::MalformedFrame {
        reason: format!("{} handler received {}", handler, message.kind()),
        preview: String::new(),
    }
    .into()
}

/// `file`: the controller announces an incoming binary span
pub struct FileAnnounceHandler;

#[async_trait]
impl Handler for FileAnnounceHandler {
    async fn handle(
        &self,
        message: ControlMessage,
        ctx: &mut DispatchContext<'_>,
    ) -> Result<(), EngineError> {
        let (file_path, file_size) = match message {
            ControlMessage::File {
                file_path,
                file_size,
            } => (file_path, file_size),
            other => return Err(misrouted("file", &other)),
        };

        let target = file_path.map(PathBuf::from).ok_or_else(|| {
            ProtocolError::MalformedFrame {
                reason: "file announcement without filePath".to_string(),
                preview: String::new(),
            }
        })?;

        let Some(size) = NonZeroU64::new(file_size) else {
            tracing::info!("Ignoring empty file announcement for {:?}", target);
            return Ok(());
        };

        let sink = ctx
            .storage
            .open_sink(&target)
            .await
            .map_err(|source| EngineError::SinkWrite {
                path: target.clone(),
                source,
            })?;

        tracing::info!("Receiving {} bytes into {:?}", size, target);
        ctx.session.begin_transfer(Transfer::new(target, size, sink))?;
        ctx.outbound.send(ControlMessage::FileWait).await
    }
}

/// `fileReceiveEnd`: the controller acknowledges a span the agent sent
pub struct FileReceiveEndHandler;

#[async_trait]
impl Handler for FileReceiveEndHandler {
    async fn handle(
        &self,
        _message: ControlMessage,
        _ctx: &mut DispatchContext<'_>,
    ) -> Result<(), EngineError> {
        tracing::debug!("Controller acknowledged file");
        Ok(())
    }
}

/// `launchModel`: run a script on a pty
pub struct LaunchModelHandler;

#[async_trait]
impl Handler for LaunchModelHandler {
    async fn handle(
        &self,
        message: ControlMessage,
        ctx: &mut DispatchContext<'_>,
    ) -> Result<(), EngineError> {
        let script_path = match message {
            ControlMessage::LaunchModel { script_path } => script_path,
            other => return Err(misrouted("launchModel", &other)),
        };

        tracing::info!("Launching {}", script_path);
        ctx.terminal.launch(&script_path, ctx.outbound).await
    }
}

/// `terminalResize`: forward new geometry to the running process
pub struct TerminalResizeHandler;

#[async_trait]
impl Handler for TerminalResizeHandler {
    async fn handle(
        &self,
        message: ControlMessage,
        ctx: &mut DispatchContext<'_>,
    ) -> Result<(), EngineError> {
        let (cols, rows) = match message {
            ControlMessage::TerminalResize { cols, rows } => (cols, rows),
            other => return Err(misrouted("terminalResize", &other)),
        };

        if let Err(e) = ctx.terminal.resize(TerminalSize::new(rows, cols)) {
            tracing::warn!("Failed to resize terminal to {}x{}: {}", cols, rows, e);
        }
        Ok(())
    }
}

/// `requestFile`: announce a local file to the controller
pub struct RequestFileHandler;

#[async_trait]
impl Handler for RequestFileHandler {
    async fn handle(
        &self,
        message: ControlMessage,
        ctx: &mut DispatchContext<'_>,
    ) -> Result<(), EngineError> {
        let file_path = match message {
            ControlMessage::RequestFile { file_path } => file_path,
            other => return Err(misrouted("requestFile", &other)),
        };
        let path = PathBuf::from(file_path);

        let source = ctx
            .storage
            .open_source(&path)
            .await
            .map_err(|source| EngineError::SourceRead {
                path: path.clone(),
                source,
            })?;

        let size = match source {
            None => {
                tracing::warn!("Requested {:?} is not a readable file, reporting size 0", path);
                0
            }
            Some(source) if source.size == 0 => 0,
            Some(source) => {
                let size = source.size;
                if let Some(previous) = ctx.session.stage_source(source) {
                    tracing::warn!("Replacing unsent staged file {:?}", previous.path);
                }
                size
            }
        };

        tracing::info!("Announcing {:?} ({} bytes)", path, size);
        ctx.outbound.send(ControlMessage::outgoing_file(size)).await
    }
}

/// `waitReceive`: the controller is ready for the staged file
pub struct WaitReceiveHandler;

#[async_trait]
impl Handler for WaitReceiveHandler {
    async fn handle(
        &self,
        _message: ControlMessage,
        ctx: &mut DispatchContext<'_>,
    ) -> Result<(), EngineError> {
        match ctx.session.take_staged_source() {
            Some(source) => {
                tracing::debug!("Streaming {:?}", source.path);
                ctx.outbound.send_payload(source).await
            }
            None => {
                tracing::warn!("Ignoring waitReceive: no file is staged");
                Ok(())
            }
        }
    }
}
