//! pty host backed by portable-pty

use std::io::Read;

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;

use cm_protocol::TerminalSize;

use super::{PtyControl, PtyEvent, PtyHost, PtyProcess, SpawnRequest, EVENT_QUEUE};
use crate::error::EngineError;

/// Spawns processes on the operating system's native pty
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePtyHost;

impl NativePtyHost {
    /// Create a new native pty host
    pub fn new() -> Self {
        Self
    }
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn spawn_failed(context: &str, e: impl std::fmt::Display) -> EngineError {
    EngineError::SpawnFailed(format!("{}: {}", context, e))
}

impl PtyHost for NativePtyHost {
    fn spawn(&self, request: SpawnRequest) -> Result<PtyProcess, EngineError> {
        tracing::info!(
            "Spawning {} {:?} with size {}x{}",
            request.program,
            request.args,
            request.size.cols,
            request.size.rows
        );

        let pair = native_pty_system()
            .openpty(pty_size(request.size))
            .map_err(|e| spawn_failed("Failed to open PTY", e))?;

        let mut cmd = CommandBuilder::new(&request.program);
        cmd.args(&request.args);
        cmd.cwd(&request.cwd);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| spawn_failed(&format!("Failed to spawn {}", request.program), e))?;
        tracing::info!("Spawned process with PID: {:?}", child.process_id());

        // The child holds its own copy of the slave side
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| spawn_failed("Failed to clone PTY reader", e))?;
        let killer = child.clone_killer();

        let (tx, events) = mpsc::channel(EVENT_QUEUE);
        spawn_pty_reader(reader, child, tx);

        Ok(PtyProcess {
            control: Box::new(NativeControl {
                master: pair.master,
                killer,
            }),
            events,
        })
    }
}

struct NativeControl {
    master: Box<dyn MasterPty + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
}

impl PtyControl for NativeControl {
    fn resize(&mut self, size: TerminalSize) -> Result<(), EngineError> {
        tracing::debug!("Resizing PTY to {}x{}", size.cols, size.rows);
        self.master
            .resize(pty_size(size))
            .map_err(|e| {
                EngineError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
            })
    }

    fn kill(&mut self) -> Result<(), EngineError> {
        self.killer.kill().map_err(EngineError::Io)
    }
}

/// Read the pty on a blocking thread until EOF, then report the exit code
fn spawn_pty_reader(
    mut reader: Box<dyn Read + Send>,
    mut child: Box<dyn Child + Send + Sync>,
    tx: mpsc::Sender<PtyEvent>,
) {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 4096];

        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    tracing::debug!("PTY reader EOF");
                    break;
                }
                Ok(n) => {
                    if tx.blocking_send(PtyEvent::Output(buf[..n].to_vec())).is_err() {
                        tracing::debug!("PTY event channel closed");
                        break;
                    }
                }
                Err(e) => {
                    // Linux reports EIO once the child side is gone
                    if e.kind() == std::io::ErrorKind::Other
                        || e.kind() == std::io::ErrorKind::BrokenPipe
                    {
                        tracing::debug!("PTY reader closed: {}", e);
                    } else {
                        tracing::error!("PTY read error: {}", e);
                    }
                    break;
                }
            }
        }

        let code = match child.wait() {
            Ok(status) => Some(status.exit_code() as i32),
            Err(e) => {
                tracing::warn!("Failed to wait for PTY child: {}", e);
                None
            }
        };
        tracing::info!("PTY process exited with code {:?}", code);
        let _ = tx.blocking_send(PtyEvent::Exited(code));
    });
}
