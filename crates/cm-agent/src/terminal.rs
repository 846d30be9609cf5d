//! Terminal bridge
//!
//! Runs at most one interactive process per connection. Its output is
//! forwarded as `terminal` messages and its exit as a single `processEnd`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use cm_core::TerminalConfig;
use cm_protocol::{ControlMessage, TerminalSize};

use crate::error::EngineError;
use crate::outbound::Outbound;
use crate::pty::{PtyControl, PtyEvent, PtyHost, PtyProcess, SpawnRequest};

/// How long to wait for a killed process to report its exit
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

struct ActiveProcess {
    control: Box<dyn PtyControl>,
    forwarder: JoinHandle<()>,
    outbound: Outbound,
}

/// Bridges one pty process to the outbound channel
pub struct TerminalBridge {
    host: Arc<dyn PtyHost>,
    config: TerminalConfig,
    active: Option<ActiveProcess>,
}

impl TerminalBridge {
    pub fn new(host: Arc<dyn PtyHost>, config: TerminalConfig) -> Self {
        Self {
            host,
            config,
            active: None,
        }
    }

    /// Whether a process is still producing events
    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.forwarder.is_finished())
    }

    /// Spawn `<shell> <script_path>` and start forwarding its output.
    ///
    /// A process from an earlier launch is terminated first.
    pub async fn launch(
        &mut self,
        script_path: &str,
        outbound: &Outbound,
    ) -> Result<(), EngineError> {
        if self.active.is_some() {
            tracing::info!("Terminating previous process before launching {}", script_path);
            self.shutdown().await;
        }

        let request = self.spawn_request(script_path);
        let PtyProcess { control, events } = self.host.spawn(request)?;
        let forwarder = tokio::spawn(forward_events(events, outbound.clone()));

        self.active = Some(ActiveProcess {
            control,
            forwarder,
            outbound: outbound.clone(),
        });
        Ok(())
    }

    /// Forward a new geometry to the running process
    pub fn resize(&mut self, size: TerminalSize) -> Result<(), EngineError> {
        match &mut self.active {
            Some(active) => active.control.resize(size),
            None => {
                tracing::warn!(
                    "Ignoring resize to {}x{}: no process is running",
                    size.cols,
                    size.rows
                );
                Ok(())
            }
        }
    }

    /// Kill the process and wait briefly for its exit to be forwarded.
    ///
    /// If the forwarder has to be aborted, `processEnd` is sent from here.
    pub async fn shutdown(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        if let Err(e) = active.control.kill() {
            tracing::debug!("Kill failed (process may have exited): {}", e);
        }

        if tokio::time::timeout(SHUTDOWN_GRACE, &mut active.forwarder)
            .await
            .is_err()
        {
            tracing::warn!("Terminal forwarder did not finish in time, aborting");
            active.forwarder.abort();

            // A cancelled send never reached the queue, so processEnd is still owed
            let cancelled =
                matches!((&mut active.forwarder).await, Err(e) if e.is_cancelled());
            if cancelled {
                let send = active.outbound.send(ControlMessage::ProcessEnd);
                match tokio::time::timeout(SHUTDOWN_GRACE, send).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => tracing::debug!("Outbound closed before processEnd"),
                    Err(_) => tracing::warn!("Timed out sending processEnd"),
                }
            }
        }
    }

    fn spawn_request(&self, script_path: &str) -> SpawnRequest {
        // The child inherits our environment; only TERM is overridden
        SpawnRequest {
            program: self.config.shell.clone(),
            args: vec![script_path.to_string()],
            size: self.config.size,
            cwd: self.config.resolved_working_dir(),
            env: vec![("TERM".to_string(), self.config.term.clone())],
        }
    }
}

/// Relay pty events until exit; `processEnd` goes out exactly once
async fn forward_events(mut events: mpsc::Receiver<PtyEvent>, outbound: Outbound) {
    let mut decoder = Utf8Chunker::default();
    let mut exit_code = None;

    while let Some(event) = events.recv().await {
        match event {
            PtyEvent::Output(bytes) => {
                let data = decoder.push(&bytes);
                if data.is_empty() {
                    continue;
                }
                if outbound.send(ControlMessage::Terminal { data }).await.is_err() {
                    tracing::debug!("Outbound closed, dropping terminal output");
                    return;
                }
            }
            PtyEvent::Exited(code) => {
                exit_code = code;
                break;
            }
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        let _ = outbound.send(ControlMessage::Terminal { data: tail }).await;
    }

    tracing::info!("Process ended with code {:?}", exit_code);
    if outbound.send(ControlMessage::ProcessEnd).await.is_err() {
        tracing::debug!("Outbound closed before processEnd");
    }
}

/// Turns arbitrary byte chunks into text without splitting a character.
///
/// An incomplete sequence at the end of a chunk is held until the next
/// one; bytes that can never form a character become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use tokio::io::AsyncReadExt;

    use crate::outbound::spawn_writer;

    #[test]
    fn test_chunker_passes_ascii() {
        let mut chunker = Utf8Chunker::default();
        assert_eq!(chunker.push(b"hello"), "hello");
        assert_eq!(chunker.finish(), "");
    }

    #[test]
    fn test_chunker_carries_split_character() {
        let mut chunker = Utf8Chunker::default();
        let snowman = "\u{2603}".as_bytes();

        assert_eq!(chunker.push(&[b'a', snowman[0]]), "a");
        assert_eq!(chunker.push(&snowman[1..2]), "");
        assert_eq!(chunker.push(&[snowman[2], b'b']), "\u{2603}b");
    }

    #[test]
    fn test_chunker_replaces_invalid_bytes() {
        let mut chunker = Utf8Chunker::default();
        assert_eq!(chunker.push(b"x\xffy"), "x\u{FFFD}y");
    }

    #[test]
    fn test_chunker_flushes_truncated_tail() {
        let mut chunker = Utf8Chunker::default();
        assert_eq!(chunker.push(&[0xe2, 0x98]), "");
        assert_eq!(chunker.finish(), "\u{FFFD}");
    }

    /// pty host whose process is driven by the test
    #[derive(Default)]
    struct ScriptedHost {
        spawned: Mutex<Vec<SpawnRequest>>,
        senders: Mutex<Vec<mpsc::Sender<PtyEvent>>>,
        resizes: Arc<Mutex<Vec<TerminalSize>>>,
        ignore_kill: bool,
    }

    struct ScriptedControl {
        events: mpsc::Sender<PtyEvent>,
        resizes: Arc<Mutex<Vec<TerminalSize>>>,
        ignore_kill: bool,
    }

    impl PtyControl for ScriptedControl {
        fn resize(&mut self, size: TerminalSize) -> Result<(), EngineError> {
            self.resizes.lock().unwrap().push(size);
            Ok(())
        }

        fn kill(&mut self) -> Result<(), EngineError> {
            if !self.ignore_kill {
                let _ = self.events.try_send(PtyEvent::Exited(None));
            }
            Ok(())
        }
    }

    impl PtyHost for ScriptedHost {
        fn spawn(&self, request: SpawnRequest) -> Result<PtyProcess, EngineError> {
            let (tx, events) = mpsc::channel(16);
            self.spawned.lock().unwrap().push(request);
            self.senders.lock().unwrap().push(tx.clone());
            Ok(PtyProcess {
                control: Box::new(ScriptedControl {
                    events: tx,
                    resizes: Arc::clone(&self.resizes),
                    ignore_kill: self.ignore_kill,
                }),
                events,
            })
        }
    }

    async fn collect(
        outbound: Outbound,
        writer: JoinHandle<Result<(), EngineError>>,
        mut server: tokio::io::DuplexStream,
    ) -> Vec<u8> {
        drop(outbound);
        writer.await.unwrap().unwrap();
        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        received
    }

    #[tokio::test]
    async fn test_launch_forwards_output_and_exit() {
        let host = Arc::new(ScriptedHost::default());
        let mut bridge = TerminalBridge::new(host.clone(), TerminalConfig::default());
        let (client, server) = tokio::io::duplex(4096);
        let (outbound, writer) = spawn_writer(client, 16);

        bridge.launch("/models/run.sh", &outbound).await.unwrap();
        {
            let spawned = host.spawned.lock().unwrap();
            assert_eq!(spawned[0].program, "bash");
            assert_eq!(spawned[0].args, vec!["/models/run.sh".to_string()]);
            assert_eq!(spawned[0].size, TerminalSize::new(14, 181));
            assert_eq!(
                spawned[0].env,
                vec![("TERM".to_string(), "xterm-color".to_string())]
            );
        }

        let tx = host.senders.lock().unwrap()[0].clone();
        tx.send(PtyEvent::Output(b"epoch 1\r\n".to_vec())).await.unwrap();
        tx.send(PtyEvent::Exited(Some(0))).await.unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), async {
            while bridge.is_running() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        bridge.shutdown().await;

        let received = collect(outbound, writer, server).await;
        assert_eq!(
            received,
            b"{\"msg\":\"terminal\",\"data\":\"epoch 1\\r\\n\"}\0{\"msg\":\"processEnd\"}\0"
        );
    }

    #[tokio::test]
    async fn test_second_launch_ends_first_process() {
        let host = Arc::new(ScriptedHost::default());
        let mut bridge = TerminalBridge::new(host.clone(), TerminalConfig::default());
        let (client, server) = tokio::io::duplex(4096);
        let (outbound, writer) = spawn_writer(client, 16);

        bridge.launch("a.sh", &outbound).await.unwrap();
        bridge.launch("b.sh", &outbound).await.unwrap();
        assert_eq!(host.spawned.lock().unwrap().len(), 2);

        bridge.shutdown().await;
        host.senders.lock().unwrap().clear();

        let received = collect(outbound, writer, server).await;
        assert_eq!(received, b"{\"msg\":\"processEnd\"}\0{\"msg\":\"processEnd\"}\0");
    }

    #[tokio::test]
    async fn test_shutdown_sends_process_end_when_process_hangs() {
        let host = Arc::new(ScriptedHost {
            ignore_kill: true,
            ..Default::default()
        });
        let mut bridge = TerminalBridge::new(host.clone(), TerminalConfig::default());
        let (client, server) = tokio::io::duplex(4096);
        let (outbound, writer) = spawn_writer(client, 16);

        bridge.launch("stuck.sh", &outbound).await.unwrap();
        bridge.shutdown().await;
        assert!(!bridge.is_running());
        host.senders.lock().unwrap().clear();

        let received = collect(outbound, writer, server).await;
        assert_eq!(received, b"{\"msg\":\"processEnd\"}\0");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_tolerates_non_utf8_environment() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let key = "CM_AGENT_TEST_NON_UTF8";
        std::env::set_var(key, OsStr::from_bytes(b"\xff\xfe"));

        let host = Arc::new(ScriptedHost::default());
        let mut bridge = TerminalBridge::new(host.clone(), TerminalConfig::default());
        let (client, _server) = tokio::io::duplex(4096);
        let (outbound, _writer) = spawn_writer(client, 16);

        let launched = bridge.launch("a.sh", &outbound).await;
        std::env::remove_var(key);

        launched.unwrap();
        assert_eq!(host.spawned.lock().unwrap().len(), 1);
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_resize_reaches_process() {
        let host = Arc::new(ScriptedHost::default());
        let mut bridge = TerminalBridge::new(host.clone(), TerminalConfig::default());
        let (client, _server) = tokio::io::duplex(4096);
        let (outbound, _writer) = spawn_writer(client, 16);

        // Nothing running yet
        bridge.resize(TerminalSize::new(40, 120)).unwrap();
        assert!(host.resizes.lock().unwrap().is_empty());

        bridge.launch("a.sh", &outbound).await.unwrap();
        bridge.resize(TerminalSize::new(40, 120)).unwrap();
        assert_eq!(*host.resizes.lock().unwrap(), vec![TerminalSize::new(40, 120)]);
        bridge.shutdown().await;
    }
}
