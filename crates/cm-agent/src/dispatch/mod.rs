//! Handler registry keyed by message kind
//!
//! The registry is built once and shared read-only by every connection.
//! Dispatch is strictly sequential: the driver awaits each handler before
//! decoding the next frame.

mod handlers;

pub use handlers::{
    FileAnnounceHandler, FileReceiveEndHandler, LaunchModelHandler, RequestFileHandler,
    TerminalResizeHandler, WaitReceiveHandler,
};

use std::collections::HashMap;

use async_trait::async_trait;

use cm_protocol::{ControlMessage, MessageKind, ProtocolError};

use crate::error::EngineError;
use crate::outbound::Outbound;
use crate::session::Session;
use crate::storage::Storage;
use crate::terminal::TerminalBridge;

/// Everything a handler may touch while processing one message
pub struct DispatchContext<'a> {
    pub session: &'a mut Session,
    pub outbound: &'a Outbound,
    pub storage: &'a dyn Storage,
    pub terminal: &'a mut TerminalBridge,
}

/// Handler trait for processing control messages
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle one decoded message
    async fn handle(
        &self,
        message: ControlMessage,
        ctx: &mut DispatchContext<'_>,
    ) -> Result<(), EngineError>;
}

/// Immutable map from message kind to handler
pub struct Registry {
    handlers: HashMap<MessageKind, Box<dyn Handler>>,
}

impl Registry {
    /// Start an empty registry
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            handlers: HashMap::new(),
        }
    }

    /// Registry with every controller-to-agent kind the agent understands
    pub fn standard() -> Self {
        Self::builder()
            .register(MessageKind::File, FileAnnounceHandler)
            .register(MessageKind::FileReceiveEnd, FileReceiveEndHandler)
            .register(MessageKind::LaunchModel, LaunchModelHandler)
            .register(MessageKind::TerminalResize, TerminalResizeHandler)
            .register(MessageKind::RequestFile, RequestFileHandler)
            .register(MessageKind::WaitReceive, WaitReceiveHandler)
            .build()
    }

    /// Whether `kind` has a handler
    pub fn handles(&self, kind: MessageKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Route `message` to its handler.
    ///
    /// A kind without a handler is as fatal as an undecodable frame.
    pub async fn dispatch(
        &self,
        message: ControlMessage,
        ctx: &mut DispatchContext<'_>,
    ) -> Result<(), EngineError> {
        let kind = message.kind();
        let handler = self
            .handlers
            .get(&kind)
            .ok_or_else(|| ProtocolError::UnknownMessageKind(kind.as_str().to_string()))?;

        tracing::debug!("Dispatching {}", kind);
        handler.handle(message, ctx).await
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("Registry").field("kinds", &kinds).finish()
    }
}

/// Collects handlers before freezing them into a [`Registry`]
pub struct RegistryBuilder {
    handlers: HashMap<MessageKind, Box<dyn Handler>>,
}

impl RegistryBuilder {
    /// Register `handler` for `kind`, replacing any earlier one
    pub fn register(mut self, kind: MessageKind, handler: impl Handler + 'static) -> Self {
        if self.handlers.insert(kind, Box::new(handler)).is_some() {
            tracing::debug!("Replaced handler for {}", kind);
        }
        self
    }

    /// Freeze the registry
    pub fn build(self) -> Registry {
        Registry {
            handlers: self.handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use cm_core::TerminalConfig;

    use crate::outbound::spawn_writer;
    use crate::pty::{PtyHost, PtyProcess, SpawnRequest};
    use crate::storage::FsStorage;

    struct NoPty;

    impl PtyHost for NoPty {
        fn spawn(&self, _request: SpawnRequest) -> Result<PtyProcess, EngineError> {
            Err(EngineError::SpawnFailed("no pty in tests".into()))
        }
    }

    struct Recorder(Arc<Mutex<Vec<ControlMessage>>>);

    #[async_trait]
    impl Handler for Recorder {
        async fn handle(
            &self,
            message: ControlMessage,
            _ctx: &mut DispatchContext<'_>,
        ) -> Result<(), EngineError> {
            self.0.lock().unwrap().push(message);
            Ok(())
        }
    }

    #[test]
    fn test_standard_covers_controller_kinds() {
        let registry = Registry::standard();
        for kind in [
            MessageKind::File,
            MessageKind::FileReceiveEnd,
            MessageKind::LaunchModel,
            MessageKind::TerminalResize,
            MessageKind::RequestFile,
            MessageKind::WaitReceive,
        ] {
            assert!(registry.handles(kind), "missing handler for {}", kind);
        }
        assert!(!registry.handles(MessageKind::Terminal));
        assert!(!registry.handles(MessageKind::ProcessEnd));
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_kind() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = Registry::builder()
            .register(MessageKind::FileReceiveEnd, Recorder(Arc::clone(&seen)))
            .build();

        let (client, _server) = tokio::io::duplex(1024);
        let (outbound, _writer) = spawn_writer(client, 4);
        let mut session = Session::new();
        let mut terminal = TerminalBridge::new(Arc::new(NoPty), TerminalConfig::default());
        let mut ctx = DispatchContext {
            session: &mut session,
            outbound: &outbound,
            storage: &FsStorage,
            terminal: &mut terminal,
        };

        registry
            .dispatch(ControlMessage::FileReceiveEnd, &mut ctx)
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![ControlMessage::FileReceiveEnd]);

        let err = registry
            .dispatch(ControlMessage::WaitReceive, &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Protocol(ProtocolError::UnknownMessageKind(ref kind))
                if kind == "waitReceive"
        ));
        assert!(err.is_fatal_protocol());
    }
}
