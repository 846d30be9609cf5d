//! Control messages exchanged between the agent and the controller
//!
//! Every message is a JSON object discriminated by its `msg` field. The same
//! taxonomy is used in both directions; which side sends which kind is
//! described below.
//!
//! # Message Flow
//!
//! 1. Agent connects and sends `Launch`
//! 2. Incoming file: controller sends `File`, agent answers `FileWait`,
//!    controller streams the bytes, agent answers `FileReceiveEnd`
//! 3. Outgoing file: controller sends `RequestFile`, agent answers `File`,
//!    controller sends `WaitReceive`, agent streams the bytes
//! 4. Interactive process: controller sends `LaunchModel`, agent streams
//!    `Terminal` chunks and finally one `ProcessEnd`; `TerminalResize`
//!    may arrive at any time

use std::fmt;

use serde::{Deserialize, Serialize};

/// Terminal dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Number of rows
    pub rows: u16,
    /// Number of columns
    pub cols: u16,
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

/// Model execution details sent with the greeting of a non-main connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionData {
    pub username: String,
    pub unique_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
}

/// Discriminator of a control message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    File,
    FileWait,
    WaitReceive,
    FileReceiveEnd,
    LaunchModel,
    TerminalResize,
    RequestFile,
    Terminal,
    ProcessEnd,
    Launch,
}

impl MessageKind {
    /// Every known kind
    pub const ALL: [MessageKind; 10] = [
        Self::File,
        Self::FileWait,
        Self::WaitReceive,
        Self::FileReceiveEnd,
        Self::LaunchModel,
        Self::TerminalResize,
        Self::RequestFile,
        Self::Terminal,
        Self::ProcessEnd,
        Self::Launch,
    ];

    /// Wire token carried in the `msg` field
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::FileWait => "fileWait",
            Self::WaitReceive => "waitReceive",
            Self::FileReceiveEnd => "fileReceiveEnd",
            Self::LaunchModel => "launchModel",
            Self::TerminalResize => "terminalResize",
            Self::RequestFile => "requestFile",
            Self::Terminal => "terminal",
            Self::ProcessEnd => "processEnd",
            Self::Launch => "launch",
        }
    }

    /// Look up a kind by its wire token
    pub fn from_wire(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == token)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "camelCase")]
pub enum ControlMessage {
    /// Announce a binary span of `file_size` bytes.
    ///
    /// From the controller this names the file to write. The agent omits
    /// the path when answering a `RequestFile`.
    #[serde(rename_all = "camelCase")]
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_path: Option<String>,
        file_size: u64,
    },

    /// Agent is ready for the announced bytes
    FileWait,

    /// Controller is ready for the announced bytes
    WaitReceive,

    /// The receiving side has stored the whole span
    FileReceiveEnd,

    /// Start the interactive process for a script
    #[serde(rename_all = "camelCase")]
    LaunchModel { script_path: String },

    /// Resize the interactive process's terminal
    TerminalResize { cols: u16, rows: u16 },

    /// Ask the agent to send a file
    #[serde(rename_all = "camelCase")]
    RequestFile { file_path: String },

    /// A chunk of terminal output
    Terminal { data: String },

    /// The interactive process exited
    ProcessEnd,

    /// Greeting sent by the agent after connecting
    #[serde(rename_all = "camelCase")]
    Launch {
        history_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        execution: Option<ExecutionData>,
    },
}

impl ControlMessage {
    /// Get the kind of this message
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::File { .. } => MessageKind::File,
            Self::FileWait => MessageKind::FileWait,
            Self::WaitReceive => MessageKind::WaitReceive,
            Self::FileReceiveEnd => MessageKind::FileReceiveEnd,
            Self::LaunchModel { .. } => MessageKind::LaunchModel,
            Self::TerminalResize { .. } => MessageKind::TerminalResize,
            Self::RequestFile { .. } => MessageKind::RequestFile,
            Self::Terminal { .. } => MessageKind::Terminal,
            Self::ProcessEnd => MessageKind::ProcessEnd,
            Self::Launch { .. } => MessageKind::Launch,
        }
    }

    /// Announcement for an incoming file
    pub fn incoming_file(path: impl Into<String>, size: u64) -> Self {
        Self::File {
            file_path: Some(path.into()),
            file_size: size,
        }
    }

    /// Announcement answering a `RequestFile`
    pub fn outgoing_file(size: u64) -> Self {
        Self::File {
            file_path: None,
            file_size: size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_tokens_roundtrip() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::from_wire(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::from_wire("launch_model"), None);
    }

    #[test]
    fn test_serialized_tag_matches_kind() {
        let messages = [
            ControlMessage::incoming_file("/tmp/a", 3),
            ControlMessage::FileWait,
            ControlMessage::TerminalResize { cols: 80, rows: 24 },
            ControlMessage::Launch {
                history_id: 7,
                execution: None,
            },
        ];
        for message in messages {
            let value = serde_json::to_value(&message).unwrap();
            assert_eq!(value["msg"], message.kind().as_str());
        }
    }

    #[test]
    fn test_file_fields_are_camel_case() {
        let json = serde_json::to_string(&ControlMessage::incoming_file("out/x.bin", 5)).unwrap();
        assert_eq!(json, r#"{"msg":"file","filePath":"out/x.bin","fileSize":5}"#);

        let json = serde_json::to_string(&ControlMessage::outgoing_file(0)).unwrap();
        assert_eq!(json, r#"{"msg":"file","fileSize":0}"#);
    }

    #[test]
    fn test_execution_data_optional_paths() {
        let message = ControlMessage::Launch {
            history_id: 1,
            execution: Some(ExecutionData {
                username: "alice".into(),
                unique_name: "resnet".into(),
                input_path: None,
                parameters_path: Some("params.json".into()),
                output_path: Some("out".into()),
            }),
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains(r#""historyId":1"#));
        assert!(json.contains(r#""uniqueName":"resnet""#));
        assert!(!json.contains("inputPath"));
    }
}
