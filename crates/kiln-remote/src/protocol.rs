//! Wire types crossing the isolation boundary.
//!
//! Requests and responses are single JSON lines; every type here is plain
//! serializable data. Handles never cross the boundary: the host keeps the
//! last compiled script and coroutine on its side and the client addresses
//! them positionally.

use kiln_core::CompileReport;
use serde::{Deserialize, Serialize};

/// A command sent to the host process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    AddUsings { text: String },
    RemoveUsings { text: String },
    CompileCode { code: String },
    CompileCoroutine { code: String },
    CompileType { id: String, code: String },
    RemoveTypes { ids: Vec<String> },
    /// Executes the script of the last successful `CompileCode`.
    ExecuteLastScript,
    /// Forces the next step of the last compiled coroutine.
    AdvanceCoroutine,
    Reset,
    Shutdown,
}

/// The host's answer to one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    /// The operation completed with nothing to return.
    Ack,
    /// Outcome of a compile attempt, success or failure.
    Report { report: CompileReport },
    /// A rendered value; `None` means the source is exhausted or absent.
    Value { rendered: Option<String> },
    /// The operation faulted; the message is the only thing that crosses.
    Fault { message: String },
}
