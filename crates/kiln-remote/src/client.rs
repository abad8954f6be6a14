//! Client-side facade over a disposable host process.
//!
//! The client mirrors the engine API but degrades instead of failing: a
//! call without a loaded context, or across a broken boundary, logs a
//! warning and reports absence. Boundary faults are never surfaced as
//! errors to the caller. Unloading the context tears the process down,
//! which is the only way compilation memory accumulated by the host is
//! ever reclaimed.

use crate::protocol::{Request, Response};
use kiln_core::{CompileHook, CompileReport};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tracing::{debug, info, warn};

/// Configuration of the boundary.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Path to the `kiln-hostd` executable.
    pub hostd: PathBuf,
    /// Library roots passed to the host engine.
    pub library_roots: Vec<PathBuf>,
}

/// Token returned by hook registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookHandle(u64);

struct Context {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Script engine facade backed by an isolated host process.
pub struct RemoteEngine {
    config: RemoteConfig,
    context: Option<Context>,
    on_success: Vec<(HookHandle, CompileHook)>,
    on_failure: Vec<(HookHandle, CompileHook)>,
    next_hook: u64,
}

impl RemoteEngine {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            config,
            context: None,
            on_success: Vec::new(),
            on_failure: Vec::new(),
            next_hook: 0,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.context.is_some()
    }

    /// Spawns the host process, optionally tagged with a context name for
    /// log correlation. A no-op when a context is already loaded.
    pub fn load_context(&mut self, name: Option<&str>) {
        if self.context.is_some() {
            warn!("context already loaded, ignoring");
            return;
        }
        let mut command = Command::new(&self.config.hostd);
        for root in &self.config.library_roots {
            command.arg("--library-root").arg(root);
        }
        if let Some(name) = name {
            command.arg("--context").arg(name);
        }
        command.stdin(Stdio::piped()).stdout(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(%err, hostd = %self.config.hostd.display(), "failed to spawn host");
                return;
            }
        };
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            warn!("host spawned without piped stdio, discarding");
            let _ = child.kill();
            let _ = child.wait();
            return;
        };
        info!(pid = child.id(), "context loaded");
        self.context = Some(Context {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        });
    }

    /// Shuts the host process down and discards the context, reclaiming
    /// everything the host accumulated. A no-op when nothing is loaded.
    pub fn unload_context(&mut self) {
        let Some(mut context) = self.context.take() else {
            warn!("no context loaded, ignoring unload");
            return;
        };
        // Best-effort polite shutdown; the kill below covers a host that
        // no longer answers.
        let _ = roundtrip(&mut context, &Request::Shutdown);
        let _ = context.child.kill();
        let _ = context.child.wait();
        info!("context unloaded");
    }

    /// Sends one request across the boundary.
    ///
    /// `None` means the boundary was unavailable: no loaded context, or a
    /// transport fault, in which case the context is discarded.
    pub fn call(&mut self, request: &Request) -> Option<Response> {
        let Some(context) = self.context.as_mut() else {
            warn!("no context loaded, call dropped");
            return None;
        };
        match roundtrip(context, request) {
            Ok(response) => Some(response),
            Err(err) => {
                warn!(%err, "boundary broken, discarding context");
                let mut context = self.context.take()?;
                let _ = context.child.kill();
                let _ = context.child.wait();
                None
            }
        }
    }

    // Engine facade.

    pub fn add_usings(&mut self, text: &str) -> bool {
        matches!(
            self.call(&Request::AddUsings { text: text.into() }),
            Some(Response::Ack)
        )
    }

    pub fn remove_usings(&mut self, text: &str) -> bool {
        matches!(
            self.call(&Request::RemoveUsings { text: text.into() }),
            Some(Response::Ack)
        )
    }

    /// Compiles classless code on the host; the script stays host-side.
    pub fn compile_code(&mut self, code: &str) -> Option<CompileReport> {
        let response = self.call(&Request::CompileCode { code: code.into() });
        self.finish_compile(response)
    }

    pub fn compile_coroutine(&mut self, code: &str) -> Option<CompileReport> {
        let response = self.call(&Request::CompileCoroutine { code: code.into() });
        self.finish_compile(response)
    }

    pub fn compile_type(&mut self, id: &str, code: &str) -> Option<CompileReport> {
        let response = self.call(&Request::CompileType {
            id: id.into(),
            code: code.into(),
        });
        self.finish_compile(response)
    }

    pub fn remove_types(&mut self, ids: &[&str]) -> bool {
        let ids = ids.iter().map(|id| id.to_string()).collect();
        matches!(
            self.call(&Request::RemoveTypes { ids }),
            Some(Response::Ack)
        )
    }

    /// Runs the last compiled script on the host and returns its rendered
    /// value; `None` when there is nothing to execute or no boundary.
    pub fn execute_last_script(&mut self) -> Option<String> {
        match self.call(&Request::ExecuteLastScript)? {
            Response::Value { rendered } => rendered,
            other => {
                warn!(?other, "unexpected execute response");
                None
            }
        }
    }

    /// Forces the next step of the last compiled coroutine.
    pub fn advance_coroutine(&mut self) -> Option<String> {
        match self.call(&Request::AdvanceCoroutine)? {
            Response::Value { rendered } => rendered,
            other => {
                warn!(?other, "unexpected coroutine response");
                None
            }
        }
    }

    pub fn reset(&mut self) -> bool {
        matches!(self.call(&Request::Reset), Some(Response::Ack))
    }

    // Compile hooks, dispatched client-side from the returned report.

    pub fn add_on_success(&mut self, hook: CompileHook) -> HookHandle {
        let handle = self.next_hook_handle();
        self.on_success.push((handle, hook));
        handle
    }

    pub fn add_on_failure(&mut self, hook: CompileHook) -> HookHandle {
        let handle = self.next_hook_handle();
        self.on_failure.push((handle, hook));
        handle
    }

    pub fn remove_on_success(&mut self, handle: HookHandle) {
        self.on_success.retain(|(id, _)| *id != handle);
    }

    pub fn remove_on_failure(&mut self, handle: HookHandle) {
        self.on_failure.retain(|(id, _)| *id != handle);
    }

    /// Dispatches hooks for a completed compile attempt and hands the
    /// report back. Boundary faults dispatch nothing.
    fn finish_compile(&mut self, response: Option<Response>) -> Option<CompileReport> {
        match response? {
            Response::Report { report } => {
                let hooks = if report.has_errors() {
                    &mut self.on_failure
                } else {
                    &mut self.on_success
                };
                for (_, hook) in hooks {
                    hook(&report);
                }
                Some(report)
            }
            Response::Fault { message } => {
                warn!(message, "compile faulted on the host");
                None
            }
            other => {
                warn!(?other, "unexpected compile response");
                None
            }
        }
    }

    fn next_hook_handle(&mut self) -> HookHandle {
        self.next_hook += 1;
        HookHandle(self.next_hook)
    }
}

impl Drop for RemoteEngine {
    fn drop(&mut self) {
        if self.context.is_some() {
            self.unload_context();
        }
    }
}

fn roundtrip(context: &mut Context, request: &Request) -> std::io::Result<Response> {
    let line = serde_json::to_string(request).map_err(std::io::Error::other)?;
    debug!(%line, "sending request");
    writeln!(context.stdin, "{line}")?;
    context.stdin.flush()?;

    let mut answer = String::new();
    if context.stdout.read_line(&mut answer)? == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "host closed the boundary",
        ));
    }
    serde_json::from_str(&answer).map_err(std::io::Error::other)
}
