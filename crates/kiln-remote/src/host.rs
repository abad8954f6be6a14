//! Host-side request loop.
//!
//! Owns the engine and everything non-serializable around it. Scripts and
//! coroutines never cross the boundary; the host retains the most recent
//! one of each and the client addresses them implicitly.

use crate::protocol::{Request, Response};
use kiln_core::{CoroutineScript, EngineConfig, EngineError, Script, ScriptEngine};
use std::io::{BufRead, Write};
use tracing::{debug, info, warn};

pub struct RemoteHost {
    engine: ScriptEngine,
    last_script: Option<Script>,
    coroutine: Option<CoroutineScript>,
}

impl RemoteHost {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            engine: ScriptEngine::new(config),
            last_script: None,
            coroutine: None,
        }
    }

    /// Services requests from `reader` until EOF or a `Shutdown` request.
    ///
    /// One JSON request per line, one JSON response per line. A line that
    /// does not parse gets a `Fault` response; only a broken transport
    /// ends the loop with an error.
    pub fn serve(&mut self, reader: impl BufRead, mut writer: impl Write) -> std::io::Result<()> {
        info!("host serving");
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let request: Request = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(err) => {
                    warn!(%err, "unparseable request line");
                    respond(&mut writer, &Response::Fault {
                        message: format!("malformed request: {err}"),
                    })?;
                    continue;
                }
            };

            let shutdown = matches!(request, Request::Shutdown);
            let response = self.handle(request);
            respond(&mut writer, &response)?;
            if shutdown {
                break;
            }
        }
        info!("host loop finished");
        Ok(())
    }

    pub fn handle(&mut self, request: Request) -> Response {
        debug!(?request, "handling request");
        match request {
            Request::AddUsings { text } => ack(self.engine.add_usings(&text)),
            Request::RemoveUsings { text } => ack(self.engine.remove_usings(&text)),
            Request::CompileCode { code } => {
                let result = self.engine.compile_code(&code);
                let report = self.engine.last_report().clone();
                match result {
                    Ok(script) => {
                        self.last_script = Some(script);
                        Response::Report { report }
                    }
                    Err(EngineError::Compile(_)) => Response::Report { report },
                    Err(fault) => fault.into(),
                }
            }
            Request::CompileCoroutine { code } => {
                let result = self.engine.compile_coroutine(&code);
                let report = self.engine.last_report().clone();
                match result {
                    Ok(coroutine) => {
                        self.coroutine = Some(coroutine);
                        Response::Report { report }
                    }
                    Err(EngineError::Compile(_)) => Response::Report { report },
                    Err(fault) => fault.into(),
                }
            }
            Request::CompileType { id, code } => {
                let result = self.engine.compile_type(&id, &code);
                let report = self.engine.last_report().clone();
                match result {
                    Ok(_) => Response::Report { report },
                    Err(EngineError::Compile(_)) => Response::Report { report },
                    Err(fault) => fault.into(),
                }
            }
            Request::RemoveTypes { ids } => {
                let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
                ack(self.engine.remove_types(&ids))
            }
            Request::ExecuteLastScript => match &self.last_script {
                None => Response::Value { rendered: None },
                Some(script) => match script.execute() {
                    Ok(rendered) => Response::Value {
                        rendered: Some(rendered),
                    },
                    Err(fault) => fault.into(),
                },
            },
            Request::AdvanceCoroutine => match &mut self.coroutine {
                None => Response::Value { rendered: None },
                Some(steps) => match steps.next() {
                    None => Response::Value { rendered: None },
                    Some(Ok(rendered)) => Response::Value {
                        rendered: Some(rendered),
                    },
                    Some(Err(fault)) => fault.into(),
                },
            },
            Request::Reset => {
                self.engine.reset();
                self.last_script = None;
                self.coroutine = None;
                Response::Ack
            }
            Request::Shutdown => Response::Ack,
        }
    }
}

fn ack(result: Result<(), EngineError>) -> Response {
    match result {
        Ok(()) => Response::Ack,
        Err(fault) => fault.into(),
    }
}

fn respond(writer: &mut impl Write, response: &Response) -> std::io::Result<()> {
    let line = serde_json::to_string(response).map_err(std::io::Error::other)?;
    writeln!(writer, "{line}")?;
    writer.flush()
}

impl From<EngineError> for Response {
    fn from(fault: EngineError) -> Self {
        Response::Fault {
            message: fault.to_string(),
        }
    }
}
