//! DAP request handling.
//!
//! Each request maps to a deterministic sequence of typed MI commands. The
//! DAP loop is blocking, the MI engine is async; the session owns a tokio
//! runtime and bridges the two with `block_on`. Mutex guards are held for
//! lookups and inserts only, never across a blocking call into the runtime.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use dap::events::Event;
use dap::requests::{Command, Request};
use dap::responses::{
    ContinueResponse, EvaluateResponse, ResponseBody, ScopesResponse, SetBreakpointsResponse,
    SetVariableResponse, StackTraceResponse, ThreadsResponse, VariablesResponse,
};
use dap::types::{self, EvaluateArgumentsContext};

use gdbmi::commands::{BreakpointInfo, VarCreated};
use gdbmi::variables::{Updated, VarManager, VarObj};
use gdbmi::{GdbMi, MiError};

use crate::error::{Result, SessionError};
use crate::events::EventPump;
use crate::handles::{FrameRef, Handles, VarRef};
use crate::protocol::{AttachArgs, LaunchArgs};
use crate::server::DapServer;
use crate::trace::FileTracer;

pub struct DebugSession {
    runtime: tokio::runtime::Runtime,
    gdb: Option<Arc<GdbMi>>,
    vars: VarManager,
    handles: Arc<Mutex<Handles>>,
    terminated: Arc<AtomicBool>,
    /// Set once `configurationDone` has started the debuggee.
    running: bool,
    /// Attach sessions resume with `-exec-continue`, launch with `-exec-run`.
    attach_mode: bool,
    tracer: Option<FileTracer>,
}

impl DebugSession {
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(SessionError::Runtime)?;
        Ok(DebugSession {
            runtime,
            gdb: None,
            vars: VarManager::new(),
            handles: Arc::new(Mutex::new(Handles::new())),
            terminated: Arc::new(AtomicBool::new(false)),
            running: false,
            attach_mode: false,
            tracer: None,
        })
    }

    /// Handle one request; `Ok(false)` ends the session loop.
    pub fn handle_request(&mut self, req: Request, server: &mut DapServer) -> Result<bool> {
        let seq = req.seq;
        match req.command {
            Command::Launch(args) => {
                let raw = args
                    .additional_data
                    .ok_or_else(|| SessionError::InvalidArgs("missing launch arguments".into()))?;
                let args: LaunchArgs = serde_json::from_value(raw)
                    .map_err(|e| SessionError::InvalidArgs(e.to_string()))?;
                self.open_tracer(args.log_file.as_deref())?;

                let gdb = self.start_debugger(args.gdb.as_deref(), server)?;
                self.runtime.block_on(gdb.file_exec_and_symbols(&args.program))?;
                {
                    // Fire and forget: losing pretty printing only degrades
                    // value rendering.
                    let gdb = gdb.clone();
                    self.runtime.spawn(async move {
                        if let Err(e) = gdb.enable_pretty_printing().await {
                            log::warn!("enable-pretty-printing failed: {e}");
                        }
                    });
                }
                if let Some(arguments) = args.arguments.as_deref() {
                    self.runtime.block_on(gdb.exec_arguments(arguments))?;
                }
                self.attach_mode = false;
                self.trace(&format!("launched {}", args.program));

                server.respond_success(seq, ResponseBody::Launch)?;
                server.send_event(Event::Initialized)?;
            }
            Command::Attach(args) => {
                let raw = args
                    .additional_data
                    .ok_or_else(|| SessionError::InvalidArgs("missing attach arguments".into()))?;
                let args: AttachArgs = serde_json::from_value(raw)
                    .map_err(|e| SessionError::InvalidArgs(e.to_string()))?;
                self.open_tracer(args.log_file.as_deref())?;

                let gdb = self.start_debugger(args.gdb.as_deref(), server)?;
                log::info!(
                    "attaching to pid {} (program {:?})",
                    args.process_id,
                    args.program
                );
                self.runtime.block_on(gdb.target_attach(args.process_id))?;
                self.attach_mode = true;
                self.trace(&format!("attached to {}", args.process_id));

                server.respond_success(seq, ResponseBody::Attach)?;
                server.send_event(Event::Initialized)?;
            }
            Command::SetBreakpoints(args) => {
                let gdb = self.gdb()?;
                let path = args.source.path.clone().ok_or_else(|| {
                    SessionError::InvalidArgs("setBreakpoints without source.path".into())
                })?;
                let requested: Vec<i64> = args
                    .breakpoints
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(|bp| bp.line)
                    .collect();

                let breakpoints = self
                    .runtime
                    .block_on(reconcile_breakpoints(&gdb, &path, &requested))?;
                self.trace(&format!("breakpoints {path}: {requested:?}"));
                server.respond_success(
                    seq,
                    ResponseBody::SetBreakpoints(SetBreakpointsResponse { breakpoints }),
                )?;
            }
            Command::ConfigurationDone => {
                let gdb = self.gdb()?;
                if self.attach_mode {
                    self.runtime.block_on(gdb.exec_continue())?;
                } else {
                    self.runtime.block_on(gdb.exec_run())?;
                }
                self.running = true;
                server.respond_success(seq, ResponseBody::ConfigurationDone)?;
            }
            Command::Threads => {
                // Clients poll for threads before configurationDone; answer
                // those without touching the debugger.
                let threads = if self.running && self.gdb.is_some() {
                    let gdb = self.gdb()?;
                    self.runtime
                        .block_on(gdb.thread_info())?
                        .into_iter()
                        .map(|t| types::Thread {
                            id: t.id,
                            name: t.name.unwrap_or_else(|| format!("Thread #{}", t.id)),
                        })
                        .collect()
                } else {
                    Vec::new()
                };
                server.respond_success(seq, ResponseBody::Threads(ThreadsResponse { threads }))?;
            }
            Command::StackTrace(args) => {
                let gdb = self.gdb()?;
                let thread = args.thread_id;
                let start = args.start_frame.unwrap_or(0);
                let levels = args.levels.filter(|l| *l > 0);

                let (depth, frames) = self.runtime.block_on(async {
                    let depth = gdb.stack_info_depth(thread, None).await?;
                    if depth == 0 || start >= depth {
                        return Ok::<_, MiError>((depth, Vec::new()));
                    }
                    let high = match levels {
                        Some(levels) => (start + levels - 1).min(depth - 1),
                        None => depth - 1,
                    };
                    let frames = gdb.stack_list_frames(thread, start, high).await?;
                    Ok((depth, frames))
                })?;

                let mut handles = self.handles.lock().unwrap();
                let stack_frames: Vec<types::StackFrame> = frames
                    .into_iter()
                    .map(|frame| {
                        let handle = handles.frames.mint(FrameRef {
                            thread_id: thread,
                            frame_id: frame.level,
                        });
                        types::StackFrame {
                            id: handle,
                            name: frame.func.unwrap_or_else(|| "??".to_string()),
                            source: frame.fullname.or(frame.file).map(|path| types::Source {
                                path: Some(path),
                                ..Default::default()
                            }),
                            line: frame.line.unwrap_or(0),
                            column: 0,
                            ..Default::default()
                        }
                    })
                    .collect();
                drop(handles);

                server.respond_success(
                    seq,
                    ResponseBody::StackTrace(StackTraceResponse {
                        total_frames: Some(depth),
                        stack_frames,
                    }),
                )?;
            }
            Command::Scopes(args) => {
                let mut handles = self.handles.lock().unwrap();
                let scopes = if handles.frames.get(args.frame_id).is_some() {
                    let reference = handles.variables.mint(VarRef::Frame(args.frame_id));
                    vec![types::Scope {
                        name: "Local".to_string(),
                        variables_reference: reference,
                        expensive: false,
                        ..Default::default()
                    }]
                } else {
                    // Stale frame handle from before the last stop.
                    Vec::new()
                };
                drop(handles);
                server.respond_success(seq, ResponseBody::Scopes(ScopesResponse { scopes }))?;
            }
            Command::Variables(args) => {
                let body = self.variables_body(args.variables_reference)?;
                server.respond_success(seq, ResponseBody::Variables(body))?;
            }
            Command::SetVariable(args) => {
                let body =
                    self.set_variable_body(args.variables_reference, &args.name, &args.value)?;
                server.respond_success(seq, ResponseBody::SetVariable(body))?;
            }
            Command::Next(_) => {
                let gdb = self.gdb()?;
                self.runtime.block_on(gdb.exec_next())?;
                server.respond_success(seq, ResponseBody::Next)?;
            }
            Command::StepIn(_) => {
                let gdb = self.gdb()?;
                self.runtime.block_on(gdb.exec_step())?;
                server.respond_success(seq, ResponseBody::StepIn)?;
            }
            Command::StepOut(_) => {
                let gdb = self.gdb()?;
                self.runtime.block_on(gdb.exec_finish())?;
                server.respond_success(seq, ResponseBody::StepOut)?;
            }
            Command::Continue(_) => {
                let gdb = self.gdb()?;
                self.runtime.block_on(gdb.exec_continue())?;
                server.respond_success(
                    seq,
                    ResponseBody::Continue(ContinueResponse {
                        all_threads_continued: Some(true),
                    }),
                )?;
            }
            Command::Evaluate(args) => match args.context {
                Some(EvaluateArgumentsContext::Repl) => {
                    let gdb = self.gdb()?;
                    // REPL input goes to the debugger verbatim; its output
                    // comes back on the console stream.
                    self.runtime.block_on(gdb.send(&args.expression))?;
                    server.respond_success(
                        seq,
                        ResponseBody::Evaluate(evaluate_response(String::new(), None, 0)),
                    )?;
                }
                Some(EvaluateArgumentsContext::Watch) => {
                    let body = self.watch_body(&args.expression, args.frame_id)?;
                    server.respond_success(seq, ResponseBody::Evaluate(body))?;
                }
                _ => return Err(SessionError::UnsupportedEvaluateContext),
            },
            Command::Disconnect(_) => {
                if let Some(gdb) = self.gdb.take() {
                    let _ = self.runtime.block_on(gdb.gdb_exit());
                }
                self.trace("session disconnected");
                server.respond_success(seq, ResponseBody::Disconnect)?;
                return Ok(false);
            }
            other => {
                log::warn!("unhandled DAP command: {other:?}");
                server.respond_error(seq, "unsupported request")?;
            }
        }
        Ok(true)
    }

    fn gdb(&self) -> Result<Arc<GdbMi>> {
        self.gdb.clone().ok_or(SessionError::NoSession)
    }

    fn trace(&self, text: &str) {
        if let Some(tracer) = &self.tracer {
            tracer.line(text);
        }
    }

    fn open_tracer(&mut self, path: Option<&Path>) -> Result<()> {
        self.tracer = match path {
            Some(path) => Some(FileTracer::create(path).map_err(|e| {
                SessionError::InvalidArgs(format!("cannot open log file {}: {e}", path.display()))
            })?),
            None => None,
        };
        Ok(())
    }

    /// Spawn the debugger and wire its out-of-band records to the client.
    fn start_debugger(&mut self, gdb_path: Option<&str>, server: &DapServer) -> Result<Arc<GdbMi>> {
        let path = gdb_path.unwrap_or("gdb");
        let gdb = {
            // The transport spawns its reader tasks on the session runtime.
            let _guard = self.runtime.enter();
            Arc::new(GdbMi::spawn(path)?)
        };
        let async_rx = gdb.subscribe_async();
        let console_rx = gdb.subscribe_console();
        EventPump {
            handles: self.handles.clone(),
            output: server.output(),
            terminated: self.terminated.clone(),
            tracer: self.tracer.clone(),
        }
        .spawn(async_rx, console_rx);

        self.gdb = Some(gdb.clone());
        Ok(gdb)
    }

    fn frame_context(&self, frame_handle: i64) -> Option<FrameRef> {
        self.handles.lock().unwrap().frames.get(frame_handle).copied()
    }

    fn variables_body(&mut self, reference: i64) -> Result<VariablesResponse> {
        let var_ref = self.handles.lock().unwrap().variables.get(reference).cloned();
        match var_ref {
            None => Ok(VariablesResponse {
                variables: Vec::new(),
            }),
            Some(VarRef::Frame(frame_handle)) => self.frame_variables(frame_handle),
            Some(VarRef::Object {
                frame_handle,
                varname,
            }) => self.object_variables(frame_handle, &varname),
        }
    }

    /// The "Local" scope of one frame: update cached varobjs, and
    /// re-enumerate the locals when the call stack changed under us.
    fn frame_variables(&mut self, frame_handle: i64) -> Result<VariablesResponse> {
        let Some(FrameRef {
            thread_id,
            frame_id,
        }) = self.frame_context(frame_handle)
        else {
            return Ok(VariablesResponse {
                variables: Vec::new(),
            });
        };
        let gdb = self.gdb()?;
        let depth = self.runtime.block_on(gdb.stack_info_depth(thread_id, None))?;

        let cached = self.vars.frame_expressions(thread_id, frame_id, depth);
        let mut rendered: Vec<VarObj> = Vec::new();
        let mut stack_changed = false;
        for expression in &cached {
            match self
                .runtime
                .block_on(self.vars.update(&gdb, thread_id, frame_id, depth, expression))?
            {
                Updated::InScope(var) => rendered.push(var),
                Updated::OutOfScope => stack_changed = true,
            }
        }

        if stack_changed || rendered.is_empty() {
            rendered.clear();
            let locals = self
                .runtime
                .block_on(gdb.stack_list_variables(thread_id, frame_id))?;
            for local in locals {
                let var = match self.vars.get(thread_id, frame_id, depth, &local.name) {
                    Some(var) => var.clone(),
                    None => {
                        let created = self
                            .runtime
                            .block_on(gdb.var_create(thread_id, frame_id, &local.name))?;
                        self.vars
                            .add(thread_id, frame_id, depth, &local.name, true, false, &created)
                    }
                };
                rendered.push(var);
            }
        }

        let variables = rendered
            .into_iter()
            .map(|var| {
                let name = var.expression.clone();
                self.render_variable(frame_handle, &var, name)
            })
            .collect();
        Ok(VariablesResponse { variables })
    }

    /// Children of one composite varobj, with array-aware display names.
    fn object_variables(&mut self, frame_handle: i64, varname: &str) -> Result<VariablesResponse> {
        let Some(FrameRef {
            thread_id,
            frame_id,
        }) = self.frame_context(frame_handle)
        else {
            return Ok(VariablesResponse {
                variables: Vec::new(),
            });
        };
        let gdb = self.gdb()?;
        let depth = self.runtime.block_on(gdb.stack_info_depth(thread_id, None))?;

        let Some(parent) = self
            .vars
            .find_by_varname(thread_id, frame_id, depth, varname)
            .cloned()
        else {
            return Ok(VariablesResponse {
                variables: Vec::new(),
            });
        };

        let children = self.runtime.block_on(gdb.var_list_children(&parent.varname))?;
        let mut variables = Vec::new();
        for child in children {
            let expression = self.vars.child_expression(&parent, &child.exp);
            let label = self.vars.child_label(&parent, &child.exp);
            let created = VarCreated {
                name: child.name,
                numchild: child.numchild,
                vtype: child.vtype.unwrap_or_default(),
                value: child.value.unwrap_or_default(),
            };
            let var = self
                .vars
                .add(thread_id, frame_id, depth, &expression, false, true, &created);
            variables.push(self.render_variable(frame_handle, &var, label));
        }
        Ok(VariablesResponse { variables })
    }

    fn set_variable_body(
        &mut self,
        reference: i64,
        name: &str,
        value: &str,
    ) -> Result<SetVariableResponse> {
        let fallback = SetVariableResponse {
            value: value.to_string(),
            type_field: None,
            variables_reference: None,
            named_variables: None,
            indexed_variables: None,
        };
        let var_ref = self.handles.lock().unwrap().variables.get(reference).cloned();
        let Some(var_ref) = var_ref else {
            return Ok(fallback);
        };
        let (frame_handle, is_frame_scope) = match &var_ref {
            VarRef::Frame(handle) => (*handle, true),
            VarRef::Object { frame_handle, .. } => (*frame_handle, false),
        };
        let Some(FrameRef {
            thread_id,
            frame_id,
        }) = self.frame_context(frame_handle)
        else {
            return Ok(fallback);
        };
        let gdb = self.gdb()?;
        let depth = self.runtime.block_on(gdb.stack_info_depth(thread_id, None))?;

        let expression = match &var_ref {
            VarRef::Frame(_) => name.to_string(),
            VarRef::Object { varname, .. } => {
                let Some(parent) = self
                    .vars
                    .find_by_varname(thread_id, frame_id, depth, varname)
                    .cloned()
                else {
                    return Ok(fallback);
                };
                self.vars.child_expression(&parent, name)
            }
        };

        let var = match self.vars.get(thread_id, frame_id, depth, &expression) {
            Some(var) => var.clone(),
            None => {
                let created = self
                    .runtime
                    .block_on(gdb.var_create(thread_id, frame_id, &expression))?;
                self.vars.add(
                    thread_id,
                    frame_id,
                    depth,
                    &expression,
                    is_frame_scope,
                    !is_frame_scope,
                    &created,
                )
            }
        };

        let assigned = self.runtime.block_on(gdb.var_assign(&var.varname, value))?;
        let refreshed = self
            .runtime
            .block_on(self.vars.update(&gdb, thread_id, frame_id, depth, &expression))?;

        let (value, vtype) = match refreshed {
            Updated::InScope(var) => (var.value, Some(var.vtype)),
            Updated::OutOfScope => (assigned, None),
        };
        Ok(SetVariableResponse {
            value,
            type_field: vtype,
            variables_reference: None,
            named_variables: None,
            indexed_variables: None,
        })
    }

    /// A watch expression: keep one non-`is_var` varobj per expression per
    /// frame context, recreating it whenever it falls out of scope so the
    /// client keeps seeing a fresh value across frame changes.
    fn watch_body(&mut self, expression: &str, frame_id: Option<i64>) -> Result<EvaluateResponse> {
        let Some(frame_handle) = frame_id else {
            return Err(SessionError::InvalidArgs(
                "watch evaluation requires a frameId".into(),
            ));
        };
        let Some(FrameRef {
            thread_id,
            frame_id,
        }) = self.frame_context(frame_handle)
        else {
            // Stale frame handle.
            return Ok(evaluate_response(String::new(), None, 0));
        };
        let gdb = self.gdb()?;
        let depth = self.runtime.block_on(gdb.stack_info_depth(thread_id, None))?;

        let var = if self.vars.get(thread_id, frame_id, depth, expression).is_some() {
            match self
                .runtime
                .block_on(self.vars.update(&gdb, thread_id, frame_id, depth, expression))?
            {
                Updated::InScope(var) => var,
                Updated::OutOfScope => {
                    let created = self
                        .runtime
                        .block_on(gdb.var_create(thread_id, frame_id, expression))?;
                    self.vars
                        .add(thread_id, frame_id, depth, expression, false, false, &created)
                }
            }
        } else {
            let created = self
                .runtime
                .block_on(gdb.var_create(thread_id, frame_id, expression))?;
            self.vars
                .add(thread_id, frame_id, depth, expression, false, false, &created)
        };

        let reference = if var.numchild > 0 {
            self.handles.lock().unwrap().variables.mint(VarRef::Object {
                frame_handle,
                varname: var.varname.clone(),
            })
        } else {
            0
        };
        Ok(evaluate_response(
            var.value.clone(),
            Some(var.vtype.clone()),
            reference,
        ))
    }

    fn render_variable(&self, frame_handle: i64, var: &VarObj, name: String) -> types::Variable {
        let reference = if var.numchild > 0 {
            self.handles.lock().unwrap().variables.mint(VarRef::Object {
                frame_handle,
                varname: var.varname.clone(),
            })
        } else {
            0
        };
        types::Variable {
            name,
            value: var.value.clone(),
            type_field: Some(var.vtype.clone()),
            variables_reference: reference,
            named_variables: None,
            indexed_variables: None,
            presentation_hint: None,
            evaluate_name: Some(var.expression.clone()),
            memory_reference: None,
        }
    }
}

fn evaluate_response(result: String, vtype: Option<String>, reference: i64) -> EvaluateResponse {
    EvaluateResponse {
        result,
        type_field: vtype,
        variables_reference: reference,
        named_variables: None,
        indexed_variables: None,
        presentation_hint: None,
        memory_reference: None,
    }
}

/// After this call the debugger's breakpoints in `path` are exactly
/// `requested`: existing ones on requested lines are kept, the rest in the
/// file deleted, missing lines inserted.
async fn reconcile_breakpoints(
    gdb: &GdbMi,
    path: &str,
    requested: &[i64],
) -> std::result::Result<Vec<types::Breakpoint>, MiError> {
    let existing = gdb.break_list().await?;
    let plan = plan_breakpoints(&existing, path, requested);

    let mut ids = plan.kept;
    for &line in &plan.insert {
        let bkpt = gdb.break_insert(path, line).await?;
        ids.insert(line, bkpt.number);
    }
    gdb.break_delete(&plan.delete).await?;

    Ok(requested
        .iter()
        .map(|line| types::Breakpoint {
            verified: true,
            line: Some(*line),
            id: ids.get(line).copied(),
            ..Default::default()
        })
        .collect())
}

#[derive(Debug, Default, PartialEq)]
struct BreakpointPlan {
    /// line -> existing breakpoint number, already in place.
    kept: HashMap<i64, i64>,
    insert: Vec<i64>,
    delete: Vec<i64>,
}

/// Matching is by line only; duplicate requests for one line collapse.
fn plan_breakpoints(existing: &[BreakpointInfo], path: &str, requested: &[i64]) -> BreakpointPlan {
    let mut plan = BreakpointPlan::default();
    for bp in existing {
        if bp.fullname.as_deref() != Some(path) {
            continue;
        }
        match bp.line {
            Some(line) if requested.contains(&line) && !plan.kept.contains_key(&line) => {
                plan.kept.insert(line, bp.number);
            }
            _ => plan.delete.push(bp.number),
        }
    }
    for &line in requested {
        if !plan.kept.contains_key(&line) && !plan.insert.contains(&line) {
            plan.insert.push(line);
        }
    }
    plan
}
