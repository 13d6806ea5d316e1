//! DAP server plumbing over stdio.

use std::io::{self, BufReader, BufWriter, Stdin, Stdout};
use std::sync::{Arc, Mutex};

use dap::errors::ServerError;
use dap::events::Event;
use dap::requests::{Command, Request};
use dap::responses::{Response, ResponseBody, ResponseMessage};
use dap::server::{Server, ServerOutput};
use dap::types::Capabilities;

use crate::session::DebugSession;

/// Thin wrapper around the `dap` server keeping responses addressable by
/// request seq, so a failed handler can still produce a DAP error response.
pub struct DapServer {
    server: Server<Stdin, Stdout>,
}

impl Default for DapServer {
    fn default() -> Self {
        Self::new()
    }
}

impl DapServer {
    pub fn new() -> DapServer {
        let input = BufReader::new(io::stdin());
        let output = BufWriter::new(io::stdout());
        DapServer {
            server: Server::new(input, output),
        }
    }

    /// Shared output handle; background threads use it to send events
    /// without going through the request loop.
    pub fn output(&self) -> Arc<Mutex<ServerOutput<Stdout>>> {
        self.server.output.clone()
    }

    pub fn poll_request(&mut self) -> Result<Option<Request>, ServerError> {
        let Some(req) = self.server.poll_request()? else {
            return Ok(None);
        };
        log::debug!("{}: {:?}", req.seq, req.command);
        Ok(Some(req))
    }

    pub fn respond_success(&mut self, seq: i64, body: ResponseBody) -> Result<(), ServerError> {
        log::debug!("success {seq}");
        self.server.respond(Response {
            request_seq: seq,
            success: true,
            message: None,
            body: Some(body),
            error: None,
        })
    }

    pub fn respond_error(&mut self, seq: i64, error: impl Into<String>) -> Result<(), ServerError> {
        let error = error.into();
        log::debug!("error {seq}: {error}");
        self.server.respond(Response {
            request_seq: seq,
            success: false,
            message: Some(ResponseMessage::Error(error)),
            body: None,
            error: None,
        })
    }

    pub fn send_event(&mut self, event: Event) -> Result<(), ServerError> {
        self.server.send_event(event)
    }
}

/// Serve one DAP session over stdio; returns when the client disconnects.
pub fn start() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = DapServer::new();

    // The client opens with `initialize`. Capabilities go back in the
    // response; the `initialized` event itself is emitted later, once
    // launch/attach has a debugger up.
    let req = server
        .poll_request()?
        .ok_or("input stream ended before initialize")?;
    if !matches!(req.command, Command::Initialize(_)) {
        return Err("expected initialize request".into());
    }
    server.respond_success(
        req.seq,
        ResponseBody::Initialize(Capabilities {
            supports_configuration_done_request: Some(true),
            supports_set_variable: Some(true),
            ..Default::default()
        }),
    )?;

    let mut session = DebugSession::new()?;
    loop {
        let Some(req) = server.poll_request()? else {
            log::info!("client disconnected");
            break;
        };
        let seq = req.seq;
        match session.handle_request(req, &mut server) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                log::error!("request {seq} failed: {e}");
                server.respond_error(seq, e.to_string())?;
            }
        }
    }
    Ok(())
}
