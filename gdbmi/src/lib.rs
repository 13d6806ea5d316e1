//! GDB Machine Interface engine.
//!
//! Owns the debugger subprocess, writes tokenized commands to its stdin and
//! correlates the result records coming back on stdout. Out-of-band records
//! (execution state changes, notifications, console output) fan out to
//! subscribers over unbounded channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, oneshot};

pub mod commands;
pub mod parser;
pub mod process;
pub mod types;
pub mod variables;

pub use parser::MiParser;
pub use types::*;

use process::GdbProcess;

#[derive(Error, Debug)]
pub enum MiError {
    #[error("failed to spawn debugger: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("debugger reported an error: {0}")]
    Gdb(String),
    #[error("MI protocol violation: {0}")]
    Protocol(String),
    #[error("debugger connection closed")]
    TransportClosed,
    #[error("missing field `{0}` in result payload")]
    MissingField(&'static str),
}

pub type Result<T> = std::result::Result<T, MiError>;

type PendingMap = Arc<Mutex<HashMap<u32, oneshot::Sender<Result<ResultRecord>>>>>;
type Subscribers<T> = Arc<Mutex<Vec<mpsc::UnboundedSender<T>>>>;

/// The MI transport: a handle to a live debugger session.
///
/// `send` may be called from several tasks at once; stdin writes are
/// serialized and replies are matched back by token, so interleaving is safe.
pub struct GdbMi {
    process: Mutex<Option<GdbProcess>>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    token_counter: AtomicU32,
    pending: PendingMap,
    async_subscribers: Subscribers<AsyncRecord>,
    console_subscribers: Subscribers<OutputEvent>,
    closed: Arc<AtomicBool>,
}

impl GdbMi {
    /// Spawn the debugger and start the reader tasks.
    pub fn spawn(gdb_path: &str) -> Result<GdbMi> {
        let mut process = GdbProcess::spawn(gdb_path)?;

        let stdin = process
            .take_stdin()
            .ok_or_else(|| MiError::Protocol("debugger stdin not piped".into()))?;
        let stdout = process
            .take_stdout()
            .ok_or_else(|| MiError::Protocol("debugger stdout not piped".into()))?;
        let stderr = process
            .take_stderr()
            .ok_or_else(|| MiError::Protocol("debugger stderr not piped".into()))?;

        let gdb = GdbMi {
            process: Mutex::new(Some(process)),
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            token_counter: AtomicU32::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            async_subscribers: Arc::new(Mutex::new(Vec::new())),
            console_subscribers: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        };
        gdb.start_stdout_reader(stdout);
        gdb.start_stderr_reader(stderr);
        Ok(gdb)
    }

    /// Subscribe to exec/notify async records.
    ///
    /// The channel closes when the debugger exits.
    pub fn subscribe_async(&self) -> mpsc::UnboundedReceiver<AsyncRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.closed.load(Ordering::SeqCst) {
            self.async_subscribers.lock().unwrap().push(tx);
        }
        rx
    }

    /// Subscribe to console/target/log stream output.
    pub fn subscribe_console(&self) -> mpsc::UnboundedReceiver<OutputEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.closed.load(Ordering::SeqCst) {
            self.console_subscribers.lock().unwrap().push(tx);
        }
        rx
    }

    /// Issue an MI command and wait for its result record.
    ///
    /// The command is written as `{token}{command}\n`; tokens are allocated
    /// monotonically and never reused within a session.
    pub async fn send(&self, command: &str) -> Result<ResultRecord> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MiError::TransportClosed);
        }

        let token = self.token_counter.fetch_add(1, Ordering::SeqCst);
        let line = format!("{token}{command}\n");
        log::debug!("SEND[{token}]: {command}");

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(token, tx);

        {
            let mut stdin = self.stdin.lock().await;
            let Some(stdin) = stdin.as_mut() else {
                self.pending.lock().unwrap().remove(&token);
                return Err(MiError::TransportClosed);
            };
            let write = async {
                stdin.write_all(line.as_bytes()).await?;
                stdin.flush().await
            };
            if let Err(e) = write.await {
                log::error!("SEND[{token}]: write failed: {e}");
                self.pending.lock().unwrap().remove(&token);
                return Err(MiError::TransportClosed);
            }
        }

        // Sender is dropped without a reply only when the transport closes.
        rx.await.map_err(|_| MiError::TransportClosed)?
    }

    fn start_stdout_reader(&self, mut stdout: ChildStdout) {
        let pending = self.pending.clone();
        let async_subscribers = self.async_subscribers.clone();
        let console_subscribers = self.console_subscribers.clone();
        let closed = self.closed.clone();

        tokio::spawn(async move {
            let mut parser = MiParser::new();
            let mut buf = [0u8; 8192];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => {
                        log::debug!("debugger stdout reached EOF");
                        break;
                    }
                    Ok(n) => {
                        for record in parser.feed(&buf[..n]) {
                            Self::dispatch(
                                record,
                                &pending,
                                &async_subscribers,
                                &console_subscribers,
                            );
                        }
                    }
                    Err(e) => {
                        log::error!("debugger stdout read failed: {e}");
                        break;
                    }
                }
            }

            closed.store(true, Ordering::SeqCst);
            let slots: Vec<_> = pending.lock().unwrap().drain().collect();
            for (token, tx) in slots {
                log::debug!("failing pending command {token}: transport closed");
                let _ = tx.send(Err(MiError::TransportClosed));
            }
            // Dropping the senders closes every subscriber channel.
            async_subscribers.lock().unwrap().clear();
            console_subscribers.lock().unwrap().clear();
        });
    }

    fn start_stderr_reader(&self, stderr: ChildStderr) {
        let console_subscribers = self.console_subscribers.clone();

        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let trimmed = line.trim_end();
                        if !trimmed.is_empty() {
                            log::debug!("debugger stderr: {trimmed}");
                            Self::broadcast(
                                &console_subscribers,
                                OutputEvent {
                                    category: OutputCategory::Stderr,
                                    text: format!("{trimmed}\n"),
                                },
                            );
                        }
                    }
                }
            }
        });
    }

    /// Route one parsed record: results to the pending-command table,
    /// out-of-band records to subscribers.
    fn dispatch(
        record: MiRecord,
        pending: &PendingMap,
        async_subscribers: &Subscribers<AsyncRecord>,
        console_subscribers: &Subscribers<OutputEvent>,
    ) {
        match record {
            MiRecord::Result(result) => {
                let Some(token) = result.token else {
                    log::warn!("dropping unsolicited result record: {:?}", result.class);
                    return;
                };
                let Some(tx) = pending.lock().unwrap().remove(&token) else {
                    log::warn!("no pending command for token {token}");
                    return;
                };
                log::debug!("RECV[{token}]: {:?}", result.class);
                let outcome = match result.class {
                    ResultClass::Done | ResultClass::Running | ResultClass::Connected => Ok(result),
                    ResultClass::Error => {
                        let msg = result.error_message().unwrap_or("unknown error").to_string();
                        Err(MiError::Gdb(msg))
                    }
                    ResultClass::Exit => {
                        Err(MiError::Protocol("unexpected `exit` result class".into()))
                    }
                };
                let _ = tx.send(outcome);
            }
            MiRecord::Async(record) => match record.kind {
                AsyncKind::Exec | AsyncKind::Notify => {
                    log::debug!("ASYNC: {} {:?}", record.class, record.kind);
                    Self::broadcast(async_subscribers, record);
                }
                AsyncKind::Status => {
                    log::debug!("status record: {}", record.class);
                }
            },
            MiRecord::Stream(stream) => {
                let category = match stream.kind {
                    StreamKind::Console | StreamKind::Target => OutputCategory::Stdout,
                    StreamKind::Log => OutputCategory::Stderr,
                };
                Self::broadcast(
                    console_subscribers,
                    OutputEvent {
                        category,
                        text: stream.text,
                    },
                );
            }
            MiRecord::Prompt => {}
        }
    }

    fn broadcast<T: Clone>(subscribers: &Subscribers<T>, event: T) {
        subscribers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.lock().unwrap().as_ref().and_then(GdbProcess::id)
    }
}

impl Drop for GdbMi {
    fn drop(&mut self) {
        if let Some(process) = self.process.lock().unwrap().as_mut() {
            process.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_subscribers<T>() -> Subscribers<T> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn result_record(token: Option<u32>, class: ResultClass) -> MiRecord {
        MiRecord::Result(ResultRecord {
            token,
            class,
            fields: HashMap::new(),
        })
    }

    #[test]
    fn dispatch_completes_matching_slot() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (tx, mut rx) = oneshot::channel();
        pending.lock().unwrap().insert(9, tx);

        GdbMi::dispatch(
            result_record(Some(9), ResultClass::Done),
            &pending,
            &empty_subscribers(),
            &empty_subscribers(),
        );

        assert!(pending.lock().unwrap().is_empty());
        let outcome = rx.try_recv().unwrap();
        assert!(matches!(outcome, Ok(r) if r.class == ResultClass::Done));
    }

    #[test]
    fn dispatch_maps_error_class_to_gdb_error() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (tx, mut rx) = oneshot::channel();
        pending.lock().unwrap().insert(3, tx);

        let mut fields = HashMap::new();
        fields.insert("msg".to_string(), Value::String("no such file".into()));
        GdbMi::dispatch(
            MiRecord::Result(ResultRecord {
                token: Some(3),
                class: ResultClass::Error,
                fields,
            }),
            &pending,
            &empty_subscribers(),
            &empty_subscribers(),
        );

        match rx.try_recv().unwrap() {
            Err(MiError::Gdb(msg)) => assert_eq!(msg, "no such file"),
            other => panic!("expected Gdb error, got {other:?}"),
        }
    }

    #[test]
    fn dispatch_drops_unsolicited_and_unknown_tokens() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (tx, mut rx) = oneshot::channel();
        pending.lock().unwrap().insert(5, tx);

        // No token: dropped.
        GdbMi::dispatch(
            result_record(None, ResultClass::Done),
            &pending,
            &empty_subscribers(),
            &empty_subscribers(),
        );
        // Unknown token: dropped, slot untouched.
        GdbMi::dispatch(
            result_record(Some(77), ResultClass::Done),
            &pending,
            &empty_subscribers(),
            &empty_subscribers(),
        );

        assert_eq!(pending.lock().unwrap().len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dispatch_routes_async_and_stream_records() {
        let async_subscribers = empty_subscribers();
        let console_subscribers = empty_subscribers();
        let (atx, mut arx) = mpsc::unbounded_channel();
        let (ctx, mut crx) = mpsc::unbounded_channel();
        async_subscribers.lock().unwrap().push(atx);
        console_subscribers.lock().unwrap().push(ctx);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        GdbMi::dispatch(
            MiRecord::Async(AsyncRecord {
                kind: AsyncKind::Exec,
                class: "stopped".into(),
                fields: HashMap::new(),
            }),
            &pending,
            &async_subscribers,
            &console_subscribers,
        );
        GdbMi::dispatch(
            MiRecord::Stream(StreamRecord {
                kind: StreamKind::Console,
                text: "hi".into(),
            }),
            &pending,
            &async_subscribers,
            &console_subscribers,
        );
        GdbMi::dispatch(
            MiRecord::Stream(StreamRecord {
                kind: StreamKind::Log,
                text: "warn".into(),
            }),
            &pending,
            &async_subscribers,
            &console_subscribers,
        );

        assert_eq!(arx.try_recv().unwrap().class, "stopped");
        let first = crx.try_recv().unwrap();
        assert_eq!(first.category, OutputCategory::Stdout);
        assert_eq!(first.text, "hi");
        assert_eq!(crx.try_recv().unwrap().category, OutputCategory::Stderr);
    }

    #[test]
    fn broadcast_drops_closed_subscribers() {
        let subscribers: Subscribers<i32> = empty_subscribers();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        subscribers.lock().unwrap().push(tx1);
        subscribers.lock().unwrap().push(tx2);
        drop(rx2);

        GdbMi::broadcast(&subscribers, 1);
        assert_eq!(subscribers.lock().unwrap().len(), 1);
        assert_eq!(rx1.try_recv().unwrap(), 1);
    }
}
