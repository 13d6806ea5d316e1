//! Translation of out-of-band MI records into DAP events.
//!
//! Two pump threads drain the transport's subscriber channels for the whole
//! session: console output forwards as `output` events, execution records
//! become `stopped`/`terminated`. Handle tables are reset before a stop is
//! made visible to the client, so every reference from the previous stop is
//! already invalid when the client reacts.

use std::io::Stdout;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dap::events::{Event, OutputEventBody, StoppedEventBody};
use dap::server::ServerOutput;
use dap::types::{OutputEventCategory, StoppedEventReason};
use gdbmi::{AsyncKind, AsyncRecord, OutputCategory, OutputEvent, StopReason};
use tokio::sync::mpsc;

use crate::handles::Handles;
use crate::trace::FileTracer;

/// What one `*`-record means for the client.
#[derive(Debug)]
pub enum Translated {
    Stopped {
        reason: StoppedEventReason,
        thread_id: Option<i64>,
    },
    Terminated,
    Ignored,
}

impl PartialEq for Translated {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Translated::Stopped { reason, thread_id },
                Translated::Stopped {
                    reason: other_reason,
                    thread_id: other_thread_id,
                },
            ) => format!("{reason:?}") == format!("{other_reason:?}") && thread_id == other_thread_id,
            (Translated::Terminated, Translated::Terminated) => true,
            (Translated::Ignored, Translated::Ignored) => true,
            _ => false,
        }
    }
}

pub fn translate_exec(record: &AsyncRecord) -> Translated {
    if record.class != "stopped" {
        // `*running` has no required DAP counterpart.
        return Translated::Ignored;
    }
    let reason = record.field_str("reason").unwrap_or("");
    match reason.parse::<StopReason>() {
        Ok(StopReason::ExitedNormally) => Translated::Terminated,
        Ok(StopReason::BreakpointHit) => Translated::Stopped {
            reason: StoppedEventReason::Breakpoint,
            thread_id: record.thread_id(),
        },
        Ok(StopReason::EndSteppingRange) => Translated::Stopped {
            reason: StoppedEventReason::Step,
            thread_id: record.thread_id(),
        },
        Ok(StopReason::Exited) => {
            log::info!(
                "debuggee exited with code {}",
                record.field_str("exit-code").unwrap_or("?")
            );
            Translated::Ignored
        }
        _ => {
            log::debug!("dropping stop record with reason {reason:?}");
            Translated::Ignored
        }
    }
}

pub(crate) struct EventPump {
    pub handles: Arc<Mutex<Handles>>,
    pub output: Arc<Mutex<ServerOutput<Stdout>>>,
    pub terminated: Arc<AtomicBool>,
    pub tracer: Option<FileTracer>,
}

impl EventPump {
    pub fn spawn(
        self,
        mut async_rx: mpsc::UnboundedReceiver<AsyncRecord>,
        mut console_rx: mpsc::UnboundedReceiver<OutputEvent>,
    ) {
        let output = self.output.clone();
        std::thread::spawn(move || {
            while let Some(event) = console_rx.blocking_recv() {
                let category = match event.category {
                    OutputCategory::Stdout => OutputEventCategory::Stdout,
                    OutputCategory::Stderr => OutputEventCategory::Stderr,
                };
                send_event(
                    &output,
                    Event::Output(OutputEventBody {
                        output: event.text,
                        category: Some(category),
                        ..Default::default()
                    }),
                );
            }
        });

        std::thread::spawn(move || {
            while let Some(record) = async_rx.blocking_recv() {
                if let Some(tracer) = &self.tracer {
                    tracer.line(&format!("async: {} {:?}", record.class, record.kind));
                }
                if record.kind != AsyncKind::Exec {
                    log::debug!("notification: {}", record.class);
                    continue;
                }
                if record.class == "stopped" {
                    // Fresh handle generation before the stop becomes
                    // visible to the client.
                    self.handles.lock().unwrap().reset();
                }
                match translate_exec(&record) {
                    Translated::Stopped { reason, thread_id } => send_event(
                        &self.output,
                        Event::Stopped(StoppedEventBody {
                            reason,
                            description: None,
                            thread_id,
                            preserve_focus_hint: None,
                            text: None,
                            all_threads_stopped: None,
                            hit_breakpoint_ids: None,
                        }),
                    ),
                    Translated::Terminated => self.emit_terminated(),
                    Translated::Ignored => {}
                }
            }
            // The channel closes when the debugger exits.
            self.emit_terminated();
        });
    }

    fn emit_terminated(&self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            if let Some(tracer) = &self.tracer {
                tracer.line("terminated");
            }
            send_event(&self.output, Event::Terminated(None));
        }
    }
}

fn send_event(output: &Arc<Mutex<ServerOutput<Stdout>>>, event: Event) {
    if let Err(e) = output.lock().unwrap().send_event(event) {
        log::error!("failed to send DAP event: {e}");
    }
}
