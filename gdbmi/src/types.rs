//! GDB/MI record and value model.
//!
//! One `MiRecord` per MI output line: result records, async records,
//! stream records and the `(gdb)` prompt terminator.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One unit of MI output.
#[derive(Debug, Clone, PartialEq)]
pub enum MiRecord {
    Result(ResultRecord),
    Async(AsyncRecord),
    Stream(StreamRecord),
    /// The `(gdb)` terminator. Carries no data; marks the end of a record group.
    Prompt,
}

/// A `^`-prefixed result record, the reply to a tokenized command.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub token: Option<u32>,
    pub class: ResultClass,
    pub fields: HashMap<String, Value>,
}

impl ResultRecord {
    /// The `msg` field of an error record, if present.
    pub fn error_message(&self) -> Option<&str> {
        self.fields.get("msg").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

impl ResultClass {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "done" => Some(ResultClass::Done),
            "running" => Some(ResultClass::Running),
            "connected" => Some(ResultClass::Connected),
            "error" => Some(ResultClass::Error),
            "exit" => Some(ResultClass::Exit),
            _ => None,
        }
    }
}

/// Which out-of-band channel an async record arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncKind {
    /// `*` — execution state change (`stopped`, `running`).
    Exec,
    /// `=` — out-of-band notification (`thread-created`, `breakpoint-modified`, ...).
    Notify,
    /// `+` — progress.
    Status,
}

/// A `*`/`=`/`+`-prefixed async record.
///
/// The class is kept as text: the notify vocabulary is open-ended and
/// consumers only ever match on the handful of classes they care about.
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncRecord {
    pub kind: AsyncKind,
    pub class: String,
    pub fields: HashMap<String, Value>,
}

impl AsyncRecord {
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// The `thread-id` field parsed as an integer.
    pub fn thread_id(&self) -> Option<i64> {
        self.field_str("thread-id").and_then(|s| s.parse().ok())
    }
}

/// A `~`/`@`/`&`-prefixed stream record.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub kind: StreamKind,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// `~` — console output from the debugger itself.
    Console,
    /// `@` — output from the target program.
    Target,
    /// `&` — log/echo output, typically error text.
    Log,
}

/// A value on the right-hand side of an MI `variable=value` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Tuple(HashMap<String, Value>),
    List(Vec<Value>),
    /// A list whose elements are themselves named, e.g.
    /// `stack=[frame={...},frame={...}]`. A plain `List` would lose the names.
    ResultList(Vec<(String, Value)>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Tuple(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Iterate the element values of a `List` or `ResultList`; empty for
    /// scalar values. Lets callers consume `variables=[...]` and
    /// `stack=[frame={...},...]` uniformly.
    pub fn items(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            Value::List(l) => Box::new(l.iter()),
            Value::ResultList(l) => Box::new(l.iter().map(|(_, v)| v)),
            _ => Box::new(std::iter::empty()),
        }
    }
}

/// Stop reasons reported in `*stopped` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    BreakpointHit,
    WatchpointTrigger,
    ReadWatchpointTrigger,
    AccessWatchpointTrigger,
    FunctionFinished,
    LocationReached,
    WatchpointScope,
    EndSteppingRange,
    ExitedSignalled,
    Exited,
    ExitedNormally,
    SignalReceived,
    SolibEvent,
    Fork,
    Vfork,
    SyscallEntry,
    SyscallReturn,
    Exec,
    NoHistory,
}

impl std::str::FromStr for StopReason {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "breakpoint-hit" => Ok(StopReason::BreakpointHit),
            "watchpoint-trigger" => Ok(StopReason::WatchpointTrigger),
            "read-watchpoint-trigger" => Ok(StopReason::ReadWatchpointTrigger),
            "access-watchpoint-trigger" => Ok(StopReason::AccessWatchpointTrigger),
            "function-finished" => Ok(StopReason::FunctionFinished),
            "location-reached" => Ok(StopReason::LocationReached),
            "watchpoint-scope" => Ok(StopReason::WatchpointScope),
            "end-stepping-range" => Ok(StopReason::EndSteppingRange),
            "exited-signalled" => Ok(StopReason::ExitedSignalled),
            "exited" => Ok(StopReason::Exited),
            "exited-normally" => Ok(StopReason::ExitedNormally),
            "signal-received" => Ok(StopReason::SignalReceived),
            "solib-event" => Ok(StopReason::SolibEvent),
            "fork" => Ok(StopReason::Fork),
            "vfork" => Ok(StopReason::Vfork),
            "syscall-entry" => Ok(StopReason::SyscallEntry),
            "syscall-return" => Ok(StopReason::SyscallReturn),
            "exec" => Ok(StopReason::Exec),
            "no-history" => Ok(StopReason::NoHistory),
            _ => Err(()),
        }
    }
}

/// Console/target output forwarded to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputEvent {
    pub category: OutputCategory,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCategory {
    Stdout,
    Stderr,
}
