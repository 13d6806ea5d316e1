//! Opaque handle tables.
//!
//! The adapter mints plain integers so the client can refer to stack frames
//! and variable containers without seeing their internal identity. Both
//! tables are reset on every debugger stop; a handle from a previous stop
//! then misses, which is how stale requests are detected.

use std::collections::HashMap;

/// What a frame handle stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRef {
    pub thread_id: i64,
    pub frame_id: i64,
}

/// What a variable handle stands for: a frame's local scope, or one
/// composite varobj drilled into from it.
#[derive(Debug, Clone, PartialEq)]
pub enum VarRef {
    Frame(i64),
    Object { frame_handle: i64, varname: String },
}

/// Monotonic integer-to-value map. `reset` clears the entries but never the
/// counter, so an id is not reused across generations.
#[derive(Debug)]
pub struct HandleTable<T> {
    next: i64,
    entries: HashMap<i64, T>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        HandleTable {
            // 0 is reserved: DAP uses variablesReference 0 for "no children".
            next: 1,
            entries: HashMap::new(),
        }
    }

    pub fn mint(&mut self, value: T) -> i64 {
        let handle = self.next;
        self.next += 1;
        self.entries.insert(handle, value);
        handle
    }

    pub fn get(&self, handle: i64) -> Option<&T> {
        self.entries.get(&handle)
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The session's two tables, reset together on every stop.
#[derive(Debug, Default)]
pub struct Handles {
    pub frames: HandleTable<FrameRef>,
    pub variables: HandleTable<VarRef>,
}

impl Handles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.frames.reset();
        self.variables.reset();
    }
}
