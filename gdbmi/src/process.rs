//! Debugger subprocess management.

use std::process::Stdio;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// A spawned GDB process speaking MI2 on its standard streams.
pub struct GdbProcess {
    child: Child,
}

impl GdbProcess {
    /// Spawn `<gdb_path> --interpreter=mi2` with all three streams piped.
    pub fn spawn(gdb_path: &str) -> crate::Result<Self> {
        log::debug!("spawning debugger: {gdb_path} --interpreter=mi2");

        let child = Command::new(gdb_path)
            .arg("--interpreter=mi2")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        log::debug!("debugger started, pid {:?}", child.id());
        Ok(GdbProcess { child })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Begin killing the process without waiting for it to exit.
    pub fn start_kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            log::debug!("kill failed (process likely already gone): {e}");
        }
    }
}
