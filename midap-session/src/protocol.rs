//! Launch and attach request arguments.
//!
//! A DAP adapter is configured entirely through these request payloads; they
//! arrive as the request's `additional_data` and are deserialized here.

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LaunchArgs {
    /// Debugger executable; defaults to `gdb` on PATH.
    pub gdb: Option<String>,
    /// The program to debug. Some clients send this as `target`.
    #[serde(alias = "target")]
    pub program: String,
    /// Command-line arguments handed to `-exec-arguments`.
    pub arguments: Option<String>,
    /// Session trace file.
    pub log_file: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AttachArgs {
    pub gdb: Option<String>,
    /// Symbols source; informational for attach, the debuggee is located by
    /// pid.
    pub program: Option<String>,
    #[serde(alias = "pid")]
    pub process_id: u32,
    pub log_file: Option<PathBuf>,
}
