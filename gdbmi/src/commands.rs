//! Typed MI command layer.
//!
//! One thin wrapper per MI command: serialize the inputs (quoting paths and
//! expressions as c-strings where they may contain spaces), issue through the
//! transport and project the result payload into a typed shape.

use crate::parser::encode_c_string;
use crate::types::Value;
use crate::{GdbMi, MiError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

impl GdbMi {
    /// `-exec-arguments <args>` — arguments for the next `-exec-run`.
    pub async fn exec_arguments(&self, args: &str) -> Result<()> {
        self.send(&format!("-exec-arguments {args}")).await?;
        Ok(())
    }

    pub async fn exec_run(&self) -> Result<()> {
        self.send("-exec-run").await?;
        Ok(())
    }

    pub async fn exec_continue(&self) -> Result<()> {
        self.send("-exec-continue").await?;
        Ok(())
    }

    pub async fn exec_next(&self) -> Result<()> {
        self.send("-exec-next").await?;
        Ok(())
    }

    pub async fn exec_step(&self) -> Result<()> {
        self.send("-exec-step").await?;
        Ok(())
    }

    pub async fn exec_finish(&self) -> Result<()> {
        self.send("-exec-finish").await?;
        Ok(())
    }

    /// `-break-insert "<file>:<line>"`.
    pub async fn break_insert(&self, file: &str, line: i64) -> Result<BreakpointInfo> {
        let location = encode_c_string(&format!("{file}:{line}"));
        let result = self.send(&format!("-break-insert {location}")).await?;
        let bkpt = result
            .fields
            .get("bkpt")
            .and_then(Value::as_tuple)
            .ok_or(MiError::MissingField("bkpt"))?;
        BreakpointInfo::from_tuple(bkpt)
    }

    /// `-break-delete <n>...` — one batched deletion.
    pub async fn break_delete(&self, numbers: &[i64]) -> Result<()> {
        if numbers.is_empty() {
            return Ok(());
        }
        let list = numbers
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        self.send(&format!("-break-delete {list}")).await?;
        Ok(())
    }

    pub async fn break_list(&self) -> Result<Vec<BreakpointInfo>> {
        let result = self.send("-break-list").await?;
        let body = result
            .fields
            .get("BreakpointTable")
            .and_then(Value::as_tuple)
            .and_then(|table| table.get("body"))
            .ok_or(MiError::MissingField("BreakpointTable.body"))?;

        body.items()
            .filter_map(Value::as_tuple)
            .map(BreakpointInfo::from_tuple)
            .collect()
    }

    pub async fn thread_info(&self) -> Result<Vec<ThreadInfo>> {
        let result = self.send("-thread-info").await?;
        let threads = result
            .fields
            .get("threads")
            .ok_or(MiError::MissingField("threads"))?;

        threads
            .items()
            .filter_map(Value::as_tuple)
            .map(ThreadInfo::from_tuple)
            .collect()
    }

    /// `-stack-info-depth` for the given thread; `max` bounds the count GDB
    /// will walk.
    pub async fn stack_info_depth(&self, thread: i64, max: Option<i64>) -> Result<i64> {
        let command = match max {
            Some(max) => format!("-stack-info-depth --thread {thread} {max}"),
            None => format!("-stack-info-depth --thread {thread}"),
        };
        let result = self.send(&command).await?;
        result
            .fields
            .get("depth")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .ok_or(MiError::MissingField("depth"))
    }

    pub async fn stack_list_frames(&self, thread: i64, low: i64, high: i64) -> Result<Vec<FrameInfo>> {
        let result = self
            .send(&format!("-stack-list-frames --thread {thread} {low} {high}"))
            .await?;
        let stack = result
            .fields
            .get("stack")
            .ok_or(MiError::MissingField("stack"))?;

        stack
            .items()
            .filter_map(Value::as_tuple)
            .map(FrameInfo::from_tuple)
            .collect()
    }

    /// `-stack-list-variables --simple-values` — locals of one frame, with
    /// values for scalars and bare names for composites.
    pub async fn stack_list_variables(&self, thread: i64, frame: i64) -> Result<Vec<LocalVariable>> {
        let result = self
            .send(&format!(
                "-stack-list-variables --thread {thread} --frame {frame} --simple-values"
            ))
            .await?;
        let variables = result
            .fields
            .get("variables")
            .ok_or(MiError::MissingField("variables"))?;

        variables
            .items()
            .filter_map(Value::as_tuple)
            .map(LocalVariable::from_tuple)
            .collect()
    }

    /// `-var-create` with a debugger-chosen name, addressing the current
    /// frame of the given thread/frame pair.
    pub async fn var_create(&self, thread: i64, frame: i64, expression: &str) -> Result<VarCreated> {
        let expression = encode_c_string(expression);
        let result = self
            .send(&format!(
                "-var-create --thread {thread} --frame {frame} - * {expression}"
            ))
            .await?;
        VarCreated::from_tuple(&result.fields)
    }

    pub async fn var_update(&self, thread: i64, name: &str) -> Result<Vec<VarChange>> {
        let result = self
            .send(&format!("-var-update --thread {thread} --all-values {name}"))
            .await?;
        let changelist = result
            .fields
            .get("changelist")
            .ok_or(MiError::MissingField("changelist"))?;

        changelist
            .items()
            .filter_map(Value::as_tuple)
            .map(VarChange::from_tuple)
            .collect()
    }

    pub async fn var_list_children(&self, name: &str) -> Result<Vec<VarChild>> {
        let result = self
            .send(&format!("-var-list-children --all-values {name}"))
            .await?;
        let children = match result.fields.get("children") {
            Some(children) => children,
            // `numchild="0"` comes without a children list.
            None => return Ok(Vec::new()),
        };

        children
            .items()
            .filter_map(Value::as_tuple)
            .map(VarChild::from_tuple)
            .collect()
    }

    /// `-var-assign` — returns the value after assignment.
    pub async fn var_assign(&self, name: &str, expression: &str) -> Result<String> {
        let expression = encode_c_string(expression);
        let result = self
            .send(&format!("-var-assign {name} {expression}"))
            .await?;
        result
            .fields
            .get("value")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(MiError::MissingField("value"))
    }

    pub async fn var_delete(&self, name: &str) -> Result<()> {
        self.send(&format!("-var-delete {name}")).await?;
        Ok(())
    }

    pub async fn target_attach(&self, pid: u32) -> Result<()> {
        self.send(&format!("-target-attach {pid}")).await?;
        Ok(())
    }

    pub async fn file_exec_and_symbols(&self, path: &str) -> Result<()> {
        let path = encode_c_string(path);
        self.send(&format!("-file-exec-and-symbols {path}")).await?;
        Ok(())
    }

    pub async fn enable_pretty_printing(&self) -> Result<()> {
        self.send("-enable-pretty-printing").await?;
        Ok(())
    }

    /// `-gdb-exit`. The reply is the `^exit` class (or none at all when the
    /// process wins the race), so both are treated as success.
    pub async fn gdb_exit(&self) -> Result<()> {
        match self.send("-gdb-exit").await {
            Ok(_) => Ok(()),
            Err(MiError::Protocol(_)) | Err(MiError::TransportClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn field<'a>(tuple: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    tuple.get(key).and_then(Value::as_str)
}

fn owned_field(tuple: &HashMap<String, Value>, key: &str) -> Option<String> {
    field(tuple, key).map(str::to_string)
}

fn numeric_field(tuple: &HashMap<String, Value>, key: &str) -> Option<i64> {
    field(tuple, key).and_then(|s| s.parse().ok())
}

/// One row of `-break-list` / the `bkpt` payload of `-break-insert`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointInfo {
    pub number: i64,
    pub enabled: bool,
    pub func: Option<String>,
    pub file: Option<String>,
    pub fullname: Option<String>,
    pub line: Option<i64>,
}

impl BreakpointInfo {
    pub fn from_tuple(tuple: &HashMap<String, Value>) -> Result<Self> {
        Ok(BreakpointInfo {
            number: numeric_field(tuple, "number").ok_or(MiError::MissingField("number"))?,
            enabled: field(tuple, "enabled").map(|s| s == "y").unwrap_or(false),
            func: owned_field(tuple, "func"),
            file: owned_field(tuple, "file"),
            fullname: owned_field(tuple, "fullname"),
            line: numeric_field(tuple, "line"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub id: i64,
    pub name: Option<String>,
}

impl ThreadInfo {
    pub fn from_tuple(tuple: &HashMap<String, Value>) -> Result<Self> {
        Ok(ThreadInfo {
            id: numeric_field(tuple, "id").ok_or(MiError::MissingField("id"))?,
            name: owned_field(tuple, "name").or_else(|| owned_field(tuple, "target-id")),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub level: i64,
    pub func: Option<String>,
    pub file: Option<String>,
    pub fullname: Option<String>,
    pub line: Option<i64>,
    pub addr: Option<String>,
}

impl FrameInfo {
    pub fn from_tuple(tuple: &HashMap<String, Value>) -> Result<Self> {
        Ok(FrameInfo {
            level: numeric_field(tuple, "level").ok_or(MiError::MissingField("level"))?,
            func: owned_field(tuple, "func"),
            file: owned_field(tuple, "file"),
            fullname: owned_field(tuple, "fullname"),
            line: numeric_field(tuple, "line"),
            addr: owned_field(tuple, "addr"),
        })
    }
}

/// One local from `-stack-list-variables --simple-values`. Composite
/// variables carry no `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalVariable {
    pub name: String,
    pub vtype: Option<String>,
    pub value: Option<String>,
}

impl LocalVariable {
    pub fn from_tuple(tuple: &HashMap<String, Value>) -> Result<Self> {
        Ok(LocalVariable {
            name: owned_field(tuple, "name").ok_or(MiError::MissingField("name"))?,
            vtype: owned_field(tuple, "type"),
            value: owned_field(tuple, "value"),
        })
    }
}

/// The payload of a successful `-var-create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarCreated {
    pub name: String,
    pub numchild: i64,
    pub vtype: String,
    pub value: String,
}

impl VarCreated {
    pub fn from_tuple(tuple: &HashMap<String, Value>) -> Result<Self> {
        Ok(VarCreated {
            name: owned_field(tuple, "name").ok_or(MiError::MissingField("name"))?,
            numchild: numeric_field(tuple, "numchild").unwrap_or(0),
            vtype: owned_field(tuple, "type").unwrap_or_default(),
            value: owned_field(tuple, "value").unwrap_or_default(),
        })
    }
}

/// One `changelist` entry of `-var-update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarChange {
    pub name: String,
    pub value: Option<String>,
    pub in_scope: bool,
}

impl VarChange {
    pub fn from_tuple(tuple: &HashMap<String, Value>) -> Result<Self> {
        Ok(VarChange {
            name: owned_field(tuple, "name").ok_or(MiError::MissingField("name"))?,
            value: owned_field(tuple, "value"),
            // `in_scope` is "true", "false" or "invalid"; only "true" keeps
            // the varobj alive.
            in_scope: field(tuple, "in_scope").map(|s| s == "true").unwrap_or(true),
        })
    }
}

/// One `children` entry of `-var-list-children`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarChild {
    pub name: String,
    pub exp: String,
    pub numchild: i64,
    pub vtype: Option<String>,
    pub value: Option<String>,
}

impl VarChild {
    pub fn from_tuple(tuple: &HashMap<String, Value>) -> Result<Self> {
        Ok(VarChild {
            name: owned_field(tuple, "name").ok_or(MiError::MissingField("name"))?,
            exp: owned_field(tuple, "exp").ok_or(MiError::MissingField("exp"))?,
            numchild: numeric_field(tuple, "numchild").unwrap_or(0),
            vtype: owned_field(tuple, "type"),
            value: owned_field(tuple, "value"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;
    use crate::types::MiRecord;

    fn result_fields(line: &str) -> HashMap<String, Value> {
        match parse_line(line).unwrap() {
            MiRecord::Result(r) => r.fields,
            other => panic!("expected result record, got {other:?}"),
        }
    }

    #[test]
    fn breakpoint_from_real_payload() {
        let fields = result_fields(
            r#"^done,bkpt={number="2",type="breakpoint",disp="keep",enabled="y",addr="0x0000555555555189",func="main",file="vars.c",fullname="/home/user/vars.c",line="19",thread-groups=["i1"],times="0"}"#,
        );
        let bkpt = BreakpointInfo::from_tuple(fields.get("bkpt").unwrap().as_tuple().unwrap())
            .unwrap();
        assert_eq!(bkpt.number, 2);
        assert!(bkpt.enabled);
        assert_eq!(bkpt.line, Some(19));
        assert_eq!(bkpt.fullname.as_deref(), Some("/home/user/vars.c"));
    }

    #[test]
    fn threads_from_real_payload() {
        let fields = result_fields(
            r#"^done,threads=[{id="1",target-id="process 4050",name="vars",state="stopped"}],current-thread-id="1""#,
        );
        let threads: Vec<ThreadInfo> = fields
            .get("threads")
            .unwrap()
            .items()
            .filter_map(Value::as_tuple)
            .map(|t| ThreadInfo::from_tuple(t).unwrap())
            .collect();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].id, 1);
        assert_eq!(threads[0].name.as_deref(), Some("vars"));
    }

    #[test]
    fn frames_from_real_payload() {
        let fields = result_fields(
            r#"^done,stack=[frame={level="0",addr="0x0000555555555189",func="main",file="vars.c",fullname="/home/user/vars.c",line="19",arch="i386:x86-64"}]"#,
        );
        let frames: Vec<FrameInfo> = fields
            .get("stack")
            .unwrap()
            .items()
            .filter_map(Value::as_tuple)
            .map(|t| FrameInfo::from_tuple(t).unwrap())
            .collect();
        assert_eq!(frames[0].level, 0);
        assert_eq!(frames[0].func.as_deref(), Some("main"));
        assert_eq!(frames[0].line, Some(19));
    }

    #[test]
    fn locals_distinguish_simple_and_composite() {
        let fields = result_fields(
            r#"^done,variables=[{name="a",type="int",value="1"},{name="r",type="struct foo"}]"#,
        );
        let locals: Vec<LocalVariable> = fields
            .get("variables")
            .unwrap()
            .items()
            .filter_map(Value::as_tuple)
            .map(|t| LocalVariable::from_tuple(t).unwrap())
            .collect();
        assert_eq!(locals[0].value.as_deref(), Some("1"));
        assert_eq!(locals[1].value, None);
        assert_eq!(locals[1].vtype.as_deref(), Some("struct foo"));
    }

    #[test]
    fn var_create_payload() {
        let fields = result_fields(
            r#"^done,name="var3",numchild="3",value="{...}",type="struct foo",has_more="0""#,
        );
        let created = VarCreated::from_tuple(&fields).unwrap();
        assert_eq!(created.name, "var3");
        assert_eq!(created.numchild, 3);
        assert_eq!(created.vtype, "struct foo");
    }

    #[test]
    fn var_update_scope_transitions() {
        let fields = result_fields(
            r#"^done,changelist=[{name="var1",value="25",in_scope="true",type_changed="false",has_more="0"},{name="var2",in_scope="false",type_changed="false",has_more="0"}]"#,
        );
        let changes: Vec<VarChange> = fields
            .get("changelist")
            .unwrap()
            .items()
            .filter_map(Value::as_tuple)
            .map(|t| VarChange::from_tuple(t).unwrap())
            .collect();
        assert!(changes[0].in_scope);
        assert_eq!(changes[0].value.as_deref(), Some("25"));
        assert!(!changes[1].in_scope);
    }

    #[test]
    fn var_children_payload() {
        let fields = result_fields(
            r#"^done,numchild="3",children=[child={name="var3.x",exp="x",numchild="0",value="1",type="int"},child={name="var3.y",exp="y",numchild="0",value="2",type="int"},child={name="var3.z",exp="z",numchild="2",value="{...}",type="struct bar"}],has_more="0""#,
        );
        let children: Vec<VarChild> = fields
            .get("children")
            .unwrap()
            .items()
            .filter_map(Value::as_tuple)
            .map(|t| VarChild::from_tuple(t).unwrap())
            .collect();
        assert_eq!(children.len(), 3);
        assert_eq!(children[0].exp, "x");
        assert_eq!(children[2].numchild, 2);
    }
}
