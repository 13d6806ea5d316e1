//! Variable-object cache.
//!
//! GDB varobjs are stateful debugger-side handles: creating one costs a
//! round trip and each must be explicitly `-var-update`d after a stop. The
//! cache coalesces the client's repeated variable requests onto a stable set
//! of varobjs, keyed by `(thread, frame, stack depth, expression)`.
//!
//! Depth participates in the key because frame ids are relative to the
//! current call stack: after a return, the same `(thread, frame)` pair
//! addresses a different source frame, and the stale entry must miss.

use crate::commands::VarCreated;
use crate::{GdbMi, Result};
use regex::Regex;
use std::collections::HashMap;

/// One cached variable object.
#[derive(Debug, Clone, PartialEq)]
pub struct VarObj {
    /// Debugger-assigned identifier (opaque, stable for this varobj).
    pub varname: String,
    /// Source-visible expression; for drilled-in children this is
    /// synthesized (`r.x`, `f[2]`).
    pub expression: String,
    pub vtype: String,
    pub value: String,
    pub numchild: i64,
    /// True for a top-level local listed by `-stack-list-variables`;
    /// false for a watch created from an arbitrary expression.
    pub is_var: bool,
    /// True when the entry was created by drilling into a parent.
    pub is_child: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct VarKey {
    thread: i64,
    frame: i64,
    depth: i64,
    expression: String,
}

/// Outcome of reconciling one entry against `-var-update`.
#[derive(Debug, Clone, PartialEq)]
pub enum Updated {
    InScope(VarObj),
    /// The varobj left scope; it has been deleted on both sides and the
    /// caller is expected to recreate it.
    OutOfScope,
}

pub struct VarManager {
    vars: HashMap<VarKey, VarObj>,
    array_type: Regex,
}

impl Default for VarManager {
    fn default() -> Self {
        Self::new()
    }
}

impl VarManager {
    pub fn new() -> Self {
        VarManager {
            vars: HashMap::new(),
            array_type: Regex::new(r".*\[\d+\].*").unwrap(),
        }
    }

    /// Pure lookup.
    pub fn get(&self, thread: i64, frame: i64, depth: i64, expression: &str) -> Option<&VarObj> {
        self.vars.get(&VarKey {
            thread,
            frame,
            depth,
            expression: expression.to_string(),
        })
    }

    /// Store a new entry built from a `-var-create` (or child listing)
    /// payload, overwriting any prior entry with the same key.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        thread: i64,
        frame: i64,
        depth: i64,
        expression: &str,
        is_var: bool,
        is_child: bool,
        created: &VarCreated,
    ) -> VarObj {
        let var = VarObj {
            varname: created.name.clone(),
            expression: expression.to_string(),
            vtype: created.vtype.clone(),
            value: created.value.clone(),
            numchild: created.numchild,
            is_var,
            is_child,
        };
        self.vars.insert(
            VarKey {
                thread,
                frame,
                depth,
                expression: expression.to_string(),
            },
            var.clone(),
        );
        var
    }

    /// Issue `-var-update` for the entry and reconcile: an in-scope change
    /// refreshes the cached value, an out-of-scope report deletes the entry
    /// here and in the debugger. A missing entry reports `OutOfScope` so the
    /// caller takes its recreate path.
    pub async fn update(
        &mut self,
        gdb: &GdbMi,
        thread: i64,
        frame: i64,
        depth: i64,
        expression: &str,
    ) -> Result<Updated> {
        let key = VarKey {
            thread,
            frame,
            depth,
            expression: expression.to_string(),
        };
        let Some(entry) = self.vars.get(&key) else {
            return Ok(Updated::OutOfScope);
        };
        let varname = entry.varname.clone();

        let changes = gdb.var_update(thread, &varname).await?;
        let change = changes.into_iter().find(|c| c.name == varname);

        match change {
            None => Ok(Updated::InScope(self.vars[&key].clone())),
            Some(change) if change.in_scope => {
                let entry = self.vars.get_mut(&key).unwrap();
                if let Some(value) = change.value {
                    entry.value = value;
                }
                Ok(Updated::InScope(entry.clone()))
            }
            Some(_) => {
                self.vars.remove(&key);
                if let Err(e) = gdb.var_delete(&varname).await {
                    log::warn!("failed to delete out-of-scope varobj {varname}: {e}");
                }
                Ok(Updated::OutOfScope)
            }
        }
    }

    /// Evict the entry with the given debugger-side name and issue
    /// `-var-delete`.
    pub async fn remove(
        &mut self,
        gdb: &GdbMi,
        thread: i64,
        frame: i64,
        depth: i64,
        varname: &str,
    ) -> Result<()> {
        let key = self
            .vars
            .iter()
            .find(|(k, v)| {
                k.thread == thread && k.frame == frame && k.depth == depth && v.varname == varname
            })
            .map(|(k, _)| k.clone());
        if let Some(key) = key {
            self.vars.remove(&key);
        }
        gdb.var_delete(varname).await
    }

    /// Expressions of the top-level (`is_var`) entries cached for one frame
    /// context — the set iterated when rendering a frame scope.
    pub fn frame_expressions(&self, thread: i64, frame: i64, depth: i64) -> Vec<String> {
        let mut expressions: Vec<String> = self
            .vars
            .iter()
            .filter(|(k, v)| {
                k.thread == thread && k.frame == frame && k.depth == depth && v.is_var
            })
            .map(|(k, _)| k.expression.clone())
            .collect();
        expressions.sort();
        expressions
    }

    pub fn find_by_varname(
        &self,
        thread: i64,
        frame: i64,
        depth: i64,
        varname: &str,
    ) -> Option<&VarObj> {
        self.vars
            .iter()
            .find(|(k, v)| {
                k.thread == thread && k.frame == frame && k.depth == depth && v.varname == varname
            })
            .map(|(_, v)| v)
    }

    /// Array-typed varobjs need their children re-qualified: GDB reports the
    /// elements as bare indices.
    pub fn is_array_type(&self, vtype: &str) -> bool {
        self.array_type.is_match(vtype)
    }

    /// The synthesized expression re-addressing a child (`r.x`, `f[0]`).
    pub fn child_expression(&self, parent: &VarObj, exp: &str) -> String {
        if self.is_array_type(&parent.vtype) {
            let index = exp.trim_start_matches('[').trim_end_matches(']');
            format!("{}[{}]", parent.expression, index)
        } else {
            format!("{}.{}", parent.expression, exp)
        }
    }

    /// The display label for a child: `[0]` for array elements, the member
    /// name otherwise.
    pub fn child_label(&self, parent: &VarObj, exp: &str) -> String {
        if self.is_array_type(&parent.vtype) {
            let index = exp.trim_start_matches('[').trim_end_matches(']');
            format!("[{index}]")
        } else {
            exp.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(name: &str, vtype: &str, value: &str, numchild: i64) -> VarCreated {
        VarCreated {
            name: name.to_string(),
            numchild,
            vtype: vtype.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn add_then_get_returns_same_entry() {
        let mut mgr = VarManager::new();
        mgr.add(1, 0, 1, "a", true, false, &created("var1", "int", "1", 0));

        let var = mgr.get(1, 0, 1, "a").unwrap();
        assert_eq!(var.varname, "var1");
        assert_eq!(var.value, "1");
        assert!(var.is_var);
        assert!(!var.is_child);
    }

    #[test]
    fn depth_participates_in_the_key() {
        let mut mgr = VarManager::new();
        mgr.add(1, 0, 1, "a", true, false, &created("var1", "int", "1", 0));

        // Same thread/frame/name at another stack depth is a different entry.
        assert!(mgr.get(1, 0, 2, "a").is_none());

        mgr.add(1, 0, 2, "a", true, false, &created("var9", "int", "42", 0));
        assert_eq!(mgr.get(1, 0, 1, "a").unwrap().varname, "var1");
        assert_eq!(mgr.get(1, 0, 2, "a").unwrap().varname, "var9");
    }

    #[test]
    fn add_overwrites_identical_key() {
        let mut mgr = VarManager::new();
        mgr.add(1, 0, 1, "a", true, false, &created("var1", "int", "1", 0));
        mgr.add(1, 0, 1, "a", true, false, &created("var2", "int", "7", 0));

        assert_eq!(mgr.get(1, 0, 1, "a").unwrap().varname, "var2");
        assert_eq!(mgr.frame_expressions(1, 0, 1), vec!["a"]);
    }

    #[test]
    fn frame_expressions_lists_only_top_level_vars() {
        let mut mgr = VarManager::new();
        mgr.add(1, 0, 1, "a", true, false, &created("var1", "int", "1", 0));
        mgr.add(1, 0, 1, "r", true, false, &created("var2", "struct foo", "{...}", 3));
        mgr.add(1, 0, 1, "r.x", false, true, &created("var2.x", "int", "1", 0));
        mgr.add(1, 0, 1, "watched", false, false, &created("var3", "int", "5", 0));

        assert_eq!(mgr.frame_expressions(1, 0, 1), vec!["a", "r"]);
    }

    #[test]
    fn find_by_varname_matches_context() {
        let mut mgr = VarManager::new();
        mgr.add(1, 0, 1, "r", true, false, &created("var2", "struct foo", "{...}", 3));

        assert_eq!(mgr.find_by_varname(1, 0, 1, "var2").unwrap().expression, "r");
        assert!(mgr.find_by_varname(1, 1, 1, "var2").is_none());
        assert!(mgr.find_by_varname(1, 0, 1, "var9").is_none());
    }

    #[test]
    fn array_type_detection() {
        let mgr = VarManager::new();
        assert!(mgr.is_array_type("int [3]"));
        assert!(mgr.is_array_type("char [256]"));
        assert!(mgr.is_array_type("struct foo *[4]"));
        assert!(!mgr.is_array_type("int"));
        assert!(!mgr.is_array_type("struct foo"));
        assert!(!mgr.is_array_type("int []"));
    }

    #[test]
    fn child_naming_is_array_aware() {
        let mgr = VarManager::new();
        let array = VarObj {
            varname: "var5".into(),
            expression: "f".into(),
            vtype: "int [3]".into(),
            value: "[3]".into(),
            numchild: 3,
            is_var: true,
            is_child: false,
        };
        assert_eq!(mgr.child_expression(&array, "0"), "f[0]");
        assert_eq!(mgr.child_label(&array, "0"), "[0]");
        // Already-bracketed element names qualify the same way.
        assert_eq!(mgr.child_expression(&array, "[2]"), "f[2]");

        let record = VarObj {
            varname: "var3".into(),
            expression: "r".into(),
            vtype: "struct foo".into(),
            value: "{...}".into(),
            numchild: 3,
            is_var: true,
            is_child: false,
        };
        assert_eq!(mgr.child_expression(&record, "x"), "r.x");
        assert_eq!(mgr.child_label(&record, "x"), "x");
    }
}
