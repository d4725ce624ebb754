// crates/mediator-core/src/runtime/tools.rs
// ============================================================================
// Module: Filesystem Tools
// Description: Built-in read and write tools confined to a base directory.
// Purpose: Give plans file access that cannot leave the tool's root.
// Dependencies: serde_json, crate::fs
// ============================================================================

//! ## Overview
//! Both tools resolve their `path` argument with
//! [`resolve_safe_path`](crate::fs::resolve_safe_path) before touching the
//! filesystem, so traversal or a symlink component surfaces as
//! [`ToolError::Path`] and the tool never sees the unsafe path. Each tool
//! exposes the argument schema it should be registered with.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;

use serde_json::Value;
use serde_json::json;

use crate::core::DEFAULT_HASH_ALGORITHM;
use crate::core::hash_bytes;
use crate::fs::read_file_nofollow;
use crate::fs::resolve_safe_path;
use crate::fs::write_atomic;
use crate::interfaces::Tool;
use crate::interfaces::ToolContext;
use crate::interfaces::ToolError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default read cap for [`ReadFileTool`] (4 MiB).
pub const DEFAULT_READ_LIMIT: u64 = 4 * 1024 * 1024;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the string argument `name`.
fn string_arg<'a>(args: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArgs(format!("missing string argument {name}")))
}

// ============================================================================
// SECTION: Read Tool
// ============================================================================

/// Reads one file under a base directory.
///
/// Returns `{path, sha256, bytes, content}`; `content` is null when the file
/// is not UTF-8.
#[derive(Debug, Clone)]
pub struct ReadFileTool {
    /// Directory all reads are confined to.
    base_dir: PathBuf,
    /// Largest file the tool will read.
    max_bytes: u64,
}

impl ReadFileTool {
    /// Creates a read tool rooted at `base_dir`.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_bytes: DEFAULT_READ_LIMIT,
        }
    }

    /// Overrides the read cap.
    #[must_use]
    pub const fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Argument schema to register the tool with.
    #[must_use]
    pub fn args_schema() -> Value {
        json!({
            "type": "object",
            "properties": {"path": {"type": "string", "minLength": 1}},
            "required": ["path"]
        })
    }
}

impl Tool for ReadFileTool {
    fn invoke(&self, args: &Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let relative = string_arg(args, "path")?;
        let target = resolve_safe_path(&self.base_dir, Path::new(relative))?;
        let bytes = read_file_nofollow(&target, self.max_bytes)?;
        let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, &bytes);
        Ok(json!({
            "path": relative,
            "sha256": digest.value,
            "bytes": bytes.len(),
            "content": std::str::from_utf8(&bytes).ok(),
        }))
    }
}

// ============================================================================
// SECTION: Write Tool
// ============================================================================

/// Atomically writes one file under a base directory.
///
/// The parent directory must already exist. Returns `{path, sha256}`.
#[derive(Debug, Clone)]
pub struct WriteFileTool {
    /// Directory all writes are confined to.
    base_dir: PathBuf,
}

impl WriteFileTool {
    /// Creates a write tool rooted at `base_dir`.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Argument schema to register the tool with.
    #[must_use]
    pub fn args_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "minLength": 1},
                "content": {"type": "string"}
            },
            "required": ["path", "content"]
        })
    }
}

impl Tool for WriteFileTool {
    fn invoke(&self, args: &Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let relative = string_arg(args, "path")?;
        let content = string_arg(args, "content")?;
        let target = resolve_safe_path(&self.base_dir, Path::new(relative))?;
        let file_name = target.file_name().and_then(|name| name.to_str());
        let (Some(parent), Some(name)) = (target.parent(), file_name) else {
            return Err(ToolError::InvalidArgs(format!("not a file path: {relative}")));
        };
        if !parent.is_dir() {
            return Err(ToolError::Failed(format!("parent directory missing for {relative}")));
        }
        write_atomic(parent, name, content.as_bytes())?;
        let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, content.as_bytes());
        Ok(json!({"path": relative, "sha256": digest.value}))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::*;
    use crate::core::AgentId;
    use crate::core::PlanId;
    use crate::core::SessionId;
    use crate::core::ToolCallId;
    use crate::fs::SafeFsError;

    fn ctx() -> ToolContext {
        ToolContext {
            plan_id: PlanId::new("p-1"),
            tool_call_id: ToolCallId::new("c-1"),
            session_id: SessionId::new("s-1"),
            issuer_id: AgentId::new("planner"),
            extra: Value::Null,
        }
    }

    #[test]
    fn write_then_read_inside_base() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("out")).unwrap();
        let written = WriteFileTool::new(dir.path())
            .invoke(&json!({"path": "out/post.md", "content": "# Hello"}), &ctx())
            .unwrap();
        let read =
            ReadFileTool::new(dir.path()).invoke(&json!({"path": "out/post.md"}), &ctx()).unwrap();
        assert_eq!(read["content"], "# Hello");
        assert_eq!(read["sha256"], written["sha256"]);
    }

    #[test]
    fn traversal_is_refused_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let err = WriteFileTool::new(dir.path())
            .invoke(&json!({"path": "../escape.txt", "content": "x"}), &ctx())
            .unwrap_err();
        assert!(matches!(err, ToolError::Path(SafeFsError::PathEscape { .. })));
        assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn parent_after_missing_dir_cannot_reach_linked_dir() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "hidden").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let read = ReadFileTool::new(dir.path())
            .invoke(&json!({"path": "nope/../link/secret.txt"}), &ctx())
            .unwrap_err();
        assert!(matches!(read, ToolError::Path(SafeFsError::PathEscape { .. })));
        let write = WriteFileTool::new(dir.path())
            .invoke(&json!({"path": "nope/../link/new.txt", "content": "x"}), &ctx())
            .unwrap_err();
        assert!(matches!(write, ToolError::Path(SafeFsError::PathEscape { .. })));
        assert!(!outside.path().join("new.txt").exists());
    }
}
