//! Built-in native tools.
//!
//! Registered through [`all_tools`], a fixed constructor table:
//! `terminate` (the loop's control tool), `str_replace_editor` for local
//! file edits, `shell` for running commands, and `ask_human` for putting a
//! question to the operator.
//!
//! ```rust
//! use mcp_agent::tools::builtin::all_tools;
//!
//! let tools = all_tools();
//! assert_eq!(tools.len(), 4);
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::Mutex;

use crate::error::AgentError;
use crate::tools::tool::{FnTool, Tool, ToolExecutionContext};
use crate::tools::types::ToolParameters;
use crate::util::text::truncate_utf8;

/// Name of the control tool that ends a run.
pub const TERMINATE_TOOL: &str = "terminate";
pub const ASK_HUMAN_TOOL: &str = "ask_human";

const SHELL_OUTPUT_MAX_BYTES: usize = 32_768;
const VIEW_MAX_BYTES: usize = 65_536;
const SHELL_TIMEOUT: Duration = Duration::from_secs(30);

/// Every built-in tool, in registration order.
pub fn all_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        terminate_tool(),
        str_replace_editor_tool(),
        shell_tool(),
        ask_human_tool(),
    ]
}

/// Create the `terminate` tool.
///
/// Calling it signals that the task is done; the `message` argument becomes
/// the run output.
pub fn terminate_tool() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        TERMINATE_TOOL,
        "Finish the task and stop execution. Call this once the task is complete.",
        ToolParameters::object()
            .string("message", "Final answer or completion summary", true)
            .build(),
        |args, _ctx: ToolExecutionContext| async move {
            let message = args.get_str("message")?;
            tracing::info!(message, "task completed");
            Ok(serde_json::json!({
                "status": "completed",
                "message": message,
            }))
        },
    ))
}

/// Create the `str_replace_editor` tool: `create`, `view` and
/// `str_replace` on local files.
pub fn str_replace_editor_tool() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        "str_replace_editor",
        "Create, view, or edit a local text file",
        ToolParameters::object()
            .string_enum(
                "command",
                "Operation to perform",
                &["create", "view", "str_replace"],
                true,
            )
            .string("path", "File path", true)
            .string("file_text", "Content for `create`", false)
            .string("old_str", "Exact text to replace for `str_replace`", false)
            .string("new_str", "Replacement text for `str_replace`", false)
            .build(),
        |args, _ctx: ToolExecutionContext| async move {
            let command = args.get_str("command")?;
            let path = args.get_str("path")?;
            match command {
                "create" => {
                    let text = args.get_str("file_text")?;
                    create_file(path, text).await
                }
                "view" => view_file(path).await,
                "str_replace" => {
                    let old = args.get_str("old_str")?;
                    let new = args.get_str_opt("new_str").unwrap_or("");
                    replace_in_file(path, old, new).await
                }
                other => Err(AgentError::InvalidArgument(format!(
                    "unsupported editor command: {other}"
                ))),
            }
        },
    ))
}

async fn create_file(path: &str, text: &str) -> Result<serde_json::Value, AgentError> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| editor_error(format!("failed to create directories for {path}: {e}")))?;
        }
    }
    tokio::fs::write(path, text)
        .await
        .map_err(|e| editor_error(format!("{path}: {e}")))?;
    Ok(serde_json::Value::String(format!(
        "Created {path} ({} bytes)",
        text.len()
    )))
}

async fn view_file(path: &str) -> Result<serde_json::Value, AgentError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| editor_error(format!("{path}: {e}")))?;
    let mut display = truncate_utf8(&content, VIEW_MAX_BYTES);
    if display.len() < content.len() {
        display.push_str("\n... (truncated)");
    }
    Ok(serde_json::Value::String(display))
}

async fn replace_in_file(path: &str, old: &str, new: &str) -> Result<serde_json::Value, AgentError> {
    if old.is_empty() {
        return Err(AgentError::InvalidArgument("old_str must not be empty".into()));
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| editor_error(format!("{path}: {e}")))?;
    match content.matches(old).count() {
        0 => Err(editor_error(format!("old_str not found in {path}"))),
        1 => {
            tokio::fs::write(path, content.replacen(old, new, 1))
                .await
                .map_err(|e| editor_error(format!("{path}: {e}")))?;
            Ok(serde_json::Value::String(format!("Edited {path}")))
        }
        n => Err(editor_error(format!(
            "old_str occurs {n} times in {path}; it must be unique"
        ))),
    }
}

fn editor_error(message: String) -> AgentError {
    AgentError::tool("str_replace_editor", message)
}

/// Create the `shell` tool: executes a command via `sh -c`.
///
/// Captures stdout and stderr, applies a 30-second timeout, truncates output
/// beyond 32 KB, and kills the child when the run is cancelled.
pub fn shell_tool() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        "shell",
        "Execute a shell command and return its output",
        ToolParameters::object()
            .string("command", "The shell command to execute", true)
            .build(),
        |args, ctx: ToolExecutionContext| async move {
            let command = args.get_str("command")?.to_string();

            let child = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&command)
                .kill_on_drop(true)
                .output();

            let output = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(AgentError::Cancelled),
                result = tokio::time::timeout(SHELL_TIMEOUT, child) => match result {
                    Ok(Ok(output)) => output,
                    Ok(Err(e)) => return Err(AgentError::tool("shell", e.to_string())),
                    Err(_) => {
                        return Err(AgentError::tool(
                            "shell",
                            format!("command timed out after {}s", SHELL_TIMEOUT.as_secs()),
                        ))
                    }
                },
            };

            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut combined = format!("{stdout}{stderr}");
            let truncated = combined.len() > SHELL_OUTPUT_MAX_BYTES;
            if truncated {
                combined = truncate_utf8(&combined, SHELL_OUTPUT_MAX_BYTES);
                combined.push_str("\n... (truncated)");
            }

            Ok(serde_json::json!({
                "exit_code": output.status.code(),
                "output": combined,
                "truncated": truncated,
            }))
        },
    ))
}

type HumanInput = Arc<Mutex<BufReader<Box<dyn AsyncRead + Send + Unpin>>>>;

/// Create the `ask_human` tool, reading answers from standard input.
pub fn ask_human_tool() -> Arc<dyn Tool> {
    ask_human_tool_with(tokio::io::stdin())
}

/// Create the `ask_human` tool with answers read from `input`.
///
/// The question goes to stderr; one line of `input` is the answer. Calls
/// are serialized so concurrent questions never share a line.
pub fn ask_human_tool_with<R>(input: R) -> Arc<dyn Tool>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let input: HumanInput = Arc::new(Mutex::new(BufReader::new(Box::new(input))));
    Arc::new(FnTool::new(
        ASK_HUMAN_TOOL,
        "Ask the human operator a question and wait for a one-line answer",
        ToolParameters::object()
            .string("question", "The question to ask", true)
            .build(),
        move |args, ctx: ToolExecutionContext| {
            let input = Arc::clone(&input);
            async move {
                let question = args.get_str("question")?.to_string();
                tracing::info!(question = %question, "waiting for operator answer");

                let mut answer = String::new();
                let read = tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => return Err(AgentError::Cancelled),
                    read = async {
                        let mut reader = input.lock().await;
                        eprint!("\n{question}\n> ");
                        reader.read_line(&mut answer).await
                    } => read,
                };

                match read {
                    Ok(0) => Err(AgentError::tool(
                        ASK_HUMAN_TOOL,
                        "input closed before an answer was given",
                    )),
                    Ok(_) => Ok(serde_json::json!({
                        "question": question,
                        "answer": answer.trim_end(),
                    })),
                    Err(e) => Err(AgentError::tool(ASK_HUMAN_TOOL, e.to_string())),
                }
            }
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::arguments::ToolArguments;
    use serde_json::json;

    fn args(value: serde_json::Value) -> ToolArguments {
        ToolArguments::new(value)
    }

    #[test]
    fn all_tools_have_unique_names() {
        let tools = all_tools();
        let mut names: Vec<_> = tools.iter().map(|t| t.name().to_string()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), tools.len());
    }

    #[tokio::test]
    async fn terminate_echoes_message() {
        let out = terminate_tool()
            .execute(&args(json!({ "message": "done" })), &ToolExecutionContext::default())
            .await
            .unwrap();
        assert_eq!(out, json!({ "status": "completed", "message": "done" }));
    }

    #[tokio::test]
    async fn editor_creates_views_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/notes.txt");
        let path = path.to_str().unwrap();
        let editor = str_replace_editor_tool();
        let ctx = ToolExecutionContext::default();

        editor
            .execute(
                &args(json!({ "command": "create", "path": path, "file_text": "alpha beta" })),
                &ctx,
            )
            .await
            .unwrap();
        editor
            .execute(
                &args(json!({
                    "command": "str_replace",
                    "path": path,
                    "old_str": "beta",
                    "new_str": "gamma",
                })),
                &ctx,
            )
            .await
            .unwrap();
        let viewed = editor
            .execute(&args(json!({ "command": "view", "path": path })), &ctx)
            .await
            .unwrap();
        assert_eq!(viewed, json!("alpha gamma"));
    }

    #[tokio::test]
    async fn editor_rejects_ambiguous_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.txt");
        std::fs::write(&path, "x x").unwrap();

        let err = str_replace_editor_tool()
            .execute(
                &args(json!({
                    "command": "str_replace",
                    "path": path.to_str().unwrap(),
                    "old_str": "x",
                    "new_str": "y",
                })),
                &ToolExecutionContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolExecution { message, .. } if message.contains("2 times")));
    }

    #[tokio::test]
    async fn ask_human_reads_one_line_per_question() {
        let tool = ask_human_tool_with(&b"blue\r\nforty-two\n"[..]);
        let ctx = ToolExecutionContext::default();

        let first = tool
            .execute(&args(json!({ "question": "Favourite colour?" })), &ctx)
            .await
            .unwrap();
        let second = tool
            .execute(&args(json!({ "question": "The answer?" })), &ctx)
            .await
            .unwrap();

        assert_eq!(first, json!({ "question": "Favourite colour?", "answer": "blue" }));
        assert_eq!(second["answer"], json!("forty-two"));

        let err = tool
            .execute(&args(json!({ "question": "Anyone there?" })), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolExecution { ref tool_name, .. } if tool_name == ASK_HUMAN_TOOL));
    }

    #[tokio::test]
    async fn ask_human_stops_waiting_when_cancelled() {
        let (_operator, input) = tokio::io::duplex(64);
        let tool = ask_human_tool_with(input);
        let cancel = tokio_util::sync::CancellationToken::new();
        let ctx = ToolExecutionContext::new(cancel.clone());

        let call_args = args(json!({ "question": "Still there?" }));
        let pending = tool.execute(&call_args, &ctx);
        let (result, _) = tokio::join!(pending, async {
            tokio::task::yield_now().await;
            cancel.cancel();
        });

        assert!(matches!(result, Err(AgentError::Cancelled)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_captures_output_and_exit_code() {
        let out = shell_tool()
            .execute(
                &args(json!({ "command": "echo hi; exit 3" })),
                &ToolExecutionContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(out["exit_code"], json!(3));
        assert_eq!(out["output"], json!("hi\n"));
        assert_eq!(out["truncated"], json!(false));
    }
}
