use std::process::Stdio;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::CompletionError;
use crate::services::completion::CompletionService;

const SYSTEM_PROMPT: &str = r#"You are the assistant of a community club on Telegram. Be concise and friendly. Respond in the same language as the user.

Format answers for a chat window:
- Use short paragraphs and bullet lists
- Use **bold** sparingly for key terms
- Never include internal reasoning or tool output"#;

#[derive(Debug, Clone)]
pub struct ClaudeResponse {
    pub success: bool,
    pub response: Option<String>,
    pub error: Option<String>,
}

/// Cached regex pattern for model name validation
fn model_name_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[a-zA-Z0-9._-]+$").expect("Invalid model name regex pattern"))
}

/// Validate model name format (alphanumeric, dots, dashes, underscores only)
fn is_valid_model_name(model: &str) -> bool {
    !model.is_empty() && model.len() <= 64 && model_name_regex().is_match(model)
}

/// Completion backend that shells out to the Claude CLI (`claude -p`)
pub struct ClaudeCli {
    model: Option<String>,
    program: String,
}

impl ClaudeCli {
    pub fn new(model: Option<String>) -> Self {
        Self {
            model,
            program: "claude".to_string(),
        }
    }

    /// Use a different executable; mainly for tests
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn args(&self) -> Result<Vec<String>, CompletionError> {
        let mut args = vec![
            "-p".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
            "--append-system-prompt".to_string(),
            SYSTEM_PROMPT.to_string(),
        ];
        if let Some(model) = &self.model {
            if !is_valid_model_name(model) {
                return Err(CompletionError::Unavailable(format!("invalid model name: {model}")));
            }
            args.push("--model".to_string());
            args.push(model.clone());
        }
        Ok(args)
    }

    async fn execute(&self, prompt: &str) -> Result<ClaudeResponse, CompletionError> {
        let mut child = Command::new(&self.program)
            .args(self.args()?)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CompletionError::Unavailable(format!("failed to start Claude: {e}. Is Claude CLI installed?"))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| CompletionError::Request(format!("failed to write prompt: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CompletionError::Request(format!("failed to read output: {e}")))?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok(parse_claude_output(&stdout))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Ok(ClaudeResponse {
                success: false,
                response: None,
                error: Some(if stderr.is_empty() {
                    format!("Process exited with code {:?}", output.status.code())
                } else {
                    stderr
                }),
            })
        }
    }
}

#[async_trait]
impl CompletionService for ClaudeCli {
    /// Dropping the `execute` future on cancel drops the child, and
    /// `kill_on_drop` terminates the process.
    async fn complete(&self, cancel: CancellationToken, prompt: &str) -> Result<String, CompletionError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CompletionError::Cancelled),
            r = self.execute(prompt) => r?,
        };
        if response.success {
            Ok(response.response.unwrap_or_default())
        } else {
            Err(CompletionError::Request(
                response.error.unwrap_or_else(|| "Unknown error".to_string()),
            ))
        }
    }
}

/// Parse Claude CLI JSON output
fn parse_claude_output(output: &str) -> ClaudeResponse {
    let mut response_text = String::new();

    for line in output.trim().lines() {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(line) {
            if json.get("is_error").and_then(|v| v.as_bool()) == Some(true) {
                let message = json
                    .get("result")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Claude reported an error")
                    .to_string();
                return ClaudeResponse {
                    success: false,
                    response: None,
                    error: Some(message),
                };
            }
            if let Some(result) = json.get("result").and_then(|v| v.as_str()) {
                response_text = result.to_string();
            } else if let Some(message) = json.get("message").and_then(|v| v.as_str()) {
                response_text = message.to_string();
            } else if let Some(content) = json.get("content").and_then(|v| v.as_str()) {
                response_text = content.to_string();
            }
        } else if !line.trim().is_empty() && !line.starts_with('{') {
            response_text.push_str(line);
            response_text.push('\n');
        }
    }

    // If no structured response, use raw output
    if response_text.is_empty() {
        response_text = output.trim().to_string();
    }

    ClaudeResponse {
        success: true,
        response: Some(response_text.trim().to_string()),
        error: None,
    }
}

/// Check if Claude CLI is available
pub fn is_claude_available() -> bool {
    #[cfg(not(unix))]
    {
        false
    }

    #[cfg(unix)]
    {
        match std::process::Command::new("which").arg("claude").output() {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========== is_valid_model_name tests ==========

    #[test]
    fn test_model_name_valid() {
        assert!(is_valid_model_name("sonnet"));
        assert!(is_valid_model_name("claude-3.5-haiku"));
        assert!(is_valid_model_name("opus_latest"));
    }

    #[test]
    fn test_model_name_rejected() {
        assert!(!is_valid_model_name(""));
        assert!(!is_valid_model_name(&"a".repeat(65)));
        assert!(!is_valid_model_name("sonnet; rm -rf /"));
        assert!(!is_valid_model_name("model with space"));
        assert!(!is_valid_model_name("$(cmd)"));
    }

    #[test]
    fn test_invalid_model_fails_before_spawn() {
        let cli = ClaudeCli::new(Some("bad model".to_string()));
        assert!(matches!(cli.args(), Err(CompletionError::Unavailable(_))));
    }

    #[test]
    fn test_args_include_model() {
        let cli = ClaudeCli::new(Some("haiku".to_string()));
        let args = cli.args().unwrap();
        assert_eq!(&args[args.len() - 2..], &["--model".to_string(), "haiku".to_string()]);
    }

    // ========== parse_claude_output tests ==========

    #[test]
    fn test_parse_claude_output_json_result() {
        let output = r#"{"session_id": "test-123", "result": "Hello, world!"}"#;
        let response = parse_claude_output(output);

        assert!(response.success);
        assert_eq!(response.response, Some("Hello, world!".to_string()));
    }

    #[test]
    fn test_parse_claude_output_error_result() {
        let output = r#"{"is_error": true, "result": "Credit balance is too low"}"#;
        let response = parse_claude_output(output);

        assert!(!response.success);
        assert_eq!(response.error, Some("Credit balance is too low".to_string()));
    }

    #[test]
    fn test_parse_claude_output_plain_text() {
        let response = parse_claude_output("Just plain text response");
        assert_eq!(response.response, Some("Just plain text response".to_string()));
    }

    #[test]
    fn test_parse_claude_output_multiline() {
        let output = "{\"session_id\": \"s1\"}\n{\"result\": \"Final result\"}";
        let response = parse_claude_output(output);
        assert_eq!(response.response, Some("Final result".to_string()));
    }

    #[test]
    fn test_parse_claude_output_empty() {
        let response = parse_claude_output("");
        assert!(response.success);
        assert_eq!(response.response, Some("".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let cli = ClaudeCli::new(None).with_program("/nonexistent/clubbot-claude");
        let result = cli.complete(CancellationToken::new(), "hi").await;
        assert!(matches!(result, Err(CompletionError::Unavailable(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_running_process() {
        use std::os::unix::fs::PermissionsExt;

        // Stand-in CLI that ignores its arguments and never answers
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("fake-claude");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cli = ClaudeCli::new(None).with_program(script.display().to_string());
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let result = cli.complete(token, "hi").await;
        assert!(matches!(result, Err(CompletionError::Cancelled)));
    }
}
