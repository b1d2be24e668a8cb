//! Reviewer backed by an external program.
//!
//! The program receives a JSON request on stdin and must print a verdict
//! object on stdout. Anything around the object (log lines, a JSON envelope
//! with a `result` string) is tolerated.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{ReviewError, ReviewRequest, Reviewer};
use crate::config::CommandReviewerConfig;

const INSTRUCTIONS: &str = "Rate how important it is to remember the given content for future \
work, from 0 (worthless) to 10 (critical). Respond with a single JSON object: \
{\"importance_score\": <integer 0-10>, \"reasoning\": <string>, \"confidence\": <number 0-1>}.";

pub struct CommandReviewer {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandReviewer {
    pub fn new(config: &CommandReviewerConfig) -> Self {
        Self {
            name: config.name.clone(),
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }

    fn prompt(&self, request: &ReviewRequest) -> String {
        json!({
            "instructions": INSTRUCTIONS,
            "reviewer": self.name,
            "memory_type": request.memory_type,
            "content": request.content,
            "context": request.context,
        })
        .to_string()
    }

    /// Run the program to completion. The child is killed if this future is
    /// dropped, e.g. by a timeout.
    async fn run(&self, input: &str) -> anyhow::Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .with_context(|| format!("failed to write request to {}", self.program))?;
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("failed to wait for {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} exited with {}: {}", self.program, output.status, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// The outermost `{...}` span in `text`.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a verdict from program output, unwrapping a `{"result": "..."}`
/// envelope when the object itself carries no score.
fn parse_output(stdout: &str) -> Result<serde_json::Value, ReviewError> {
    let object = extract_json_object(stdout)
        .ok_or_else(|| ReviewError::Malformed("no JSON object in reviewer output".into()))?;
    let value: serde_json::Value =
        serde_json::from_str(object).map_err(|e| ReviewError::Malformed(e.to_string()))?;

    if value.get("importance_score").is_none() {
        if let Some(inner) = value.get("result").and_then(|r| r.as_str()) {
            return parse_output(inner);
        }
    }
    Ok(value)
}

#[async_trait]
impl Reviewer for CommandReviewer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn review(&self, request: &ReviewRequest) -> Result<serde_json::Value, ReviewError> {
        let stdout = self.run(&self.prompt(request)).await?;
        debug!(reviewer = %self.name, bytes = stdout.len(), "command reviewer responded");
        parse_output(&stdout)
    }
}
