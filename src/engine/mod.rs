// src/engine/mod.rs
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::process::Command;
use tracing::{debug, warn};

// MATLAB can take a long time to start; the probe gets a generous bound.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

// One execution request. Built per tools/call, dropped after the response.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub code: String,
    pub save_script: bool,
    pub script_path: Option<PathBuf>,
}

// What came back from the engine. Failures are data here, never Err:
// the dispatcher always gets a uniform object to render.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub output: String,
    pub error: Option<String>,
    pub script_path: Option<PathBuf>,
}

pub struct MatlabEngine {
    binary: String,
    temp_dir: PathBuf,
    // Tie-breaker for scripts created within the same millisecond.
    counter: AtomicU64,
}

impl MatlabEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self::with_temp_dir(binary, std::env::temp_dir().join("matlab-mcp-scripts"))
    }

    pub fn with_temp_dir(binary: impl Into<String>, temp_dir: PathBuf) -> Self {
        Self {
            binary: binary.into(),
            temp_dir,
            counter: AtomicU64::new(0),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    // 1. Run submitted source in batch mode
    //
    // The code is written to a uniquely named temp script, executed with
    // `matlab -batch "run('<path>')"`, and the temp file is removed on every
    // exit path (including spawn failure). If `save_script` is set, the
    // script is copied out before cleanup.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let script = normalize_punctuation(&request.code);
        let temp_path = self.temp_dir.join(self.unique_script_name());

        if let Err(e) = tokio::fs::create_dir_all(&self.temp_dir).await {
            return ExecutionResult {
                error: Some(format!(
                    "Failed to create temp directory {}: {e}",
                    self.temp_dir.display()
                )),
                ..Default::default()
            };
        }
        // Write and invoke as one fallible step so the cleanup below runs
        // no matter which of the two failed. A failed write can still leave
        // a partial file behind.
        let invocation = match tokio::fs::write(&temp_path, &script).await {
            Ok(()) => {
                debug!(script = %temp_path.display(), "invoking MATLAB");
                self.run_batch(&temp_path)
                    .await
                    .map_err(|e| format!("Failed to invoke MATLAB ({}): {e}", self.binary))
            }
            Err(e) => Err(format!(
                "Failed to write script {}: {e}",
                temp_path.display()
            )),
        };

        // Persist before cleanup so the saved copy survives even when the
        // invocation failed.
        let mut saved_path = None;
        if request.save_script {
            let dest = request
                .script_path
                .unwrap_or_else(|| PathBuf::from(default_saved_script_name()));
            match tokio::fs::copy(&temp_path, &dest).await {
                Ok(_) => saved_path = Some(dest),
                Err(e) => warn!(dest = %dest.display(), error = %e, "failed to save script copy"),
            }
        }

        // Best-effort cleanup on success and failure alike. A stale temp
        // file is not worth surfacing to the caller. NotFound is fine here:
        // a failed write may have created nothing.
        if let Err(e) = tokio::fs::remove_file(&temp_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %temp_path.display(), error = %e, "failed to remove temp script");
            }
        }

        let mut result = match invocation {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

                if output.status.success() {
                    // Zero exit with stderr text is a MATLAB warning: keep
                    // the output and carry the warning as the error field.
                    ExecutionResult {
                        output: stdout,
                        error: (!stderr.is_empty()).then_some(stderr),
                        script_path: None,
                    }
                } else {
                    let detail = if stderr.is_empty() {
                        format!("MATLAB exited with status {}", output.status)
                    } else {
                        stderr
                    };
                    ExecutionResult {
                        output: stdout,
                        error: Some(detail),
                        script_path: None,
                    }
                }
            }
            Err(message) => ExecutionResult {
                error: Some(message),
                ..Default::default()
            },
        };
        result.script_path = saved_path;
        result
    }

    // 2. Availability probe
    //
    // Trivial batch command under a timeout. Purely observational; the
    // one-shot availability latch lives in the dispatcher.
    pub async fn is_available(&self) -> bool {
        let probe = Command::new(&self.binary)
            .args(["-batch", "disp('ok')"])
            .output();

        match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
            Ok(Ok(output)) => output.status.success(),
            Ok(Err(e)) => {
                debug!(binary = %self.binary, error = %e, "MATLAB probe failed to spawn");
                false
            }
            Err(_) => {
                debug!(binary = %self.binary, "MATLAB probe timed out");
                false
            }
        }
    }

    // 3. Placeholder code generation
    //
    // Deterministic apart from the timestamp header. No engine invocation;
    // real natural-language generation is out of scope.
    pub fn generate_placeholder_code(&self, description: &str) -> String {
        let description = normalize_punctuation(description);
        // Single quotes double inside a MATLAB char literal.
        let quoted = description.replace('\'', "''");
        format!(
            "% MATLAB script generated by {server}\n\
             % Generated: {stamp}\n\
             % Description: {description}\n\
             \n\
             disp('Generated script for: {quoted}');\n\
             \n\
             % Replace this placeholder with an implementation of the\n\
             % described task.\n",
            server = crate::protocol::SERVER_NAME,
            stamp = Utc::now().to_rfc3339(),
        )
    }

    // Direct argument-vector invocation. Caller code never reaches a shell.
    async fn run_batch(&self, script: &Path) -> std::io::Result<std::process::Output> {
        Command::new(&self.binary)
            .args([
                "-nodisplay",
                "-nosplash",
                "-batch",
                &format!("run('{}')", script.display()),
            ])
            .output()
            .await
    }

    fn unique_script_name(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        format!(
            "mcp_script_{}_{}_{}.m",
            Utc::now().format("%Y%m%d_%H%M%S%3f"),
            std::process::id(),
            seq
        )
    }
}

pub fn default_saved_script_name() -> String {
    format!("matlab_script_{}.m", Utc::now().format("%Y%m%d_%H%M%S"))
}

// MATLAB's parser rejects the "smart" punctuation that chat clients love to
// paste. Fold the usual suspects down to ASCII before the code hits disk.
pub fn normalize_punctuation(code: &str) -> String {
    code.chars()
        .flat_map(|c| match c {
            '\u{2018}' | '\u{2019}' => vec!['\''],
            '\u{201C}' | '\u{201D}' => vec!['"'],
            '\u{2013}' | '\u{2014}' => vec!['-'],
            '\u{2026}' => vec!['.', '.', '.'],
            other => vec![other],
        })
        .collect()
}
