use std::io::Read;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use wait_timeout::ChildExt;

/// Cap on captured stderr kept in error messages.
const STDERR_TAIL_BYTES: usize = 4096;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },
    #[error("{program} exited with {status}: {stderr}")]
    Failed { program: String, status: String, stderr: String },
}

#[derive(Clone, Debug)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut p| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = p.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    let bytes = handle.and_then(|h| h.join().ok()).unwrap_or_default();
    String::from_utf8_lossy(&bytes).trim().to_string()
}

fn tail(s: &str) -> String {
    if s.len() <= STDERR_TAIL_BYTES {
        return s.to_string();
    }
    let mut start = s.len() - STDERR_TAIL_BYTES;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &s[start..])
}

fn describe(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("code {code}"),
        None => "signal".to_string(),
    }
}

/// Run `program` to completion, killing it once `timeout` elapses. Stdout and
/// stderr are drained on their own threads so a chatty child cannot block on
/// a full pipe.
pub fn run_with_timeout(
    program: &str,
    args: &[String],
    dir: Option<&Path>,
    timeout: Duration,
) -> Result<ToolOutput, ToolError> {
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    tracing::debug!(program, ?args, "spawning");

    let mut child = cmd.spawn().map_err(|source| ToolError::Spawn { program: program.to_string(), source })?;
    let out = drain(child.stdout.take());
    let err = drain(child.stderr.take());

    let waited = child.wait_timeout(timeout);
    let status = match waited {
        Ok(Some(status)) => status,
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            // readers are left detached; a grandchild may still hold the pipes
            return Err(ToolError::Timeout { program: program.to_string(), secs: timeout.as_secs() });
        }
        Err(source) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ToolError::Wait { program: program.to_string(), source });
        }
    };

    let stdout = collect(out);
    let stderr = collect(err);
    if !status.success() {
        return Err(ToolError::Failed { program: program.to_string(), status: describe(status), stderr: tail(&stderr) });
    }
    Ok(ToolOutput { stdout, stderr })
}

/// Substitute `{key}` placeholders in configured argument templates. Each
/// template is scanned once; inserted values are never rescanned and unknown
/// placeholders are left as written.
pub fn render_args(templates: &[String], vars: &[(&str, String)]) -> Vec<String> {
    templates.iter().map(|t| render_template(t, vars)).collect()
}

fn render_template(template: &str, vars: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter().find(|(k, _)| *k == key).map(|(_, v)| (v, close))
        });
        match value {
            Some((v, close)) => {
                out.push_str(v);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
