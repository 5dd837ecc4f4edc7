//! Runs external tools under a wall-clock deadline.

use std::ffi::OsStr;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::ToolError;
use crate::sanitize::truncate_chars;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Longest diagnostic kept from a tool's stderr, in characters.
const MAX_DIAGNOSTIC_CHARS: usize = 2000;

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stderr: String,
}

/// Spawns `program` and waits at most `limit` for it to exit. On expiry the
/// child is killed and reaped, and `ToolError::Timeout` is returned.
///
/// Stdout is discarded. Stderr is drained on a helper thread so a chatty
/// tool cannot block on a full pipe.
pub fn run_with_deadline<I, S>(
    program: &str,
    args: I,
    limit: Duration,
) -> Result<ProcessOutput, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ToolError::Spawn {
            program: program.to_string(),
            source: e,
        })?;

    let stderr_reader = child.stderr.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    });

    let status = wait_until(&mut child, limit).map_err(|e| match e {
        WaitError::Timeout => ToolError::Timeout {
            program: program.to_string(),
            limit,
        },
        WaitError::Io(source) => ToolError::Spawn {
            program: program.to_string(),
            source,
        },
    })?;

    let stderr = stderr_reader
        .and_then(|h| h.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default();

    Ok(ProcessOutput { status, stderr })
}

/// Like [`run_with_deadline`], but a non-zero exit becomes
/// `ToolError::NonZeroExit` carrying the tool's stderr.
pub fn run_checked<I, S>(program: &str, args: I, limit: Duration) -> Result<(), ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_with_deadline(program, args, limit)?;
    if output.status.success() {
        return Ok(());
    }
    let trimmed = output.stderr.trim();
    let diagnostic = if trimmed.is_empty() {
        "no diagnostic output".to_string()
    } else {
        truncate_chars(trimmed, MAX_DIAGNOSTIC_CHARS).to_string()
    };
    Err(ToolError::NonZeroExit {
        program: program.to_string(),
        status: output.status.to_string(),
        diagnostic,
    })
}

enum WaitError {
    Timeout,
    Io(std::io::Error),
}

fn wait_until(child: &mut Child, limit: Duration) -> Result<ExitStatus, WaitError> {
    let start = Instant::now();
    loop {
        match child.try_wait().map_err(WaitError::Io)? {
            Some(status) => return Ok(status),
            None => {
                if start.elapsed() >= limit {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(WaitError::Timeout);
                }
                thread::sleep(POLL_INTERVAL.min(limit.saturating_sub(start.elapsed())));
            }
        }
    }
}
