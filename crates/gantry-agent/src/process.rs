//! Child processes with output streamed line by line to a console sink.

use gantry_core::ports::ConsoleSink;
use gantry_core::{Error, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Console tags applied to a process's stdout and stderr.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StreamTags {
    pub out: &'static str,
    pub err: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    Exited(i32),
    Cancelled,
}

#[derive(Clone, Copy)]
enum Stream {
    Out,
    Err,
}

/// Run `command` to completion, or kill it once `cancel` fires.
pub(crate) async fn run_streaming(
    mut command: Command,
    console: &dyn ConsoleSink,
    tags: StreamTags,
    cancel: &CancellationToken,
) -> Result<ProcessExit> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Internal("child stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Internal("child stderr not captured".to_string()))?;

    let (tx, mut rx) = mpsc::channel(256);
    tokio::spawn(forward_lines(stdout, Stream::Out, tx.clone()));
    tokio::spawn(forward_lines(stderr, Stream::Err, tx));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                kill(&mut child).await;
                return Ok(ProcessExit::Cancelled);
            }
            line = rx.recv() => match line {
                Some((Stream::Out, line)) => console.tagged_output(tags.out, &line),
                Some((Stream::Err, line)) => console.tagged_err_output(tags.err, &line),
                None => break,
            }
        }
    }

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            kill(&mut child).await;
            return Ok(ProcessExit::Cancelled);
        }
        status = child.wait() => status?,
    };

    let code = status.code().unwrap_or(-1);
    debug!(exit_code = code, "Process exited");
    Ok(ProcessExit::Exited(code))
}

async fn forward_lines<R>(reader: R, stream: Stream, tx: mpsc::Sender<(Stream, String)>)
where
    R: AsyncRead + Unpin,
{
    // Output need not be UTF-8; the pipe is read to EOF regardless.
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                if tx.send((stream, line)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to read process output");
                break;
            }
        }
    }
}

async fn kill(child: &mut tokio::process::Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to kill cancelled process");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingConsole;

    const TAGS: StreamTags = StreamTags { out: "&1", err: "&2" };

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[tokio::test]
    async fn test_invalid_utf8_output_is_kept_and_stream_continues() {
        let console = RecordingConsole::default();

        let exit = run_streaming(
            sh(r"printf 'caf\351\n'; echo after-binary"),
            &console,
            TAGS,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(exit, ProcessExit::Exited(0));
        assert!(console.has("&1", "caf\u{FFFD}"));
        assert!(console.has("&1", "after-binary"));
    }

    #[tokio::test]
    async fn test_streams_are_tagged_and_exit_code_reported() {
        let console = RecordingConsole::default();

        let exit = run_streaming(
            sh("echo out; echo err >&2; printf 'no newline'; exit 3"),
            &console,
            TAGS,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(exit, ProcessExit::Exited(3));
        assert!(console.has("&1", "out"));
        assert!(console.has("&2", "err"));
        assert!(console.has("&1", "no newline"));
    }

    #[tokio::test]
    async fn test_cancel_kills_the_child() {
        let console = RecordingConsole::default();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let exit = run_streaming(sh("sleep 30"), &console, TAGS, &cancel).await.unwrap();

        assert_eq!(exit, ProcessExit::Cancelled);
    }
}
