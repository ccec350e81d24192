//! External encoder invocation
//!
//! The encoder is an opaque program that reads plaintext on stdin and
//! writes ciphertext on stdout. Running one safely means keeping all three
//! byte streams moving at once; a stream left unread will eventually fill
//! its pipe buffer and deadlock the subprocess.
//!
//! ```text
//! source ──feeder thread──▶ stdin ┐
//!                                 │ encoder process
//! sink ◀──consumer thread── stdout┘
//!            stderr ──drain thread──▶ String
//! ```
//!
//! The calling thread supervises: it polls the child with a wall-clock
//! timeout and kills it on expiry or cancellation. The feeder closes the
//! child's stdin when its source is exhausted, which is what lets the
//! encoder finish; the consumer sees EOF on stdout once the process exits.
//!
//! Byte counts are taken on both ends with counting wrappers so callers can
//! record plaintext and ciphertext sizes. Stream wrappers that read from
//! their inner stream on construction (gzip decoders do) must be built
//! inside the source/sink closures, which only run after the process has
//! been spawned.

use crate::error::{HoardError, Result};
use std::io::{self, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Default wall-clock limit for one encoder invocation
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Supervisor poll interval
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Cooperative cancellation flag shared across snapshot tasks
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Outcome of one subprocess invocation
#[derive(Debug, Clone)]
pub struct PipeResult {
    pub success: bool,
    pub elapsed_ms: u64,
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub exit: Option<i32>,
    pub stderr: String,
}

/// Reader that counts the bytes passing through it
pub struct CountingReader<R> {
    inner: R,
    count: Arc<AtomicU64>,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R, count: Arc<AtomicU64>) -> Self {
        Self { inner, count }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// Writer that counts the bytes passing through it
pub struct CountingWriter<W> {
    inner: W,
    count: Arc<AtomicU64>,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W, count: Arc<AtomicU64>) -> Self {
        Self { inner, count }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

enum Waited {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
    WaitFailed(io::Error),
}

/// Run an external program, feeding its stdin from `source` and handing its
/// stdout to `sink`
///
/// `source` receives the child's counted stdin and runs on its own thread;
/// dropping the writer when the closure returns closes the stream. `sink`
/// receives the child's counted stdout on a second thread and produces the
/// call's value. The current thread supervises the child with the given
/// timeout and the shared cancellation token.
///
/// A nonzero exit, a timeout, or a spawn failure surfaces as
/// [`HoardError::Subprocess`]; the subprocess verdict takes precedence over
/// whatever the sink produced.
pub fn run_pipe<T, S, K>(
    command: &[String],
    timeout: Duration,
    cancel: &CancelToken,
    source: S,
    sink: K,
) -> Result<(T, PipeResult)>
where
    T: Send,
    S: FnOnce(&mut dyn Write) -> io::Result<()> + Send,
    K: FnOnce(&mut dyn Read) -> Result<T> + Send,
{
    let program = command
        .first()
        .cloned()
        .ok_or_else(|| HoardError::Subprocess {
            program: String::new(),
            exit: None,
            stderr: "empty command".into(),
        })?;

    let mut child = Command::new(&program)
        .args(&command[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| HoardError::Subprocess {
            program: program.clone(),
            exit: None,
            stderr: format!("failed to start: {}", e),
        })?;

    // All three handles exist because all three were requested piped
    let stdin = child.stdin.take().unwrap();
    let stdout = child.stdout.take().unwrap();
    let mut stderr = child.stderr.take().unwrap();

    let input_count = Arc::new(AtomicU64::new(0));
    let output_count = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    let (feed_result, sink_result, stderr_text, waited) = thread::scope(|s| {
        let in_count = Arc::clone(&input_count);
        let feeder = s.spawn(move || {
            let mut counted = CountingWriter::new(stdin, in_count);
            source(&mut counted)
        });

        let drainer = s.spawn(move || {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf);
            buf
        });

        let out_count = Arc::clone(&output_count);
        let consumer = s.spawn(move || {
            let mut counted = CountingReader::new(stdout, out_count);
            sink(&mut counted)
        });

        let waited = loop {
            if cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                break Waited::Cancelled;
            }
            match child.try_wait() {
                Ok(Some(status)) => break Waited::Exited(status),
                Ok(None) => {
                    if start.elapsed() >= timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        break Waited::TimedOut;
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    break Waited::WaitFailed(e);
                }
            }
        };

        (
            feeder.join().unwrap(),
            consumer.join().unwrap(),
            drainer.join().unwrap(),
            waited,
        )
    });

    let elapsed_ms = start.elapsed().as_millis() as u64;
    let status = match waited {
        Waited::Cancelled => return Err(HoardError::Cancelled),
        Waited::TimedOut => {
            return Err(HoardError::Subprocess {
                program,
                exit: None,
                stderr: format!("timed out after {:.1}s", timeout.as_secs_f64()),
            })
        }
        Waited::WaitFailed(e) => return Err(HoardError::Io(e)),
        Waited::Exited(status) => status,
    };

    if !status.success() {
        return Err(HoardError::Subprocess {
            program,
            exit: status.code(),
            stderr: stderr_text,
        });
    }

    // A broken pipe just means the encoder stopped reading early; any other
    // feeder failure is a real error
    if let Err(e) = feed_result {
        if e.kind() != io::ErrorKind::BrokenPipe {
            return Err(HoardError::Io(e));
        }
    }

    let value = sink_result?;
    Ok((
        value,
        PipeResult {
            success: true,
            elapsed_ms,
            input_bytes: input_count.load(Ordering::Relaxed),
            output_bytes: output_count.load(Ordering::Relaxed),
            exit: status.code(),
            stderr: stderr_text,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn read_all(r: &mut dyn Read) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        r.read_to_end(&mut buf)?;
        Ok(buf)
    }

    #[test]
    fn test_identity_pipe_counts_bytes() {
        let payload = b"hello pipe".to_vec();
        let (out, result) = run_pipe(
            &cmd(&["cat"]),
            DEFAULT_TIMEOUT,
            &CancelToken::new(),
            |w| w.write_all(&payload),
            read_all,
        )
        .unwrap();

        assert_eq!(out, b"hello pipe");
        assert!(result.success);
        assert_eq!(result.exit, Some(0));
        assert_eq!(result.input_bytes, 10);
        assert_eq!(result.output_bytes, 10);
    }

    #[test]
    fn test_transforming_pipe() {
        let (out, result) = run_pipe(
            &cmd(&["tr", "a-z", "A-Z"]),
            DEFAULT_TIMEOUT,
            &CancelToken::new(),
            |w| w.write_all(b"shout"),
            read_all,
        )
        .unwrap();

        assert_eq!(out, b"SHOUT");
        assert_eq!(result.input_bytes, 5);
        assert_eq!(result.output_bytes, 5);
    }

    #[test]
    fn test_nonzero_exit_captures_stderr() {
        let err = run_pipe(
            &cmd(&["sh", "-c", "echo boom >&2; exit 2"]),
            DEFAULT_TIMEOUT,
            &CancelToken::new(),
            |_w| Ok(()),
            read_all,
        )
        .unwrap_err();

        match err {
            HoardError::Subprocess {
                exit, stderr, ..
            } => {
                assert_eq!(exit, Some(2));
                assert!(stderr.contains("boom"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_missing_program() {
        let err = run_pipe(
            &cmd(&["/no/such/hoard-encoder"]),
            DEFAULT_TIMEOUT,
            &CancelToken::new(),
            |_w| Ok(()),
            read_all,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            HoardError::Subprocess { exit: None, .. }
        ));
    }

    #[test]
    fn test_timeout_kills_process() {
        let started = Instant::now();
        let err = run_pipe(
            &cmd(&["sleep", "30"]),
            Duration::from_millis(100),
            &CancelToken::new(),
            |_w| Ok(()),
            read_all,
        )
        .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            HoardError::Subprocess { exit, stderr, .. } => {
                assert_eq!(exit, None);
                assert!(stderr.contains("timed out"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_cancellation() {
        let token = CancelToken::new();
        token.cancel();
        let err = run_pipe(
            &cmd(&["sleep", "30"]),
            DEFAULT_TIMEOUT,
            &token,
            |_w| Ok(()),
            read_all,
        )
        .unwrap_err();
        assert!(matches!(err, HoardError::Cancelled));
    }

    #[test]
    fn test_large_stream_does_not_deadlock() {
        // Larger than any kernel pipe buffer in both directions
        let payload = vec![0x5a_u8; 4 * 1024 * 1024];
        let expected = payload.clone();
        let (out, result) = run_pipe(
            &cmd(&["cat"]),
            DEFAULT_TIMEOUT,
            &CancelToken::new(),
            move |w| w.write_all(&payload),
            read_all,
        )
        .unwrap();

        assert_eq!(out.len(), expected.len());
        assert_eq!(out, expected);
        assert_eq!(result.input_bytes, result.output_bytes);
    }

    #[test]
    fn test_empty_command_rejected() {
        let err = run_pipe(
            &[],
            DEFAULT_TIMEOUT,
            &CancelToken::new(),
            |_w| Ok(()),
            read_all,
        )
        .unwrap_err();
        assert!(matches!(err, HoardError::Subprocess { .. }));
    }
}
