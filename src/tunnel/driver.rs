//! Driving the VPN client through its challenge prompt
//!
//! The driver script is run with piped stdio. Its stdout is scanned for
//! `CHALLENGE:`; every occurrence is answered by writing the one-time
//! password and a newline to its stdin. The prompt usually has no trailing
//! newline, so the scan works on raw chunks and keeps an unterminated tail
//! around in case the marker is split across reads.

use super::TunnelError;
use crate::otp::OneTimePassword;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub const CHALLENGE_MARKER: &str = "CHALLENGE:";

/// Upper bound on buffered output without a newline
const MAX_PENDING: usize = 4096;

const READ_CHUNK: usize = 1024;

/// How long output is still drained once the driver itself has exited
pub const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// How the driver process ended
#[derive(Debug)]
pub struct DriverExit {
    pub code: Option<i32>,
    pub stderr: String,
    pub challenges_answered: usize,
}

impl DriverExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Run the driver script to completion, answering challenges with `otp`
///
/// Returns once the driver has exited. Output still held open by one of its
/// descendants afterwards is collected for at most [`OUTPUT_GRACE`].
pub async fn run_driver(script: &Path, otp: &OneTimePassword) -> Result<DriverExit, TunnelError> {
    let spawn_error = |e: io::Error| TunnelError::ProcessSpawn {
        program: script.display().to_string(),
        message: e.to_string(),
    };

    // Run through sh so the freshly written script is never exec'd directly
    let mut child = Command::new("/bin/sh")
        .arg(script)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_error)?;
    info!("VPN client driver started (pid {:?})", child.id());

    let (Some(stdin), Some(stdout), Some(mut stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        let _ = child.start_kill();
        return Err(spawn_error(io::Error::other("driver stdio was not captured")));
    };

    let captured = Arc::new(Mutex::new(Vec::new()));
    let stderr_task = {
        let captured = captured.clone();
        tokio::spawn(async move {
            let mut chunk = [0u8; READ_CHUNK];
            loop {
                match stderr.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => lock_buffer(&captured).extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        warn!("Failed to read client stderr: {}", e);
                        break;
                    }
                }
            }
        })
    };

    let answered = Arc::new(AtomicUsize::new(0));
    let answer_task = {
        let answered = answered.clone();
        let otp = otp.clone();
        tokio::spawn(async move {
            if let Err(e) = scan_output(stdout, stdin, otp.expose(), &answered).await {
                warn!("Lost client output: {}", e);
            }
        })
    };

    let status = child.wait().await.map_err(spawn_error)?;
    finish_within(answer_task, "stdout").await;
    finish_within(stderr_task, "stderr").await;

    let stderr = String::from_utf8_lossy(&lock_buffer(&captured)).into_owned();
    let challenges_answered = answered.load(Ordering::SeqCst);

    debug!(
        "Driver exited with {:?} after answering {} challenge(s)",
        status.code(),
        challenges_answered
    );

    Ok(DriverExit {
        code: status.code(),
        stderr,
        challenges_answered,
    })
}

/// Let a reader task drain what is left, then give up on it
async fn finish_within(mut task: JoinHandle<()>, stream: &str) {
    if timeout(OUTPUT_GRACE, &mut task).await.is_err() {
        debug!("Client {} still held open after exit, no longer reading it", stream);
        task.abort();
    }
}

fn lock_buffer(buffer: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Answer every challenge seen on `output` until it reaches end of stream
///
/// `input` is dropped (closing the client's stdin) when the output ends.
/// A failed write is logged and further challenges are left unanswered;
/// the client will then exit on its own.
pub async fn answer_challenges<R, W>(output: R, input: W, response: &str) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let answered = AtomicUsize::new(0);
    scan_output(output, input, response, &answered).await?;
    Ok(answered.into_inner())
}

async fn scan_output<R, W>(
    mut output: R,
    input: W,
    response: &str,
    answered: &AtomicUsize,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut input = Some(input);
    let mut chunk = [0u8; READ_CHUNK];
    let mut pending = String::new();

    loop {
        let n = output.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        pending.push_str(&String::from_utf8_lossy(&chunk[..n]));

        loop {
            let marker = pending.find(CHALLENGE_MARKER);
            let newline = pending.find('\n');

            match (marker, newline) {
                (Some(at), nl) if nl.is_none_or(|nl| at < nl) => {
                    let before = pending[..at].trim();
                    if !before.is_empty() {
                        debug!("client: {}", before);
                    }
                    pending.drain(..at + CHALLENGE_MARKER.len());
                    info!("Client requested one-time password");

                    if let Some(stdin) = input.as_mut() {
                        match send_line(stdin, response).await {
                            Ok(()) => {
                                answered.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(e) => {
                                warn!("Could not answer challenge: {}", e);
                                input = None;
                            }
                        }
                    }
                }
                (_, Some(nl)) => {
                    let line: String = pending.drain(..=nl).collect();
                    let line = line.trim_end();
                    if !line.is_empty() {
                        debug!("client: {}", line);
                    }
                }
                _ => break,
            }
        }

        if pending.len() > MAX_PENDING {
            // Keep just enough to still match a marker split across reads
            let mut cut = pending.len() - CHALLENGE_MARKER.len();
            while !pending.is_char_boundary(cut) {
                cut -= 1;
            }
            pending.drain(..cut);
        }
    }

    let rest = pending.trim();
    if !rest.is_empty() {
        debug!("client: {}", rest);
    }
    debug!("Client output closed");
    Ok(())
}

async fn send_line<W: AsyncWrite + Unpin>(input: &mut W, response: &str) -> io::Result<()> {
    input.write_all(response.as_bytes()).await?;
    input.write_all(b"\n").await?;
    input.flush().await
}
