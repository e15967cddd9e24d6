use chrono::Utc;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::types::{AssistantCommand, ProcessOutput};

const STDERR_EXCERPT_CHARS: usize = 500;
const MAX_RENDERED_ARG_CHARS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Runs one external command to completion or to its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRunner {
    pub poll_interval: Duration,
    /// How often `on_tick` fires while the process is running.
    pub tick_interval: Duration,
    /// How long to keep draining pipes after exit; a grandchild holding the
    /// pipe open must not block the caller.
    pub drain_grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            tick_interval: Duration::from_secs(1),
            drain_grace: Duration::from_millis(500),
        }
    }
}

impl ProcessRunner {
    pub fn run(
        &self,
        command: &AssistantCommand,
        timeout: Duration,
        on_tick: &mut dyn FnMut(Duration),
    ) -> Result<ProcessOutput, AgentError> {
        if timeout.is_zero() {
            return Err(AgentError::InvalidRequest {
                message: "timeout must be greater than zero".to_string(),
            });
        }
        if command.executable.trim().is_empty() {
            return Err(AgentError::InvalidRequest {
                message: "executable must not be empty".to_string(),
            });
        }

        let rendered = render_command(command);
        let started_at = Utc::now();
        let started = Instant::now();
        debug!(command = %rendered, ?timeout, "spawning assistant process");

        let mut process = Command::new(&command.executable);
        // Own process group, so a deadline kill also reaches grandchildren.
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut process, 0);
        let mut child = process
            .args(&command.args)
            .envs(
                command
                    .env
                    .iter()
                    .filter(|(key, _)| !key.trim().is_empty())
                    .map(|(key, value)| (key.as_str(), value.as_str())),
            )
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| AgentError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        let (tx, rx) = mpsc::channel::<(Stream, String)>();
        if let Some(pipe) = child.stdout.take() {
            spawn_pipe_reader(pipe, Stream::Stdout, tx.clone());
        }
        if let Some(pipe) = child.stderr.take() {
            spawn_pipe_reader(pipe, Stream::Stderr, tx.clone());
        }
        drop(tx);

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut last_tick = Instant::now();

        let status = loop {
            drain_output(&rx, &mut stdout, &mut stderr);

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                terminate(&mut child);
                warn!(command = %rendered, ?elapsed, "assistant process killed at deadline");
                return Err(AgentError::Timeout {
                    command: rendered,
                    timeout,
                });
            }

            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(source) => {
                    terminate(&mut child);
                    return Err(AgentError::Io {
                        command: rendered,
                        source,
                    });
                }
            }

            if last_tick.elapsed() >= self.tick_interval {
                on_tick(elapsed);
                last_tick = Instant::now();
            }

            thread::sleep(self.poll_interval);
        };

        drain_until_closed(&rx, self.drain_grace, &mut stdout, &mut stderr);
        let elapsed = started.elapsed();
        let stdout = stdout.trim().to_string();
        let exit_code = status.code();

        let mut output = ProcessOutput {
            command: rendered,
            stdout,
            stderr,
            exit_code,
            exit_tolerated: false,
            started_at,
            elapsed,
        };

        if status.success() {
            debug!(command = %output.command, ?elapsed, bytes = output.stdout.len(), "assistant process finished");
            return Ok(output);
        }

        if !output.stdout.is_empty() {
            // Some assistant CLIs exit non-zero after printing a usable answer.
            warn!(
                command = %output.command,
                status = ?exit_code,
                "assistant exited non-zero but produced stdout; passing it through"
            );
            output.exit_tolerated = true;
            return Ok(output);
        }

        Err(AgentError::CommandFailed {
            command: output.command,
            status: exit_code,
            stderr: stderr_excerpt(&output.stderr),
        })
    }
}

/// Kills the child's whole process group, then reaps the child.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(err) = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
            debug!(pid = child.id(), error = %err, "process group kill failed");
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_pipe_reader<R>(reader: R, stream: Stream, tx: Sender<(Stream, String)>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buffered = BufReader::new(reader);
        loop {
            let mut line = Vec::new();
            match buffered.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line).into_owned();
                    if tx.send((stream, text)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
}

fn drain_output(rx: &Receiver<(Stream, String)>, stdout: &mut String, stderr: &mut String) {
    while let Ok((stream, chunk)) = rx.try_recv() {
        push_chunk(stream, chunk, stdout, stderr);
    }
}

fn drain_until_closed(
    rx: &Receiver<(Stream, String)>,
    grace: Duration,
    stdout: &mut String,
    stderr: &mut String,
) {
    let deadline = Instant::now() + grace;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((stream, chunk)) => push_chunk(stream, chunk, stdout, stderr),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                debug!("output pipes still open after exit; continuing with captured output");
                drain_output(rx, stdout, stderr);
                break;
            }
        }
    }
}

fn push_chunk(stream: Stream, chunk: String, stdout: &mut String, stderr: &mut String) {
    match stream {
        Stream::Stdout => stdout.push_str(&chunk),
        Stream::Stderr => stderr.push_str(&chunk),
    }
}

fn stderr_excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.chars().count() <= STDERR_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let mut excerpt: String = trimmed.chars().take(STDERR_EXCERPT_CHARS).collect();
    excerpt.push_str("...");
    excerpt
}

/// Human-readable command line for logs and errors; long arguments (prompts)
/// are shortened.
pub fn render_command(command: &AssistantCommand) -> String {
    let mut rendered = command.executable.clone();
    for arg in &command.args {
        rendered.push(' ');
        if arg.chars().count() > MAX_RENDERED_ARG_CHARS {
            let head: String = arg.chars().take(MAX_RENDERED_ARG_CHARS).collect();
            rendered.push_str(&head);
            rendered.push_str("...");
        } else {
            rendered.push_str(arg);
        }
    }
    rendered
}
