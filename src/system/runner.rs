// EN: src/system/runner.rs

use crate::{CancellationToken, core::config::Whitelist};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command as StdCommand, Stdio};
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long the wait loop sleeps between `try_wait` polls.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors from running one external command.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// No whitelist pattern matches the command line.
    #[error("Command '{0}' is not on the whitelist.")]
    WhitelistDenied(String),
    /// The command line has unbalanced quotes.
    #[error("Command could not be parsed: {0}")]
    CommandParse(String),
    /// The command line is blank.
    #[error("No command specified to run.")]
    EmptyCommand,
    /// The program could not be started.
    #[error("Command '{0}' could not be executed: {1}")]
    Spawn(String, #[source] std::io::Error),
    /// Polling the child process failed.
    #[error("Lost track of command '{0}': {1}")]
    Wait(String, #[source] std::io::Error),
    /// The wall-clock limit expired; the process group was killed.
    #[error("Command '{command}' timed out after {}s and was killed.", .timeout.as_secs_f64())]
    TimedOut {
        /// The command line that was run.
        command: String,
        /// The limit that was exceeded.
        timeout: Duration,
    },
    /// Ctrl+C was pressed; the process group was killed.
    #[error("Operation was cancelled by the user.")]
    Cancelled,
}

/// What a finished external command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// Exit code, or `None` if the process was ended by a signal.
    pub exit_code: Option<i32>,
    /// Everything written to stdout, lossily decoded.
    pub stdout: String,
    /// Everything written to stderr, lossily decoded.
    pub stderr: String,
}

impl RunOutput {
    /// Whether the process exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs whitelisted command lines inside a sandbox root, under a hard wall-clock limit.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    whitelist: Whitelist,
    timeout: Duration,
}

impl CommandRunner {
    /// Creates a runner with a compiled whitelist and a wall-clock limit.
    pub fn new(whitelist: Whitelist, timeout: Duration) -> Self {
        Self { whitelist, timeout }
    }

    /// The configured wall-clock limit.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Validates `command_line` against the whitelist, then runs it with `cwd` as its
    /// working directory.
    ///
    /// The line is split with `shlex` and started directly, never through a shell.
    /// Output is drained on two reader threads while this thread polls the child, so a
    /// chatty process cannot block on a full pipe. On timeout or cancellation the whole
    /// process group is killed.
    ///
    /// # Errors
    /// `WhitelistDenied` before anything is spawned; `TimedOut` / `Cancelled` after the
    /// child was killed. A non-zero exit is *not* an error here: it is reported in
    /// [`RunOutput::exit_code`].
    pub fn run(
        &self,
        command_line: &str,
        cwd: &Path,
        cancellation_token: &CancellationToken,
    ) -> Result<RunOutput, RunnerError> {
        let trimmed = command_line.trim();
        if trimmed.is_empty() {
            return Err(RunnerError::EmptyCommand);
        }
        if !self.whitelist.allows(trimmed) {
            log::warn!("Refusing to run non-whitelisted command: {:?}", trimmed);
            return Err(RunnerError::WhitelistDenied(trimmed.to_string()));
        }

        let parts =
            shlex::split(trimmed).ok_or_else(|| RunnerError::CommandParse(trimmed.to_string()))?;
        let Some((program, args)) = parts.split_first() else {
            return Err(RunnerError::EmptyCommand);
        };

        let mut command = StdCommand::new(program);
        command
            .args(args)
            .current_dir(dunce::simplified(cwd))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        log::info!("Running external command: {:?} (cwd: {})", trimmed, cwd.display());
        let mut child = command
            .spawn()
            .map_err(|e| RunnerError::Spawn(trimmed.to_string(), e))?;
        let stdout_reader = drain(child.stdout.take());
        let stderr_reader = drain(child.stderr.take());

        // The deadline covers the whole process group: a background grandchild that
        // still holds the output pipes keeps the command running after the leader exits.
        let deadline = Instant::now() + self.timeout;
        let mut exited = None;
        let status = loop {
            if exited.is_none() {
                exited = match child.try_wait() {
                    Ok(status) => status,
                    Err(e) => {
                        kill_tree(&mut child);
                        return Err(RunnerError::Wait(trimmed.to_string(), e));
                    }
                };
            }
            if let Some(status) =
                exited.filter(|_| is_finished(&stdout_reader) && is_finished(&stderr_reader))
            {
                break status;
            }

            if cancellation_token.load(Ordering::SeqCst) {
                log::debug!("Cancellation requested, killing process group {}", child.id());
                kill_tree(&mut child);
                join_reader(stdout_reader);
                join_reader(stderr_reader);
                return Err(RunnerError::Cancelled);
            }
            if Instant::now() >= deadline {
                if exited.is_some() {
                    log::warn!("Command {:?} left processes holding its output open.", trimmed);
                }
                log::warn!("Command {:?} exceeded {:?}, killing it.", trimmed, self.timeout);
                kill_tree(&mut child);
                join_reader(stdout_reader);
                join_reader(stderr_reader);
                return Err(RunnerError::TimedOut {
                    command: trimmed.to_string(),
                    timeout: self.timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        Ok(RunOutput {
            exit_code: status.code(),
            stdout: join_reader(stdout_reader),
            stderr: join_reader(stderr_reader),
        })
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            if let Err(e) = pipe.read_to_end(&mut buffer) {
                log::debug!("Pipe read ended early: {}", e);
            }
            String::from_utf8_lossy(&buffer).into_owned()
        })
    })
}

fn is_finished(reader: &Option<JoinHandle<String>>) -> bool {
    reader.as_ref().is_none_or(|handle| handle.is_finished())
}

fn join_reader(reader: Option<JoinHandle<String>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Kills the child and, on unix, every process in its group. The group outlives its
/// leader, so this also works after the child itself has been reaped.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        match StdCommand::new("kill")
            .args(["-KILL", "--", &group])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => {}
            Ok(_) | Err(_) => log::debug!("Process group kill for {} did not succeed", group),
        }
    }
    if let Err(e) = child.kill() {
        log::debug!("Failed to kill child process {}: {}", child.id(), e);
    }
    child.wait().ok();
}
