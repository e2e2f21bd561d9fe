use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::{InvocationError, SweepConfig, SweepPoint};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Fully resolved argv for one runner invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl RunnerCommand {
    pub fn build(
        config: &SweepConfig,
        algorithm: &str,
        point: &SweepPoint,
        seed: Option<u64>,
    ) -> Self {
        let mut args: Vec<String> = config.compatibility_flags.clone();
        args.push("-jar".to_string());
        args.push(config.runner_artifact_path.to_string_lossy().to_string());
        args.extend(["-f".to_string(), point.framework.clone()]);
        args.extend(["-a".to_string(), algorithm.to_string()]);
        args.extend(["-min".to_string(), point.size_bound.min.to_string()]);
        args.extend(["-max".to_string(), point.size_bound.max.to_string()]);
        args.extend(["-n".to_string(), point.noise_kind.clone()]);
        args.extend(["-nl".to_string(), point.noise_level.clone()]);
        args.extend(["-t".to_string(), point.target.to_string_lossy().to_string()]);
        if let Some(limit) = config.query_limit {
            args.extend(["-ql".to_string(), limit.to_string()]);
        }
        if let Some(seed) = seed {
            args.extend(["-r".to_string(), seed.to_string()]);
        }
        Self {
            program: config.runtime_executable_path.clone(),
            args,
        }
    }

    /// Shell-pasteable rendering, for logs and error messages.
    pub fn render(&self) -> String {
        let mut parts = vec![shell_quote(&self.program.to_string_lossy())];
        parts.extend(self.args.iter().map(|a| shell_quote(a)));
        parts.join(" ")
    }
}

/// Runs a [`RunnerCommand`] to completion and hands back its stdout.
pub trait Launcher {
    fn launch(&mut self, command: &RunnerCommand) -> Result<Vec<u8>, InvocationError>;
}

impl<L: Launcher + ?Sized> Launcher for &mut L {
    fn launch(&mut self, command: &RunnerCommand) -> Result<Vec<u8>, InvocationError> {
        (**self).launch(command)
    }
}

/// Spawns the runner as a child process, one at a time.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    timeout: Option<Duration>,
}

impl ProcessLauncher {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&mut self, command: &RunnerCommand) -> Result<Vec<u8>, InvocationError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| InvocationError::Spawn {
            command: command.render(),
            source,
        })?;

        let (status, stdout, stderr) = match self.timeout {
            None => {
                let output = child.wait_with_output()?;
                (output.status, output.stdout, output.stderr)
            }
            Some(timeout) => {
                // Drain both pipes off-thread so a chatty runner cannot block on
                // a full pipe while we poll for exit. The deadline covers the
                // pipes too: a background process may hold them open after the
                // runner itself has exited.
                let deadline = Instant::now() + timeout;
                let stdout = child.stdout.take().map(drain);
                let stderr = child.stderr.take().map(drain);
                let status = wait_until(&mut child, deadline, timeout)?;
                let stdout = collect(stdout, deadline, timeout)?;
                let stderr = collect(stderr, deadline, timeout)?;
                (status, stdout, stderr)
            }
        };

        if !status.success() {
            return Err(InvocationError::ExitStatus {
                status: describe_status(&status),
                stderr_tail: last_line(&stderr)
                    .unwrap_or("runner exited without stderr output")
                    .to_string(),
            });
        }
        Ok(stdout)
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    rx
}

fn collect(
    pipe: Option<Receiver<Vec<u8>>>,
    deadline: Instant,
    timeout: Duration,
) -> Result<Vec<u8>, InvocationError> {
    let Some(rx) = pipe else {
        return Ok(Vec::new());
    };
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(buf) => Ok(buf),
        Err(RecvTimeoutError::Disconnected) => Ok(Vec::new()),
        Err(RecvTimeoutError::Timeout) => Err(InvocationError::Timeout {
            seconds: timeout.as_secs(),
        }),
    }
}

fn wait_until(
    child: &mut Child,
    deadline: Instant,
    timeout: Duration,
) -> Result<ExitStatus, InvocationError> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(InvocationError::Timeout {
                seconds: timeout.as_secs(),
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn describe_status(status: &ExitStatus) -> String {
    status
        .code()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string())
}

fn last_line(bytes: &[u8]) -> Option<&str> {
    std::str::from_utf8(bytes)
        .ok()?
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
}

fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}
