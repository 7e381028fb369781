//! # Container Runner
//!
//! The firmware toolchain runs in a container image. The build pipeline only
//! describes *what* to run (`ContainerInvocation`); a `ContainerRunner`
//! decides how. Tests substitute a runner that records the invocation.
//!
//! `DockerRunner` drives the `docker` CLI. Output from both streams is
//! captured and mirrored to stderr while the container runs, and the run is
//! killed once its deadline passes.

use std::fmt;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};

use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Access mode of a bind mount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    ReadOnly,
    ReadWrite,
}

impl BindMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BindMode::ReadOnly => "ro",
            BindMode::ReadWrite => "rw",
        }
    }
}

/// A host path mounted into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bind {
    pub src: PathBuf,
    pub dst: PathBuf,
    pub mode: BindMode,
}

impl Bind {
    /// Mounts `path` at the same location inside the container.
    pub fn same_path(path: impl Into<PathBuf>, mode: BindMode) -> Self {
        let path = path.into();
        Self {
            src: path.clone(),
            dst: path,
            mode,
        }
    }
}

impl fmt::Display for Bind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.src.display(),
            self.dst.display(),
            self.mode.as_str()
        )
    }
}

/// Everything needed to start one toolchain container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInvocation {
    pub image: String,
    pub binds: Vec<Bind>,
    pub workdir: PathBuf,
    pub args: Vec<String>,
}

/// How the container exited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerExit {
    Success,
    /// Non-zero exit; `-1` when the process was terminated by a signal
    Failed(i32),
}

/// Runs containers
pub trait ContainerRunner: Send + Sync {
    /// Runs `invocation` to completion, appending its output to `out`.
    ///
    /// A container that runs and exits non-zero is `Ok(ContainerExit::Failed)`;
    /// `Err` is reserved for failing to run it at all.
    fn run(&self, invocation: &ContainerInvocation, out: &mut Vec<u8>) -> Result<ContainerExit>;
}

/// `ContainerRunner` backed by the docker CLI
#[derive(Debug, Clone)]
pub struct DockerRunner {
    binary: PathBuf,
    timeout: Duration,
}

impl DockerRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            binary: PathBuf::from("docker"),
            timeout,
        }
    }

    /// Uses another docker-compatible CLI
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Arguments of `docker run` for `invocation`, naming the container `name`
    pub fn run_args(invocation: &ContainerInvocation, name: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            name.to_string(),
        ];
        for bind in &invocation.binds {
            args.push("-v".to_string());
            args.push(bind.to_string());
        }
        args.push("-w".to_string());
        args.push(invocation.workdir.display().to_string());
        args.push(invocation.image.clone());
        args.extend(invocation.args.iter().cloned());
        args
    }

    fn remove_container(&self, name: &str) {
        match Command::new(&self.binary)
            .args(["rm", "-f", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => debug!("Removed container {}", name),
            Ok(status) => warn!("Removing container {} exited with {}", name, status),
            Err(e) => warn!("Failed to remove container {}: {}", name, e),
        }
    }
}

impl ContainerRunner for DockerRunner {
    fn run(&self, invocation: &ContainerInvocation, out: &mut Vec<u8>) -> Result<ContainerExit> {
        let name = container_name();
        let args = Self::run_args(invocation, &name);
        info!("Running {} {}", self.binary.display(), args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Container {
                message: format!("cannot start {}: {e}", self.binary.display()),
            })?;

        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        if let Some(stdout) = child.stdout.take() {
            forward(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward(stderr, tx.clone());
        }
        drop(tx);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(chunk) => capture(out, &chunk),
                Err(mpsc::RecvTimeoutError::Disconnected) => thread::sleep(POLL_INTERVAL),
                Err(mpsc::RecvTimeoutError::Timeout) => {}
            }
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    warn!("Container {} exceeded its deadline, killing it", name);
                    let _ = child.kill();
                    let _ = child.wait();
                    self.remove_container(&name);
                    return Err(Error::ContainerTimeout {
                        seconds: self.timeout.as_secs(),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    return Err(Error::Container {
                        message: format!("cannot wait for container {name}: {e}"),
                    })
                }
            }
        };

        // Descendants that inherited the pipes can keep them open after the
        // process exits, so draining stops at the deadline.
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(chunk) => capture(out, &chunk),
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    warn!(
                        "Output of container {} still open at the deadline, not waiting for it",
                        name
                    );
                    break;
                }
            }
        }

        debug!("Container {} exited with {}", name, status);
        if status.success() {
            Ok(ContainerExit::Success)
        } else {
            Ok(ContainerExit::Failed(status.code().unwrap_or(-1)))
        }
    }
}

fn forward<R: Read + Send + 'static>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) {
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

fn capture(out: &mut Vec<u8>, chunk: &[u8]) {
    out.extend_from_slice(chunk);
    let _ = io::stderr().write_all(chunk);
}

fn container_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    format!("fwbuild-{}-{}", std::process::id(), nanos)
}
