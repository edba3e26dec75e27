use log::debug;
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A program invocation: no shell, arguments passed verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        CommandSpec { program: program.into(), args: Vec::new(), cwd: None }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        if let Some(cwd) = &self.cwd {
            write!(f, " (in {})", cwd.display())?;
        }
        Ok(())
    }
}

/// Captured result of a finished (or killed) process.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessOutput {
    /// Exit code; `None` when terminated by a signal or killed on timeout.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }
}

/// Executes commands on behalf of the exporter and the build runner.
pub trait ProcessRunner: Send + Sync {
    /// Runs `command` to completion or until `timeout` elapses. Only a
    /// failure to start the process is an error; non-zero exits and
    /// timeouts are reported in the output.
    fn run(&self, command: &CommandSpec, timeout: Option<Duration>) -> io::Result<ProcessOutput>;
}

/// Runs real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

/// Puts the child in a fresh process group so a timeout can reach its
/// descendants too.
#[cfg(unix)]
fn isolate(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate(_cmd: &mut Command) {}

/// Kills the child and everything it spawned. Grandchildren such as the
/// compiler jobs under `make` inherit the output pipes and would otherwise
/// keep the drain threads blocked after the child itself is gone.
#[cfg(unix)]
fn kill_tree(child: &mut Child) -> io::Result<()> {
    let group = child.id() as libc::pid_t;
    if unsafe { libc::killpg(group, libc::SIGKILL) } == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    child.kill()
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> io::Result<()> {
    child.kill()
}

fn wait_with_deadline(child: &mut Child, timeout: Option<Duration>) -> io::Result<(Option<i32>, bool)> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status.code(), false));
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                if let Err(e) = kill_tree(child) {
                    debug!("Failed to kill process group {}: {}", child.id(), e);
                }
                child.wait()?;
                return Ok((None, true));
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, command: &CommandSpec, timeout: Option<Duration>) -> io::Result<ProcessOutput> {
        debug!("Calling {}", command);

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }
        isolate(&mut cmd);

        let mut child = cmd.spawn()?;
        // Both pipes are drained concurrently so a chatty child cannot block on a full pipe
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let (code, timed_out) = wait_with_deadline(&mut child, timeout)?;

        Ok(ProcessOutput {
            code,
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
            timed_out,
        })
    }
}
