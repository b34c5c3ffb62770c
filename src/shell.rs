//! Running external commands on the local machine.
//!
//! Every interaction with the operating system (tools, device probes, directory creation) goes
//! through the `Execute` trait so that the benchmark sequences can be driven against a scripted
//! shell in tests. `LocalShell` is the real implementation.

use std::fs::{self, OpenOptions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use console::style;

use failure::ResultExt;

use log::{debug, warn};

use crate::error::BenchError;

/// Where the standard output of a command goes. Standard error is always inherited, so a failing
/// tool prints its own diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sink {
    /// Print to our own standard output.
    Inherit,
    /// Throw it away.
    Null,
    /// Collect it into `CmdOutput::stdout`.
    Capture,
    /// Create or truncate the given file.
    Truncate(PathBuf),
    /// Append to the given file, creating it if needed.
    Append(PathBuf),
}

/// A command to run: a program, its arguments and how to treat its output and exit status.
#[derive(Clone, Debug)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    allow_error: bool,
    stdout: Sink,
    cwd: Option<PathBuf>,
}

impl Cmd {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Cmd {
            program: program.into(),
            args: vec![],
            allow_error: false,
            stdout: Sink::Inherit,
            cwd: None,
        }
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

    /// A non-zero exit status is returned to the caller instead of failing the command.
    pub fn allow_error(mut self) -> Self {
        self.allow_error = true;
        self
    }

    pub fn capture(mut self) -> Self {
        self.stdout = Sink::Capture;
        self
    }

    pub fn mute(mut self) -> Self {
        self.stdout = Sink::Null;
        self
    }

    pub fn stdout_to<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.stdout = Sink::Truncate(path.as_ref().to_owned());
        self
    }

    pub fn append_to<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.stdout = Sink::Append(path.as_ref().to_owned());
        self
    }

    pub fn cwd<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.cwd = Some(path.as_ref().to_owned());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn is_error_allowed(&self) -> bool {
        self.allow_error
    }

    pub fn sink(&self) -> &Sink {
        &self.stdout
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }
}

impl std::fmt::Display for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in self.args.iter() {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// The result of a command that ran to completion.
#[derive(Clone, Debug, Default)]
pub struct CmdOutput {
    /// The exit code, or `None` if the process was killed by a signal.
    pub status: Option<i32>,
    /// Standard output, if it was captured. Empty otherwise.
    pub stdout: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// An owned background process. Dropping the handle kills the process, so nothing outlives the
/// routine that spawned it.
#[derive(Debug)]
pub struct SpawnHandle {
    label: String,
    pid: u32,
    child: Option<Child>,
}

impl SpawnHandle {
    /// A handle with no process behind it (dry runs and tests).
    pub fn detached<S: Into<String>>(label: S, pid: u32) -> Self {
        SpawnHandle {
            label: label.into(),
            pid,
            child: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Returns true if the process has not exited yet.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Block until the process exits on its own.
    pub fn wait(mut self) -> Result<Option<i32>, failure::Error> {
        match self.child.take() {
            Some(mut child) => {
                let status = child
                    .wait()
                    .with_context(|_| format!("waiting for {}", self.label))?;
                Ok(status.code())
            }
            None => Ok(Some(0)),
        }
    }

    /// Stop the process if it is still running and reap it.
    pub fn stop(mut self) -> Result<(), failure::Error> {
        if let Some(mut child) = self.child.take() {
            if let Ok(None) = child.try_wait() {
                debug!("Stopping {} (pid {})", self.label, self.pid);
                terminate(&self.label, &mut child)
                    .with_context(|_| format!("stopping {}", self.label))?;
            }
            child
                .wait()
                .with_context(|_| format!("reaping {}", self.label))?;
        }
        Ok(())
    }
}

impl Drop for SpawnHandle {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Ok(None) = child.try_wait() {
                let _ = terminate(&self.label, &mut child);
            }
            let _ = child.wait();
        }
    }
}

/// How long a process gets to exit after SIGTERM before it is killed.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Send SIGTERM and wait up to `STOP_GRACE` for the process to exit, then SIGKILL it.
///
/// `timeout` forwards SIGTERM to the command it runs, but SIGKILL would orphan that command.
fn terminate(label: &str, child: &mut Child) -> std::io::Result<()> {
    // The process may exit on its own in the meantime, so the status of `kill` does not matter.
    Command::new("kill")
        .arg("-TERM")
        .arg(child.id().to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;

    let deadline = Instant::now() + STOP_GRACE;
    while child.try_wait()?.is_none() {
        if Instant::now() >= deadline {
            warn!("{} ignored SIGTERM, killing it", label);
            return child.kill();
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    Ok(())
}

/// Something that can run commands and answer simple questions about the filesystem.
pub trait Execute {
    /// Run the command to completion. Fails if the command cannot be started, or if it exits with
    /// a non-zero status and errors are not allowed.
    fn run(&self, cmd: Cmd) -> Result<CmdOutput, failure::Error>;

    /// Run a command that only inspects the system. Unlike `run`, this happens even in dry-run
    /// mode, so sentinels see the real state of the machine.
    fn inspect(&self, cmd: Cmd) -> Result<CmdOutput, failure::Error>;

    /// Start the command in the background.
    fn spawn(&self, cmd: Cmd) -> Result<SpawnHandle, failure::Error>;

    /// Returns true if the given path exists.
    fn exists(&self, path: &str) -> bool;

    /// Create a directory. An already existing directory is fine.
    fn create_dir(&self, path: &str) -> Result<(), failure::Error>;

    /// Change the permission bits of the given path.
    fn set_mode(&self, path: &str, mode: u32) -> Result<(), failure::Error>;

    /// Create or overwrite the file at `path`.
    fn write_file(&self, path: &str, contents: &str) -> Result<(), failure::Error>;
}

/// Runs commands on this machine.
#[derive(Debug, Default, Clone)]
pub struct LocalShell {
    dry_run: bool,
}

impl LocalShell {
    pub fn new() -> Self {
        LocalShell { dry_run: false }
    }

    /// Print commands instead of running them. Inspections (`exists`, `inspect`) still look at the
    /// real system.
    pub fn toggle_dry_run(&mut self) {
        self.dry_run = !self.dry_run;
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn echo(&self, what: &str) {
        if self.dry_run {
            println!(
                "{} {}",
                style(format!("$ {}", what)).yellow().bold(),
                style("(dry run)").dim()
            );
        } else {
            println!("{}", style(format!("$ {}", what)).yellow().bold());
        }
    }

    fn build(cmd: &Cmd) -> Result<Command, failure::Error> {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args).stderr(Stdio::inherit());

        if let Some(cwd) = &cmd.cwd {
            command.current_dir(cwd);
        }

        match &cmd.stdout {
            Sink::Inherit => {
                command.stdout(Stdio::inherit());
            }
            Sink::Null => {
                command.stdout(Stdio::null());
            }
            Sink::Capture => {
                command.stdout(Stdio::piped());
            }
            Sink::Truncate(path) => {
                let file = fs::File::create(path)
                    .with_context(|_| format!("creating output file {}", path.display()))?;
                command.stdout(file);
            }
            Sink::Append(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|_| format!("opening output file {}", path.display()))?;
                command.stdout(file);
            }
        }

        Ok(command)
    }

    /// Run the command for real and check its exit status.
    fn execute(cmd: &Cmd) -> Result<CmdOutput, failure::Error> {
        let mut command = Self::build(cmd)?;
        let output = command
            .output()
            .with_context(|_| format!("starting `{}`", cmd))?;

        let result = CmdOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        };

        if !result.success() {
            if cmd.allow_error {
                debug!("`{}` exited with {:?} (allowed)", cmd, result.status);
            } else {
                return Err(BenchError::CommandFailed {
                    command: cmd.to_string(),
                    status: result.status,
                }
                .into());
            }
        }

        Ok(result)
    }
}

impl Execute for LocalShell {
    fn run(&self, cmd: Cmd) -> Result<CmdOutput, failure::Error> {
        self.echo(&cmd.to_string());

        if self.dry_run {
            return Ok(CmdOutput {
                status: Some(0),
                stdout: String::new(),
            });
        }

        Self::execute(&cmd)
    }

    fn inspect(&self, cmd: Cmd) -> Result<CmdOutput, failure::Error> {
        debug!("Inspecting with `{}`", cmd);
        Self::execute(&cmd)
    }

    fn spawn(&self, cmd: Cmd) -> Result<SpawnHandle, failure::Error> {
        self.echo(&format!("{} &", cmd));

        if self.dry_run {
            return Ok(SpawnHandle::detached(cmd.program.clone(), 0));
        }

        if cmd.stdout == Sink::Capture {
            warn!("Output of background command `{}` cannot be captured", cmd);
        }

        let mut command = Self::build(&cmd)?;
        let child = command
            .spawn()
            .with_context(|_| format!("starting `{}`", cmd))?;

        Ok(SpawnHandle {
            label: cmd.program.clone(),
            pid: child.id(),
            child: Some(child),
        })
    }

    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn create_dir(&self, path: &str) -> Result<(), failure::Error> {
        self.echo(&format!("mkdir {}", path));
        if self.dry_run {
            return Ok(());
        }

        match fs::create_dir(path) {
            Err(ref err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            other => Ok(other.with_context(|_| format!("creating directory {}", path))?),
        }
    }

    fn set_mode(&self, path: &str, mode: u32) -> Result<(), failure::Error> {
        self.echo(&format!("chmod {:o} {}", mode, path));
        if self.dry_run {
            return Ok(());
        }

        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .with_context(|_| format!("changing the mode of {}", path))?;
        Ok(())
    }

    fn write_file(&self, path: &str, contents: &str) -> Result<(), failure::Error> {
        self.echo(&format!("write {} ({} bytes)", path, contents.len()));
        if self.dry_run {
            return Ok(());
        }

        fs::write(path, contents).with_context(|_| format!("writing {}", path))?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeShell;
    use super::*;

    #[test]
    fn failing_command_is_fatal_unless_allowed() {
        let shell = FakeShell::new();
        shell.fail_on("false");

        let err = shell.run(Cmd::new("false")).unwrap_err();
        match err.downcast_ref::<BenchError>() {
            Some(BenchError::CommandFailed { command, status }) => {
                assert_eq!(command, "false");
                assert_eq!(*status, Some(1));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let out = shell.run(Cmd::new("false").allow_error()).unwrap();
        assert_eq!(out.status, Some(1));
        assert!(!out.success());
    }

    #[test]
    fn local_shell_captures_and_reports_status() {
        let shell = LocalShell::new();

        let out = shell.run(argv!("echo", "hello").capture()).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");

        let out = shell.run(Cmd::new("false").allow_error()).unwrap();
        assert_eq!(out.status, Some(1));

        assert!(shell.run(Cmd::new("false")).is_err());
    }

    #[test]
    fn local_shell_truncates_then_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        let shell = LocalShell::new();

        shell.run(argv!("echo", "first").stdout_to(&path)).unwrap();
        shell.run(argv!("echo", "second").append_to(&path)).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");

        shell.run(argv!("echo", "third").stdout_to(&path)).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "third\n");
    }

    #[test]
    fn dry_run_does_not_execute() {
        let mut shell = LocalShell::new();
        shell.toggle_dry_run();
        assert!(shell.is_dry_run());

        let out = shell.run(Cmd::new("false")).unwrap();
        assert!(out.success());
    }

    #[test]
    fn stop_kills_a_background_process() {
        let shell = LocalShell::new();
        let mut handle = shell.spawn(argv!("sleep", 30).mute()).unwrap();
        assert!(handle.pid() > 0);
        assert!(handle.is_running());
        handle.stop().unwrap();
    }

    #[test]
    fn create_dir_tolerates_existing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("run0");
        let sub = sub.to_str().unwrap();
        let shell = LocalShell::new();

        shell.create_dir(sub).unwrap();
        shell.create_dir(sub).unwrap();
        shell.set_mode(sub, 0o777).unwrap();

        let mode = fs::metadata(sub).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o777);
    }
}
