use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{HarnessError, Result};
use crate::platform::BinaryReference;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Merged stdout+stderr of the most recent command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedOutput {
    pub command: String,
    pub text: String,
    /// None when the child was ended by a signal.
    pub exit_code: Option<i32>,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// `<bin>/<arch>-<os>-<name>[.exe] <args>`
pub fn command_line(binary: &BinaryReference, args: &str) -> String {
    let path = binary.command_path();
    let args = args.trim();
    if args.is_empty() {
        path
    } else {
        format!("{path} {args}")
    }
}

fn shell_command(command_line: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        // Grouped so cmd's own diagnostics ("is not recognized") follow the redirect.
        cmd.arg("/C").arg(format!("({command_line}) 2>&1"));
        cmd
    } else {
        let mut cmd = Command::new("sh");
        // Redirect first so the shell's own diagnostics ("not found") are captured too.
        cmd.arg("-c").arg(format!("exec 2>&1; {command_line}"));
        cmd
    }
}

/// The shell leads its own process group so the CLI it forks can be killed with it.
#[cfg(unix)]
fn isolate(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate(_cmd: &mut Command) {}

#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(err) = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        debug!(pid = child.id(), error = %err, "process group already gone");
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Runs `command_line` through the platform shell from `work_dir`.
///
/// With a timeout, the deadline covers both the shell's exit and the end of
/// its output; anything still holding the pipe at the deadline is killed
/// along with the shell's process group.
pub fn run_shell(command_line: &str, work_dir: &Path, timeout: Option<Duration>) -> Result<CapturedOutput> {
    debug!(command = command_line, work_dir = %work_dir.display(), "spawning");
    let mut cmd = shell_command(command_line);
    cmd.current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    isolate(&mut cmd);
    let mut child = cmd.spawn().map_err(|source| HarnessError::Spawn {
        command: command_line.to_string(),
        source,
    })?;

    let mut stdout = child.stdout.take().ok_or_else(|| HarnessError::Spawn {
        command: command_line.to_string(),
        source: std::io::Error::other("stdout was not captured"),
    })?;
    // Drained on a separate thread so a chatty child never blocks on a full pipe.
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = tx.send(stdout.read_to_end(&mut buf).map(|_| buf));
    });

    let wait_err = |source| HarnessError::Spawn {
        command: command_line.to_string(),
        source,
    };
    let timed_out = || HarnessError::CommandTimedOut {
        command: command_line.to_string(),
        timeout: timeout.unwrap_or_default(),
    };
    let deadline = timeout.map(|limit| Instant::now() + limit);

    let status = match deadline {
        None => child.wait().map_err(wait_err)?,
        Some(deadline) => loop {
            if let Some(status) = child.try_wait().map_err(wait_err)? {
                break status;
            }
            if Instant::now() >= deadline {
                kill_tree(&mut child);
                return Err(timed_out());
            }
            thread::sleep(POLL_INTERVAL);
        },
    };

    let bytes = match deadline {
        None => rx.recv().ok(),
        Some(deadline) => match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(read) => Some(read),
            Err(RecvTimeoutError::Timeout) => {
                // The shell is gone but a leftover process still holds the pipe.
                kill_tree(&mut child);
                return Err(timed_out());
            }
            Err(RecvTimeoutError::Disconnected) => None,
        },
    }
    .ok_or_else(|| wait_err(std::io::Error::other("output reader panicked")))?
    .map_err(wait_err)?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    debug!(command = command_line, exit_code = ?status.code(), bytes = bytes.len(), "command finished");
    Ok(CapturedOutput {
        command: command_line.to_string(),
        text,
        exit_code: status.code(),
    })
}

pub fn run(
    binary: &BinaryReference,
    args: &str,
    work_dir: &Path,
    timeout: Option<Duration>,
) -> Result<CapturedOutput> {
    run_shell(&command_line(binary, args), work_dir, timeout)
}

pub fn run_make(target: &str, work_dir: &Path, timeout: Option<Duration>) -> Result<CapturedOutput> {
    run_shell(&format!("make {}", target.trim()), work_dir, timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn binary() -> BinaryReference {
        BinaryReference {
            path: PathBuf::from("bin").join("x86_64-linux-bugsnag-cli"),
        }
    }

    #[test]
    fn builds_command_line_with_and_without_flags() {
        let path = binary().command_path();
        assert_eq!(command_line(&binary(), ""), path);
        assert_eq!(
            command_line(&binary(), "  upload dart --api-key=K1 "),
            format!("{path} upload dart --api-key=K1")
        );
    }

    #[test]
    fn shell_redirect_wraps_whole_command() {
        let cmd = shell_command("bin/cli --help");
        let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        if cfg!(windows) {
            assert_eq!(args, ["/C", "(bin/cli --help) 2>&1"]);
        } else {
            assert_eq!(args, ["-c", "exec 2>&1; bin/cli --help"]);
        }
    }

    #[cfg(unix)]
    #[test]
    fn merges_stdout_and_stderr_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_shell("echo one; echo two >&2; echo three", dir.path(), None).unwrap();
        assert_eq!(out.text, "one\ntwo\nthree\n");
        assert!(out.success());
    }

    #[cfg(unix)]
    #[test]
    fn preserves_trailing_whitespace_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_shell("printf 'done  \\n\\n'; exit 4", dir.path(), None).unwrap();
        assert_eq!(out.text, "done  \n\n");
        assert_eq!(out.exit_code, Some(4));
        assert!(!out.success());
    }

    #[cfg(unix)]
    #[test]
    fn missing_binary_is_captured_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let out = run(&binary(), "--help", dir.path(), None).unwrap();
        assert!(!out.success());
        assert!(out.text.contains("x86_64-linux-bugsnag-cli"));
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_hung_child() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_shell("exec sleep 5", dir.path(), Some(Duration::from_millis(100))).unwrap_err();
        assert!(matches!(err, HarnessError::CommandTimedOut { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_processes_the_shell_started() {
        let dir = tempfile::tempdir().unwrap();
        // `; true` keeps the outer shell from exec-ing into the inner one.
        let err = run_shell(
            "sh -c 'sleep 1; touch survived'; true",
            dir.path(),
            Some(Duration::from_millis(200)),
        )
        .unwrap_err();
        assert!(matches!(err, HarnessError::CommandTimedOut { .. }));

        thread::sleep(Duration::from_millis(1500));
        assert!(!dir.path().join("survived").exists(), "inner shell outlived the timeout");
    }

    #[cfg(unix)]
    #[test]
    fn timeout_covers_helpers_holding_the_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let err = run_shell(
            "(sleep 1; touch late) & echo started",
            dir.path(),
            Some(Duration::from_millis(200)),
        )
        .unwrap_err();
        assert!(matches!(err, HarnessError::CommandTimedOut { .. }));
        assert!(started.elapsed() < Duration::from_millis(900), "{:?}", started.elapsed());

        thread::sleep(Duration::from_millis(1500));
        assert!(!dir.path().join("late").exists(), "background helper outlived the timeout");
    }

    #[cfg(unix)]
    #[test]
    fn quick_command_finishes_within_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_shell("echo fast", dir.path(), Some(Duration::from_secs(10))).unwrap();
        assert_eq!(out.text, "fast\n");
        assert!(out.success());
    }
}
