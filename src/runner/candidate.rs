//! Candidate execution as a bounded, fully captured subprocess

use std::ffi::OsString;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{Invocation, Latency, RunResult};
use crate::error::{HarnessError, Result};
use crate::fixture::read_text_shaped;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long to wait for pipes to drain once the candidate has exited
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Invokes an external candidate executable; never retries
pub struct CandidateRunner {
    executable: PathBuf,
    launcher: Vec<OsString>,
    timeout: Duration,
}

impl CandidateRunner {
    /// Runner for `executable` with the given wait bound
    pub fn new<P: Into<PathBuf>>(executable: P, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            launcher: Vec::new(),
            timeout,
        }
    }

    /// Start the executable through a launcher, e.g. an interpreter
    ///
    /// The launcher argv comes first, then the executable, then the protocol.
    pub fn with_launcher<I, S>(mut self, launcher: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.launcher = launcher.into_iter().map(Into::into).collect();
        self
    }

    /// Executable under test
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let mut cmd = match self.launcher.split_first() {
            Some((program, prefix)) => {
                let mut c = Command::new(program);
                c.args(prefix).arg(&self.executable);
                c
            }
            None => Command::new(&self.executable),
        };
        cmd.args(invocation.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so a timeout can take down every descendant
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }

    /// Printable command line
    pub fn describe(&self, invocation: &Invocation) -> String {
        self.launcher
            .iter()
            .cloned()
            .chain(std::iter::once(self.executable.clone().into_os_string()))
            .chain(invocation.to_args())
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run one invocation and load the output fixture it wrote
    pub fn run(&self, invocation: &Invocation) -> Result<RunResult> {
        if !self.executable.exists() {
            return Err(HarnessError::CandidateMissing {
                path: self.executable.clone(),
            });
        }

        // A leftover output from an earlier run must not pass for this one
        let output_path = invocation.output_path();
        if output_path.exists() {
            fs::remove_file(output_path).map_err(|e| HarnessError::io(output_path, e))?;
        }

        info!("Running candidate {}: {}", invocation.label(), self.describe(invocation));
        let start = Instant::now();
        let mut child = self
            .command(invocation)
            .spawn()
            .map_err(|e| HarnessError::io(&self.executable, e))?;

        let stdout_reader = spawn_reader(child.stdout.take());
        let stderr_reader = spawn_reader(child.stderr.take());

        let waited = wait_with_timeout(&mut child, self.timeout);
        let elapsed = start.elapsed();
        let drain_deadline = Instant::now() + DRAIN_GRACE;
        let stdout = collect_output(stdout_reader, drain_deadline, &self.executable)?;
        let stderr = collect_output(stderr_reader, drain_deadline, &self.executable)?;

        for line in stdout.lines() {
            debug!("[candidate] {}", line);
        }

        let status = match waited {
            Ok(Some(status)) => status,
            Ok(None) => {
                return Err(HarnessError::CandidateTimeout {
                    timeout: self.timeout,
                    stderr,
                })
            }
            Err(e) => return Err(HarnessError::io(&self.executable, e)),
        };

        if !status.success() {
            return Err(HarnessError::CandidateProcess {
                code: status.code(),
                stderr,
            });
        }

        let output = read_text_shaped(output_path, &invocation.output_shape())?;
        let latency = Latency {
            iterations: 1,
            total: elapsed,
        };
        info!(
            "Candidate output saved to {:?} ({:.2} µs wall time)",
            output_path,
            latency.mean_micros()
        );

        Ok(RunResult {
            output,
            latency: Some(latency),
            exit_code: status.code(),
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<io::Result<String>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut bytes = Vec::new();
        let result = match pipe {
            Some(mut pipe) => pipe
                .read_to_end(&mut bytes)
                .map(|_| String::from_utf8_lossy(&bytes).into_owned()),
            None => Ok(String::new()),
        };
        let _ = tx.send(result);
    });
    rx
}

/// Captured text of one pipe; a pipe still held open by a stray descendant
/// is abandoned at `deadline`
fn collect_output(
    reader: Receiver<io::Result<String>>,
    deadline: Instant,
    executable: &Path,
) -> Result<String> {
    match reader.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(result) => result.map_err(|e| HarnessError::io(executable, e)),
        Err(RecvTimeoutError::Timeout) => {
            warn!("Candidate output pipe still open after exit; output truncated");
            Ok(String::new())
        }
        Err(RecvTimeoutError::Disconnected) => Err(HarnessError::io(
            executable,
            io::Error::new(io::ErrorKind::Other, "pipe reader thread panicked"),
        )),
    }
}

/// Poll until exit; `Ok(None)` means the bound expired and the candidate's
/// process group was killed
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        match child.try_wait()? {
            Some(status) => return Ok(Some(status)),
            None if start.elapsed() >= timeout => {
                kill_process_group(child);
                let _ = child.kill();
                let _ = child.wait();
                return Ok(None);
            }
            None => thread::sleep(POLL_INTERVAL),
        }
    }
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: kill(2) has no memory effects; the group id is the child's own
    // pid, assigned by process_group(0) at spawn
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("candidate.sh");
        fs::write(&path, body).unwrap();
        path
    }

    fn projection(dir: &TempDir) -> Invocation {
        Invocation::Projection {
            input: dir.path().join("input.txt"),
            weight: dir.path().join("weight.bin"),
            output: dir.path().join("out_candidate.txt"),
            n: 1,
            k: 2,
            m: 2,
        }
    }

    fn runner(exe: PathBuf) -> CandidateRunner {
        CandidateRunner::new(exe, Duration::from_secs(10)).with_launcher(["/bin/sh"])
    }

    #[test]
    fn test_missing_executable_fails_before_spawn() {
        let dir = tempdir().unwrap();
        let inv = projection(&dir);
        let err = CandidateRunner::new(dir.path().join("no_such_exe"), Duration::from_secs(1))
            .run(&inv)
            .unwrap_err();
        assert!(matches!(err, HarnessError::CandidateMissing { .. }));
    }

    #[test]
    fn test_successful_run_reads_output() {
        let dir = tempdir().unwrap();
        let exe = script(&dir, "printf '0.5\\n-1.25\\n' > \"$3\"\necho done $5 $6\n");

        let result = runner(exe).run(&projection(&dir)).unwrap();

        assert_eq!(result.output.data(), &[0.5, -1.25]);
        assert_eq!(result.output.shape(), &[1, 2]);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.latency.unwrap().iterations, 1);
    }

    #[test]
    fn test_nonzero_exit_carries_stderr() {
        let dir = tempdir().unwrap();
        let exe = script(&dir, "echo 'weight file truncated' >&2\nexit 3\n");

        let err = runner(exe).run(&projection(&dir)).unwrap_err();
        match err {
            HarnessError::CandidateProcess { code, stderr } => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("weight file truncated"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_timeout_kills_candidate() {
        let dir = tempdir().unwrap();
        let exe = script(&dir, "exec sleep 5\n");

        let start = Instant::now();
        let err = CandidateRunner::new(exe, Duration::from_millis(200))
            .with_launcher(["/bin/sh"])
            .run(&projection(&dir))
            .unwrap_err();

        assert!(matches!(err, HarnessError::CandidateTimeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_timeout_kills_forked_descendants() {
        let dir = tempdir().unwrap();
        // The shell forks sleep, which inherits both pipes
        let exe = script(&dir, "sleep 6\n");

        let start = Instant::now();
        let err = CandidateRunner::new(exe, Duration::from_millis(200))
            .with_launcher(["/bin/sh"])
            .run(&projection(&dir))
            .unwrap_err();

        assert!(matches!(err, HarnessError::CandidateTimeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_exit_with_lingering_background_job() {
        let dir = tempdir().unwrap();
        let exe = script(&dir, "printf '1\\n2\\n' > \"$3\"\nsleep 6 &\nexit 0\n");

        let start = Instant::now();
        let result = runner(exe).run(&projection(&dir)).unwrap();

        assert_eq!(result.output.data(), &[1.0, 2.0]);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_success_without_output_is_missing_fixture() {
        let dir = tempdir().unwrap();
        let exe = script(&dir, "exit 0\n");

        let err = runner(exe).run(&projection(&dir)).unwrap_err();
        assert!(matches!(err, HarnessError::MissingFixture { .. }));
    }

    #[test]
    fn test_stale_output_is_removed() {
        let dir = tempdir().unwrap();
        let inv = projection(&dir);
        fs::write(inv.output_path(), "1\n2\n").unwrap();
        let exe = script(&dir, "exit 0\n");

        let err = runner(exe).run(&inv).unwrap_err();
        assert!(matches!(err, HarnessError::MissingFixture { .. }));
    }

    #[test]
    fn test_wrong_output_length() {
        let dir = tempdir().unwrap();
        let exe = script(&dir, "printf '1\\n2\\n3\\n' > \"$3\"\n");

        let err = runner(exe).run(&projection(&dir)).unwrap_err();
        assert!(matches!(err, HarnessError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_describe_lists_protocol() {
        let dir = tempdir().unwrap();
        let inv = projection(&dir);
        let line = runner(PathBuf::from("cand.sh")).describe(&inv);
        assert!(line.starts_with("/bin/sh cand.sh "));
        assert!(line.ends_with(" 1 2 2"));
    }
}
