//! Restricted process execution
//!
//! Commands run with a cleared environment, in their own process group and
//! under conservative resource limits. On timeout the whole group is
//! killed, so helper processes spawned by a test runner die with it. The
//! pipe drains run on the same clock: a background process that keeps the
//! pipes open after the command exits cannot stall the runner past its
//! budget. An external confinement wrapper can be layered in front of the
//! command; outcome decoding is identical in both modes.

use async_trait::async_trait;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{setsid, Pid};
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{ExecRequest, ProcessOutcome, Runner};

/// Open file descriptors allowed to a supervised command.
const NOFILE_LIMIT: u64 = 128;

/// Minimum time the pipe drains get after the child is gone, so bytes
/// still sitting in the kernel pipe buffer can be collected.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Confinement mode applied to every executed command.
#[derive(Debug, Clone, Default)]
pub enum SandboxPolicy {
    /// Restricted direct execution. The conservative fallback when no
    /// confinement helper is installed on the host.
    #[default]
    Restricted,
    /// Prefix every command with an external confinement helper. The
    /// request's extra readable directories are forwarded as repeated
    /// `dir_flag` arguments before the original command.
    Wrapper { program: PathBuf, dir_flag: String },
}

/// Runner that executes commands under the configured sandbox policy
pub struct SafeRunner {
    policy: SandboxPolicy,
}

impl SafeRunner {
    pub fn new(policy: SandboxPolicy) -> Self {
        Self { policy }
    }

    /// Restricted direct execution without a wrapper
    pub fn restricted() -> Self {
        Self::new(SandboxPolicy::Restricted)
    }

    /// Final argument vector after applying the sandbox policy
    fn effective_argv(&self, req: &ExecRequest) -> Vec<String> {
        match &self.policy {
            SandboxPolicy::Restricted => req.argv.clone(),
            SandboxPolicy::Wrapper { program, dir_flag } => {
                let mut argv = vec![program.to_string_lossy().into_owned()];
                for dir in &req.extra_read_dirs {
                    argv.push(dir_flag.clone());
                    argv.push(dir.to_string_lossy().into_owned());
                }
                argv.extend(req.argv.iter().cloned());
                argv
            }
        }
    }
}

/// What one stream yielded: the retained bytes, and whether the cap
/// forced any to be dropped.
#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    dropped: bool,
}

/// Read a stream to EOF into a shared capture, retaining at most `limit`
/// bytes.
///
/// Reading keeps going after the cap so the child never blocks on a full
/// pipe while we wait for it to exit. The buffer is shared so the
/// supervisor can abort a stuck drain and still keep what arrived.
async fn drain_capped<R: AsyncRead + Unpin>(
    mut stream: R,
    limit: usize,
    capture: Arc<Mutex<Capture>>,
) {
    let mut chunk = [0u8; 8192];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let mut capture = capture.lock().await;
                let room = limit.saturating_sub(capture.bytes.len());
                if n > room {
                    capture.dropped = true;
                }
                if room > 0 {
                    capture.bytes.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
            Err(_) => break,
        }
    }
}

fn kill_group(group: Option<Pid>) {
    if let Some(pgid) = group {
        if let Err(e) = killpg(pgid, Signal::SIGKILL) {
            debug!("killpg({}) failed: {}", pgid, e);
        }
    }
}

#[async_trait]
impl Runner for SafeRunner {
    async fn execute(&self, req: &ExecRequest) -> ProcessOutcome {
        let argv = self.effective_argv(req);
        let Some((program, args)) = argv.split_first() else {
            return ProcessOutcome::launch_failure("cannot execute an empty command");
        };

        debug!("Executing {:?} in {:?}", argv, req.working_dir);

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&req.working_dir)
            .env_clear()
            .envs(req.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let fsize_limit = req.file_size_limit;
        unsafe {
            cmd.pre_exec(move || {
                // own process group, so a timeout can kill the whole tree
                setsid().map_err(io::Error::from)?;
                if let Some(limit) = fsize_limit {
                    setrlimit(Resource::RLIMIT_FSIZE, limit, limit).map_err(io::Error::from)?;
                }
                setrlimit(Resource::RLIMIT_NOFILE, NOFILE_LIMIT, NOFILE_LIMIT)
                    .map_err(io::Error::from)?;
                setrlimit(Resource::RLIMIT_CORE, 0, 0).map_err(io::Error::from)?;
                Ok(())
            });
        }

        let started = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn {:?}: {}", program, e);
                return ProcessOutcome::launch_failure(format!(
                    "failed to execute {:?}: {}",
                    program, e
                ));
            }
        };
        // The group id is the leader's pid; it stays valid for killpg even
        // after the leader has been reaped, so grab it before waiting.
        let group = child.id().map(|pid| Pid::from_raw(pid as i32));

        let limit = req.output_limit;
        let out_capture = Arc::new(Mutex::new(Capture::default()));
        let err_capture = Arc::new(Mutex::new(Capture::default()));
        let stdout = child.stdout.take();
        let mut out_task = {
            let capture = Arc::clone(&out_capture);
            tokio::spawn(async move {
                if let Some(stream) = stdout {
                    drain_capped(stream, limit, capture).await;
                }
            })
        };
        let stderr = child.stderr.take();
        let mut err_task = {
            let capture = Arc::clone(&err_capture);
            tokio::spawn(async move {
                if let Some(stream) = stderr {
                    drain_capped(stream, limit, capture).await;
                }
            })
        };

        let mut timed_out = false;
        let status = match tokio::time::timeout(req.timeout, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!("Failed to wait for {:?}: {}", program, e);
                None
            }
            Err(_) => {
                timed_out = true;
                warn!("Timeout after {:?}, killing {:?}", req.timeout, argv);
                kill_group(group);
                let _ = child.kill().await;
                child.wait().await.ok()
            }
        };

        // The child is gone, but anything it left behind can still hold the
        // write ends of the pipes. The drains get whatever is left of the
        // time budget; past that the group is killed and the partial
        // captures stand.
        let mut drain_cut = false;
        let drain_budget = req
            .timeout
            .saturating_sub(started.elapsed())
            .max(DRAIN_GRACE);
        let joined = tokio::time::timeout(drain_budget, async {
            let _ = (&mut out_task).await;
            let _ = (&mut err_task).await;
        })
        .await;
        if joined.is_err() {
            warn!("Output of {:?} still open after exit, killing the group", argv);
            kill_group(group);
            out_task.abort();
            err_task.abort();
            drain_cut = true;
            timed_out = true;
        }
        let time_ms = started.elapsed().as_millis() as u64;

        let (mut output, mut truncated) = {
            let out = out_capture.lock().await;
            let err = err_capture.lock().await;
            let mut combined = String::from_utf8_lossy(&out.bytes).into_owned();
            combined.push_str(&String::from_utf8_lossy(&err.bytes));
            (combined, out.dropped || err.dropped || drain_cut)
        };
        if output.len() > req.output_limit {
            truncated = true;
            let mut cut = req.output_limit;
            while !output.is_char_boundary(cut) {
                cut -= 1;
            }
            output.truncate(cut);
        }

        let (exit_code, oom) = match status {
            Some(status) => match status.code() {
                Some(code) => (code, false),
                None => {
                    let signal = status.signal().unwrap_or(0);
                    // SIGKILL we did not send ourselves is the kernel's
                    // OOM killer or an external limit enforcer
                    let oom = signal == Signal::SIGKILL as i32 && !timed_out;
                    (128 + signal, oom)
                }
            },
            None => (126, false),
        };

        debug!(
            "Finished {:?}: exit={} timed_out={} oom={} truncated={} in {}ms",
            program, exit_code, timed_out, oom, truncated, time_ms
        );

        ProcessOutcome {
            output,
            exit_code,
            timed_out,
            oom,
            truncated,
            time_ms,
        }
    }
}
