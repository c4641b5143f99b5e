//! Low-level sandboxed process execution.
//!
//! The parent creates three stdio pipes plus a status pipe, clones a child
//! into fresh namespaces, and drains stdout/stderr concurrently while it
//! waits. The child applies its resource limits, drops credentials, rewires
//! stdio, and execs. The status pipe's write end is close-on-exec: a
//! successful exec reads as immediate EOF, any setup failure arrives as an
//! errno value. Everything here blocks; callers run it on a blocking thread.

use crate::policy::SyscallPolicy;
use anyhow::{bail, Context, Result};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sched::CloneFlags;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::WaitStatus;
use nix::unistd::{chdir, dup2, execvp, setgid, setuid, Gid, Pid, Uid};
use std::ffi::CString;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::time::{Duration, Instant};

/// Exit code the child reports when it could not reach or complete exec.
pub const EXEC_FAILURE_EXIT_CODE: i32 = 127;

const CHILD_STACK_SIZE: usize = 1024 * 1024;
const HIGHEST_CLOSED_FD: RawFd = 256;

#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub cpu_time: Duration,
    pub address_space_bytes: u64,
    pub open_files: u64,
    pub processes: u64,
}

impl SandboxLimits {
    /// Limits for untrusted submissions: tight descriptor and process caps,
    /// CPU and address space from the problem configuration.
    pub fn for_run(cpu_time: Duration, memory_limit_mb: u64) -> Self {
        SandboxLimits {
            cpu_time,
            address_space_bytes: memory_limit_mb * 1024 * 1024,
            open_files: 64,
            processes: 1,
        }
    }

    /// Looser limits for the compiler, which forks its own driver processes.
    pub fn for_compile() -> Self {
        SandboxLimits {
            cpu_time: Duration::from_secs(20),
            address_space_bytes: 1024 * 1024 * 1024,
            open_files: 128,
            processes: 64,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Credentials {
    pub uid: Uid,
    pub gid: Gid,
}

#[derive(Debug, Clone, Default)]
pub struct Isolation {
    /// Detach pid, network, mount, UTS, and IPC namespaces before exec.
    pub namespaces: bool,
    /// Credentials to drop to, group first then user.
    pub run_as: Option<Credentials>,
    pub syscall_policy: SyscallPolicy,
}

/// Observed outcome of one sandboxed execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub exit_code: i32,
    pub timed_out: bool,
    pub memory_exceeded: bool,
    pub signal_killed: bool,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub max_rss_kb: i64,
}

/// Run `program` with `args` inside the sandbox, feeding `stdin_bytes` and
/// capturing both output streams. CPU time is bounded inside the child via
/// rlimit; an outer wall clock of three times the CPU allowance catches
/// children parked in blocking I/O. It never fires before the CPU limit.
pub fn run_sandboxed(
    program: &str,
    args: &[String],
    work_dir: &Path,
    stdin_bytes: &[u8],
    limits: &SandboxLimits,
    isolation: &Isolation,
) -> Result<ExecutionReport> {
    if isolation.syscall_policy.enforce && !isolation.syscall_policy.permits("execve") {
        bail!("syscall policy blocks execve; the child could never start");
    }

    let (stdin_read, stdin_write) = nix::unistd::pipe().context("stdin pipe")?;
    let (stdout_read, stdout_write) = nix::unistd::pipe().context("stdout pipe")?;
    let (stderr_read, stderr_write) = nix::unistd::pipe().context("stderr pipe")?;
    let (status_read, status_write) = nix::unistd::pipe().context("status pipe")?;
    fcntl(
        status_write.as_raw_fd(),
        FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC),
    )
    .context("marking status pipe close-on-exec")?;

    let program_cstr = CString::new(program).context("program name contains NUL")?;
    let mut argv = vec![program_cstr.clone()];
    for arg in args {
        argv.push(CString::new(arg.as_str()).context("argument contains NUL")?);
    }

    let child_stdin = stdin_read.as_raw_fd();
    let child_stdout = stdout_write.as_raw_fd();
    let child_stderr = stderr_write.as_raw_fd();
    let child_status = status_write.as_raw_fd();

    let mut flags = CloneFlags::empty();
    if isolation.namespaces {
        flags |= CloneFlags::CLONE_NEWPID
            | CloneFlags::CLONE_NEWNET
            | CloneFlags::CLONE_NEWNS
            | CloneFlags::CLONE_NEWUTS
            | CloneFlags::CLONE_NEWIPC;
    }

    // Everything the child needs is prepared before the clone; the child
    // must not allocate between clone and exec.
    let mut stack = vec![0u8; CHILD_STACK_SIZE];
    let child = Box::new(|| {
        child_main(
            &program_cstr,
            &argv,
            work_dir,
            child_stdin,
            child_stdout,
            child_stderr,
            child_status,
            limits,
            isolation,
        )
    });
    let pid = unsafe { nix::sched::clone(child, &mut stack, flags, Some(libc::SIGCHLD)) }
        .context("failed to clone sandbox child")?;

    drop(stdin_read);
    drop(stdout_write);
    drop(stderr_write);
    drop(status_write);

    // EOF here means the exec happened; any bytes are the child's errno.
    let mut status_buf = Vec::new();
    File::from(status_read)
        .read_to_end(&mut status_buf)
        .context("reading child status pipe")?;
    if !status_buf.is_empty() {
        let (wait_status, _, _) = wait_for_child(pid, Duration::from_secs(5))?;
        let errno = decode_errno(&status_buf);
        bail!("sandbox child setup failed ({errno}), status {wait_status:?}");
    }

    let wall_clock_cap = limits
        .cpu_time
        .saturating_mul(3)
        .max(Duration::from_secs(3));
    let (wait_status, max_rss_kb, deadline_hit, stdout, stderr) =
        std::thread::scope(|scope| -> Result<(WaitStatus, i64, bool, Vec<u8>, Vec<u8>)> {
            let stdout_reader = scope.spawn(move || read_to_end(stdout_read));
            let stderr_reader = scope.spawn(move || read_to_end(stderr_read));
            scope.spawn(move || {
                // EPIPE just means the child exited without draining input.
                let mut stdin = File::from(stdin_write);
                let _ = stdin.write_all(stdin_bytes);
            });

            let waited = wait_for_child(pid, wall_clock_cap);
            if waited.is_err() {
                // Readers are parked on open pipes; force them to EOF.
                let _ = kill(pid, Signal::SIGKILL);
            }
            let stdout = stdout_reader
                .join()
                .map_err(|_| anyhow::anyhow!("stdout reader panicked"))?;
            let stderr = stderr_reader
                .join()
                .map_err(|_| anyhow::anyhow!("stderr reader panicked"))?;
            let (wait_status, max_rss_kb, deadline_hit) = waited?;
            Ok((wait_status, max_rss_kb, deadline_hit, stdout, stderr))
        })?;

    build_report(wait_status, max_rss_kb, deadline_hit, stdout, stderr, limits)
}

fn decode_errno(bytes: &[u8]) -> Errno {
    if bytes.len() >= 4 {
        Errno::from_raw(i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    } else {
        Errno::UnknownErrno
    }
}

/// Poll-reap the child, SIGKILLing it once the wall-clock cap passes.
/// Returns the decoded status, its peak RSS in kB, and whether the cap hit.
fn wait_for_child(pid: Pid, wall_clock_cap: Duration) -> Result<(WaitStatus, i64, bool)> {
    let started = Instant::now();
    let mut deadline_hit = false;
    loop {
        let mut status: libc::c_int = 0;
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::wait4(pid.as_raw(), &mut status, libc::WNOHANG, &mut usage) };
        match rc {
            -1 => {
                return Err(std::io::Error::last_os_error()).context("wait4 on sandbox child");
            }
            0 => {
                if started.elapsed() >= wall_clock_cap && !deadline_hit {
                    deadline_hit = true;
                    let _ = kill(pid, Signal::SIGKILL);
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            _ => {
                let wait_status =
                    WaitStatus::from_raw(pid, status).context("decoding wait status")?;
                return Ok((wait_status, usage.ru_maxrss, deadline_hit));
            }
        }
    }
}

fn build_report(
    status: WaitStatus,
    max_rss_kb: i64,
    deadline_hit: bool,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    limits: &SandboxLimits,
) -> Result<ExecutionReport> {
    let mut report = ExecutionReport {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        max_rss_kb,
        ..Default::default()
    };

    match status {
        WaitStatus::Exited(_, code) => report.exit_code = code,
        WaitStatus::Signaled(_, Signal::SIGXCPU, _) => report.timed_out = true,
        WaitStatus::Signaled(_, signal, _) => {
            report.signal_killed = true;
            report.signal = Some(signal as i32);
            if deadline_hit && signal == Signal::SIGKILL {
                report.timed_out = true;
            }
        }
        other => bail!("unexpected wait status for sandbox child: {other:?}"),
    }

    // Address-space rejections surface as allocation failures, not as a
    // dedicated wait status; flag the ones we can attribute to the limit.
    let limit_kb = (limits.address_space_bytes / 1024) as i64;
    let failed = report.signal_killed || report.exit_code != 0;
    let alloc_signal = matches!(report.signal, Some(s) if s == libc::SIGSEGV || s == libc::SIGABRT);
    let alloc_message =
        report.stderr.contains("bad_alloc") || report.stderr.contains("out of memory");
    let near_limit = max_rss_kb > 0 && max_rss_kb >= limit_kb - limit_kb / 10;
    if !report.timed_out && failed && (alloc_message || (alloc_signal && near_limit)) {
        report.memory_exceeded = true;
    }

    Ok(report)
}

fn read_to_end(fd: OwnedFd) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = File::from(fd).read_to_end(&mut buf);
    buf
}

#[allow(clippy::too_many_arguments)]
fn child_main(
    program: &CString,
    argv: &[CString],
    work_dir: &Path,
    stdin_fd: RawFd,
    stdout_fd: RawFd,
    stderr_fd: RawFd,
    status_fd: RawFd,
    limits: &SandboxLimits,
    isolation: &Isolation,
) -> isize {
    if let Err(errno) = prepare_child(
        work_dir, stdin_fd, stdout_fd, stderr_fd, status_fd, limits, isolation,
    ) {
        report_errno(status_fd, errno);
        return EXEC_FAILURE_EXIT_CODE as isize;
    }

    let errno = match execvp(program, argv) {
        Err(errno) => errno,
        Ok(infallible) => match infallible {},
    };
    report_errno(status_fd, errno);
    EXEC_FAILURE_EXIT_CODE as isize
}

/// Runs between clone and exec: only async-signal-safe calls.
fn prepare_child(
    work_dir: &Path,
    stdin_fd: RawFd,
    stdout_fd: RawFd,
    stderr_fd: RawFd,
    status_fd: RawFd,
    limits: &SandboxLimits,
    isolation: &Isolation,
) -> std::result::Result<(), Errno> {
    dup2(stdin_fd, 0)?;
    dup2(stdout_fd, 1)?;
    dup2(stderr_fd, 2)?;
    // Everything above 2 goes away, including inherited sockets. The status
    // fd stays for error reporting and closes itself on exec.
    for fd in 3..HIGHEST_CLOSED_FD {
        if fd != status_fd {
            unsafe { libc::close(fd) };
        }
    }

    let cpu_seconds = cpu_limit_seconds(limits.cpu_time);
    setrlimit(Resource::RLIMIT_CPU, cpu_seconds, cpu_seconds)?;
    setrlimit(
        Resource::RLIMIT_AS,
        limits.address_space_bytes,
        limits.address_space_bytes,
    )?;
    setrlimit(Resource::RLIMIT_NOFILE, limits.open_files, limits.open_files)?;
    setrlimit(Resource::RLIMIT_NPROC, limits.processes, limits.processes)?;
    setrlimit(Resource::RLIMIT_CORE, 0, 0)?;

    if let Some(credentials) = isolation.run_as {
        setgid(credentials.gid)?;
        setuid(credentials.uid)?;
    }

    chdir(work_dir)?;
    Ok(())
}

/// Whole seconds, rounded up; RLIMIT_CPU cannot express fractions.
fn cpu_limit_seconds(cpu_time: Duration) -> u64 {
    let mut seconds = cpu_time.as_secs();
    if cpu_time.subsec_nanos() > 0 {
        seconds += 1;
    }
    seconds.max(1)
}

fn report_errno(status_fd: RawFd, errno: Errno) {
    let bytes = (errno as i32).to_ne_bytes();
    unsafe {
        libc::write(status_fd, bytes.as_ptr().cast(), bytes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_limits_derive_from_problem_configuration() {
        let limits = SandboxLimits::for_run(Duration::from_secs(2), 256);
        assert_eq!(limits.address_space_bytes, 256 * 1024 * 1024);
        assert_eq!(limits.processes, 1);
        assert_eq!(limits.open_files, 64);
    }

    #[test]
    fn compile_limits_allow_the_compiler_to_fork() {
        let limits = SandboxLimits::for_compile();
        assert!(limits.processes > 1);
        assert!(limits.address_space_bytes > 256 * 1024 * 1024);
    }

    #[test]
    fn cpu_limit_rounds_up_and_never_hits_zero() {
        assert_eq!(cpu_limit_seconds(Duration::from_millis(500)), 1);
        assert_eq!(cpu_limit_seconds(Duration::from_secs(2)), 2);
        assert_eq!(cpu_limit_seconds(Duration::from_millis(2500)), 3);
        assert_eq!(cpu_limit_seconds(Duration::ZERO), 1);
    }

    #[test]
    fn errno_decoding_tolerates_short_reads() {
        assert_eq!(decode_errno(&[]), Errno::UnknownErrno);
        let bytes = (Errno::ENOENT as i32).to_ne_bytes();
        assert_eq!(decode_errno(&bytes), Errno::ENOENT);
    }
}
