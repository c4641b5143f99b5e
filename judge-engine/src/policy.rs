//! Syscall allow/deny policy carried alongside the sandbox configuration.
//!
//! Enforcement is optional and off by default: an earlier in-kernel filter
//! rejected `execve` itself and had to be rolled back, so the policy is kept
//! as configuration for deployments that layer a supervisor-side filter.
//! The namespace and rlimit isolation in [`crate::sandbox`] does not depend
//! on it.

pub const ALLOWED_SYSCALLS: &[&str] = &[
    "read",
    "write",
    "exit",
    "exit_group",
    "mmap",
    "munmap",
    "mprotect",
    "brk",
    "open",
    "openat",
    "close",
    "stat",
    "fstat",
    "lstat",
    "newfstatat",
    "ioctl",
    "rt_sigaction",
    "rt_sigreturn",
    "rt_sigprocmask",
    "arch_prctl",
    "execve",
    "getdents",
    "getdents64",
    "readv",
    "writev",
    "pread64",
    "pwrite64",
    "lseek",
];

pub const DENIED_SYSCALLS: &[&str] = &[
    "fork",
    "vfork",
    "clone",
    "clone3",
    "ptrace",
    "socket",
    "connect",
    "accept",
    "bind",
    "listen",
    "sendto",
    "recvfrom",
    "sendmsg",
    "recvmsg",
    "mount",
    "umount2",
    "chroot",
    "kill",
];

#[derive(Debug, Clone)]
pub struct SyscallPolicy {
    pub enforce: bool,
    allowed: &'static [&'static str],
    denied: &'static [&'static str],
}

impl Default for SyscallPolicy {
    fn default() -> Self {
        SyscallPolicy {
            enforce: false,
            allowed: ALLOWED_SYSCALLS,
            denied: DENIED_SYSCALLS,
        }
    }
}

impl SyscallPolicy {
    /// Deny wins over allow; unknown syscalls pass only when the policy is
    /// advisory.
    pub fn permits(&self, syscall: &str) -> bool {
        if self.denied.contains(&syscall) {
            return false;
        }
        if self.allowed.contains(&syscall) {
            return true;
        }
        !self.enforce
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_and_basic_io_are_always_permitted() {
        let policy = SyscallPolicy {
            enforce: true,
            ..Default::default()
        };
        for syscall in ["execve", "read", "write", "exit_group", "mmap", "brk"] {
            assert!(policy.permits(syscall), "{syscall} should be permitted");
        }
    }

    #[test]
    fn process_and_network_escapes_are_denied() {
        let policy = SyscallPolicy::default();
        for syscall in ["fork", "clone", "ptrace", "socket", "mount", "chroot", "kill"] {
            assert!(!policy.permits(syscall), "{syscall} should be denied");
        }
    }

    #[test]
    fn unknown_syscalls_depend_on_enforcement() {
        let advisory = SyscallPolicy::default();
        assert!(advisory.permits("getrandom"));

        let enforcing = SyscallPolicy {
            enforce: true,
            ..Default::default()
        };
        assert!(!enforcing.permits("getrandom"));
    }
}
