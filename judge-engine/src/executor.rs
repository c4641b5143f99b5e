//! Compile-and-run orchestration over the sandbox. One `Executor` serves one
//! judging task: it writes the source into the task's work directory,
//! compiles it under sandbox limits, then runs the binary per test input.

use crate::sandbox::{
    run_sandboxed, Credentials, ExecutionReport, Isolation, SandboxLimits,
};
use crate::policy::SyscallPolicy;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The judged language. Only one native-compiled language is wired up, but
/// everything downstream is parametric over this description.
#[derive(Debug, Clone)]
pub struct Language {
    pub name: &'static str,
    pub extension: &'static str,
    pub source_file: &'static str,
    pub binary_file: &'static str,
    pub compiler: &'static str,
    pub compile_flags: &'static [&'static str],
}

impl Language {
    pub fn cpp17() -> Language {
        Language {
            name: "C++17",
            extension: "cpp",
            source_file: "solution.cpp",
            binary_file: "solution",
            compiler: "g++",
            compile_flags: &["-O2", "-std=c++17"],
        }
    }

    fn compile_args(&self, source: &Path, binary: &Path) -> Vec<String> {
        let mut args: Vec<String> = self.compile_flags.iter().map(|s| s.to_string()).collect();
        args.push(source.display().to_string());
        args.push("-o".to_string());
        args.push(binary.display().to_string());
        args
    }
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub time_limit: Duration,
    pub memory_limit_mb: u64,
    pub run_as: Option<Credentials>,
    pub namespaces: bool,
    pub syscall_policy: SyscallPolicy,
    pub language: Language,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            time_limit: Duration::from_secs(2),
            memory_limit_mb: 256,
            run_as: None,
            namespaces: true,
            syscall_policy: SyscallPolicy::default(),
            language: Language::cpp17(),
        }
    }
}

#[derive(Debug)]
pub struct CompileOutcome {
    pub success: bool,
    pub binary: PathBuf,
    pub diagnostics: String,
}

#[derive(Clone)]
pub struct Executor {
    config: SandboxConfig,
}

impl Executor {
    pub fn new(config: SandboxConfig) -> Self {
        Executor { config }
    }

    pub fn language(&self) -> &Language {
        &self.config.language
    }

    /// Write the source into `work_dir` and compile it there. The compiler
    /// runs under its own sandbox limits: bounded time and memory, no
    /// network, but enough processes for its internal driver.
    pub async fn compile(&self, source_code: &str, work_dir: &Path) -> Result<CompileOutcome> {
        let source = work_dir.join(self.config.language.source_file);
        let binary = work_dir.join(self.config.language.binary_file);
        tokio::fs::write(&source, source_code)
            .await
            .context("writing source file")?;

        let args = self.config.language.compile_args(&source, &binary);
        let report = self
            .run_on_blocking_thread(
                self.config.language.compiler.to_string(),
                args,
                work_dir.to_path_buf(),
                Vec::new(),
                SandboxLimits::for_compile(),
                Isolation {
                    namespaces: self.config.namespaces,
                    run_as: None,
                    syscall_policy: self.config.syscall_policy.clone(),
                },
            )
            .await?;

        let success = report.exit_code == 0 && !report.signal_killed && !report.timed_out;
        if !success {
            tracing::debug!(
                exit_code = report.exit_code,
                "compilation failed: {}",
                report.stderr.lines().next().unwrap_or("")
            );
        }
        Ok(CompileOutcome {
            success,
            binary,
            diagnostics: report.stderr,
        })
    }

    /// Run the compiled binary against one test input under the submission
    /// limits, dropping to the restricted user when one is configured.
    pub async fn execute(
        &self,
        binary: &Path,
        work_dir: &Path,
        stdin_bytes: &[u8],
    ) -> Result<ExecutionReport> {
        self.run_on_blocking_thread(
            binary.display().to_string(),
            Vec::new(),
            work_dir.to_path_buf(),
            stdin_bytes.to_vec(),
            SandboxLimits::for_run(self.config.time_limit, self.config.memory_limit_mb),
            Isolation {
                namespaces: self.config.namespaces,
                run_as: self.config.run_as,
                syscall_policy: self.config.syscall_policy.clone(),
            },
        )
        .await
    }

    async fn run_on_blocking_thread(
        &self,
        program: String,
        args: Vec<String>,
        work_dir: PathBuf,
        stdin_bytes: Vec<u8>,
        limits: SandboxLimits,
        isolation: Isolation,
    ) -> Result<ExecutionReport> {
        tokio::task::spawn_blocking(move || {
            run_sandboxed(&program, &args, &work_dir, &stdin_bytes, &limits, &isolation)
        })
        .await
        .context("sandbox task aborted")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_args_carry_standard_flags_and_paths() {
        let language = Language::cpp17();
        let args = language.compile_args(Path::new("/work/solution.cpp"), Path::new("/work/solution"));
        assert_eq!(
            args,
            vec![
                "-O2".to_string(),
                "-std=c++17".to_string(),
                "/work/solution.cpp".to_string(),
                "-o".to_string(),
                "/work/solution".to_string(),
            ]
        );
    }

    #[test]
    fn default_config_matches_judging_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.time_limit, Duration::from_secs(2));
        assert_eq!(config.memory_limit_mb, 256);
        assert!(config.namespaces);
        assert!(!config.syscall_policy.enforce);
        assert_eq!(config.language.extension, "cpp");
    }
}
