mod class_name;
mod classify;
mod process_runner;
mod runner;
mod workspace;

pub use class_name::resolve_class_name;
pub use classify::{CompileResult, FailureReason, NO_OUTPUT_PLACEHOLDER, classify};
pub use process_runner::ProcessRunner;
pub use runner::{PhaseOutcome, PhaseRunner};
pub use workspace::Workspace;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::SandboxConfig;

const SOURCE_PLACEHOLDER: &str = "%SOURCE%";
const CLASS_PLACEHOLDER: &str = "%CLASS%";

/// Failures that prevent a request from producing a classified result
///
/// Display strings stay generic because they are returned to callers; the
/// sources carry the detail and are only logged.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("failed to create workspace")]
    WorkspaceCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write source file")]
    WorkspaceWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for `{program}`")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} command is empty")]
    EmptyCommand(Phase),

    #[error("sandbox is not accepting jobs")]
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Compile,
    Run,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compile => f.write_str("compile"),
            Self::Run => f.write_str("run"),
        }
    }
}

/// Drives one request through workspace, compile, run and classification
pub struct Sandbox {
    config: SandboxConfig,
    runner: Arc<dyn PhaseRunner>,
    permits: Semaphore,
}

impl Sandbox {
    pub fn new(config: SandboxConfig, runner: Arc<dyn PhaseRunner>) -> Self {
        let permits = Semaphore::new(config.max_concurrent_jobs.clamp(1, Semaphore::MAX_PERMITS));
        Self {
            config,
            runner,
            permits,
        }
    }

    /// Creates a sandbox backed by real child processes
    pub fn with_process_runner(config: SandboxConfig) -> Self {
        let runner = Arc::new(ProcessRunner::new(config.output_limit));
        log::info!(
            "Sandbox ready: scratch root {}, up to {} concurrent jobs",
            config.scratch_root.display(),
            config.max_concurrent_jobs
        );
        log::warn!("Sandbox provides NO security isolation beyond time limits");
        Self::new(config, runner)
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Compiles and runs `source` in a fresh workspace
    ///
    /// The workspace is removed before this returns on every path.
    pub async fn compile_and_run(&self, source: &str) -> Result<CompileResult, SandboxError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SandboxError::Unavailable)?;

        let mut workspace = Workspace::create(&self.config.scratch_root).await?;
        let class_name = resolve_class_name(source, &self.config.default_class_name);
        let source_name = format!("{class_name}.{}", self.config.source_extension);
        workspace.write_source(&source_name, source).await?;
        log::info!("Workspace {} prepared for class {class_name}", workspace.id());

        let compile = self
            .run_phase(Phase::Compile, &workspace, &source_name, class_name)
            .await?;

        // Any compiler stderr short-circuits the run phase.
        let run = if compile.stderr.is_empty() {
            Some(
                self.run_phase(Phase::Run, &workspace, &source_name, class_name)
                    .await?,
            )
        } else {
            None
        };

        let result = classify(&compile, run.as_ref());
        workspace.destroy();
        Ok(result)
    }

    async fn run_phase(
        &self,
        phase: Phase,
        workspace: &Workspace,
        source_name: &str,
        class_name: &str,
    ) -> Result<PhaseOutcome, SandboxError> {
        let (template, time_limit) = match phase {
            Phase::Compile => (&self.config.compiler, self.config.compile_time_limit),
            Phase::Run => (&self.config.runtime, self.config.run_time_limit),
        };
        let command = apply_template(template, source_name, class_name);
        let Some((program, args)) = command.split_first() else {
            return Err(SandboxError::EmptyCommand(phase));
        };

        log::debug!("Workspace {}: {phase} phase `{}`", workspace.id(), command.join(" "));
        let outcome = self
            .runner
            .run_phase(program, args, workspace.root(), time_limit.as_duration())
            .await?;
        if outcome.timed_out {
            log::warn!(
                "Workspace {}: {phase} phase timed out after {} ms",
                workspace.id(),
                time_limit.0
            );
        }
        Ok(outcome)
    }
}

/// Substitutes the source file and class name into a command template
fn apply_template(template: &[String], source_name: &str, class_name: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            arg.replace(SOURCE_PLACEHOLDER, source_name)
                .replace(CLASS_PLACEHOLDER, class_name)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_template() {
        let template = vec![
            "java".to_string(),
            "-cp".to_string(),
            ".".to_string(),
            "%CLASS%".to_string(),
        ];
        assert_eq!(
            apply_template(&template, "Foo.java", "Foo"),
            vec!["java", "-cp", ".", "Foo"]
        );

        let template = vec!["javac".to_string(), "-d=%CLASS%/%SOURCE%".to_string()];
        assert_eq!(
            apply_template(&template, "Foo.java", "Foo"),
            vec!["javac", "-d=Foo/Foo.java"]
        );
    }
}
