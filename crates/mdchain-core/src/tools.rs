//! External collaborators: grompp (prepare) and mdrun (run).
//!
//! The executor only talks to [`StageTools`]. [`GromacsTools`] spawns the
//! real executables; [`DryRunTools`] prints what would be spawned.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::error::{ChainError, ChainResult};
use crate::mode::ExecutionMode;
use crate::stage::{StageInvocation, Step};

/// Outcome of one external step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,

    pub duration_ms: u64,

    pub success: bool,
}

impl StepOutcome {
    pub fn succeeded(duration_ms: u64) -> Self {
        Self {
            exit_code: Some(0),
            duration_ms,
            success: true,
        }
    }

    pub fn failed(exit_code: Option<i32>, duration_ms: u64) -> Self {
        Self {
            exit_code,
            duration_ms,
            success: false,
        }
    }

    /// Whether this step passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == Some(0)
    }
}

/// The two-step capability every stage needs.
///
/// Implementations block (asynchronously) until the step has finished;
/// the executor never has two calls outstanding.
#[async_trait]
pub trait StageTools: Send + Sync {
    /// Turn the stage config, input coordinates and topology into a run input.
    async fn prepare(&self, invocation: &StageInvocation) -> ChainResult<StepOutcome>;

    /// Run the simulation, producing the stage's output coordinates.
    async fn run(&self, invocation: &StageInvocation) -> ChainResult<StepOutcome>;
}

/// Executable names and explicit environment for the GROMACS tools.
///
/// Built once at startup; nothing reads ambient shell state besides what
/// is listed in `env`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Thread-MPI build used for grompp, plain mdrun and tune_pme.
    pub gmx: String,

    /// MPI build launched by the MPI launcher.
    pub gmx_mpi: String,

    /// MPI launcher.
    pub mpirun: String,

    /// Extra environment for every invocation (e.g. `GMXLIB`).
    pub env: BTreeMap<String, String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            gmx: "gmx".to_string(),
            gmx_mpi: "gmx_mpi".to_string(),
            mpirun: "mpirun".to_string(),
            env: BTreeMap::new(),
        }
    }
}

impl ToolConfig {
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// A fully resolved external command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub current_dir: PathBuf,
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{key}={value:?} ")?;
        }
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Build the grompp command for a stage.
pub fn prepare_command(config: &ToolConfig, invocation: &StageInvocation) -> CommandLine {
    let mut args = vec![
        "grompp".to_string(),
        "-f".to_string(),
        path_arg(&invocation.stage_config),
        "-c".to_string(),
        path_arg(&invocation.input_coordinates),
        "-p".to_string(),
        path_arg(&invocation.topology),
        "-o".to_string(),
        path_arg(&invocation.run_input),
        "-po".to_string(),
        path_arg(&invocation.processed_config),
    ];
    if let Some(max_warnings) = invocation.max_warnings {
        args.push("-maxwarn".to_string());
        args.push(max_warnings.to_string());
    }

    CommandLine {
        program: config.gmx.clone(),
        args,
        env: config.env.clone(),
        current_dir: invocation.data_dir.clone(),
    }
}

/// Build the run command for a stage in the given execution mode.
pub fn run_command(
    config: &ToolConfig,
    mode: &ExecutionMode,
    invocation: &StageInvocation,
) -> CommandLine {
    let stage = invocation.stage.as_str().to_string();
    let run_input = path_arg(&invocation.run_input);
    let output = path_arg(&invocation.output_coordinates);
    let mut env = config.env.clone();

    let (program, args) = match mode {
        ExecutionMode::Single { threads } => {
            let mut args = vec![
                "mdrun".to_string(),
                "-deffnm".to_string(),
                stage,
                "-s".to_string(),
                run_input,
                "-c".to_string(),
                output,
            ];
            if let Some(threads) = threads {
                args.push("-nt".to_string());
                args.push(threads.to_string());
            }
            (config.gmx.clone(), args)
        }
        ExecutionMode::Mpi { host_file, ranks } => {
            let args = vec![
                "-np".to_string(),
                ranks.to_string(),
                "-hostfile".to_string(),
                path_arg(host_file),
                config.gmx_mpi.clone(),
                "mdrun".to_string(),
                "-deffnm".to_string(),
                stage,
                "-s".to_string(),
                run_input,
                "-c".to_string(),
                output,
            ];
            (config.mpirun.clone(), args)
        }
        ExecutionMode::MpiTuned { host_file, ranks } => {
            // tune_pme launches the MPI binary itself through these two.
            env.insert(
                "MPIRUN".to_string(),
                format!("{} -hostfile {}", config.mpirun, host_file.display()),
            );
            env.insert("MDRUN".to_string(), config.gmx_mpi.clone());
            let args = vec![
                "tune_pme".to_string(),
                "-np".to_string(),
                ranks.to_string(),
                "-s".to_string(),
                run_input,
                "-deffnm".to_string(),
                stage,
                "-c".to_string(),
                output,
                "-launch".to_string(),
            ];
            (config.gmx.clone(), args)
        }
    };

    CommandLine {
        program,
        args,
        env,
        current_dir: invocation.data_dir.clone(),
    }
}

/// Spawn a command and wait for it. Output streams straight to the
/// terminal; GROMACS writes its own per-stage logs.
async fn execute(
    command: &CommandLine,
    invocation: &StageInvocation,
    step: Step,
) -> ChainResult<StepOutcome> {
    let start = Instant::now();
    debug!(stage = %invocation.stage, step = step.name(), command = %command, "Spawning");

    let status = Command::new(&command.program)
        .args(&command.args)
        .envs(&command.env)
        .current_dir(&command.current_dir)
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|source| ChainError::Launch {
            stage: invocation.stage.to_string(),
            step,
            program: command.program.clone(),
            source,
        })?;

    let duration_ms = start.elapsed().as_millis() as u64;
    if status.success() {
        Ok(StepOutcome::succeeded(duration_ms))
    } else {
        Ok(StepOutcome::failed(status.code(), duration_ms))
    }
}

/// Process-backed collaborator running the real GROMACS binaries.
#[derive(Debug, Clone)]
pub struct GromacsTools {
    config: ToolConfig,
    mode: ExecutionMode,
}

impl GromacsTools {
    pub fn new(config: ToolConfig, mode: ExecutionMode) -> Self {
        Self { config, mode }
    }

    pub fn mode(&self) -> &ExecutionMode {
        &self.mode
    }
}

#[async_trait]
impl StageTools for GromacsTools {
    async fn prepare(&self, invocation: &StageInvocation) -> ChainResult<StepOutcome> {
        let command = prepare_command(&self.config, invocation);
        execute(&command, invocation, Step::Prepare).await
    }

    async fn run(&self, invocation: &StageInvocation) -> ChainResult<StepOutcome> {
        let command = run_command(&self.config, &self.mode, invocation);
        execute(&command, invocation, Step::Run).await
    }
}

/// Prints every command instead of running it.
#[derive(Debug, Clone)]
pub struct DryRunTools {
    config: ToolConfig,
    mode: ExecutionMode,
}

impl DryRunTools {
    pub fn new(config: ToolConfig, mode: ExecutionMode) -> Self {
        Self { config, mode }
    }
}

#[async_trait]
impl StageTools for DryRunTools {
    async fn prepare(&self, invocation: &StageInvocation) -> ChainResult<StepOutcome> {
        println!("{}", prepare_command(&self.config, invocation));
        Ok(StepOutcome::succeeded(0))
    }

    async fn run(&self, invocation: &StageInvocation) -> ChainResult<StepOutcome> {
        println!("{}", run_command(&self.config, &self.mode, invocation));
        Ok(StepOutcome::succeeded(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageId;

    fn invocation(max_warnings: Option<u32>) -> StageInvocation {
        let dir = Path::new("/data");
        StageInvocation::new(
            dir,
            StageId::new("prod").unwrap(),
            dir.join("after_eq.gro"),
            dir.join("topol.top"),
            max_warnings,
        )
    }

    #[test]
    fn test_step_outcome_passed() {
        assert!(StepOutcome::succeeded(10).passed());
        assert!(!StepOutcome::failed(Some(1), 10).passed());
        assert!(!StepOutcome::failed(None, 10).passed());
    }

    #[test]
    fn test_prepare_command_shape() {
        let cmd = prepare_command(&ToolConfig::default(), &invocation(None));
        assert_eq!(cmd.program, "gmx");
        assert_eq!(
            cmd.args,
            vec![
                "grompp",
                "-f",
                "/data/prod.mdp",
                "-c",
                "/data/after_eq.gro",
                "-p",
                "/data/topol.top",
                "-o",
                "/data/prod.tpr",
                "-po",
                "/data/prod_mdout.mdp",
            ]
        );
        assert_eq!(cmd.current_dir, PathBuf::from("/data"));
    }

    #[test]
    fn test_prepare_command_maxwarn() {
        let cmd = prepare_command(&ToolConfig::default(), &invocation(Some(3)));
        let tail: Vec<&str> = cmd.args.iter().rev().take(2).map(String::as_str).collect();
        assert_eq!(tail, vec!["3", "-maxwarn"]);
    }

    #[test]
    fn test_run_command_single_with_threads() {
        let mode = ExecutionMode::Single { threads: Some(16) };
        let cmd = run_command(&ToolConfig::default(), &mode, &invocation(None));
        assert_eq!(cmd.program, "gmx");
        assert_eq!(cmd.args[0], "mdrun");
        assert!(cmd.args.windows(2).any(|w| w == ["-deffnm", "prod"]));
        assert!(cmd.args.windows(2).any(|w| w == ["-c", "/data/after_prod.gro"]));
        assert!(cmd.args.windows(2).any(|w| w == ["-nt", "16"]));
    }

    #[test]
    fn test_run_command_mpi() {
        let mode = ExecutionMode::Mpi {
            host_file: PathBuf::from("/var/spool/nodes"),
            ranks: 32,
        };
        let cmd = run_command(&ToolConfig::default(), &mode, &invocation(None));
        assert_eq!(cmd.program, "mpirun");
        assert_eq!(
            &cmd.args[..6],
            &["-np", "32", "-hostfile", "/var/spool/nodes", "gmx_mpi", "mdrun"]
        );
        assert!(!cmd.args.contains(&"-nt".to_string()));
    }

    #[test]
    fn test_run_command_tuned_sets_launcher_env() {
        let mode = ExecutionMode::MpiTuned {
            host_file: PathBuf::from("/nodes"),
            ranks: 8,
        };
        let config = ToolConfig::default().with_env("GMXLIB", "/opt/ff");
        let cmd = run_command(&config, &mode, &invocation(None));
        assert_eq!(cmd.program, "gmx");
        assert_eq!(cmd.args[0], "tune_pme");
        assert_eq!(cmd.args.last().map(String::as_str), Some("-launch"));
        assert_eq!(cmd.env.get("MPIRUN").unwrap(), "mpirun -hostfile /nodes");
        assert_eq!(cmd.env.get("MDRUN").unwrap(), "gmx_mpi");
        assert_eq!(cmd.env.get("GMXLIB").unwrap(), "/opt/ff");
    }

    #[test]
    fn test_command_line_display() {
        let config = ToolConfig::default().with_env("GMXLIB", "/opt/ff");
        let cmd = run_command(&config, &ExecutionMode::Single { threads: None }, &invocation(None));
        let rendered = cmd.to_string();
        assert!(rendered.starts_with("GMXLIB=\"/opt/ff\" gmx mdrun"));
    }

    // `true` / `false` stand in for gmx: they ignore arguments.
    fn scratch_invocation(dir: &Path) -> StageInvocation {
        StageInvocation::new(
            dir,
            StageId::new("eq").unwrap(),
            dir.join("start.gro"),
            dir.join("topol.top"),
            None,
        )
    }

    #[tokio::test]
    async fn test_execute_successful_tool() {
        let dir = tempfile::tempdir().unwrap();
        let config = ToolConfig {
            gmx: "true".to_string(),
            ..Default::default()
        };
        let tools = GromacsTools::new(config, ExecutionMode::Single { threads: None });

        let outcome = tools
            .prepare(&scratch_invocation(dir.path()))
            .await
            .expect("prepare failed to launch");
        assert!(outcome.passed());
        assert_eq!(outcome.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_execute_failing_tool() {
        let dir = tempfile::tempdir().unwrap();
        let config = ToolConfig {
            gmx: "false".to_string(),
            ..Default::default()
        };
        let tools = GromacsTools::new(config, ExecutionMode::Single { threads: None });

        let outcome = tools
            .run(&scratch_invocation(dir.path()))
            .await
            .expect("run failed to launch");
        assert!(!outcome.passed());
        assert_ne!(outcome.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_missing_executable_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = ToolConfig {
            gmx: "mdchain-no-such-binary".to_string(),
            ..Default::default()
        };
        let tools = GromacsTools::new(config, ExecutionMode::Single { threads: None });

        let err = tools
            .prepare(&scratch_invocation(dir.path()))
            .await
            .unwrap_err();
        match err {
            ChainError::Launch { step, program, .. } => {
                assert_eq!(step, Step::Prepare);
                assert_eq!(program, "mdchain-no-such-binary");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
