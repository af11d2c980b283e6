//! mdchain - run a chain of GROMACS stages
//!
//! Every `<stage>.mdp` becomes one `gmx grompp` + `gmx mdrun` pair. The
//! coordinates each stage writes (`after_<stage>.gro`) are the input of the
//! next one; the first failure stops the chain.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, Level};

use mdchain_core::{
    telemetry, ChainConfig, ChainError, ChainReport, ModeRequest, StageSource, ToolConfig,
    DEFAULT_HOST_LIST_VAR, DEFAULT_TOPOLOGY, FAILURE_EXIT_CODE,
};

#[derive(Parser, Debug)]
#[command(name = "mdchain")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Chain GROMACS grompp/mdrun stages, threading coordinates between them", long_about = None)]
struct Cli {
    /// Directory holding stage configs, coordinates, topology and outputs
    #[arg(short, long, default_value = ".")]
    data_dir: PathBuf,

    /// Initial coordinate file (relative to the data directory)
    #[arg(short, long)]
    coords: PathBuf,

    /// Topology file (relative to the data directory)
    #[arg(short = 'p', long, default_value = DEFAULT_TOPOLOGY)]
    topology: PathBuf,

    /// File listing stage names, one per line (default: every *.mdp, sorted)
    #[arg(short = 'l', long)]
    manifest: Option<PathBuf>,

    /// Launch mdrun through the MPI launcher using the scheduler's host list
    #[arg(long)]
    mpi: bool,

    /// Replace mdrun with a tune_pme pass (implies --mpi)
    #[arg(long)]
    tune: bool,

    /// Maximum number of grompp warnings to accept
    #[arg(short, long)]
    maxwarn: Option<u32>,

    /// mdrun thread count (single-process mode only)
    #[arg(short, long)]
    threads: Option<u32>,

    /// Environment variable holding the MPI host file path
    #[arg(long, default_value = DEFAULT_HOST_LIST_VAR)]
    host_list_var: String,

    /// GROMACS executable
    #[arg(long, env = "MDCHAIN_GMX", default_value = "gmx")]
    gmx: String,

    /// MPI-enabled GROMACS executable
    #[arg(long, env = "MDCHAIN_GMX_MPI", default_value = "gmx_mpi")]
    gmx_mpi: String,

    /// MPI launcher
    #[arg(long, env = "MDCHAIN_MPIRUN", default_value = "mpirun")]
    mpirun: String,

    /// Force-field library directory, forwarded to GROMACS as GMXLIB
    #[arg(long, env = "GMXLIB")]
    gmxlib: Option<PathBuf>,

    /// Extra environment for the GROMACS tools (KEY=VALUE, repeatable)
    #[arg(short = 'e', long = "env", value_parser = parse_key_value)]
    env: Vec<(String, String)>,

    /// Print the commands instead of running them
    #[arg(long)]
    dry_run: bool,

    /// Emit JSON log lines and a JSON report
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

impl Cli {
    /// Freeze the parsed options into the chain configuration.
    fn to_config(&self) -> ChainConfig {
        let mut tools = ToolConfig {
            gmx: self.gmx.clone(),
            gmx_mpi: self.gmx_mpi.clone(),
            mpirun: self.mpirun.clone(),
            ..Default::default()
        };
        if let Some(gmxlib) = &self.gmxlib {
            tools = tools.with_env("GMXLIB", gmxlib.to_string_lossy());
        }
        for (key, value) in &self.env {
            tools = tools.with_env(key.clone(), value.clone());
        }

        let mut config = ChainConfig::new(&self.data_dir, &self.coords);
        config.topology = Some(self.topology.clone());
        config.manifest = self.manifest.clone();
        config.mode = ModeRequest {
            mpi: self.mpi,
            tune: self.tune,
            threads: self.threads,
        };
        config.host_list_var = self.host_list_var.clone();
        config.max_warnings = self.maxwarn;
        config.tools = tools;
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    telemetry::init_tracing(cli.json, level);

    match cmd_run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "mdchain aborted");
            eprintln!("mdchain: {err:#}");
            let code = err
                .downcast_ref::<ChainError>()
                .map(ChainError::exit_code)
                .unwrap_or(FAILURE_EXIT_CODE);
            ExitCode::from(code)
        }
    }
}

async fn cmd_run(cli: &Cli) -> Result<()> {
    let config = cli.to_config();
    let plan = config.plan(|key| std::env::var(key).ok())?;

    let source = match &plan.source {
        StageSource::Manifest { path } => format!("manifest {}", path.display()),
        StageSource::Directory { path } => format!("directory {}", path.display()),
    };
    info!(
        stages = plan.stages.len(),
        mode = plan.mode.name(),
        chain = %plan.digest,
        "Running chain from {}",
        source
    );

    let tools = plan.tools(cli.dry_run);
    let report = plan.execute(tools).await?;

    if cli.json {
        let line = serde_json::to_string(&report).context("Failed to serialize chain report")?;
        println!("{line}");
    } else if !cli.dry_run {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &ChainReport) {
    println!();
    for record in &report.stages {
        println!(
            "  ✓ {} (grompp {}ms, mdrun {}ms)",
            record.stage, record.prepare.duration_ms, record.run.duration_ms
        );
    }
    println!();
    println!(
        "Summary: {} stages completed in {}ms",
        report.completed_count(),
        report.duration_ms
    );
    println!("Final coordinates: {}", report.final_coordinates.display());
}
