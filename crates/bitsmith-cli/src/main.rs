//! bitsmith CLI - drive Vivado builds from the command line
//!
//! Usage:
//!   bitsmith init <part> [name]   Create a project in the current directory
//!   bitsmith build                Synthesise, implement and write the bitstream
//!   bitsmith synth | impl | bitstream
//!   bitsmith ip <list|build|create|edit|delete|clean>
//!   bitsmith bd <list|create|edit|delete>

use anyhow::{Context, Result};
use bitsmith_build::{bd, clean, ip, BuildFlags, Builder, CleanTargets};
use bitsmith_core::{BitsmithError, Console, Project, ProjectConfig};
use bitsmith_tool::{Session, SessionConfig};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "bitsmith")]
#[command(author, version, about = "Incremental Vivado builds without the project mode")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project directory
    #[arg(short = 'C', long, global = true, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new project
    Init {
        /// Target part, e.g. xc7a35ticsg324-1L
        part: String,

        /// Project name (defaults to the directory name)
        name: Option<String>,

        /// Vivado installation directory (defaults to `vivado` on PATH)
        #[arg(long, value_name = "DIR")]
        vivado_dir: Option<PathBuf>,
    },

    /// Print the version
    Version,

    /// Remove build products
    Clean {
        /// Remove IP products instead of checkpoints
        #[arg(long)]
        ips: bool,

        /// Remove checkpoints, the bitstream and IP products
        #[arg(long)]
        all: bool,
    },

    /// Check sources for syntax errors
    Check,

    /// Run every stage that is out of date
    Build {
        /// Rebuild every stage
        #[arg(short, long)]
        force: bool,
    },

    /// Synthesise the design
    Synth {
        /// Synthesise even if up to date
        #[arg(short, long)]
        force: bool,
    },

    /// Place and route the synthesised design
    Impl {
        /// Implement even if up to date
        #[arg(short, long)]
        force: bool,

        /// Use the synthesised checkpoint even if synthesis is out of date
        #[arg(short = 's', long)]
        allow_stale: bool,
    },

    /// Write the bitstream
    Bitstream {
        /// Write even if up to date
        #[arg(short, long)]
        force: bool,

        /// Use the implemented checkpoint even if earlier stages are out of date
        #[arg(short = 's', long)]
        allow_stale: bool,
    },

    /// IP management
    Ip {
        #[command(subcommand)]
        action: IpCommands,
    },

    /// Block design management
    Bd {
        #[command(subcommand)]
        action: BdCommands,
    },
}

#[derive(Subcommand)]
enum IpCommands {
    /// List IP instances
    List,

    /// Regenerate and synthesise IPs (all of them if none are named)
    Build { names: Vec<String> },

    /// Create an IP in the Vivado GUI
    Create,

    /// Customise an existing IP in the Vivado GUI
    Edit { name: String },

    /// Delete an IP's script and products
    Delete { name: String },

    /// Delete an IP's generated products
    Clean { name: String },
}

#[derive(Subcommand)]
enum BdCommands {
    /// List block designs
    List,

    /// Create a block design in the Vivado GUI
    Create { name: String },

    /// Edit a block design in the Vivado GUI
    Edit { name: String },

    /// Delete a block design's script and products
    Delete { name: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Diagnostics go to stderr so they never tear the progress indicator
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();

    let console = Console::new();
    match run(cli, &console).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<BitsmithError>() {
                Some(e) if e.is_environment() => console.error(e),
                _ => console.error(format!("error encountered: {:#}", err)),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, console: &Console) -> Result<()> {
    let root = cli.project;
    match cli.command {
        Commands::Init {
            part,
            name,
            vivado_dir,
        } => cmd_init(&root, part, name, vivado_dir, console).await,
        Commands::Version => {
            println!("bitsmith {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Clean { ips, all } => {
            let project = load_project(&root)?;
            clean(&project, CleanTargets::from_flags(ips, all), console)?;
            Ok(())
        }
        Commands::Check => with_builder(&load_project(&root)?, console, BuildOp::Check).await,
        Commands::Build { force } => {
            let flags = BuildFlags {
                force,
                allow_stale: false,
            };
            with_builder(&load_project(&root)?, console, BuildOp::All(flags)).await
        }
        Commands::Synth { force } => {
            with_builder(&load_project(&root)?, console, BuildOp::Synthesis(force)).await
        }
        Commands::Impl { force, allow_stale } => {
            let flags = BuildFlags { force, allow_stale };
            with_builder(&load_project(&root)?, console, BuildOp::Implementation(flags)).await
        }
        Commands::Bitstream { force, allow_stale } => {
            let flags = BuildFlags { force, allow_stale };
            with_builder(&load_project(&root)?, console, BuildOp::Bitstream(flags)).await
        }
        Commands::Ip { action } => cmd_ip(&load_project(&root)?, action, console).await,
        Commands::Bd { action } => cmd_bd(&load_project(&root)?, action, console).await,
    }
}

fn load_project(root: &Path) -> Result<Project> {
    Project::load(root).with_context(|| format!("failed to load project at '{}'", root.display()))
}

/// Work that runs in a headless session after project setup
enum BuildOp {
    Check,
    All(BuildFlags),
    Synthesis(bool),
    Implementation(BuildFlags),
    Bitstream(BuildFlags),
    Ips(Vec<String>),
}

impl BuildOp {
    async fn run(self, builder: &mut Builder<'_, Session>) -> bitsmith_core::Result<()> {
        match self {
            BuildOp::Check => builder.check().await,
            BuildOp::All(flags) => builder.build_all(flags).await,
            BuildOp::Synthesis(force) => builder.synthesise(force).await.map(drop),
            BuildOp::Implementation(flags) => builder.implement(flags, false).await.map(drop),
            BuildOp::Bitstream(flags) => builder.write_bitstream(flags, false).await.map(drop),
            BuildOp::Ips(names) => builder.build_ips(&names).await,
        }
    }
}

/// Launch a session, set the project up and run `op` in it.
///
/// The session is closed whether or not `op` succeeds.
async fn with_builder(project: &Project, console: &Console, op: BuildOp) -> Result<()> {
    let config = SessionConfig::for_project(project)?;
    let mut session = Session::launch(config, project.policy.clone(), console.clone()).await?;

    let result = {
        let mut builder = Builder::new(project, &mut session, console.clone());
        match builder.setup().await {
            Ok(()) => op.run(&mut builder).await,
            Err(e) => Err(e),
        }
    };

    let closed = session.close(result.is_err()).await;
    debug!(ok = result.is_ok(), "session closed");
    stage_error_first(result, closed)
}

/// A failed stage outranks a failed close; the close error is only logged then
fn stage_error_first(result: bitsmith_core::Result<()>, closed: bitsmith_core::Result<()>) -> Result<()> {
    match (result, closed) {
        (Err(e), Err(close_err)) => {
            warn!("failed to close session: {}", close_err);
            Err(e.into())
        }
        (result, closed) => {
            closed?;
            Ok(result?)
        }
    }
}

async fn cmd_init(
    root: &Path,
    part: String,
    name: Option<String>,
    vivado_dir: Option<PathBuf>,
    console: &Console,
) -> Result<()> {
    let root = root
        .canonicalize()
        .with_context(|| format!("cannot open '{}'", root.display()))?;

    let mut config = ProjectConfig::new(part, name);
    config.vivado_install_dir = vivado_dir;
    let project = Project::discover(&config, &root)?;

    console.log(format!("checking part '{}'", config.part));
    let mut session = Session::launch(
        SessionConfig::for_project(&project)?,
        project.policy.clone(),
        console.clone(),
    )
    .await?;
    let exists = session.part_exists(&config.part);
    session.close(true).await?;
    if !exists {
        return Err(BitsmithError::UnknownPart(config.part).into());
    }

    let path = config.write_new(&root)?;
    console.log(format!("created '{}'", project.relative(&path).display()));
    let _indent = console.indent();
    for dir in config.skeleton_dirs() {
        std::fs::create_dir_all(root.join(&dir))?;
        console.added(format!("{}/", dir.display()));
    }
    info!(project = %project.name, "initialised project");
    Ok(())
}

async fn cmd_ip(project: &Project, action: IpCommands, console: &Console) -> Result<()> {
    match action {
        IpCommands::List => {
            println!("list of ips:");
            for ip in &project.ips {
                let scope = if ip.is_global { " (global)" } else { "" };
                println!("  * {}{}", ip.name.bold(), scope.dimmed());
            }
            println!();
            Ok(())
        }
        IpCommands::Build { names } => with_builder(project, console, BuildOp::Ips(names)).await,
        IpCommands::Create => {
            ip::create_ip_with_gui(project, console).await?;
            Ok(())
        }
        IpCommands::Edit { name } => {
            ip::edit_ip_with_gui(project, &name, console).await?;
            Ok(())
        }
        IpCommands::Delete { name } => Ok(ip::delete_ip(project, &name, console)?),
        IpCommands::Clean { name } => {
            console.log(format!("cleaning ip '{}'", name));
            Ok(ip::clean_ip(project, &name, console)?)
        }
    }
}

async fn cmd_bd(project: &Project, action: BdCommands, console: &Console) -> Result<()> {
    match action {
        BdCommands::List => {
            println!("list of block designs:");
            for design in &project.block_designs {
                println!("  * {}", design.name.bold());
            }
            println!();
            Ok(())
        }
        BdCommands::Create { name } => {
            bd::create_bd_with_gui(project, &name, console).await?;
            Ok(())
        }
        BdCommands::Edit { name } => {
            bd::edit_bd_with_gui(project, &name, console).await?;
            Ok(())
        }
        BdCommands::Delete { name } => Ok(bd::delete_block_design(project, &name, console)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_stage_error_wins_over_close_error() {
        let stage = Err(BitsmithError::stage("synthesis", "synth_design failed"));
        let err = stage_error_first(stage, Err(BitsmithError::SessionTerminated)).unwrap_err();
        assert_eq!(err.to_string(), "synthesis: synth_design failed");

        let err = stage_error_first(Ok(()), Err(BitsmithError::SessionTerminated)).unwrap_err();
        assert!(matches!(err.downcast_ref::<BitsmithError>(), Some(BitsmithError::SessionTerminated)));

        assert!(stage_error_first(Ok(()), Ok(())).is_ok());
    }

    #[test]
    fn test_impl_flags() {
        let cli = Cli::try_parse_from(["bitsmith", "impl", "-f", "-s"]).unwrap();
        match cli.command {
            Commands::Impl { force, allow_stale } => assert!(force && allow_stale),
            _ => panic!("expected impl"),
        }
    }

    #[test]
    fn test_ip_build_names() {
        let cli = Cli::try_parse_from(["bitsmith", "-C", "/p", "ip", "build", "a", "b"]).unwrap();
        assert_eq!(cli.project, PathBuf::from("/p"));
        match cli.command {
            Commands::Ip {
                action: IpCommands::Build { names },
            } => assert_eq!(names, ["a", "b"]),
            _ => panic!("expected ip build"),
        }
    }
}
