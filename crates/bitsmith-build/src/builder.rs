//! Project build stages

use bitsmith_core::{BitsmithError, Console, Project, Result};
use bitsmith_tool::{pretty_duration, CommandOutput, ToolExecutor};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, instrument};

use crate::staleness::{BuildFlags, Stage, StalenessModel};

pub const SETUP: &str = "setup";
pub const SYNTHESIS: &str = "synthesis";
pub const IMPLEMENTATION: &str = "implementation";
pub const BITSTREAM: &str = "bitstream";
pub const CHECK: &str = "check";

const VHDL_READ: &str = "read_vhdl -vhdl2008 -library xil_defaultLib";
const VERILOG_READ: &str = "read_verilog";
const SYSTEMVERILOG_READ: &str = "read_verilog -sv";

/// Runs build stages for one project on one executor.
///
/// Every stage streams its tool output, so failures are visible before the
/// stage error is returned.
pub struct Builder<'a, E: ToolExecutor> {
    pub(crate) project: &'a Project,
    pub(crate) exec: &'a mut E,
    pub(crate) console: Console,
}

impl<'a, E: ToolExecutor> Builder<'a, E> {
    pub fn new(project: &'a Project, exec: &'a mut E, console: Console) -> Self {
        Self {
            project,
            exec,
            console,
        }
    }

    pub fn project(&self) -> &'a Project {
        self.project
    }

    pub fn staleness(&self) -> StalenessModel<'a> {
        StalenessModel::new(self.project)
    }

    /// Stream `command`, turning tool errors into a failure of `stage`
    pub(crate) async fn step(&mut self, stage: &str, command: &str, reason: impl Into<String>) -> Result<CommandOutput> {
        let output = self.exec.stream(command).await?;
        if output.has_errors() {
            debug!(stage, command, "step failed");
            return Err(BitsmithError::stage(stage, reason));
        }
        Ok(output)
    }

    /// Check the part and define it for later commands
    #[instrument(skip(self), fields(part = %self.project.part))]
    pub async fn setup(&mut self) -> Result<()> {
        let project = self.project;
        if !self.exec.part_exists(&project.part) {
            return Err(BitsmithError::UnknownPart(project.part.clone()));
        }

        self.console.log(format!("project part: '{}'", project.part));
        self.exec.run(&format!("set PART \"{}\"", project.part)).await?;
        self.step(
            SETUP,
            "set_part $PART",
            "error(s) encountered while setting project part",
        )
        .await?;
        Ok(())
    }

    /// Drop whatever design is open and start again from the part
    pub async fn reload_project(&mut self) -> Result<()> {
        self.exec.close_project().await?;
        if self.exec.run("set_part $PART").await?.has_errors() {
            return Err(BitsmithError::stage(SETUP, "failed to set part"));
        }
        Ok(())
    }

    pub async fn read_sources(&mut self, stage: &str) -> Result<()> {
        let project = self.project;
        self.console.log("reading sources");

        let groups = [
            (VHDL_READ, &project.sources.vhdl),
            (VERILOG_READ, &project.sources.verilog),
            (SYSTEMVERILOG_READ, &project.sources.systemverilog),
        ];
        for (read, files) in groups {
            for src in files {
                self.console.added(project.relative(src).display());
                self.step(
                    stage,
                    &format!("{} \"{}\"", read, src.display()),
                    format!("failed to read '{}'", src.display()),
                )
                .await?;
            }
        }

        for tcl in &project.sources.tcl_scripts {
            self.console.added(project.relative(tcl).display());
            self.step(
                stage,
                &format!("source \"{}\"", tcl.display()),
                format!("failed to source '{}'", tcl.display()),
            )
            .await?;
        }
        Ok(())
    }

    /// Add constraint files the session has not loaded yet
    async fn read_constraints(&mut self, stage: &str, constraints: &[PathBuf]) -> Result<()> {
        if constraints.is_empty() {
            return Ok(());
        }

        self.console.log("reading constraints");
        for xdc in constraints {
            let key = xdc.display().to_string();
            if self.exec.have_constraint_file(&key) {
                continue;
            }
            self.console.added(self.project.relative(xdc).display());
            if self.exec.add_constraint_file(&key).await?.has_errors() {
                return Err(BitsmithError::stage(stage, format!("failed to read '{}'", key)));
            }
        }
        Ok(())
    }

    /// Synthesise the design if anything upstream changed.
    ///
    /// Returns whether synthesis ran.
    #[instrument(skip(self))]
    pub async fn synthesise(&mut self, force: bool) -> Result<bool> {
        let project = self.project;
        let flags = BuildFlags {
            force,
            allow_stale: false,
        };
        if !self.staleness().needs_rebuild(Stage::Synthesis, flags) {
            self.console.log("synthesis up to date");
            return Ok(false);
        }

        self.console.blank();
        self.console.log("performing synthesis");
        let start = Instant::now();

        self.reload_project().await?;
        let _indent = self.console.indent();
        self.read_sources(SYNTHESIS).await?;
        self.read_constraints(SYNTHESIS, &project.synth_constraints).await?;

        if !project.ips.is_empty() {
            self.console.log("loading ips");
            for ip in &project.ips {
                self.build_ip(ip).await?;
            }
        }
        if !project.block_designs.is_empty() {
            self.console.log("loading block designs");
            for bd in &project.block_designs {
                self.load_block_design(bd).await?;
            }
        }

        self.console.log("running synth_design");
        self.step(
            SYNTHESIS,
            &format!("synth_design -top {} -verbose -assert", project.top_module),
            "synthesis failed",
        )
        .await?;

        std::fs::create_dir_all(&project.build_dir)?;
        let dcp = &project.synthesised_checkpoint;
        self.console.log(format!("writing checkpoint '{}'", project.relative(dcp).display()));
        self.step(
            SYNTHESIS,
            &format!("write_checkpoint -force \"{}\"", dcp.display()),
            "failed to write post-synthesis checkpoint",
        )
        .await?;

        self.console.log(format!("synthesis finished in {}", pretty_duration(start.elapsed())));
        Ok(true)
    }

    /// Place and route. With `from_previous` the synthesised design is
    /// already open in this session.
    #[instrument(skip(self))]
    pub async fn implement(&mut self, flags: BuildFlags, from_previous: bool) -> Result<bool> {
        let project = self.project;
        if !self.staleness().needs_rebuild(Stage::Implementation, flags) {
            self.console.log("implementation up to date");
            return Ok(false);
        }

        self.console.blank();
        self.console.log("performing implementation");
        let start = Instant::now();
        let _indent = self.console.indent();

        if !from_previous {
            self.reload_project().await?;

            let dcp = &project.synthesised_checkpoint;
            self.console.log(format!(
                "opening synthesis checkpoint '{}'",
                project.relative(dcp).display()
            ));
            if !dcp.exists() {
                self.console.error("synthesis checkpoint does not exist (run synthesis first?)");
                return Err(BitsmithError::stage(IMPLEMENTATION, "could not read synthesis checkpoint"));
            }
            self.step(
                IMPLEMENTATION,
                &format!("open_checkpoint \"{}\"", dcp.display()),
                "could not read synthesis checkpoint",
            )
            .await?;

            self.read_sources(IMPLEMENTATION).await?;
        }

        self.read_constraints(IMPLEMENTATION, &project.impl_constraints).await?;

        for command in ["opt_design", "place_design", "route_design"] {
            self.console.log(format!("running {}", command));
            self.step(IMPLEMENTATION, command, format!("{} failed", command)).await?;
        }

        std::fs::create_dir_all(&project.build_dir)?;
        let dcp = &project.implemented_checkpoint;
        self.console.log(format!("writing checkpoint '{}'", project.relative(dcp).display()));
        self.step(
            IMPLEMENTATION,
            &format!("write_checkpoint -force \"{}\"", dcp.display()),
            "failed to write post-implementation checkpoint",
        )
        .await?;

        self.console.log(format!(
            "implementation finished in {}",
            pretty_duration(start.elapsed())
        ));
        Ok(true)
    }

    /// Write the bitstream. Returns whether it was written.
    #[instrument(skip(self))]
    pub async fn write_bitstream(&mut self, flags: BuildFlags, from_previous: bool) -> Result<bool> {
        let project = self.project;
        if !self.staleness().needs_rebuild(Stage::Bitstream, flags) {
            self.console.log("bitstream up to date");
            return Ok(false);
        }

        self.console.blank();
        self.console.log("writing bitstream");
        let start = Instant::now();
        let _indent = self.console.indent();

        if !from_previous {
            self.reload_project().await?;

            let dcp = &project.implemented_checkpoint;
            self.console.log(format!(
                "opening implementation checkpoint '{}'",
                project.relative(dcp).display()
            ));
            if !dcp.exists() {
                self.console
                    .error("implementation checkpoint does not exist (run implementation first?)");
                return Err(BitsmithError::stage(BITSTREAM, "could not read implementation checkpoint"));
            }
            self.step(
                BITSTREAM,
                &format!("open_checkpoint \"{}\"", dcp.display()),
                "could not read implementation checkpoint",
            )
            .await?;
        }

        let bit = &project.bitstream;
        self.step(
            BITSTREAM,
            &format!("write_bitstream -force \"{}\"", bit.display()),
            "failed to write bitstream",
        )
        .await?;

        self.console.log(format!(
            "bitstream written to '{}' in {}",
            project.relative(bit).display(),
            pretty_duration(start.elapsed())
        ));
        Ok(true)
    }

    /// Synthesis, implementation and bitstream, continuing in this session
    /// from whichever stage ran before
    #[instrument(skip(self))]
    pub async fn build_all(&mut self, flags: BuildFlags) -> Result<()> {
        let start = Instant::now();
        self.console.log("running full build");

        let result = {
            let _indent = self.console.indent();
            self.run_pipeline(flags).await
        };

        self.console.blank();
        match result {
            Ok(()) => {
                self.console
                    .log(format!("build finished in {}", pretty_duration(start.elapsed())));
                Ok(())
            }
            Err(e) => {
                self.console
                    .error(format!("build failed in {}", pretty_duration(start.elapsed())));
                Err(e)
            }
        }
    }

    async fn run_pipeline(&mut self, flags: BuildFlags) -> Result<()> {
        let synthesised = self.synthesise(flags.force).await?;
        let implemented = self.implement(flags, synthesised).await?;
        self.write_bitstream(flags, implemented).await?;
        Ok(())
    }

    /// Read every source and run the tool's syntax check
    #[instrument(skip(self))]
    pub async fn check(&mut self) -> Result<()> {
        self.read_sources(CHECK).await?;

        self.console.log("running check_syntax");
        self.step(CHECK, "check_syntax", "one or more files had syntax errors")
            .await?;

        let _indent = self.console.indent();
        self.console.log("no issues found");
        Ok(())
    }
}
