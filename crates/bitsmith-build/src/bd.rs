//! Block designs
//!
//! A block design is stored as a script that rebuilds it from scratch. After
//! the user edits a design in the GUI, the design is exported headlessly and
//! only the instance-construction span of the export is kept.

use bitsmith_core::{BitsmithError, BlockDesign, Console, Project, Result};
use bitsmith_tool::{GuiAutomation, JournalOutcome, Session, SessionConfig, ToolExecutor};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

use crate::builder::{Builder, SYNTHESIS};
use crate::ip::SCRIPT_HEADER;
use crate::staleness::bd_should_regenerate;

pub const RESTORE_START: &str = "# Save current instance; Restore later";
pub const RESTORE_END: &str = "# Restore current instance";

const BD_EXPORT: &str = "block design export";
const EXPORT_PREFIX: &str = "xx-bd-export-";

impl<'a, E: ToolExecutor> Builder<'a, E> {
    /// Add a block design to the current session, rebuilding it from its
    /// script when the saved design is out of date
    #[instrument(skip(self, bd), fields(bd = %bd.name))]
    pub(crate) async fn load_block_design(&mut self, bd: &BlockDesign) -> Result<()> {
        let _indent = self.console.indent();
        self.console.line(format!("+ {}", bd.name));

        if bd_should_regenerate(bd) {
            let dir = bd.product_dir();
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
            self.step(
                SYNTHESIS,
                &format!("source \"{}\"", bd.script.display()),
                format!("failed to regenerate block design '{}'", bd.name),
            )
            .await?;
        } else {
            self.step(
                SYNTHESIS,
                &format!("read_bd \"{}\"", bd.product.display()),
                format!("failed to read block design '{}'", bd.name),
            )
            .await?;
        }

        self.step(
            SYNTHESIS,
            &format!("generate_target all [get_files \"{}\"]", bd.product.display()),
            format!("failed to generate targets for '{}'", bd.name),
        )
        .await?;
        Ok(())
    }

    /// Open the saved design, validate it and return its construction body
    #[instrument(skip(self, product, export_path))]
    pub async fn export_block_design(&mut self, name: &str, product: &Path, export_path: &Path) -> Result<Vec<String>> {
        let commands = [
            format!("read_bd \"{}\"", product.display()),
            format!("open_bd_design \"{}\"", product.display()),
            "validate_bd_design".to_string(),
            format!(
                "write_bd_tcl -force -no_project_wrapper \"{}\"",
                export_path.display()
            ),
        ];
        for command in &commands {
            self.step(BD_EXPORT, command, format!("failed to export block design '{}'", name))
                .await?;
        }

        let exported = std::fs::read_to_string(export_path)?;
        extract_restore_span(&exported)
    }
}

/// Lines strictly between the save and restore markers of an exported design
pub fn extract_restore_span(exported: &str) -> Result<Vec<String>> {
    let mut lines = exported.lines();
    if !lines.any(|line| line.trim() == RESTORE_START) {
        return Err(BitsmithError::Project(format!(
            "exported block design has no '{}' marker",
            RESTORE_START
        )));
    }

    let mut body = Vec::new();
    for line in lines {
        if line.trim() == RESTORE_END {
            return Ok(body);
        }
        body.push(line.to_string());
    }
    Err(BitsmithError::Project(format!(
        "exported block design has no '{}' marker",
        RESTORE_END
    )))
}

/// Script that recreates block design `name` from `body`
pub fn block_design_script(project: &Project, name: &str, body: &[String]) -> String {
    let outputs = project.relative(&project.bd_output_dir).display().to_string();

    let mut script = format!("{}\ncreate_bd_design -dir {{{}}} {}\n", SCRIPT_HEADER, outputs, name);
    for line in body {
        script.push_str(line);
        script.push('\n');
    }
    script.push_str("validate_bd_design\n");
    script.push_str("save_bd_design\n");
    script.push_str(&format!("close_bd_design [get_bd_designs {}]\n", name));
    script
}

/// Journal predicate: the user has closed the design
pub fn closes_block_design(lines: &[String]) -> bool {
    lines
        .last()
        .map_or(false, |line| line.starts_with("close_bd_design"))
}

pub fn delete_block_design(project: &Project, name: &str, console: &Console) -> Result<()> {
    let bd = project.block_design(name)?;
    console.log(format!("deleting block design '{}'", name));

    if bd.script.exists() {
        console.removed(project.relative(&bd.script).display());
        std::fs::remove_file(&bd.script)?;
    }
    let dir = bd.product_dir();
    if dir.exists() {
        console.removed(project.relative(&dir).display());
        std::fs::remove_dir_all(&dir)?;
    }
    Ok(())
}

/// Create a new block design in the GUI.
///
/// Returns the saved script, or `None` if the user closed the tool first.
#[instrument(skip(project, console))]
pub async fn create_bd_with_gui(project: &Project, name: &str, console: &Console) -> Result<Option<PathBuf>> {
    let script = project.bd_dir.join(format!("{}.tcl", name));
    if project.block_design(name).is_ok() || script.exists() {
        return Err(BitsmithError::AlreadyExists(script));
    }
    std::fs::create_dir_all(&project.bd_output_dir)?;

    let outputs = project.bd_output_dir.clone();
    let design = name.to_string();
    let setup = move |_: &Path| -> Result<Vec<String>> {
        Ok(vec![format!(
            "create_bd_design -dir {{{}}} {}",
            outputs.display(),
            design
        )])
    };

    let gui = GuiAutomation::for_project(project, console.clone())?;
    match gui
        .run_gui_and_wait_for_journal(false, setup, closes_block_design)
        .await?
    {
        JournalOutcome::Completed(_) => {
            let product = project.bd_output_dir.join(name).join(format!("{}.bd", name));
            save_block_design(project, name, &product, &script, console)
                .await
                .map(Some)
        }
        JournalOutcome::Cancelled => Ok(None),
    }
}

/// Edit an existing block design in the GUI and save the result.
///
/// Returns whether the script was rewritten.
#[instrument(skip(project, console))]
pub async fn edit_bd_with_gui(project: &Project, name: &str, console: &Console) -> Result<bool> {
    let bd = project.block_design(name)?;

    // the script rebuilds the design into the product directory
    let dir = bd.product_dir();
    if dir.exists() {
        std::fs::remove_dir_all(&dir)?;
    }

    let root = project.location.clone();
    let script = bd.script.clone();
    let setup = move |_: &Path| -> Result<Vec<String>> {
        Ok(vec![
            format!("cd {{{}}}", root.display()),
            format!("source \"{}\"", script.display()),
        ])
    };

    let gui = GuiAutomation::for_project(project, console.clone())?;
    match gui
        .run_gui_and_wait_for_journal(false, setup, closes_block_design)
        .await?
    {
        JournalOutcome::Completed(_) => {
            save_block_design(project, name, &bd.product, &bd.script, console).await?;
            Ok(true)
        }
        JournalOutcome::Cancelled => Ok(false),
    }
}

/// Export `product` in a headless session and write the reproducible script
async fn save_block_design(
    project: &Project,
    name: &str,
    product: &Path,
    script: &Path,
    console: &Console,
) -> Result<PathBuf> {
    if !product.exists() {
        return Err(BitsmithError::Project(format!(
            "block design '{}' was not saved to '{}'",
            name,
            product.display()
        )));
    }

    console.log(format!("exporting block design '{}'", name));
    let export_dir = tempfile::Builder::new()
        .prefix(EXPORT_PREFIX)
        .tempdir_in(&project.location)?;
    let export_path = export_dir.path().join(format!("{}.tcl", name));

    let mut session = Session::launch(
        SessionConfig::for_project(project)?,
        project.policy.clone(),
        console.clone(),
    )
    .await?;

    let body = {
        let mut builder = Builder::new(project, &mut session, console.clone());
        builder.setup().await?;
        builder.export_block_design(name, product, &export_path).await?
    };
    session.close(true).await?;
    debug!(lines = body.len(), "extracted block design body");

    std::fs::create_dir_all(&project.bd_dir)?;
    std::fs::write(script, block_design_script(project, name, &body))?;
    info!(bd = %name, "wrote {}", script.display());
    console.log(format!("saved block design script '{}'", project.relative(script).display()));
    Ok(script.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitsmith_core::ProjectConfig;
    use tempfile::TempDir;

    const EXPORT: &str = "\
# Proc to create BD system
proc create_root_design { parentCell } {
  variable script_folder
  # Save current instance; Restore later
  set oldCurInst [current_bd_instance .]
  set clk_wiz_0 [ create_bd_cell -type ip -vlnv xilinx.com:ip:clk_wiz:6.0 clk_wiz_0 ]
  connect_bd_net [get_bd_ports clk] [get_bd_pins clk_wiz_0/clk_in1]
  # Restore current instance
  current_bd_instance $oldCurInst
}
";

    #[test]
    fn test_extract_restore_span() {
        let body = extract_restore_span(EXPORT).unwrap();
        assert_eq!(body.len(), 3);
        assert!(body[0].contains("current_bd_instance ."));
        assert!(body[2].contains("connect_bd_net"));
    }

    #[test]
    fn test_extract_restore_span_requires_markers() {
        assert!(extract_restore_span("create_bd_cell foo\n").is_err());
        assert!(extract_restore_span("# Save current instance; Restore later\nfoo\n").is_err());
    }

    #[test]
    fn test_block_design_script() {
        let dir = TempDir::new().unwrap();
        let config = ProjectConfig::new("xc7a35ticsg324-1L", Some("blinky".to_string()));
        let project = Project::discover(&config, dir.path()).unwrap();

        let script = block_design_script(&project, "system", &["  create_bd_cell x".to_string()]);
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(
            lines,
            [
                SCRIPT_HEADER,
                "create_bd_design -dir {bd/outputs} system",
                "  create_bd_cell x",
                "validate_bd_design",
                "save_bd_design",
                "close_bd_design [get_bd_designs system]",
            ]
        );
    }

    #[test]
    fn test_closes_block_design_looks_at_last_line_only() {
        let mut lines = vec!["close_bd_design [get_bd_designs a]".to_string()];
        assert!(closes_block_design(&lines));
        lines.push("open_bd_design a.bd".to_string());
        assert!(!closes_block_design(&lines));
        assert!(!closes_block_design(&[]));
    }

    #[test]
    fn test_delete_block_design() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("bd/outputs/system")).unwrap();
        std::fs::write(dir.path().join("bd/system.tcl"), "").unwrap();
        std::fs::write(dir.path().join("bd/outputs/system/system.bd"), "").unwrap();
        let config = ProjectConfig::new("xc7a35ticsg324-1L", Some("blinky".to_string()));
        let project = Project::discover(&config, dir.path()).unwrap();

        delete_block_design(&project, "system", &Console::new()).unwrap();
        assert!(!dir.path().join("bd/system.tcl").exists());
        assert!(!dir.path().join("bd/outputs/system").exists());
        assert!(matches!(
            delete_block_design(&project, "fifo", &Console::new()),
            Err(BitsmithError::BlockDesignNotFound(_))
        ));
    }
}
