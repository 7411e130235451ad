//! IP instances: building, cleaning and the GUI-driven create/edit flows
//!
//! An IP lives in the project as a customisation script with two marked
//! regions: the `create_ip` command and the `set_property` commands applied
//! after it. Editing appends a new property command to the second region, so
//! the script replays every customisation in order.

use bitsmith_core::{BitsmithError, Console, IpInstance, Project, Result, Severity};
use bitsmith_tool::{pretty_duration, GuiAutomation, JournalOutcome, ToolExecutor};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, instrument};

use crate::builder::Builder;
use crate::staleness::{ip_should_regenerate, ip_should_resynthesise};

pub const SCRIPT_HEADER: &str = "# DO NOT MANUALLY EDIT THIS FILE";
pub const CREATE_START: &str = "# CREATE_IP_CMD_START";
pub const CREATE_END: &str = "# CREATE_IP_CMD_END";
pub const PROPERTIES_START: &str = "# SET_IP_PROPERTIES_CMD_START";
pub const PROPERTIES_END: &str = "# SET_IP_PROPERTIES_CMD_END";

const IP_REGENERATION: &str = "ip regeneration";
const IP_SYNTHESIS: &str = "ip synthesis";

fn xci_name(ip: &IpInstance) -> String {
    ip.product
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.xci", ip.name))
}

impl<'a, E: ToolExecutor> Builder<'a, E> {
    /// Recreate the IP from its script
    async fn regenerate_ip(&mut self, ip: &IpInstance) -> Result<()> {
        let _indent = self.console.indent();
        let _nested = self.exec.policy().enter_nested();
        let start = Instant::now();

        self.console.log(format!("regenerating ip '{}'", ip.name));
        std::fs::create_dir_all(&self.project.ip_output_dir)?;
        let product_dir = ip.product_dir();
        if product_dir.exists() {
            std::fs::remove_dir_all(&product_dir)?;
        }

        let sourced = self
            .step(
                IP_REGENERATION,
                &format!("source \"{}\"", ip.script.display()),
                format!("failed to run '{}'", ip.script.display()),
            )
            .await?;

        let ooc = if ip.is_global { "false" } else { "true" };
        self.step(
            IP_REGENERATION,
            &format!("set_property GENERATE_SYNTH_CHECKPOINT {} [get_files {}]", ooc, xci_name(ip)),
            format!(
                "failed to set '{}' as {}",
                ip.name,
                if ip.is_global { "global" } else { "out-of-context" }
            ),
        )
        .await?;

        let _detail = self.console.indent();
        self.console.log(format!(
            "finished in {}; suppressed {} info(s), {} warning(s)",
            pretty_duration(start.elapsed()),
            sourced.suppressed_count(Severity::Info),
            sourced.suppressed_count(Severity::Warning)
        ));
        Ok(())
    }

    /// Load an up-to-date product and make its out-of-context flag agree with
    /// the project
    async fn reuse_ip(&mut self, ip: &IpInstance) -> Result<()> {
        self.step(
            IP_REGENERATION,
            &format!("read_ip \"{}\"", ip.product.display()),
            format!("failed to read ip '{}'", ip.name),
        )
        .await?;

        let query = format!(
            "puts [get_property GENERATE_SYNTH_CHECKPOINT [get_files {}]]",
            xci_name(ip)
        );
        let value = self.exec.run(&query).await?.content.trim().to_lowercase();

        // out-of-context is the default when unset
        let is_ooc = value.is_empty() || value == "true" || value == "1";
        if is_ooc == ip.is_global {
            debug!(ip = %ip.name, is_ooc, "resetting GENERATE_SYNTH_CHECKPOINT");
            self.exec
                .run(&format!(
                    "set_property GENERATE_SYNTH_CHECKPOINT {} [get_files {}]",
                    if ip.is_global { "FALSE" } else { "TRUE" },
                    xci_name(ip)
                ))
                .await?;
        }
        Ok(())
    }

    async fn synthesise_ip(&mut self, ip: &IpInstance) -> Result<()> {
        if ip.is_global {
            return Ok(());
        }

        let _indent = self.console.indent();
        let _nested = self.exec.policy().enter_nested();
        let start = Instant::now();

        self.console.log(format!("rebuilding ip '{}'", ip.name));
        let output = self
            .step(
                IP_SYNTHESIS,
                &format!("synth_ip [get_ips {}]", ip.name),
                format!("synthesis of '{}' failed", ip.name),
            )
            .await?;

        let _detail = self.console.indent();
        self.console.log(format!(
            "finished in {}; suppressed {} info(s), {} warning(s)",
            pretty_duration(start.elapsed()),
            output.suppressed_count(Severity::Info),
            output.suppressed_count(Severity::Warning)
        ));
        Ok(())
    }

    /// Bring one IP up to date in the current session
    #[instrument(skip(self, ip), fields(ip = %ip.name, global = ip.is_global))]
    pub(crate) async fn build_ip(&mut self, ip: &IpInstance) -> Result<()> {
        let _indent = self.console.indent();
        self.console.line(format!(
            "+ {}{}",
            if ip.is_global { "(global) " } else { "" },
            ip.name
        ));

        // A regenerated IP is already in the project; reading it again fails.
        if ip_should_regenerate(ip) {
            self.regenerate_ip(ip).await?;
        } else {
            self.reuse_ip(ip).await?;
        }

        if ip_should_resynthesise(ip) {
            self.synthesise_ip(ip).await?;
        } else if ip.is_global {
            self.step(
                IP_SYNTHESIS,
                &format!("generate_target all [get_ips {}]", ip.name),
                format!("failed to generate targets for '{}'", ip.name),
            )
            .await?;
        }
        Ok(())
    }

    /// Build the named IPs, or every IP when `names` is empty
    pub async fn build_ips(&mut self, names: &[String]) -> Result<()> {
        let project = self.project;
        let selected: Vec<&IpInstance> = if names.is_empty() {
            project.ips.iter().collect()
        } else {
            names
                .iter()
                .map(|name| project.ip(name))
                .collect::<Result<_>>()?
        };

        self.console.log("synthesising ips");
        for ip in selected {
            self.build_ip(ip).await?;
        }
        Ok(())
    }
}

/// Remove the generated products of `name`
pub fn clean_ip(project: &Project, name: &str, console: &Console) -> Result<()> {
    let ip = project.ip(name)?;
    let dir = ip.product_dir();
    if dir.exists() {
        console.removed(project.relative(&dir).display());
        std::fs::remove_dir_all(&dir)?;
    }
    Ok(())
}

/// Remove the script and products of `name`
pub fn delete_ip(project: &Project, name: &str, console: &Console) -> Result<()> {
    let ip = project.ip(name)?;
    console.log(format!("deleting ip '{}'", name));

    if ip.script.exists() {
        console.removed(project.relative(&ip.script).display());
        std::fs::remove_file(&ip.script)?;
    }
    let dir = ip.product_dir();
    if dir.exists() {
        console.removed(project.relative(&dir).display());
        std::fs::remove_dir_all(&dir)?;
    }
    Ok(())
}

/// Value of `-module_name` in a `create_ip` command
pub fn parse_module_name(create_cmd: &str) -> Result<String> {
    let mut words = create_cmd.split_whitespace();
    while let Some(word) = words.next() {
        if word == "-module_name" {
            if let Some(name) = words.next() {
                return Ok(name.to_string());
            }
        }
    }
    Err(BitsmithError::Command(format!(
        "failed to parse ip module name from '{}'",
        create_cmd
    )))
}

/// The IP named by the trailing `[get_ips NAME]` of a property command
pub fn parse_ip_name_from_property_cmd(property_cmd: &str) -> Result<String> {
    property_cmd
        .trim_end()
        .strip_suffix(']')
        .and_then(|cmd| cmd.rsplit_once("[get_ips "))
        .map(|(_, name)| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            BitsmithError::Command(format!("failed to parse ip name from '{}'", property_cmd))
        })
}

/// Point the `-dir` argument of a `create_ip` command at the project's IP
/// output directory, relative to the project root
pub fn rewrite_module_directory(project: &Project, create_cmd: &str) -> String {
    let target = project.relative(&project.ip_output_dir).display().to_string();
    let words: Vec<&str> = create_cmd.split_whitespace().collect();

    let mut out = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        out.push(words[i].to_string());
        if words[i] == "-dir" {
            i += 1;
            while i < words.len() && !words[i].starts_with('-') {
                i += 1;
            }
            out.push(format!("{{{}}}", target));
        } else {
            i += 1;
        }
    }
    out.join(" ")
}

/// Newest `set_property` line and the `create_ip` line before it, as
/// `(create, property)`
pub fn find_create_commands(lines: &[String]) -> Option<(String, String)> {
    let mut property = None;
    for line in lines.iter().rev() {
        if property.is_some() && line.starts_with("create_ip") {
            return property.map(|p: &String| (line.clone(), p.clone()));
        }
        if line.starts_with("set_property") {
            property = Some(line);
        }
    }
    None
}

/// Newest `set_property` line
pub fn find_property_command(lines: &[String]) -> Option<String> {
    lines
        .iter()
        .rev()
        .find(|line| line.starts_with("set_property"))
        .cloned()
}

/// Contents of a new customisation script
pub fn ip_script(create_cmd: &str, property_cmd: &str) -> String {
    [
        SCRIPT_HEADER,
        CREATE_START,
        create_cmd,
        CREATE_END,
        PROPERTIES_START,
        property_cmd,
        PROPERTIES_END,
    ]
    .iter()
    .map(|line| format!("{}\n", line))
    .collect()
}

/// Append `property_cmd` to the end of the property region of `script`
pub fn insert_property_command(script: &str, property_cmd: &str) -> Result<String> {
    if !script.lines().any(|line| line == PROPERTIES_END) {
        return Err(BitsmithError::Project(format!(
            "ip script is missing the '{}' marker",
            PROPERTIES_END
        )));
    }

    let mut out = String::with_capacity(script.len() + property_cmd.len() + 1);
    for line in script.lines() {
        if line == PROPERTIES_END {
            out.push_str(property_cmd);
            out.push('\n');
        }
        out.push_str(line);
        out.push('\n');
    }
    Ok(out)
}

/// Create a new IP in the GUI and save its customisation script.
///
/// Returns the new script, or `None` if the user closed the tool first.
#[instrument(skip_all)]
pub async fn create_ip_with_gui(project: &Project, console: &Console) -> Result<Option<PathBuf>> {
    let gui = GuiAutomation::for_project(project, console.clone())?;
    let outcome = gui
        .run_gui_and_wait_for_journal(
            true,
            |_| Ok(Vec::new()),
            |lines| find_create_commands(lines).is_some(),
        )
        .await?;

    let JournalOutcome::Completed(lines) = outcome else {
        return Ok(None);
    };
    let (create_cmd, property_cmd) = find_create_commands(&lines)
        .ok_or_else(|| BitsmithError::Journal("no create_ip command in journal".to_string()))?;

    let create_cmd = rewrite_module_directory(project, &create_cmd);
    let name = parse_module_name(&create_cmd)?;
    console.log(format!("created ip '{}'", name));

    let script = project.ip_dir.join(format!("{}.tcl", name));
    if script.exists() {
        return Err(BitsmithError::AlreadyExists(script));
    }
    std::fs::create_dir_all(&project.ip_dir)?;
    std::fs::write(&script, ip_script(&create_cmd, &property_cmd))?;

    info!(ip = %name, "wrote {}", script.display());
    console.log(format!("created tcl script '{}'", project.relative(&script).display()));
    Ok(Some(script))
}

/// Re-customise an existing IP in the GUI and record the new properties.
///
/// Returns whether the script changed.
#[instrument(skip(project, console))]
pub async fn edit_ip_with_gui(project: &Project, name: &str, console: &Console) -> Result<bool> {
    let ip = project.ip(name)?;
    let gui = GuiAutomation::for_project(project, console.clone())?;

    // the tool refuses to source the script unless its output directory exists
    let outputs = project.relative(&project.ip_output_dir).to_path_buf();
    let script = ip.script.clone();
    let setup = move |scratch: &Path| -> Result<Vec<String>> {
        std::fs::create_dir_all(scratch.join(&outputs))?;
        Ok(vec![format!("source \"{}\"", script.display())])
    };

    let outcome = {
        let _nested = project.policy.enter_nested();
        console.log(format!("loading ip '{}' into temporary project", ip.name));
        gui.run_gui_and_wait_for_journal(true, setup, |lines| {
            find_property_command(lines).is_some()
        })
        .await?
    };

    let JournalOutcome::Completed(lines) = outcome else {
        return Ok(false);
    };
    let property_cmd = find_property_command(&lines)
        .ok_or_else(|| BitsmithError::Journal("no set_property command in journal".to_string()))?;

    let found = parse_ip_name_from_property_cmd(&property_cmd)?;
    if found != ip.name {
        return Err(BitsmithError::Command(format!(
            "expected ip '{}', found ip '{}' instead",
            ip.name, found
        )));
    }

    if !ip.script.exists() {
        return Err(BitsmithError::Project(format!(
            "ip script '{}' disappeared",
            ip.script.display()
        )));
    }
    let contents = std::fs::read_to_string(&ip.script)?;
    std::fs::write(&ip.script, insert_property_command(&contents, &property_cmd)?)?;

    clean_ip(project, name, console)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitsmith_core::ProjectConfig;
    use tempfile::TempDir;

    fn project() -> (TempDir, Project) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("ip/outputs/clk_wiz")).unwrap();
        std::fs::write(dir.path().join("ip/clk_wiz.tcl"), "").unwrap();
        std::fs::write(dir.path().join("ip/outputs/clk_wiz/clk_wiz.xci"), "").unwrap();
        let config = ProjectConfig::new("xc7a35ticsg324-1L", Some("blinky".to_string()));
        let project = Project::discover(&config, dir.path()).unwrap();
        (dir, project)
    }

    fn lines(text: &[&str]) -> Vec<String> {
        text.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_module_name() {
        let cmd = "create_ip -name clk_wiz -vendor xilinx.com -library ip -version 6.0 -module_name clk_wiz_0";
        assert_eq!(parse_module_name(cmd).unwrap(), "clk_wiz_0");
        assert!(parse_module_name("create_ip -name clk_wiz").is_err());
    }

    #[test]
    fn test_parse_ip_name_from_property_cmd() {
        let cmd = "set_property -dict [list CONFIG.CLKOUT1_REQUESTED_OUT_FREQ {50}] [get_ips clk_wiz_0]";
        assert_eq!(parse_ip_name_from_property_cmd(cmd).unwrap(), "clk_wiz_0");
        assert!(parse_ip_name_from_property_cmd("set_property foo bar").is_err());
    }

    #[test]
    fn test_rewrite_module_directory() {
        let (_dir, project) = project();
        let cmd = "create_ip -name clk_wiz -module_name clk_wiz_0 -dir /tmp/xx-scratch-1/scratch/scratch.srcs/sources_1/ip";
        assert_eq!(
            rewrite_module_directory(&project, cmd),
            "create_ip -name clk_wiz -module_name clk_wiz_0 -dir {ip/outputs}"
        );

        let cmd = "create_ip -dir /somewhere -name clk_wiz";
        assert_eq!(
            rewrite_module_directory(&project, cmd),
            "create_ip -dir {ip/outputs} -name clk_wiz"
        );
    }

    #[test]
    fn test_find_create_commands_needs_both() {
        let journal = lines(&["start_gui", "create_ip -name clk_wiz -module_name clk_wiz_0"]);
        assert!(find_create_commands(&journal).is_none());

        let journal = lines(&[
            "start_gui",
            "create_ip -name clk_wiz -module_name clk_wiz_0",
            "set_property -dict [list CONFIG.A {1}] [get_ips clk_wiz_0]",
            "generate_target {instantiation_template} [get_files clk_wiz_0.xci]",
            "set_property -dict [list CONFIG.A {2}] [get_ips clk_wiz_0]",
        ]);
        let (create, property) = find_create_commands(&journal).unwrap();
        assert!(create.starts_with("create_ip"));
        assert!(property.contains("CONFIG.A {2}"), "newest property wins");
    }

    #[test]
    fn test_property_command_is_inserted_before_end_marker() {
        let script = ip_script("create_ip -module_name x", "set_property A [get_ips x]");
        let updated = insert_property_command(&script, "set_property B [get_ips x]").unwrap();

        let body: Vec<&str> = updated.lines().collect();
        assert_eq!(body[0], SCRIPT_HEADER);
        assert_eq!(
            &body[4..],
            [
                PROPERTIES_START,
                "set_property A [get_ips x]",
                "set_property B [get_ips x]",
                PROPERTIES_END
            ]
        );

        assert!(insert_property_command("create_ip\n", "set_property B").is_err());
    }

    #[test]
    fn test_clean_and_delete() {
        let (dir, project) = project();
        let console = Console::new();

        clean_ip(&project, "clk_wiz", &console).unwrap();
        assert!(!dir.path().join("ip/outputs/clk_wiz").exists());
        assert!(dir.path().join("ip/clk_wiz.tcl").exists());

        delete_ip(&project, "clk_wiz", &console).unwrap();
        assert!(!dir.path().join("ip/clk_wiz.tcl").exists());

        assert!(matches!(
            clean_ip(&project, "nope", &console),
            Err(BitsmithError::IpNotFound(_))
        ));
    }
}
