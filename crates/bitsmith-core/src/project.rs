//! Project layout: where sources, constraints, IP and block designs live,
//! and where each build artifact is written.

use glob::glob;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::{ProjectConfig, PROJECT_FILENAME};
use crate::message::MessagePolicy;
use crate::{BitsmithError, Result};

/// An IP customisation script and the product it generates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpInstance {
    pub name: String,
    /// Customisation script (`ip/<name>.tcl`)
    pub script: PathBuf,
    /// Generated product (`ip/outputs/<name>/<name>.xci`)
    pub product: PathBuf,
    /// Synthesised in-context with the top-level design rather than out-of-context
    pub is_global: bool,
}

impl IpInstance {
    pub fn new(name: impl Into<String>, script: PathBuf, output_dir: &Path, is_global: bool) -> Self {
        let name = name.into();
        let product = output_dir.join(&name).join(format!("{}.xci", name));
        Self {
            name,
            script,
            product,
            is_global,
        }
    }

    /// Out-of-context checkpoint written next to the product
    pub fn checkpoint(&self) -> PathBuf {
        self.product.with_extension("dcp")
    }

    /// Directory holding every generated file for this IP
    pub fn product_dir(&self) -> PathBuf {
        self.product
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

/// A block-design reconstruction script and the design it produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDesign {
    pub name: String,
    /// Reconstruction script (`bd/<name>.tcl`)
    pub script: PathBuf,
    /// Generated design (`bd/outputs/<name>/<name>.bd`)
    pub product: PathBuf,
}

impl BlockDesign {
    pub fn new(name: impl Into<String>, script: PathBuf, output_dir: &Path) -> Self {
        let name = name.into();
        let product = output_dir.join(&name).join(format!("{}.bd", name));
        Self {
            name,
            script,
            product,
        }
    }

    pub fn product_dir(&self) -> PathBuf {
        self.product
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

/// HDL sources in the order they are read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSet {
    pub vhdl: Vec<PathBuf>,
    pub verilog: Vec<PathBuf>,
    pub systemverilog: Vec<PathBuf>,
    /// Extra Tcl scripts sourced after the HDL
    pub tcl_scripts: Vec<PathBuf>,
}

impl SourceSet {
    /// Every HDL file, in read order
    pub fn hdl(&self) -> impl Iterator<Item = &PathBuf> {
        self.vhdl
            .iter()
            .chain(self.verilog.iter())
            .chain(self.systemverilog.iter())
    }
}

/// A loaded project: configuration plus everything discovered on disk
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub part: String,
    pub top_module: String,

    /// Absolute project root
    pub location: PathBuf,
    pub build_dir: PathBuf,
    pub ip_dir: PathBuf,
    pub ip_output_dir: PathBuf,
    pub bd_dir: PathBuf,
    pub bd_output_dir: PathBuf,

    pub synthesised_checkpoint: PathBuf,
    pub implemented_checkpoint: PathBuf,
    pub bitstream: PathBuf,

    pub tool_install_dir: Option<PathBuf>,
    pub policy: MessagePolicy,

    pub sources: SourceSet,
    pub synth_constraints: Vec<PathBuf>,
    pub impl_constraints: Vec<PathBuf>,
    pub ips: Vec<IpInstance>,
    pub block_designs: Vec<BlockDesign>,
}

impl Project {
    /// Load `bitsmith.json` from `root` and discover the project's files
    pub fn load(root: &Path) -> Result<Self> {
        let root = root.canonicalize().map_err(|e| {
            BitsmithError::Project(format!("cannot open '{}': {}", root.display(), e))
        })?;
        let config = ProjectConfig::load(&root)?;
        Self::discover(&config, &root)
    }

    /// Walk the configured directories under `root`
    pub fn discover(config: &ProjectConfig, root: &Path) -> Result<Self> {
        let name = match &config.name {
            Some(name) => name.clone(),
            None => root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    BitsmithError::Project(format!(
                        "cannot derive a project name from '{}'",
                        root.display()
                    ))
                })?,
        };

        let build_dir = root.join(&config.build_dir);
        let src_dir = root.join(&config.sources.location);
        let hdl_dir = src_dir.join(&config.sources.hdl_subdir);
        let xdc_dir = src_dir.join(&config.sources.xdc_subdir);
        let ip_dir = root.join(&config.ip.location);
        let ip_output_dir = ip_dir.join(&config.ip.output_subdir);
        let bd_dir = root.join(&config.bd.location);
        let bd_output_dir = bd_dir.join(&config.bd.output_subdir);

        let mut sources = SourceSet {
            vhdl: find_recursive(&hdl_dir, "vhd")?,
            verilog: find_recursive(&hdl_dir, "v")?,
            systemverilog: find_recursive(&hdl_dir, "sv")?,
            tcl_scripts: config
                .sources
                .tcl_scripts
                .iter()
                .map(|s| root.join(s))
                .collect(),
        };
        sources.vhdl.extend(find_recursive(&hdl_dir, "vhdl")?);

        let mut synth_constraints = Vec::new();
        let mut impl_constraints = Vec::new();
        for xdc in find_recursive(&xdc_dir, "xdc")? {
            let rel = xdc
                .strip_prefix(&xdc_dir)
                .unwrap_or(&xdc)
                .to_string_lossy()
                .into_owned();

            let synth_only = config.sources.synth_only.contains(&rel);
            let impl_only = config.sources.impl_only.contains(&rel);

            if synth_only || !impl_only {
                synth_constraints.push(xdc.clone());
            }
            if impl_only || !synth_only {
                impl_constraints.push(xdc);
            }
        }

        let ips = find_scripts(&ip_dir)?
            .into_iter()
            .map(|(name, script)| {
                let is_global = config.ip.global_ips.contains(&name);
                IpInstance::new(name, script, &ip_output_dir, is_global)
            })
            .collect();

        let block_designs = find_scripts(&bd_dir)?
            .into_iter()
            .map(|(name, script)| BlockDesign::new(name, script, &bd_output_dir))
            .collect();

        let project = Self {
            bitstream: build_dir.join(format!("{}.bit", name)),
            synthesised_checkpoint: build_dir.join(&config.synthesised_dcp_name),
            implemented_checkpoint: build_dir.join(&config.implemented_dcp_name),
            name,
            part: config.part.clone(),
            top_module: config.top_module.clone(),
            location: root.to_path_buf(),
            build_dir,
            ip_dir,
            ip_output_dir,
            bd_dir,
            bd_output_dir,
            tool_install_dir: config.vivado_install_dir.clone(),
            policy: config.messages.to_policy(),
            sources,
            synth_constraints,
            impl_constraints,
            ips,
            block_designs,
        };

        debug!(
            project = %project.name,
            hdl = project.sources.hdl().count(),
            ips = project.ips.len(),
            bds = project.block_designs.len(),
            "discovered project"
        );

        Ok(project)
    }

    /// Path of the tool binary to launch
    pub fn tool_path(&self) -> Result<PathBuf> {
        match &self.tool_install_dir {
            Some(dir) => {
                let bin = dir.join("bin").join("vivado");
                if bin.exists() {
                    Ok(bin)
                } else {
                    Err(BitsmithError::ToolNotFound(bin))
                }
            }
            None => Ok(PathBuf::from("vivado")),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.location.join(PROJECT_FILENAME)
    }

    pub fn ip(&self, name: &str) -> Result<&IpInstance> {
        self.ips
            .iter()
            .find(|ip| ip.name == name)
            .ok_or_else(|| BitsmithError::IpNotFound(name.to_string()))
    }

    pub fn block_design(&self, name: &str) -> Result<&BlockDesign> {
        self.block_designs
            .iter()
            .find(|bd| bd.name == name)
            .ok_or_else(|| BitsmithError::BlockDesignNotFound(name.to_string()))
    }

    /// `path` relative to the project root, for display
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.location).unwrap_or(path)
    }
}

fn find_recursive(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let pattern = format!("{}/**/*.{}", glob::Pattern::escape(&dir.to_string_lossy()), extension);
    let mut files: Vec<PathBuf> = glob(&pattern)?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// `*.tcl` directly inside `dir`, as (stem, path), sorted by name
fn find_scripts(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let pattern = format!("{}/*.tcl", glob::Pattern::escape(&dir.to_string_lossy()));
    let mut scripts: Vec<(String, PathBuf)> = glob(&pattern)?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .filter_map(|p| {
            let stem = p.file_stem()?.to_string_lossy().into_owned();
            Some((stem, p))
        })
        .collect();
    scripts.sort();
    Ok(scripts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    fn setup_project(json: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join(PROJECT_FILENAME), json).unwrap();

        touch(&root.join("sources/hdl/top.sv"));
        touch(&root.join("sources/hdl/uart/rx.v"));
        touch(&root.join("sources/hdl/pkg.vhd"));
        touch(&root.join("sources/constraints/pins.xdc"));
        touch(&root.join("sources/constraints/timing.xdc"));
        touch(&root.join("sources/constraints/debug.xdc"));
        touch(&root.join("ip/clk_wiz_0.tcl"));
        touch(&root.join("ip/fifo_0.tcl"));
        touch(&root.join("bd/system.tcl"));
        dir
    }

    #[test]
    fn test_discover_layout() {
        let dir = setup_project(
            r#"{
                "part": "xc7a35t",
                "top_module": "top",
                "name": "blinky",
                "sources": {
                    "synth_only_constraints": ["timing.xdc"],
                    "impl_only_constraints": ["debug.xdc"]
                },
                "ip": { "global_ips": ["fifo_0"] }
            }"#,
        );

        let project = Project::load(dir.path()).unwrap();
        let root = &project.location;

        assert_eq!(project.name, "blinky");
        assert_eq!(project.bitstream, root.join("build/blinky.bit"));
        assert_eq!(project.sources.systemverilog, vec![root.join("sources/hdl/top.sv")]);
        assert_eq!(project.sources.verilog, vec![root.join("sources/hdl/uart/rx.v")]);
        assert_eq!(project.sources.vhdl.len(), 1);

        let xdc = root.join("sources/constraints");
        assert_eq!(
            project.synth_constraints,
            vec![xdc.join("pins.xdc"), xdc.join("timing.xdc")]
        );
        assert_eq!(
            project.impl_constraints,
            vec![xdc.join("debug.xdc"), xdc.join("pins.xdc")]
        );

        let names: Vec<_> = project.ips.iter().map(|ip| ip.name.as_str()).collect();
        assert_eq!(names, vec!["clk_wiz_0", "fifo_0"]);

        let clk = project.ip("clk_wiz_0").unwrap();
        assert!(!clk.is_global);
        assert_eq!(clk.product, root.join("ip/outputs/clk_wiz_0/clk_wiz_0.xci"));
        assert_eq!(clk.checkpoint(), root.join("ip/outputs/clk_wiz_0/clk_wiz_0.dcp"));
        assert!(project.ip("fifo_0").unwrap().is_global);

        let bd = project.block_design("system").unwrap();
        assert_eq!(bd.product, root.join("bd/outputs/system/system.bd"));
    }

    #[test]
    fn test_unknown_ip() {
        let dir = setup_project(r#"{ "part": "xc7a35t", "top_module": "top" }"#);
        let project = Project::load(dir.path()).unwrap();
        assert!(matches!(
            project.ip("nope"),
            Err(BitsmithError::IpNotFound(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_tool_path_missing_binary() {
        let dir = setup_project(
            r#"{ "part": "xc7a35t", "top_module": "top", "vivado_install_dir": "/nonexistent/vivado" }"#,
        );
        let project = Project::load(dir.path()).unwrap();
        let err = project.tool_path().unwrap_err();
        assert!(err.is_environment());
    }
}
