//! Configuration management for bitsmith
//!
//! Project configuration lives in `bitsmith.json` at the project root. Every
//! field except the part and the top module has a default, so a minimal file
//! is two lines long.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::message::{MessagePolicy, Severity};
use crate::{BitsmithError, Result};

/// Name of the project file at the project root
pub const PROJECT_FILENAME: &str = "bitsmith.json";

/// Optional file whose first line overrides `vivado_install_dir`
pub const INSTALL_DIR_FILENAME: &str = ".vivado-install-dir.txt";

/// Overrides applied unless the project changes the same code itself
const BUILTIN_SEVERITY_CHANGES: &[(&str, Severity)] = &[
    ("HDL 9-806", Severity::Error),       // syntax error
    ("Opt 31-80", Severity::Error),       // multi-driver net
    ("Route 35-14", Severity::Error),     // multi-driver net
    ("AVAL-46", Severity::Error),         // MMCM/PLL VCO frequency out of range
    ("IP_Flow 19-3664", Severity::Error), // IP file not found
    ("HDL 9-1314", Severity::Error),      // formal port/generic not declared
    ("HDL 9-3136", Severity::Error),      // undeclared variable
    ("HDL 9-3242", Severity::Error),      // invalid port map
    ("HDL 9-3500", Severity::Error),      // formal port has no value
    ("Physopt 32-619", Severity::Log),    // estimated timing summary
    ("Route 35-57", Severity::Log),       // estimated timing summary
];

/// Codes hidden unless listed under `messages.show`
const BUILTIN_SUPPRESSIONS: &[&str] = &[];

/// Contents of `bitsmith.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Target device identifier
    pub part: String,

    /// Top-level module for synthesis
    pub top_module: String,

    /// Project name; defaults to the project directory name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default = "default_build_dir")]
    pub build_dir: String,

    #[serde(default = "default_synthesised_dcp")]
    pub synthesised_dcp_name: String,

    #[serde(default = "default_implemented_dcp")]
    pub implemented_dcp_name: String,

    /// Tool installation directory; the binary is `<dir>/bin/vivado`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vivado_install_dir: Option<PathBuf>,

    #[serde(default)]
    pub sources: SourcesConfig,

    #[serde(default)]
    pub ip: IpConfig,

    #[serde(default)]
    pub bd: BdConfig,

    #[serde(default)]
    pub messages: MessagesConfig,
}

/// HDL sources and constraints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_sources_location")]
    pub location: String,

    #[serde(default = "default_hdl_subdir")]
    pub hdl_subdir: String,

    #[serde(default = "default_xdc_subdir")]
    pub xdc_subdir: String,

    #[serde(default = "default_sim_subdir")]
    pub sim_subdir: String,

    /// Constraint files (relative to the constraints directory) used only for synthesis
    #[serde(default, rename = "synth_only_constraints")]
    pub synth_only: Vec<String>,

    /// Constraint files (relative to the constraints directory) used only for implementation
    #[serde(default, rename = "impl_only_constraints")]
    pub impl_only: Vec<String>,

    /// Extra Tcl scripts sourced after the HDL sources are read
    #[serde(default, rename = "tcls")]
    pub tcl_scripts: Vec<String>,
}

/// IP customisation scripts and their products
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpConfig {
    #[serde(default = "default_ip_location")]
    pub location: String,

    #[serde(default = "default_output_subdir")]
    pub output_subdir: String,

    /// IPs synthesised in-context with the top-level design
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub global_ips: BTreeSet<String>,
}

/// Block-design scripts and their products
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BdConfig {
    #[serde(default = "default_bd_location")]
    pub location: String,

    #[serde(default = "default_output_subdir")]
    pub output_subdir: String,
}

/// Message display policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesConfig {
    #[serde(default)]
    pub min_print_severity: Severity,

    #[serde(default = "default_min_ip_severity")]
    pub min_ip_print_severity: Severity,

    #[serde(default = "default_true")]
    pub print_message_ids: bool,

    /// Severity overrides keyed by message code
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub change: BTreeMap<String, Severity>,

    /// Codes that are recorded but never displayed
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub suppress: BTreeSet<String>,

    /// Codes exempt from the built-in suppressions
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub show: BTreeSet<String>,
}

// Default value providers
fn default_build_dir() -> String {
    "build".to_string()
}

fn default_synthesised_dcp() -> String {
    "synthesised.dcp".to_string()
}

fn default_implemented_dcp() -> String {
    "implemented.dcp".to_string()
}

fn default_sources_location() -> String {
    "sources".to_string()
}

fn default_hdl_subdir() -> String {
    "hdl".to_string()
}

fn default_xdc_subdir() -> String {
    "constraints".to_string()
}

fn default_sim_subdir() -> String {
    "sim".to_string()
}

fn default_ip_location() -> String {
    "ip".to_string()
}

fn default_bd_location() -> String {
    "bd".to_string()
}

fn default_output_subdir() -> String {
    "outputs".to_string()
}

fn default_min_ip_severity() -> Severity {
    Severity::Warning
}

fn default_true() -> bool {
    true
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            location: default_sources_location(),
            hdl_subdir: default_hdl_subdir(),
            xdc_subdir: default_xdc_subdir(),
            sim_subdir: default_sim_subdir(),
            synth_only: Vec::new(),
            impl_only: Vec::new(),
            tcl_scripts: Vec::new(),
        }
    }
}

impl Default for IpConfig {
    fn default() -> Self {
        Self {
            location: default_ip_location(),
            output_subdir: default_output_subdir(),
            global_ips: BTreeSet::new(),
        }
    }
}

impl Default for BdConfig {
    fn default() -> Self {
        Self {
            location: default_bd_location(),
            output_subdir: default_output_subdir(),
        }
    }
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            min_print_severity: Severity::Info,
            min_ip_print_severity: default_min_ip_severity(),
            print_message_ids: true,
            change: BTreeMap::new(),
            suppress: BTreeSet::new(),
            show: BTreeSet::new(),
        }
    }
}

impl MessagesConfig {
    /// Build the runtime policy, folding in the built-in overrides and suppressions
    pub fn to_policy(&self) -> MessagePolicy {
        let mut policy = MessagePolicy::new()
            .with_min_severity(self.min_print_severity, self.min_ip_print_severity);
        policy.print_message_ids = self.print_message_ids;

        for (code, severity) in &self.change {
            policy.severity_overrides.insert(code.clone(), *severity);
        }
        for (code, severity) in BUILTIN_SEVERITY_CHANGES {
            policy
                .severity_overrides
                .entry((*code).to_string())
                .or_insert(*severity);
        }

        policy.suppressions.extend(self.suppress.iter().cloned());
        for code in BUILTIN_SUPPRESSIONS {
            if !self.show.contains(*code) {
                policy.suppressions.insert((*code).to_string());
            }
        }

        policy
    }
}

impl ProjectConfig {
    /// Default configuration for a new project
    pub fn new(part: impl Into<String>, name: Option<String>) -> Self {
        Self {
            part: part.into(),
            top_module: "fpga_top".to_string(),
            name,
            build_dir: default_build_dir(),
            synthesised_dcp_name: default_synthesised_dcp(),
            implemented_dcp_name: default_implemented_dcp(),
            vivado_install_dir: None,
            sources: SourcesConfig::default(),
            ip: IpConfig::default(),
            bd: BdConfig::default(),
            messages: MessagesConfig::default(),
        }
    }

    /// Parse configuration from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| BitsmithError::Config(format!("parse error: {}", e)))?;

        if config.part.trim().is_empty() {
            return Err(BitsmithError::Config(
                "required field 'part' is missing or invalid".to_string(),
            ));
        }
        if config.top_module.trim().is_empty() {
            return Err(BitsmithError::Config(
                "required field 'top_module' is missing or invalid".to_string(),
            ));
        }

        Ok(config)
    }

    /// Load `bitsmith.json` from a project root.
    ///
    /// A `.vivado-install-dir.txt` next to it takes precedence over the
    /// `vivado_install_dir` field.
    pub fn load(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(PROJECT_FILENAME);
        if !config_path.exists() {
            return Err(BitsmithError::Config(format!(
                "'{}' does not exist",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(&config_path)?;
        let mut config = Self::from_json(&content)?;

        let install_file = project_root.join(INSTALL_DIR_FILENAME);
        if install_file.exists() {
            let content = std::fs::read_to_string(&install_file)?;
            if let Some(first) = content.lines().map(str::trim).find(|l| !l.is_empty()) {
                debug!("using tool installation at '{}'", first);
                config.vivado_install_dir = Some(PathBuf::from(first));
            }
        }

        Ok(config)
    }

    /// Write this configuration to `bitsmith.json`, refusing to overwrite
    pub fn write_new(&self, project_root: &Path) -> Result<PathBuf> {
        let config_path = project_root.join(PROJECT_FILENAME);
        if config_path.exists() {
            return Err(BitsmithError::AlreadyExists(config_path));
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content + "\n")?;
        Ok(config_path)
    }

    /// Directories `init` creates alongside the project file
    pub fn skeleton_dirs(&self) -> Vec<PathBuf> {
        let sources = PathBuf::from(&self.sources.location);
        let ip = PathBuf::from(&self.ip.location);
        let bd = PathBuf::from(&self.bd.location);
        vec![
            PathBuf::from(&self.build_dir),
            sources.join(&self.sources.hdl_subdir),
            sources.join(&self.sources.xdc_subdir),
            sources.join(&self.sources.sim_subdir),
            ip.join(&self.ip.output_subdir),
            bd.join(&self.bd.output_subdir),
        ]
    }
}
