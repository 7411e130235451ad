//! Removing build products

use bitsmith_core::{Console, Project, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// What `clean` removes besides the tool's `.Xil` scratch directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanTargets {
    /// Checkpoints and the bitstream
    pub build: bool,
    /// IP products and the IP cache
    pub ips: bool,
}

impl CleanTargets {
    /// Build products by default, IP products with `ips`, both with `all`
    pub fn from_flags(ips: bool, all: bool) -> Self {
        Self {
            build: all || !ips,
            ips: ips || all,
        }
    }
}

fn remove(project: &Project, path: &Path, console: &Console, removed: &mut Vec<PathBuf>) -> Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)?;
    } else if path.exists() {
        std::fs::remove_file(path)?;
    } else {
        return Ok(());
    }
    console.removed(project.relative(path).display());
    removed.push(path.to_path_buf());
    Ok(())
}

/// Delete the selected products, returning every path removed
pub fn clean(project: &Project, targets: CleanTargets, console: &Console) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();

    let xil = project.location.join(".Xil");
    if xil.is_dir() {
        std::fs::remove_dir_all(&xil)?;
        debug!("removed {}", xil.display());
    }

    if targets.build {
        console.log("cleaning build products");
        for artifact in [
            &project.synthesised_checkpoint,
            &project.implemented_checkpoint,
            &project.bitstream,
        ] {
            remove(project, artifact, console, &mut removed)?;
        }
    }

    if targets.ips {
        console.log("cleaning ip products");
        for ip in &project.ips {
            remove(project, &ip.product_dir(), console, &mut removed)?;
        }

        let cache = project.location.join(".cache");
        if cache.is_dir() {
            console.log("clearing ip cache");
            remove(project, &cache, console, &mut removed)?;
        }
    }

    Ok(removed)
}
