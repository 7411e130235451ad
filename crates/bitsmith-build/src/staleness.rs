//! Timestamp-based staleness rules
//!
//! Everything here reads live filesystem metadata on every call. Nothing is
//! cached, so a rule evaluated after a stage has run sees that stage's output.

use bitsmith_core::{BlockDesign, IpInstance, Project};
use std::fmt;
use std::path::Path;
use std::time::SystemTime;

/// Modification time, or `None` if the file does not exist
pub fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Whether `artifact` must be rebuilt from `deps`.
///
/// A missing artifact is always stale. Otherwise it is stale only if some
/// dependency is strictly newer; ties are fresh and missing dependencies are
/// ignored.
pub fn is_stale<I, P>(artifact: &Path, deps: I) -> bool
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let Some(built) = modified(artifact) else {
        return true;
    };
    deps.into_iter()
        .any(|dep| modified(dep.as_ref()).map_or(false, |t| t > built))
}

pub fn ip_should_regenerate(ip: &IpInstance) -> bool {
    is_stale(&ip.product, [&ip.script])
}

/// Global IPs are synthesised with the design, so only regeneration matters
pub fn ip_should_resynthesise(ip: &IpInstance) -> bool {
    ip_should_regenerate(ip)
        || (!ip.is_global && is_stale(&ip.checkpoint(), [&ip.product, &ip.script]))
}

pub fn bd_should_regenerate(bd: &BlockDesign) -> bool {
    is_stale(&bd.product, [&bd.script])
}

/// Overrides accepted by the build stages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildFlags {
    /// Rebuild even when up to date
    pub force: bool,
    /// Skip the upstream synthesis check for implementation and bitstream
    pub allow_stale: bool,
}

impl BuildFlags {
    pub fn forced() -> Self {
        Self {
            force: true,
            allow_stale: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Synthesis,
    Implementation,
    Bitstream,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Synthesis => "synthesis",
            Stage::Implementation => "implementation",
            Stage::Bitstream => "bitstream",
        })
    }
}

/// Staleness of the top-level pipeline stages for one project
#[derive(Debug, Clone, Copy)]
pub struct StalenessModel<'a> {
    project: &'a Project,
}

impl<'a> StalenessModel<'a> {
    pub fn new(project: &'a Project) -> Self {
        Self { project }
    }

    pub fn should_resynthesise(&self) -> bool {
        let p = self.project;
        let dcp = &p.synthesised_checkpoint;
        if modified(dcp).is_none() {
            return true;
        }

        let ips_stale = p
            .ips
            .iter()
            .any(|ip| ip_should_regenerate(ip) || ip_should_resynthesise(ip));
        let bds_stale = p.block_designs.iter().any(bd_should_regenerate);

        let ip_products = p.ips.iter().flat_map(|ip| {
            let checkpoint = (!ip.is_global).then(|| ip.checkpoint());
            std::iter::once(ip.product.clone()).chain(checkpoint)
        });
        let bd_products = p.block_designs.iter().map(|bd| bd.product.clone());

        ips_stale
            || bds_stale
            || is_stale(dcp, p.sources.hdl())
            || is_stale(dcp, &p.synth_constraints)
            || is_stale(dcp, ip_products.chain(bd_products))
    }

    /// With `allow_stale` the synthesis check is skipped, but a missing or
    /// outdated implemented checkpoint still counts.
    pub fn should_reimplement(&self, allow_stale: bool) -> bool {
        let p = self.project;
        if !allow_stale && self.should_resynthesise() {
            return true;
        }
        is_stale(
            &p.implemented_checkpoint,
            std::iter::once(&p.synthesised_checkpoint).chain(&p.impl_constraints),
        )
    }

    pub fn should_rewrite_bitstream(&self, allow_stale: bool) -> bool {
        let p = self.project;
        self.should_reimplement(allow_stale)
            || is_stale(
                &p.bitstream,
                [&p.implemented_checkpoint, &p.synthesised_checkpoint],
            )
    }

    /// Whether `stage` has to run under `flags`
    pub fn needs_rebuild(&self, stage: Stage, flags: BuildFlags) -> bool {
        flags.force
            || match stage {
                Stage::Synthesis => self.should_resynthesise(),
                Stage::Implementation => self.should_reimplement(flags.allow_stale),
                Stage::Bitstream => self.should_rewrite_bitstream(flags.allow_stale),
            }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitsmith_core::ProjectConfig;
    use std::fs::{self, File};
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000 + secs)
    }

    fn touch(path: &Path, time: SystemTime) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let file = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .unwrap();
        file.set_modified(time).unwrap();
    }

    fn fixture() -> (TempDir, Project) {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("sources/hdl/top.vhd"), at(10));
        touch(&root.join("sources/constraints/pins.xdc"), at(10));
        touch(&root.join("ip/clk_wiz.tcl"), at(10));
        touch(&root.join("ip/outputs/clk_wiz/clk_wiz.xci"), at(20));
        touch(&root.join("ip/outputs/clk_wiz/clk_wiz.dcp"), at(30));

        let config = ProjectConfig::new("xc7a35ticsg324-1L", Some("blinky".to_string()));
        let project = Project::discover(&config, root).unwrap();
        (dir, project)
    }

    #[test]
    fn test_missing_artifact_is_always_stale() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("missing.dcp");
        assert!(is_stale(&artifact, Vec::<PathBuf>::new()));

        let old = dir.path().join("old.vhd");
        touch(&old, at(0));
        assert!(is_stale(&artifact, [&old]));
    }

    #[test]
    fn test_newer_dependency_makes_stale() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("a.dcp");
        let dep = dir.path().join("b.vhd");
        touch(&artifact, at(100));

        touch(&dep, at(99));
        assert!(!is_stale(&artifact, [&dep]));

        touch(&dep, at(100));
        assert!(!is_stale(&artifact, [&dep]), "a tie is not stale");

        touch(&dep, at(101));
        assert!(is_stale(&artifact, [&dep]));
    }

    #[test]
    fn test_missing_dependency_is_ignored() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("a.dcp");
        touch(&artifact, at(100));
        assert!(!is_stale(&artifact, [dir.path().join("gone.vhd")]));
    }

    #[test]
    fn test_force_overrides_everything() {
        let (_dir, project) = fixture();
        touch(&project.synthesised_checkpoint, at(40));
        let model = StalenessModel::new(&project);

        assert!(!model.needs_rebuild(Stage::Synthesis, BuildFlags::default()));
        assert!(model.needs_rebuild(Stage::Synthesis, BuildFlags::forced()));
    }

    #[test]
    fn test_ip_rules() {
        let (dir, project) = fixture();
        let ip = project.ip("clk_wiz").unwrap();
        assert!(!ip_should_regenerate(ip));
        assert!(!ip_should_resynthesise(ip));

        touch(&ip.product, at(35));
        assert!(!ip_should_regenerate(ip));
        assert!(ip_should_resynthesise(ip), "product newer than checkpoint");

        touch(&dir.path().join("ip/clk_wiz.tcl"), at(50));
        assert!(ip_should_regenerate(ip));
        assert!(ip_should_resynthesise(ip));
    }

    #[test]
    fn test_global_ip_skips_checkpoint() {
        let (_dir, mut project) = fixture();
        project.ips[0].is_global = true;
        let ip = &project.ips[0];

        std::fs::remove_file(ip.checkpoint()).unwrap();
        assert!(!ip_should_resynthesise(ip));
    }

    #[test]
    fn test_synthesis_rules() {
        let (dir, project) = fixture();
        let model = StalenessModel::new(&project);
        assert!(model.should_resynthesise(), "no checkpoint yet");

        touch(&project.synthesised_checkpoint, at(40));
        assert!(!model.should_resynthesise());

        touch(&dir.path().join("sources/constraints/pins.xdc"), at(41));
        assert!(model.should_resynthesise());
        touch(&dir.path().join("sources/constraints/pins.xdc"), at(10));

        touch(&dir.path().join("sources/hdl/top.vhd"), at(41));
        assert!(model.should_resynthesise());
        touch(&dir.path().join("sources/hdl/top.vhd"), at(10));

        touch(&project.ips[0].checkpoint(), at(45));
        assert!(model.should_resynthesise(), "ip rebuilt since last synthesis");
    }

    #[test]
    fn test_implementation_rules() {
        let (_dir, project) = fixture();
        let model = StalenessModel::new(&project);
        touch(&project.implemented_checkpoint, at(50));

        // no synthesised checkpoint: only allow_stale avoids the rebuild
        assert!(model.should_reimplement(false));
        assert!(!model.should_reimplement(true));

        touch(&project.synthesised_checkpoint, at(40));
        assert!(!model.should_reimplement(false));

        touch(&project.synthesised_checkpoint, at(60));
        assert!(model.should_reimplement(true), "allow_stale keeps the own check");
    }

    #[test]
    fn test_allow_stale_does_not_cover_missing_checkpoint() {
        let (_dir, project) = fixture();
        let model = StalenessModel::new(&project);
        assert!(model.should_reimplement(true));
        assert!(model.should_rewrite_bitstream(true));
    }

    #[test]
    fn test_bitstream_rules() {
        let (_dir, project) = fixture();
        let model = StalenessModel::new(&project);
        touch(&project.synthesised_checkpoint, at(40));
        touch(&project.implemented_checkpoint, at(50));
        touch(&project.bitstream, at(60));
        assert!(!model.should_rewrite_bitstream(false));

        touch(&project.implemented_checkpoint, at(70));
        assert!(model.should_rewrite_bitstream(false));
        assert!(model.should_rewrite_bitstream(true));
    }
}
