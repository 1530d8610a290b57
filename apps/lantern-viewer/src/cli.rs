//! Command line options.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use lantern_app::{AppConfig, DeviceSelectionOptions, MeshKind};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

/// Directory holding the compiled SPIR-V shaders when none is given.
const DEFAULT_SHADER_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/shaders");

/// Options parsed from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerArgs {
    pub help: bool,
    pub target_fps: u32,
    pub mesh: MeshKind,
    pub overlay: bool,
    pub vsync: bool,
    pub device: DeviceSelectionOptions,
    pub shader_dir: PathBuf,
}

impl Default for ViewerArgs {
    fn default() -> Self {
        Self {
            help: false,
            target_fps: 0,
            mesh: MeshKind::Triangle,
            overlay: false,
            vsync: true,
            device: DeviceSelectionOptions::default(),
            shader_dir: PathBuf::from(DEFAULT_SHADER_DIR),
        }
    }
}

impl ViewerArgs {
    /// Parse options from the process arguments.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::parse(std::env::args().skip(1))
    }

    /// Parse options, excluding the program name.
    pub fn parse<I, S>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let mut parsed = Self::default();

        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            let mut value = || {
                i += 1;
                args.get(i)
                    .map(String::as_str)
                    .ok_or_else(|| anyhow!("{flag} expects a value"))
            };

            match flag {
                "-h" | "--help" => parsed.help = true,
                "--fps" => {
                    let v = value()?;
                    parsed.target_fps = v
                        .parse()
                        .with_context(|| format!("invalid frame-rate cap '{v}'"))?;
                }
                "--mesh" => parsed.mesh = value()?.parse()?,
                "--overlay" => parsed.overlay = true,
                "--vsync" => parsed.vsync = true,
                "--no-vsync" => parsed.vsync = false,
                "--gpu" => parsed.device.allowlist.push(value()?.to_string()),
                "--discrete" => {
                    parsed.device.require_discrete = true;
                    parsed.device.allow_integrated = false;
                }
                "--integrated" => {
                    parsed.device.require_discrete = false;
                    parsed.device.allow_integrated = true;
                }
                "--shader-dir" => parsed.shader_dir = PathBuf::from(value()?),
                other => bail!("unknown option '{other}' (see --help)"),
            }
            i += 1;
        }

        Ok(parsed)
    }

    /// Build the application configuration.
    pub fn into_config(self) -> AppConfig {
        AppConfig::new("Lantern Viewer")
            .with_size(WIDTH, HEIGHT)
            .with_target_fps(self.target_fps)
            .with_vsync(self.vsync)
            .with_overlay(self.overlay)
            .with_initial_mesh(self.mesh)
            .with_shaders(
                self.shader_dir.join("mesh.vert.spv"),
                self.shader_dir.join("mesh.frag.spv"),
            )
            .with_device_selection(self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_args_use_defaults() {
        let args = ViewerArgs::parse(Vec::<String>::new()).unwrap();
        assert_eq!(args, ViewerArgs::default());
    }

    #[test]
    fn parses_all_flags() {
        let args = ViewerArgs::parse([
            "--fps",
            "30",
            "--mesh",
            "quad",
            "--overlay",
            "--no-vsync",
            "--gpu",
            "radeon",
            "--gpu",
            "geforce",
            "--discrete",
            "--shader-dir",
            "out",
        ])
        .unwrap();

        assert_eq!(args.target_fps, 30);
        assert_eq!(args.mesh, MeshKind::Quad);
        assert!(args.overlay);
        assert!(!args.vsync);
        assert_eq!(args.device.allowlist, vec!["radeon", "geforce"]);
        assert!(args.device.require_discrete);
        assert!(!args.device.allow_integrated);
        assert_eq!(args.shader_dir, PathBuf::from("out"));
    }

    #[test]
    fn later_flags_override_earlier_ones() {
        let args = ViewerArgs::parse(["--discrete", "--integrated"]).unwrap();
        assert!(!args.device.require_discrete);
        assert!(args.device.allow_integrated);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(ViewerArgs::parse(["--fps"]).is_err());
        assert!(ViewerArgs::parse(["--fps", "fast"]).is_err());
        assert!(ViewerArgs::parse(["--mesh", "teapot"]).is_err());
        assert!(ViewerArgs::parse(["--frobnicate"]).is_err());
    }

    #[test]
    fn config_points_at_shader_dir() {
        let config = ViewerArgs::parse(["--shader-dir", "build", "--mesh", "none"])
            .unwrap()
            .into_config();
        assert_eq!(config.vertex_shader, PathBuf::from("build/mesh.vert.spv"));
        assert_eq!(config.fragment_shader, PathBuf::from("build/mesh.frag.spv"));
        assert_eq!(config.initial_mesh, MeshKind::None);
    }
}
