//! Lantern Mesh Viewer
//!
//! Renders one of the built-in meshes with a free camera, through the full
//! frame pipeline: acquire, record, submit, present, with swapchain rebuilds
//! on resize.
//!
//! ## Usage
//!
//! ```bash
//! glslc apps/lantern-viewer/shaders/mesh.vert -o apps/lantern-viewer/shaders/mesh.vert.spv
//! glslc apps/lantern-viewer/shaders/mesh.frag -o apps/lantern-viewer/shaders/mesh.frag.spv
//! cargo run -p lantern-viewer -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--fps <N>`: Frame-rate cap, 0 for unlimited (default: 0)
//! - `--mesh <NAME>`: Initial mesh: triangle, quad or none (default: triangle)
//! - `--overlay`: Log frame statistics periodically
//! - `--vsync` / `--no-vsync`: Toggle vsync (default: on)
//! - `--gpu <NAME>`: Prefer GPUs whose name contains NAME (repeatable)
//! - `--discrete`: Only accept discrete GPUs
//! - `--integrated`: Accept an integrated GPU when no discrete GPU exists
//! - `--shader-dir <DIR>`: Directory with mesh.vert.spv and mesh.frag.spv
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;
mod cli;

use lantern_app::run_app;

use crate::app::Viewer;
use crate::cli::ViewerArgs;

fn main() -> anyhow::Result<()> {
    let args = ViewerArgs::from_env()?;

    if args.help {
        print_help();
        return Ok(());
    }

    run_app::<Viewer>(args.into_config())
}

fn print_help() {
    eprintln!(
        "Lantern Mesh Viewer

USAGE:
    cargo run -p lantern-viewer -- [OPTIONS]

OPTIONS:
    --fps <N>               Frame-rate cap, 0 for unlimited (default: 0)
                            Clamped to the monitor refresh rate
    --mesh <NAME>           Initial mesh: triangle, quad or none (default: triangle)
    --overlay               Log frame statistics periodically
    --vsync                 Enable vsync (default)
    --no-vsync              Disable vsync
    --gpu <NAME>            Prefer GPUs whose name contains NAME (repeatable)
    --discrete              Only accept discrete GPUs
    --integrated            Accept an integrated GPU when no discrete GPU exists (default)
    --shader-dir <DIR>      Directory with mesh.vert.spv and mesh.frag.spv
                            Default: apps/lantern-viewer/shaders
    -h, --help              Print this help message

CONTROLS:
    WASD / arrows           Move camera
    Space / Ctrl            Move up / down
    Mouse                   Look around
    M                       Cycle meshes
    P                       Toggle model spin
    Esc                     Quit

SHADERS:
    glslc apps/lantern-viewer/shaders/mesh.vert -o apps/lantern-viewer/shaders/mesh.vert.spv
    glslc apps/lantern-viewer/shaders/mesh.frag -o apps/lantern-viewer/shaders/mesh.frag.spv

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
