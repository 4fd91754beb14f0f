//! Command-line entry points: serve, play, check.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::engine::Engine;
use crate::figures::{self, FigureSpec};
use crate::frame::Script;
use crate::kite::KiteId;
use crate::script;
use crate::server::{Server, ServerConfig};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync server, mirroring kite state to connected viewers
    Serve {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Bind port (0 picks an ephemeral port)
        #[arg(long, default_value_t = 7465)]
        port: u16,

        /// Concurrent client cap
        #[arg(long, default_value_t = 32)]
        max_clients: usize,

        /// Choreography script to preload
        #[arg(long)]
        script: Option<PathBuf>,

        /// JSON figure playlist to preload (needs --kites)
        #[arg(long)]
        figures: Option<PathBuf>,

        /// Kite count for --figures playlists
        #[arg(long, default_value_t = 4)]
        kites: u32,
    },

    /// Play a choreography headlessly, logging block transitions
    Play {
        /// Choreography script file
        #[arg(long)]
        script: Option<PathBuf>,

        /// JSON figure playlist (needs --kites)
        #[arg(long)]
        figures: Option<PathBuf>,

        /// Kite count for --figures playlists
        #[arg(long, default_value_t = 4)]
        kites: u32,

        /// Simulated ticks per second
        #[arg(long, default_value_t = 60.0)]
        fps: f32,
    },

    /// Validate a choreography script and report diagnostics
    Check {
        /// Choreography script file
        script: PathBuf,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            max_clients,
            script,
            figures,
            kites,
        } => serve(
            host,
            port,
            max_clients,
            script.as_deref(),
            figures.as_deref(),
            kites,
        ),
        Commands::Play {
            script,
            figures,
            kites,
            fps,
        } => play(script.as_deref(), figures.as_deref(), kites, fps),
        Commands::Check { script } => check(&script),
    }
}

/// Build a script from either source, creating the kites it needs.
fn load_choreography(
    engine: &mut Engine,
    script_path: Option<&Path>,
    figures_path: Option<&Path>,
    kites: u32,
) -> Result<Option<Script>> {
    if let Some(path) = script_path {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let parsed = script::load_source(&source, 0)
            .with_context(|| format!("parsing {}", path.display()))?;
        for i in 0..parsed.kite_count {
            engine.create_kite(KiteId(i));
        }
        return Ok(Some(parsed.script));
    }

    if let Some(path) = figures_path {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let specs: Vec<FigureSpec> = serde_json::from_str(&source)
            .with_context(|| format!("parsing {}", path.display()))?;
        let ids: Vec<KiteId> = (0..kites).map(KiteId).collect();
        for &id in &ids {
            engine.create_kite(id);
        }
        let script = figures::build_script(0, &ids, &specs)?;
        return Ok(Some(script));
    }

    Ok(None)
}

fn serve(
    host: String,
    port: u16,
    max_clients: usize,
    script_path: Option<&Path>,
    figures_path: Option<&Path>,
    kites: u32,
) -> Result<()> {
    let mut engine = Engine::new();
    if let Some(script) = load_choreography(&mut engine, script_path, figures_path, kites)? {
        engine.load_script(script)?;
    }

    let config = ServerConfig {
        host,
        port,
        max_clients,
        ..ServerConfig::default()
    };
    let mut server = Server::bind(config, engine)?;
    println!("listening on {}", server.local_addr()?);
    server.run()?;
    Ok(())
}

fn play(
    script_path: Option<&Path>,
    figures_path: Option<&Path>,
    kites: u32,
    fps: f32,
) -> Result<()> {
    if fps <= 0.0 {
        bail!("--fps must be positive");
    }
    let mut engine = Engine::new();
    let Some(script) = load_choreography(&mut engine, script_path, figures_path, kites)? else {
        bail!("nothing to play: pass --script or --figures");
    };
    let blocks = script.block_count();
    engine.load_script(script)?;

    let dt = 1.0 / fps;
    let mut ticks: u64 = 0;
    while engine.script_active() {
        let tick = engine.advance(dt);
        ticks += 1;
        if tick.block_changed {
            if let Some(p) = tick.progress {
                log::info!("block {}/{}", p.block_index, p.block_count);
            }
        }
    }

    println!(
        "played {} blocks in {:.2} simulated seconds",
        blocks,
        ticks as f32 * dt
    );
    for kite in engine.kites() {
        println!(
            "kite {}: ({:.1}, {:.1}) at {:.1} degrees",
            kite.id, kite.center.x, kite.center.y, kite.angle
        );
    }
    Ok(())
}

fn check(path: &Path) -> Result<()> {
    let source =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    match script::load_source(&source, 0) {
        Ok(parsed) => {
            println!(
                "{}: ok ({} kites, {} blocks)",
                path.display(),
                parsed.kite_count,
                parsed.script.block_count()
            );
            Ok(())
        }
        Err(e) => bail!("{}: {}", path.display(), e),
    }
}
