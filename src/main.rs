mod assets;
mod config;
mod logging;

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::{Args, Parser, Subcommand};
use strata_blocks::TextureAtlas;
use strata_chunk::PaletteDecoder;
use strata_render::{MAX_CHUNKS_PER_DIMENSION, Profile, RenderMode, TileFormat};
use strata_runtime::{MapSession, PipelineProgress, PyramidProgress, SessionOptions};
use strata_world::DirStore;

use crate::config::RunConfig;

#[derive(Parser)]
#[command(name = "strata", about = "Incremental world-to-tile map renderer")]
struct Cli {
    /// More log output; repeat for trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Also write the log to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render one dimension of a world into map tiles
    Render(RenderArgs),
}

#[derive(Args)]
struct RenderArgs {
    /// World store directory
    #[arg(long)]
    world: PathBuf,
    /// Output root holding map/, update/ and the checksum database
    #[arg(long)]
    output: Option<PathBuf>,
    /// Run config file (defaults to ./strata.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, allow_hyphen_values = true)]
    dim: Option<i32>,
    /// default, elevation, underground, aquatic, stronghold or ore
    #[arg(long)]
    profile: Option<String>,
    /// png, jpeg or webp
    #[arg(long)]
    format: Option<TileFormat>,
    #[arg(long)]
    quality: Option<u8>,
    /// Tile edge in chunks
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=MAX_CHUNKS_PER_DIMENSION as i64))]
    chunks_per_dimension: Option<u32>,
    #[arg(long)]
    threads: Option<usize>,
    #[arg(long)]
    max_queue: Option<usize>,
    /// Re-render tiles whose subchunks are unchanged
    #[arg(long)]
    force_overwrite: bool,
    /// Clear leftovers from an interrupted run before rendering
    #[arg(long)]
    delete_existing_update_folder: bool,
    /// heightmap or normal
    #[arg(long)]
    render_mode: Option<RenderMode>,
    /// Inclusive chunk x range, as MIN,MAX
    #[arg(long, value_parser = parse_range, allow_hyphen_values = true)]
    limit_x: Option<[i32; 2]>,
    /// Inclusive chunk z range, as MIN,MAX
    #[arg(long, value_parser = parse_range, allow_hyphen_values = true)]
    limit_z: Option<[i32; 2]>,
    #[arg(long, allow_hyphen_values = true)]
    y_max: Option<i32>,
    #[arg(long)]
    trim_ceiling: bool,
    /// Assets root containing textures/catalog.toml
    #[arg(long)]
    textures: Option<PathBuf>,
}

fn parse_range(s: &str) -> Result<[i32; 2], String> {
    let (a, b) = s
        .split_once(',')
        .ok_or_else(|| format!("expected MIN,MAX, got '{}'", s))?;
    let a = a.trim().parse::<i32>().map_err(|e| format!("'{}': {}", a, e))?;
    let b = b.trim().parse::<i32>().map_err(|e| format!("'{}': {}", b, e))?;
    Ok([a.min(b), a.max(b)])
}

/// Config file values, then command-line overrides.
fn session_options(args: &RenderArgs, cfg: &RunConfig) -> SessionOptions {
    let mut settings = cfg.render_settings();
    if let Some(p) = &args.profile {
        settings.profile = Profile::from_name(p);
    }
    if let Some(f) = args.format {
        settings.format = f;
    }
    if let Some(q) = args.quality {
        settings.quality = q;
    }
    if let Some(c) = args.chunks_per_dimension {
        settings.chunks_per_dimension = c;
    }
    if let Some(t) = args.threads {
        settings.threads = t.max(1);
    }
    if let Some(q) = args.max_queue {
        settings.max_queue = q.max(1);
    }
    if let Some(m) = args.render_mode {
        settings.render_mode = m;
    }
    if let Some(y) = args.y_max {
        settings.y_max = y;
    }
    settings.force_overwrite |= args.force_overwrite;
    settings.trim_ceiling |= args.trim_ceiling;

    let limits = config::limit_bounds(
        args.limit_x.or(cfg.limits.x),
        args.limit_z.or(cfg.limits.z),
    );
    SessionOptions {
        output_root: args
            .output
            .clone()
            .or_else(|| cfg.output.root.clone())
            .unwrap_or_else(|| PathBuf::from("map-output")),
        dimension: args.dim.unwrap_or(cfg.output.dimension),
        settings,
        limits,
        delete_existing_update_folder: args.delete_existing_update_folder
            || cfg.output.delete_existing_update_folder,
    }
}

fn render(args: RenderArgs) -> Result<(), Box<dyn Error>> {
    let cfg = RunConfig::load(args.config.as_deref())?;
    let options = session_options(&args, &cfg);

    let assets_root = assets::resolve_assets_root(args.textures.as_deref());
    let atlas = TextureAtlas::open(assets::textures_dir(&assets_root))
        .map_err(|e| format!("texture catalog {}: {}", assets::catalog_path(&assets_root).display(), e))?;
    let world = DirStore::open(&args.world)?;
    log::info!(
        "rendering {} into {} (dim {}, profile {}, {})",
        args.world.display(),
        options.output_root.display(),
        options.dimension,
        options.settings.profile.name(),
        options.settings.format
    );

    // Log roughly every tenth of the work.
    let last_step = Arc::new(AtomicUsize::new(0));
    let progress = Arc::new(move |p: PipelineProgress| {
        let step = p.rendered_chunks * 10 / p.total_chunks.max(1);
        if last_step.fetch_max(step, Ordering::Relaxed) < step {
            log::info!("rendered {}/{} chunks", p.rendered_chunks, p.total_chunks);
        }
    });
    let pyramid_progress = Arc::new(|p: PyramidProgress| {
        if p.lines_done == p.lines_total {
            log::info!("zoom {} finished ({} lines)", p.zoom, p.lines_total);
        }
    });

    let report = MapSession::new(options)
        .with_progress(progress)
        .with_pyramid_progress(pyramid_progress)
        .run(Arc::new(world), Arc::new(PaletteDecoder), Arc::new(atlas))?;

    let p = &report.pipeline;
    log::info!(
        "done: {} tiles rendered, {} unchanged, {} dropped; {} pyramid tiles down to zoom {}",
        p.rendered,
        p.skipped,
        p.dropped,
        report.pyramid.tiles(),
        report.min_zoom
    );
    if p.failed_batches > 0 {
        log::warn!("{} checksum batches failed; those tiles render again next run", p.failed_batches);
    }
    if !p.missing_textures.is_empty() {
        println!("Missing textures:");
        for m in &p.missing_textures {
            println!("  {}", m);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("logging setup failed: {}", e);
        return ExitCode::FAILURE;
    }
    let result = match cli.command {
        Command::Render(args) => render(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
