use anyhow::{Context, Result};
use clap::Parser;
use shared::camera_interface::still_image::StillImageSource;
use shared::camera_interface::FrameSource;
use shared::config_storage::ConfigStorage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use topometry::{
    AnalysisKind, AnalysisParams, Pipeline, PipelineConfig, PipelineEvent, Region, TaskStatus,
};
use topometry_harness::{Dropout, SurfaceParams, SyntheticSurfaceSource};
use tracing_subscriber::EnvFilter;

/// Command line arguments for the surface measurement demo
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Stream a synthetic surface through the measurement pipeline"
)]
struct Args {
    /// Frame width in pixels
    #[arg(long, default_value_t = 320)]
    width: usize,

    /// Frame height in pixels
    #[arg(long, default_value_t = 240)]
    height: usize,

    /// Frame rate in Hz
    #[arg(long, default_value_t = 30.0)]
    frame_rate: f64,

    /// Run duration in seconds
    #[arg(short = 't', long, default_value_t = 5.0)]
    duration: f64,

    /// Interval between measurement rounds in milliseconds
    #[arg(long, default_value_t = 200)]
    request_interval_ms: u64,

    /// Side of the square measurement region in pixels
    #[arg(long, default_value_t = 96)]
    region_size: usize,

    /// Number of analysis worker threads
    #[arg(short, long, default_value_t = 2)]
    workers: usize,

    /// Calibrate against the frame inset by 10%, as a reference of this size (mm)
    #[arg(long)]
    reference_mm: Option<f64>,

    /// Simulate a device outage every N frames
    #[arg(long)]
    dropout_every: Option<u64>,

    /// Outage length in frames
    #[arg(long, default_value_t = 10)]
    dropout_length: u64,

    /// Optional pipeline configuration JSON
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Persist calibration in ~/.topometry
    #[arg(long)]
    persist: bool,

    /// Noise seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Measure a still image instead of the synthetic surface
    #[arg(long)]
    image: Option<std::path::PathBuf>,
}

fn calibrate(pipeline: &Pipeline, width: usize, height: usize, reference_mm: f64) -> Result<()> {
    let (w, h) = (width as f64, height as f64);
    let (mx, my) = (0.1 * w, 0.1 * h);
    pipeline.reset_calibration();
    pipeline.begin_calibration()?;
    for (x, y) in [(mx, my), (w - mx, my), (w - mx, h - my), (mx, h - my)] {
        pipeline.add_point(x, y)?;
    }
    let aspect = (h - 2.0 * my) / (w - 2.0 * mx);
    let cal = pipeline.apply_dimensions(reference_mm, reference_mm * aspect, "mm")?;
    tracing::info!("Calibrated at {:.3} px/mm", cal.pixels_per_unit);
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.worker_threads = args.workers;

    let pipeline = if args.persist {
        Pipeline::with_storage(config, ConfigStorage::new()?)?
    } else {
        Pipeline::new(config)?
    };

    let frames = Arc::new(AtomicU64::new(0));
    let frame_counter = frames.clone();
    pipeline.register_callback(move |event| match event {
        PipelineEvent::FramePublished { .. } => {
            frame_counter.fetch_add(1, Ordering::Relaxed);
        }
        PipelineEvent::DeviceDegraded {
            reason,
            last_good_version,
        } => tracing::warn!("Device degraded ({reason}); holding field {last_good_version:?}"),
        PipelineEvent::DeviceRecovered { version } => {
            tracing::info!("Device recovered at field v{version}")
        }
        _ => {}
    });

    let (source, width, height): (Box<dyn FrameSource>, usize, usize) = match &args.image {
        Some(path) => {
            let still = StillImageSource::open(path)
                .with_context(|| format!("opening {}", path.display()))?;
            let (w, h) = still.dimensions();
            (Box::new(still), w, h)
        }
        None => {
            let mut synthetic = SyntheticSurfaceSource::new(SurfaceParams {
                width: args.width,
                height: args.height,
                seed: args.seed,
                ..SurfaceParams::default()
            })
            .with_frame_rate(args.frame_rate, true);
            if let Some(every) = args.dropout_every {
                synthetic = synthetic.with_dropout(Dropout {
                    every,
                    length: args.dropout_length,
                });
            }
            (Box::new(synthetic), args.width, args.height)
        }
    };

    if let Some(reference_mm) = args.reference_mm {
        calibrate(&pipeline, width, height, reference_mm)?;
    }
    tracing::info!(
        "Mapping mode {:?}, {:.3} px/{}",
        pipeline.mapping_mode(),
        pipeline.effective_scale().pixels_per_unit,
        pipeline.effective_scale().unit
    );

    pipeline.start_acquisition(source)?;

    // Centre region, clipped to the frame
    let size = args.region_size.min(width).min(height);
    let region = Region::new((width - size) / 2, (height - size) / 2, size, size)?;
    tracing::info!("Measuring region {region}");

    let started = Instant::now();
    let run_for = Duration::from_secs_f64(args.duration);
    let mut pending = Vec::new();
    while started.elapsed() < run_for {
        std::thread::sleep(Duration::from_millis(args.request_interval_ms));
        for kind in AnalysisKind::ALL {
            match pipeline.submit(region, AnalysisParams::new(kind)) {
                Ok(handle) => pending.push(handle),
                Err(e) => tracing::warn!("{} rejected: {e}", kind.name()),
            }
        }

        pending.retain(|handle| match pipeline.poll(handle) {
            TaskStatus::Pending => true,
            TaskStatus::Completed(result) => {
                match result.output.scalar() {
                    Some(value) => tracing::info!(
                        "{:>10} = {value:>12.4} {} (field v{}, {:?})",
                        result.kind().name(),
                        result.unit,
                        result.field_version,
                        result.compute_time
                    ),
                    None => tracing::warn!(
                        "{} failed: {:?}",
                        result.kind().name(),
                        result.output.error()
                    ),
                }
                false
            }
            TaskStatus::Superseded | TaskStatus::Cancelled => false,
        });
    }

    let published = pipeline.stop_acquisition().unwrap_or(0);
    pipeline.shutdown();

    let stats = pipeline.stats();
    let cache = pipeline.cache_stats();
    tracing::info!(
        "Published {published} frames ({} events)",
        frames.load(Ordering::Relaxed)
    );
    tracing::info!(
        "Submitted {}, executed {}, superseded {}, coalesced {}, cache hits {}, failures {}",
        stats.submitted,
        stats.executions,
        stats.superseded,
        stats.coalesced,
        stats.cache_hits,
        stats.failures
    );
    tracing::info!(
        "Cache: {} hits, {} misses, {} evictions",
        cache.hits,
        cache.misses,
        cache.evictions
    );
    Ok(())
}
