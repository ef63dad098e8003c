use std::{
    path::{Path, PathBuf},
    rc::Rc,
};

use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use foley_timeline_core::{
    compute_peaks, detect_transient_times, AssetCache, ClipDraft, Composition, EngineConfig,
    ExportFormat, ExportMode, ExportRequest, Exporter, History, MotionEvent, MotionEventSource,
    MotionRequest, MotionSync, OfflineRenderer, SyncOutcome, SyncStrategy, TimelineError,
    WavFileDecoder,
};
use futures::executor::block_on;
use tracing_subscriber::EnvFilter;

fn main() -> foley_timeline_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Render {
            clips,
            output_dir,
            stems,
            no_normalize,
        } => run_render(&config, &clips, &output_dir, stems, !no_normalize),
        Commands::Transients { input, max_events } => run_transients(&input, max_events),
        Commands::Sync {
            clip,
            start,
            events,
            strategy,
        } => run_sync(&config, &clip, start, &events, strategy.into()),
    }
}

fn run_render(
    config: &EngineConfig,
    placements: &[Placement],
    output_dir: &Path,
    stems: bool,
    normalize: bool,
) -> foley_timeline_core::Result<()> {
    let mut history = History::new(
        Composition::new(&config.timeline),
        &config.history,
    );
    for placement in placements {
        let draft = load_draft(&placement.path)?;
        let hint = placement
            .track
            .and_then(|index| history.present().tracks.get(index).map(|t| t.id));
        let placed = history.try_commit(|state| {
            state.drop_clip(draft, hint, placement.start_s).ok_or_else(|| {
                TimelineError::rejected(format!("no track accepts {}", placement.path.display()))
            })
        })?;
        tracing::info!(
            clip = %placed,
            path = ?placement.path,
            start_s = placement.start_s,
            "placed clip"
        );
    }

    let mut request = ExportRequest::from_config(&config.export, &config.render);
    request.format = ExportFormat::Wav;
    request.normalize = normalize;
    if stems {
        request.mode = ExportMode::Stems;
    }

    let exporter = Exporter::new(OfflineRenderer::new(Rc::new(WavFileDecoder)));
    let files = block_on(exporter.export(history.present(), &request))?;
    std::fs::create_dir_all(output_dir)?;
    for file in files {
        let path = output_dir.join(&file.file_name);
        std::fs::write(&path, &file.bytes)?;
        tracing::info!(?path, bytes = file.bytes.len(), "wrote export");
    }
    Ok(())
}

fn run_transients(input: &Path, max_events: usize) -> foley_timeline_core::Result<()> {
    let audio = WavFileDecoder::read(input)?;
    let transients = detect_transient_times(&audio, max_events);
    tracing::info!(?input, found = transients.len(), "detected transients");
    for t in transients {
        println!("{t:.4}");
    }
    Ok(())
}

fn run_sync(
    config: &EngineConfig,
    clip_path: &Path,
    start_s: f64,
    events: &[f64],
    strategy: SyncStrategy,
) -> foley_timeline_core::Result<()> {
    let mut history = History::new(
        Composition::new(&config.timeline),
        &config.history,
    );
    let draft = load_draft(clip_path)?;
    let first_track = history
        .present()
        .tracks
        .first()
        .map(|t| t.id)
        .ok_or_else(|| TimelineError::invalid("the composition has no tracks"))?;
    let clip_id = history.commit(|state| state.add_clip(draft, first_track, start_s.max(0.0)));

    let source = Rc::new(FixedEvents(events.to_vec()));
    let sync = MotionSync::new(
        source,
        AssetCache::new(Rc::new(WavFileDecoder)),
        config.sync.clone(),
    );
    let outcome = block_on(sync.sync(&mut history, "cli", clip_id, strategy))?;
    match outcome {
        SyncOutcome::Shifted { delta_s, start_s, .. } => {
            println!("shifted by {delta_s:+.4}s, start {start_s:.4}s");
        }
        SyncOutcome::Segmented { clips, pulsating } => {
            println!("replaced with {} segments (pulsating: {pulsating})", clips.len());
        }
        SyncOutcome::TimeAdjusted { segments, .. } => {
            println!("time-adjusted into {segments} warp segments");
        }
    }
    let state = history.present();
    let mut clips: Vec<_> = state.clips.iter().collect();
    clips.sort_by(|a, b| a.start_s.total_cmp(&b.start_s));
    for clip in clips {
        let track = state.track(clip.track_id).map_or("?", |t| t.name.as_str());
        println!(
            "{track}: {:.4}s +{:.4}s from {:.4}s",
            clip.start_s, clip.duration_s, clip.source_offset_s
        );
        for segment in &clip.time_warp {
            println!(
                "  warp {:.4}s +{:.4}s from {:.4}s",
                segment.start_s, segment.duration_s, segment.source_offset_s
            );
        }
    }
    Ok(())
}

fn load_draft(path: &Path) -> foley_timeline_core::Result<ClipDraft> {
    let audio = WavFileDecoder::read(path)?;
    let name = path
        .file_stem()
        .map_or_else(|| "clip".to_string(), |s| s.to_string_lossy().into_owned());
    let mut draft = ClipDraft::for_asset(name, path.to_string_lossy(), audio.duration_s());
    draft.waveform_peaks = Some(compute_peaks(
        &audio,
        foley_timeline_core::assets::DEFAULT_PEAK_BINS,
    ));
    Ok(draft)
}

/// Motion events supplied on the command line.
struct FixedEvents(Vec<f64>);

#[async_trait(?Send)]
impl MotionEventSource for FixedEvents {
    async fn detect(
        &self,
        request: &MotionRequest,
    ) -> foley_timeline_core::Result<Vec<MotionEvent>> {
        let mut times = self.0.clone();
        times.sort_by(f64::total_cmp);
        times.truncate(request.max_events);
        Ok(times.into_iter().map(|t_s| MotionEvent { t_s }).collect())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// A WAV file placed at a timeline position, optionally on a given track.
#[derive(Debug, Clone)]
struct Placement {
    path: PathBuf,
    start_s: f64,
    track: Option<usize>,
}

/// Parses `PATH@START[@TRACK]`.
fn parse_placement(raw: &str) -> Result<Placement, String> {
    let mut parts = raw.split('@');
    let path = parts.next().filter(|p| !p.is_empty()).ok_or("missing path")?;
    let start_s = match parts.next() {
        Some(start) => start
            .parse::<f64>()
            .map_err(|err| format!("invalid start `{start}`: {err}"))?,
        None => 0.0,
    };
    let track = parts
        .next()
        .map(|t| t.parse::<usize>().map_err(|err| format!("invalid track `{t}`: {err}")))
        .transpose()?;
    if parts.next().is_some() {
        return Err(format!("expected PATH@START[@TRACK], got `{raw}`"));
    }
    Ok(Placement {
        path: PathBuf::from(path),
        start_s,
        track,
    })
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-track foley timeline engine", long_about = None)]
struct Cli {
    /// Optional JSON engine configuration.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Place WAV files on tracks and render a mixdown or per-track stems.
    Render {
        /// Clip placement as PATH@START[@TRACK]; repeatable.
        #[arg(long = "clip", required = true, value_parser = parse_placement)]
        clips: Vec<Placement>,
        /// Directory receiving the rendered files.
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
        /// Render one file per track instead of a mixdown.
        #[arg(long)]
        stems: bool,
        /// Skip peak normalization.
        #[arg(long)]
        no_normalize: bool,
    },
    /// Print the transient times detected in a WAV file.
    Transients {
        input: PathBuf,
        #[arg(short, long, default_value_t = 12)]
        max_events: usize,
    },
    /// Align a WAV clip to motion event times and print the result.
    Sync {
        /// WAV file used as the clip.
        #[arg(long)]
        clip: PathBuf,
        /// Timeline start of the clip in seconds.
        #[arg(long, default_value_t = 0.0)]
        start: f64,
        /// Motion event times relative to the clip start.
        #[arg(long, value_delimiter = ',', required = true)]
        events: Vec<f64>,
        #[arg(long, value_enum, default_value_t = StrategyArg::WholeClip)]
        strategy: StrategyArg,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    WholeClip,
    Segmented,
    TimeAdjust,
}

impl From<StrategyArg> for SyncStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::WholeClip => SyncStrategy::WholeClip,
            StrategyArg::Segmented => SyncStrategy::Segmented,
            StrategyArg::TimeAdjust => SyncStrategy::TimeAdjust,
        }
    }
}
