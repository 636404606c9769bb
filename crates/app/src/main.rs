use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use lightshow_core::{
    generate, AnalysisRecord, CueExtractor, EffectSelector, FixtureCatalog, GenerationConfig,
    SceneTable, TimelineWriter,
};
use tracing_subscriber::EnvFilter;

fn main() -> lightshow_core::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Generate {
            analysis,
            output,
            fixtures,
            config,
            report,
            audio,
        } => run_generate(
            &analysis,
            &output,
            fixtures.as_deref(),
            config.as_deref(),
            report.as_deref(),
            audio.as_deref(),
        ),
        Commands::Cues { analysis, config } => run_cues(&analysis, config.as_deref()),
        Commands::Check {
            analysis,
            fixtures,
            config,
        } => run_check(&analysis, fixtures.as_deref(), config.as_deref()),
    }
}

fn load_catalog(path: Option<&Path>) -> lightshow_core::Result<FixtureCatalog> {
    match path {
        Some(path) => FixtureCatalog::from_path(path),
        None => Ok(FixtureCatalog::sauna()),
    }
}

fn load_config(path: Option<&Path>) -> lightshow_core::Result<GenerationConfig> {
    match path {
        Some(path) => GenerationConfig::from_path(path),
        None => Ok(GenerationConfig::default()),
    }
}

fn run_generate(
    analysis: &Path,
    output: &Path,
    fixtures: Option<&Path>,
    config: Option<&Path>,
    report: Option<&Path>,
    audio: Option<&str>,
) -> lightshow_core::Result<()> {
    tracing::info!(?analysis, ?output, "generating timeline");

    let record = AnalysisRecord::from_path(analysis)?;
    let catalog = load_catalog(fixtures)?;
    let config = load_config(config)?;

    let generation = generate(&record, &catalog, &config)?;
    for tally in &generation.report.tallies {
        tracing::debug!(
            group = %tally.fixture_group_id,
            cue = %tally.cue,
            count = tally.count,
            "suppressed candidates"
        );
    }

    let scenes = SceneTable::sauna();
    let audio = audio.or(record.audio_file.as_deref());
    TimelineWriter::new(&scenes, &config.output).write_to_path(
        &generation.timeline,
        audio,
        output,
    )?;

    if let Some(path) = report {
        let json = serde_json::to_string_pretty(&generation.report)?;
        std::fs::write(path, json)?;
    }

    tracing::info!(
        events = generation.timeline.event_count(),
        inserted = generation.report.inserted,
        suppressed = generation.report.suppressed,
        "generation finished"
    );
    Ok(())
}

fn run_cues(analysis: &Path, config: Option<&Path>) -> lightshow_core::Result<()> {
    let record = AnalysisRecord::from_path(analysis)?;
    record.validate()?;
    let config = load_config(config)?;

    let cues = CueExtractor::new(&config.cues).extract(&record);
    println!("{}", serde_json::to_string_pretty(&cues)?);
    Ok(())
}

fn run_check(
    analysis: &Path,
    fixtures: Option<&Path>,
    config: Option<&Path>,
) -> lightshow_core::Result<()> {
    let record = AnalysisRecord::from_path(analysis)?;
    record.validate()?;
    let catalog = load_catalog(fixtures)?;
    let config = load_config(config)?;
    EffectSelector::for_record(&config, &catalog, &record)?;

    tracing::info!(
        beats = record.beats.len(),
        sections = record.sections.len(),
        groups = catalog.groups().len(),
        tracks = catalog.track_count(),
        "inputs are valid"
    );
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Music-driven lighting timeline generator", long_about = None)]
struct Cli {
    /// Log individual scheduling decisions.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a lighting timeline from an analysis record.
    Generate {
        /// Analysis record produced by the feature extractor (JSON).
        analysis: PathBuf,
        /// Where to write the `.tml` timeline.
        #[arg(short, long)]
        output: PathBuf,
        /// Fixture catalog (JSON). Defaults to the built-in sauna installation.
        #[arg(short, long)]
        fixtures: Option<PathBuf>,
        /// Generation settings (JSON); unspecified fields keep their defaults.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Optional JSON dump of the scheduling report.
        #[arg(short, long)]
        report: Option<PathBuf>,
        /// Audio file referenced by the media track, overriding the record.
        #[arg(long)]
        audio: Option<String>,
    },
    /// Print the cues extracted from an analysis record as JSON.
    Cues {
        analysis: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate an analysis record against a fixture catalog and settings.
    Check {
        analysis: PathBuf,
        #[arg(short, long)]
        fixtures: Option<PathBuf>,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
