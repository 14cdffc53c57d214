//! nmr-process: replay, filter and annotate the spectra of a stored document.

use clap::Parser;
use std::path::PathBuf;

use nmr_processing::analysis::peaks::auto_peak_picking;
use nmr_processing::analysis::ranges::auto_ranges_detection;
use nmr_processing::analysis::zones::auto_zones_detection;
use nmr_processing::config::ProcessingConfig;
use nmr_processing::data::document::{NmrDocument, SpectrumDocument};
use nmr_processing::data::model::Peaks;
use nmr_processing::log::reproducibility::ReproLog;
use nmr_processing::pipeline::filters::FilterOptions;
use nmr_processing::pipeline::history::FilterPipeline;
use nmr_processing::pipeline::jobs::JobTracker;

#[derive(Parser)]
#[command(
    name = "nmr-process",
    version,
    about = "Process NMR spectra: filters, peak picking, ranges and zones"
)]
struct Cli {
    /// Input document (JSON, any version)
    #[arg(short, long)]
    r#in: PathBuf,

    /// Output document; nothing is written when omitted
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Processing configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Filters to apply to every 1D spectrum (JSON array of filters)
    #[arg(short, long)]
    filters: Option<PathBuf>,

    /// Pick peaks on 1D spectra
    #[arg(long, default_value_t = false)]
    peaks: bool,

    /// Detect ranges on 1D spectra
    #[arg(long, default_value_t = false)]
    auto_ranges: bool,

    /// Detect zones on 2D spectra
    #[arg(long, default_value_t = false)]
    auto_zones: bool,

    /// Write the reproducibility log as text
    #[arg(long)]
    log: Option<PathBuf>,

    /// Write the reproducibility log as JSON
    #[arg(long)]
    log_json: Option<PathBuf>,

    /// Write an NMRPipe shell script replaying the filters
    #[arg(long)]
    script: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    log::info!("nmr-process v{}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => ProcessingConfig::load(path)?,
        None => ProcessingConfig::default(),
    };
    let extra_filters: Vec<FilterOptions> = match &cli.filters {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => Vec::new(),
    };

    let mut doc = NmrDocument::load(&cli.r#in)?;
    let mut repro = ReproLog::new();
    repro.set_source(&cli.r#in.display().to_string());

    // Stored filter chains are replayed in parallel, one worker per spectrum
    let tracker = JobTracker::new();
    let mut jobs = Vec::new();
    for spectrum in &doc.spectra {
        if let SpectrumDocument::OneD(s) = spectrum {
            let raw = s.raw_buffer()?;
            let (ticket, handle) = tracker.spawn_replay(&s.id, raw.clone(), s.filters.clone());
            jobs.push((s.id.clone(), raw, ticket, handle));
        }
    }
    let mut pipelines = Vec::new();
    for (id, raw, ticket, handle) in jobs {
        let buffer = handle
            .join()
            .map_err(|_| format!("replay worker for {} panicked", id))??;
        let entries = doc
            .spectra
            .iter()
            .find_map(|s| match s {
                SpectrumDocument::OneD(s) if s.id == id => Some(s.filters.clone()),
                _ => None,
            })
            .unwrap_or_default();
        let mut pipeline = FilterPipeline::new(&id, raw);
        if !entries.is_empty() {
            pipeline.accept_replay(&ticket, entries, buffer, &mut repro)?;
        }
        pipelines.push(pipeline);
    }

    for spectrum in &mut doc.spectra {
        match spectrum {
            SpectrumDocument::OneD(s) => {
                let Some(pipeline) = pipelines.iter_mut().find(|p| p.spectrum_id() == s.id) else {
                    continue;
                };
                for options in &extra_filters {
                    if let Err(e) = pipeline.apply(options.clone(), &mut repro) {
                        log::warn!("{}: {} skipped: {}", s.id, options.kind(), e);
                        repro.add_warning(options.kind().name(), &format!("{}: {}", s.id, e));
                    }
                }
                s.filters = pipeline.entries().to_vec();

                if cli.peaks {
                    s.peaks = Peaks {
                        values: auto_peak_picking(pipeline.current(), &config.peak_picking),
                    };
                    repro.add_spectrum_entry(
                        &s.id,
                        "peakPicking",
                        &format!("{} peaks", s.peaks.values.len()),
                        "",
                    );
                }
                if cli.auto_ranges {
                    match auto_ranges_detection(pipeline.current(), &config.ranges, &mut repro) {
                        Ok(ranges) => {
                            s.ranges.values = ranges;
                            s.ranges.update_integrations();
                        }
                        Err(e) => log::warn!("{}: range detection skipped: {}", s.id, e),
                    }
                }
                log::info!(
                    "{}: {} filters, {} peaks, {} ranges",
                    s.id,
                    s.filters.len(),
                    s.peaks.values.len(),
                    s.ranges.values.len()
                );
            }
            SpectrumDocument::TwoD(s) => {
                if !cli.auto_zones {
                    continue;
                }
                let zones = auto_zones_detection(&s.spectrum()?, &config.zones)?;
                repro.add_spectrum_entry(&s.id, "autoZonesDetection", &format!("{} zones", zones.len()), "");
                s.zones.values = zones;
            }
        }
    }

    if let Some(path) = &cli.out {
        doc.save(path)?;
    }
    if let Some(path) = &cli.log {
        repro.save_text(path)?;
    }
    if let Some(path) = &cli.log_json {
        repro.save_json(path)?;
    }
    if let Some(path) = &cli.script {
        repro.save_script(path)?;
    }
    log::info!(
        "Done: {} operations, {} warnings",
        repro.len(),
        repro.warnings().count()
    );
    Ok(())
}
