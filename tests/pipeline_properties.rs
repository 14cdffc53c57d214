//! End-to-end checks of the processing invariants across modules.

use nmr_processing::analysis::ranges::{create_range, cut_range, RangeDetectionOptions};
use nmr_processing::assignment::{ActivationMode, AssignmentState, Axis};
use nmr_processing::data::migration::migrate;
use nmr_processing::data::spectrum::{SpectrumBuffer, SpectrumInfo};
use nmr_processing::log::reproducibility::ReproLog;
use nmr_processing::pipeline::error::ProcessingError;
use nmr_processing::pipeline::filters::{apply_filter, FilterKind, FilterOptions, PhaseParams};
use nmr_processing::pipeline::history::{replay, ApplyOutcome, FilterEntry, FilterPipeline};
use nmr_processing::pipeline::processing::WindowFunction;
use serde_json::json;

fn fid(n: usize, digital_filter: f64) -> SpectrumBuffer {
    let dwell = 1.0 / 4000.0;
    let x: Vec<f64> = (0..n).map(|i| i as f64 * dwell).collect();
    let w = 2.0 * std::f64::consts::PI * 300.0;
    let re = x.iter().map(|&t| (-t * 15.0).exp() * (w * t).cos()).collect();
    let im = x.iter().map(|&t| (-t * 15.0).exp() * (w * t).sin()).collect();
    let info = SpectrumInfo {
        digital_filter,
        ..SpectrumInfo::default()
    };
    SpectrumBuffer::new(x, re, im, info).unwrap()
}

/// Real, non-negative spectrum on an ascending ppm axis with two lines
fn real_spectrum() -> SpectrumBuffer {
    let x: Vec<f64> = (0..1001).map(|i| i as f64 * 0.01).collect();
    let line = |x: f64, c: f64| 1.0 / (1.0 + ((x - c) / 0.02).powi(2));
    let re = x.iter().map(|&v| line(v, 3.0) + 0.5 * line(v, 7.0)).collect();
    let info = SpectrumInfo {
        is_complex: false,
        is_fid: false,
        ..SpectrumInfo::default()
    };
    SpectrumBuffer::new(x, re, vec![], info).unwrap()
}

#[test]
fn replay_matches_sequential_application() {
    let raw = fid(300, 0.0);
    let chain = vec![
        FilterOptions::Apodization(WindowFunction::Exponential { lb_hz: 2.0 }),
        FilterOptions::ZeroFilling { nb_points: 512 },
        FilterOptions::Fft,
        FilterOptions::PhaseCorrection(PhaseParams { ph0: 30.0, ph1: -10.0 }),
        FilterOptions::ShiftX { shift: 0.1 },
    ];

    let mut sequential = raw.clone();
    for options in &chain {
        sequential = apply_filter(&sequential, options).unwrap();
    }
    let entries: Vec<FilterEntry> = chain.into_iter().map(FilterEntry::new).collect();
    let replayed = replay(&raw, &entries).unwrap();

    assert_eq!(replayed.x, sequential.x);
    assert_eq!(replayed.re, sequential.re);
    assert_eq!(replayed.im, sequential.im);
    assert!(!replayed.info.is_fid);
}

#[test]
fn fft_reapplied_through_pipeline_is_not_additive() {
    let raw = fid(256, 0.0);
    let single = apply_filter(&raw, &FilterOptions::Fft).unwrap();

    let mut log = ReproLog::new();
    let mut pipeline = FilterPipeline::new("p", raw);
    assert_eq!(pipeline.apply(FilterOptions::Fft, &mut log).unwrap(), ApplyOutcome::Appended);
    assert!(!pipeline.current().info.is_fid);
    assert_eq!(pipeline.apply(FilterOptions::Fft, &mut log).unwrap(), ApplyOutcome::Merged);

    assert_eq!(pipeline.current(), &single);
    let ffts = pipeline
        .entries()
        .iter()
        .filter(|e| e.kind() == FilterKind::Fft)
        .count();
    assert_eq!(ffts, 1);
}

#[test]
fn zero_filling_keeps_group_delay_tail() {
    let raw = fid(100, 12.7);
    let out = apply_filter(&raw, &FilterOptions::ZeroFilling { nb_points: 256 }).unwrap();
    let (l, n, g) = (100, 256, 12);

    assert_eq!(out.len(), n);
    assert_eq!(out.x.len(), n);
    assert_eq!(&out.re[n - g..], &raw.re[l - g..]);
    assert_eq!(&out.im[n - g..], &raw.im[l - g..]);
    assert_eq!(&out.re[..l - g], &raw.re[..l - g]);
    assert!(out.re[l - g..n - g].iter().all(|&v| v == 0.0));
}

#[test]
fn range_integration_grows_with_width() {
    let buffer = real_spectrum();
    let options = RangeDetectionOptions::default();
    let mut log = ReproLog::new();

    let mut previous = 0.0;
    for half_width in [0.05, 0.1, 0.5, 1.0, 2.5, 4.5] {
        let range = create_range(&buffer, 5.0 - half_width, 5.0 + half_width, &options, &mut log).unwrap();
        assert!(
            range.absolute >= previous,
            "width {}: {} < {}",
            2.0 * half_width,
            range.absolute,
            previous
        );
        previous = range.absolute;
    }
}

#[test]
fn cut_range_yields_two_adjacent_pieces() {
    let buffer = real_spectrum();
    let options = RangeDetectionOptions::default();
    let mut log = ReproLog::new();
    let whole = create_range(&buffer, 2.0, 8.0, &options, &mut log).unwrap();
    let outside = create_range(&buffer, 8.5, 9.5, &options, &mut log).unwrap();

    let cuts = cut_range(&buffer, &[whole.clone(), outside], 5.0, &options, &mut log).unwrap();
    assert_eq!(cuts.len(), 1);
    let pieces = &cuts[&whole.id];
    assert_eq!(pieces.len(), 2);
    assert_eq!(pieces[0].from, whole.from);
    assert_eq!(pieces[0].to, 5.0);
    assert_eq!(pieces[1].from, 5.0);
    assert_eq!(pieces[1].to, whole.to);
}

#[test]
fn activating_twice_clears_in_both_modes() {
    for mode in [ActivationMode::ToggleAny, ActivationMode::ToggleSameId] {
        let mut state = AssignmentState::new(mode);
        assert!(state.activate("r1", Axis::X).is_some());
        assert!(state.activate("r1", Axis::X).is_none());
        assert!(state.activated().is_none());
    }
}

#[test]
fn legacy_document_migrates_once() {
    let legacy = json!({
        "spectra": [{ "ranges": { "values": [{ "signal": [{ "j": [{ "coupling": 7 }] }] }] } }]
    });
    let migrated = migrate(legacy);
    assert_eq!(
        migrated["spectra"],
        json!([{ "ranges": { "values": [{ "signals": [{ "js": [{ "coupling": 7 }] }] }] } }])
    );
    assert_eq!(migrate(migrated.clone()), migrated);
}

#[test]
fn fft_on_spectrum_is_rejected_without_mutation() {
    let spectrum = apply_filter(&fid(128, 0.0), &FilterOptions::Fft).unwrap();
    let before = spectrum.clone();

    let err = apply_filter(&spectrum, &FilterOptions::Fft).unwrap_err();
    assert!(matches!(
        err,
        ProcessingError::InapplicableFilter { filter: FilterKind::Fft, .. }
    ));
    assert_eq!(spectrum, before);

    let mut log = ReproLog::new();
    let mut pipeline = FilterPipeline::new("done", spectrum);
    assert!(pipeline.apply(FilterOptions::Fft, &mut log).is_err());
    assert_eq!(pipeline.current(), &before);
    assert!(pipeline.entries().is_empty());
    assert!(log.is_empty());
}
