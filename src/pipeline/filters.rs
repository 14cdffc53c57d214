/// Filter catalog
///
/// Every filter is a closed `FilterKind` with one row in the dispatch table
/// (`FilterKind::spec`): an applicability gate on the spectrum flags, a pure
/// apply function, and a reduce rule used when the same filter is applied
/// twice in one chain.

use serde::{Deserialize, Serialize};

use crate::data::spectrum::{SpectrumBuffer, SpectrumInfo};
use super::error::ProcessingError;
use super::processing::{self, WindowFunction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterKind {
    Fft,
    DigitalFilter,
    PhaseCorrection,
    AutoPhaseCorrection,
    BaselineCorrection,
    Apodization,
    ZeroFilling,
    FromTo,
    ShiftX,
    Absolute,
    CenterMean,
    Pareto,
    StandardDeviation,
}

impl FilterKind {
    pub fn all() -> &'static [FilterKind] {
        &[
            FilterKind::Fft,
            FilterKind::DigitalFilter,
            FilterKind::PhaseCorrection,
            FilterKind::AutoPhaseCorrection,
            FilterKind::BaselineCorrection,
            FilterKind::Apodization,
            FilterKind::ZeroFilling,
            FilterKind::FromTo,
            FilterKind::ShiftX,
            FilterKind::Absolute,
            FilterKind::CenterMean,
            FilterKind::Pareto,
            FilterKind::StandardDeviation,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            FilterKind::Fft => "fft",
            FilterKind::DigitalFilter => "digitalFilter",
            FilterKind::PhaseCorrection => "phaseCorrection",
            FilterKind::AutoPhaseCorrection => "autoPhaseCorrection",
            FilterKind::BaselineCorrection => "baselineCorrection",
            FilterKind::Apodization => "apodization",
            FilterKind::ZeroFilling => "zeroFilling",
            FilterKind::FromTo => "fromTo",
            FilterKind::ShiftX => "shiftX",
            FilterKind::Absolute => "absolute",
            FilterKind::CenterMean => "centerMean",
            FilterKind::Pareto => "pareto",
            FilterKind::StandardDeviation => "standardDeviation",
        }
    }

    /// Dispatch table row for this filter
    pub fn spec(&self) -> &'static FilterSpec {
        match self {
            FilterKind::Fft => &FFT,
            FilterKind::DigitalFilter => &DIGITAL_FILTER,
            FilterKind::PhaseCorrection => &PHASE_CORRECTION,
            FilterKind::AutoPhaseCorrection => &AUTO_PHASE_CORRECTION,
            FilterKind::BaselineCorrection => &BASELINE_CORRECTION,
            FilterKind::Apodization => &APODIZATION,
            FilterKind::ZeroFilling => &ZERO_FILLING,
            FilterKind::FromTo => &FROM_TO,
            FilterKind::ShiftX => &SHIFT_X,
            FilterKind::Absolute => &ABSOLUTE,
            FilterKind::CenterMean => &CENTER_MEAN,
            FilterKind::Pareto => &PARETO,
            FilterKind::StandardDeviation => &STANDARD_DEVIATION,
        }
    }
}

impl std::fmt::Display for FilterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PhaseParams {
    pub ph0: f64,
    pub ph1: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineOptions {
    /// `airpls`, `polynomial` or `linear`
    pub algorithm: String,
    #[serde(default = "default_lambda")]
    pub lambda: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_degree")]
    pub degree: usize,
}

fn default_lambda() -> f64 {
    100.0
}
fn default_max_iterations() -> usize {
    100
}
fn default_tolerance() -> f64 {
    0.001
}
fn default_degree() -> usize {
    3
}

impl Default for BaselineOptions {
    fn default() -> Self {
        Self {
            algorithm: "airpls".to_string(),
            lambda: default_lambda(),
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            degree: default_degree(),
        }
    }
}

/// Parameters of one filter application; the variant names the filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "value", rename_all = "camelCase")]
pub enum FilterOptions {
    Fft,
    DigitalFilter,
    PhaseCorrection(PhaseParams),
    /// Unresolved until the pipeline estimates concrete angles
    AutoPhaseCorrection(Option<PhaseParams>),
    BaselineCorrection(BaselineOptions),
    Apodization(WindowFunction),
    #[serde(rename_all = "camelCase")]
    ZeroFilling { nb_points: usize },
    FromTo { from: f64, to: f64 },
    ShiftX { shift: f64 },
    Absolute,
    CenterMean,
    Pareto,
    StandardDeviation,
}

impl FilterOptions {
    pub fn kind(&self) -> FilterKind {
        match self {
            FilterOptions::Fft => FilterKind::Fft,
            FilterOptions::DigitalFilter => FilterKind::DigitalFilter,
            FilterOptions::PhaseCorrection(_) => FilterKind::PhaseCorrection,
            FilterOptions::AutoPhaseCorrection(_) => FilterKind::AutoPhaseCorrection,
            FilterOptions::BaselineCorrection(_) => FilterKind::BaselineCorrection,
            FilterOptions::Apodization(_) => FilterKind::Apodization,
            FilterOptions::ZeroFilling { .. } => FilterKind::ZeroFilling,
            FilterOptions::FromTo { .. } => FilterKind::FromTo,
            FilterOptions::ShiftX { .. } => FilterKind::ShiftX,
            FilterOptions::Absolute => FilterKind::Absolute,
            FilterOptions::CenterMean => FilterKind::CenterMean,
            FilterOptions::Pareto => FilterKind::Pareto,
            FilterOptions::StandardDeviation => FilterKind::StandardDeviation,
        }
    }

    /// Phase angles carried by a (resolved) phase filter
    pub fn phase(&self) -> Option<PhaseParams> {
        match self {
            FilterOptions::PhaseCorrection(p) => Some(*p),
            FilterOptions::AutoPhaseCorrection(p) => *p,
            _ => None,
        }
    }

    /// Human-readable summary for logs and history panels
    pub fn describe(&self) -> String {
        match self {
            FilterOptions::Fft => "Fourier Transform".to_string(),
            FilterOptions::DigitalFilter => "Digital filter group delay removed".to_string(),
            FilterOptions::PhaseCorrection(p) | FilterOptions::AutoPhaseCorrection(Some(p)) => {
                format!("PH0={:.2}°, PH1={:.2}°", p.ph0, p.ph1)
            }
            FilterOptions::AutoPhaseCorrection(None) => "Automatic phase correction".to_string(),
            FilterOptions::BaselineCorrection(b) => format!("Baseline correction ({})", b.algorithm),
            FilterOptions::Apodization(w) => format!("Apodization: {}", w),
            FilterOptions::ZeroFilling { nb_points } => format!("Zero fill → {} points", nb_points),
            FilterOptions::FromTo { from, to } => format!("Keep {:.4} .. {:.4}", from, to),
            FilterOptions::ShiftX { shift } => format!("Shift x by {:.4}", shift),
            FilterOptions::Absolute => "Magnitude spectrum".to_string(),
            FilterOptions::CenterMean => "Center on mean".to_string(),
            FilterOptions::Pareto => "Pareto scaling".to_string(),
            FilterOptions::StandardDeviation => "Unit variance scaling".to_string(),
        }
    }

    /// Equivalent NMRPipe command, empty where NMRPipe has none
    pub fn nmrpipe_command(&self) -> String {
        match self {
            FilterOptions::Fft => "nmrPipe -fn FT -auto".to_string(),
            FilterOptions::PhaseCorrection(p) | FilterOptions::AutoPhaseCorrection(Some(p)) => {
                format!("nmrPipe -fn PS -p0 {:.2} -p1 {:.2} -di", p.ph0, p.ph1)
            }
            FilterOptions::AutoPhaseCorrection(None) => "nmrPipe -fn PS -auto".to_string(),
            FilterOptions::BaselineCorrection(_) => "nmrPipe -fn POLY -auto".to_string(),
            FilterOptions::Apodization(w) => w.nmrpipe_command(),
            FilterOptions::ZeroFilling { nb_points } => format!("nmrPipe -fn ZF -size {}", nb_points),
            FilterOptions::FromTo { from, to } => {
                format!("nmrPipe -fn EXT -x1 {:.4}ppm -xn {:.4}ppm -sw", from.max(*to), from.min(*to))
            }
            FilterOptions::Absolute => "nmrPipe -fn MC".to_string(),
            _ => String::new(),
        }
    }
}

/// Outcome of reducing two applications of the same filter
#[derive(Debug, Clone, PartialEq)]
pub struct Reduction {
    /// At most one effective application per chain
    pub once: bool,
    /// Merged value for once-filters; None marks a redundant repeat
    pub reduce: Option<FilterOptions>,
}

pub type ApplyFn = fn(&SpectrumBuffer, &FilterOptions) -> Result<SpectrumBuffer, ProcessingError>;
pub type ApplicableFn = fn(&SpectrumInfo) -> Result<(), String>;
pub type ReduceFn = fn(&FilterOptions, &FilterOptions) -> Reduction;

pub struct FilterSpec {
    pub kind: FilterKind,
    pub is_applicable: ApplicableFn,
    pub apply: ApplyFn,
    pub reduce: ReduceFn,
}

impl FilterSpec {
    pub fn check(&self, info: &SpectrumInfo) -> Result<(), ProcessingError> {
        (self.is_applicable)(info).map_err(|reason| ProcessingError::InapplicableFilter {
            filter: self.kind,
            reason,
        })
    }
}

/// Apply one filter to a buffer, returning a new buffer.
///
/// The precondition is checked first; on any error the input is untouched.
pub fn apply_filter(buffer: &SpectrumBuffer, options: &FilterOptions) -> Result<SpectrumBuffer, ProcessingError> {
    let spec = options.kind().spec();
    spec.check(&buffer.info)?;
    let result = (spec.apply)(buffer, options)?;
    log::debug!("{} applied ({} → {} points)", spec.kind, buffer.len(), result.len());
    Ok(result)
}

/// Reduce two applications of the same filter kind
pub fn reduce(previous: &FilterOptions, next: &FilterOptions) -> Reduction {
    (next.kind().spec().reduce)(previous, next)
}

/// Replace an unresolved auto-phase request with the angles estimated on `buffer`
pub fn resolve(buffer: &SpectrumBuffer, options: &FilterOptions) -> Result<FilterOptions, ProcessingError> {
    match options {
        FilterOptions::AutoPhaseCorrection(None) => {
            AUTO_PHASE_CORRECTION.check(&buffer.info)?;
            let (ph0, ph1) = processing::estimate_phase(&buffer.re, &buffer.im);
            log::info!("Auto phase estimate: PH0={:.1}°, PH1={:.1}°", ph0, ph1);
            Ok(FilterOptions::PhaseCorrection(PhaseParams { ph0, ph1 }))
        }
        other => Ok(other.clone()),
    }
}

// =========================================================================
//  Applicability gates
// =========================================================================

fn always(_: &SpectrumInfo) -> Result<(), String> {
    Ok(())
}

fn complex_fid(info: &SpectrumInfo) -> Result<(), String> {
    if !info.is_complex {
        Err("spectrum is not complex".to_string())
    } else if !info.is_fid {
        Err("spectrum is not an FID".to_string())
    } else {
        Ok(())
    }
}

fn complex_ft(info: &SpectrumInfo) -> Result<(), String> {
    if !info.is_complex {
        Err("spectrum is not complex".to_string())
    } else if info.is_fid {
        Err("spectrum is still an FID".to_string())
    } else {
        Ok(())
    }
}

fn frequency_domain(info: &SpectrumInfo) -> Result<(), String> {
    if info.is_fid {
        Err("spectrum is still an FID".to_string())
    } else {
        Ok(())
    }
}

// =========================================================================
//  Reduce rules
// =========================================================================

fn replace(_: &FilterOptions, next: &FilterOptions) -> Reduction {
    Reduction {
        once: true,
        reduce: Some(next.clone()),
    }
}

fn sum_phase(previous: &FilterOptions, next: &FilterOptions) -> Reduction {
    let a = previous.phase().unwrap_or_default();
    let b = next.phase().unwrap_or_default();
    Reduction {
        once: true,
        reduce: Some(FilterOptions::PhaseCorrection(PhaseParams {
            ph0: a.ph0 + b.ph0,
            ph1: a.ph1 + b.ph1,
        })),
    }
}

fn sum_shift(previous: &FilterOptions, next: &FilterOptions) -> Reduction {
    let shift_of = |o: &FilterOptions| match o {
        FilterOptions::ShiftX { shift } => *shift,
        _ => 0.0,
    };
    Reduction {
        once: true,
        reduce: Some(FilterOptions::ShiftX {
            shift: shift_of(previous) + shift_of(next),
        }),
    }
}

fn marker(_: &FilterOptions, _: &FilterOptions) -> Reduction {
    Reduction {
        once: false,
        reduce: None,
    }
}

// =========================================================================
//  Apply functions
// =========================================================================

fn mismatch(expected: FilterKind, options: &FilterOptions) -> ProcessingError {
    ProcessingError::OptionsMismatch {
        expected,
        found: options.kind(),
    }
}

fn apply_fft(buffer: &SpectrumBuffer, options: &FilterOptions) -> Result<SpectrumBuffer, ProcessingError> {
    if !matches!(options, FilterOptions::Fft) {
        return Err(mismatch(FilterKind::Fft, options));
    }
    let n = buffer.len();
    let dwell = buffer.x_step().unwrap_or(1.0 / n.max(1) as f64);

    let size = processing::next_power_of_two(n);
    let (_, re, im) = processing::zero_fill(&buffer.x, &buffer.re, &buffer.im, size, 0);
    let (mut re, mut im) = processing::fourier_transform(&re, &im);

    // Remaining group delay shows up as a linear phase across the spectrum
    let g = buffer.info.digital_filter.max(0.0);
    let delay = if buffer.info.digital_filter_applied { g - g.floor() } else { g };
    if delay > 0.0 {
        let corrected = processing::phase_rotate(&re, &im, -180.0 * delay, 360.0 * delay);
        re = corrected.0;
        im = corrected.1;
    }

    if buffer.info.origin_frequency <= 0.0 {
        log::warn!("No spectrometer frequency, frequency axis left in Hz");
    }
    let x = processing::frequency_axis(
        size,
        dwell,
        buffer.info.origin_frequency,
        buffer.info.frequency_offset,
    );

    let mut info = buffer.info.clone();
    info.is_fid = false;
    Ok(SpectrumBuffer { x, re, im, info })
}

fn apply_digital_filter(buffer: &SpectrumBuffer, options: &FilterOptions) -> Result<SpectrumBuffer, ProcessingError> {
    if !matches!(options, FilterOptions::DigitalFilter) {
        return Err(mismatch(FilterKind::DigitalFilter, options));
    }
    let points = buffer.info.digital_filter.max(0.0).floor() as usize;
    let (re, im) = processing::rotate_left(&buffer.re, &buffer.im, points);
    let mut info = buffer.info.clone();
    info.digital_filter_applied = true;
    Ok(SpectrumBuffer {
        x: buffer.x.clone(),
        re,
        im,
        info,
    })
}

fn apply_phase(buffer: &SpectrumBuffer, options: &FilterOptions) -> Result<SpectrumBuffer, ProcessingError> {
    let params = match options {
        FilterOptions::PhaseCorrection(p) => *p,
        FilterOptions::AutoPhaseCorrection(Some(p)) => *p,
        FilterOptions::AutoPhaseCorrection(None) => {
            let (ph0, ph1) = processing::estimate_phase(&buffer.re, &buffer.im);
            PhaseParams { ph0, ph1 }
        }
        other => return Err(mismatch(FilterKind::PhaseCorrection, other)),
    };
    let (re, im) = processing::phase_rotate(&buffer.re, &buffer.im, params.ph0, params.ph1);
    Ok(SpectrumBuffer {
        x: buffer.x.clone(),
        re,
        im,
        info: buffer.info.clone(),
    })
}

fn apply_baseline(buffer: &SpectrumBuffer, options: &FilterOptions) -> Result<SpectrumBuffer, ProcessingError> {
    let FilterOptions::BaselineCorrection(opts) = options else {
        return Err(mismatch(FilterKind::BaselineCorrection, options));
    };
    let baseline = match opts.algorithm.to_ascii_lowercase().as_str() {
        "airpls" => processing::airpls_baseline(&buffer.re, opts.lambda, opts.max_iterations, opts.tolerance),
        "polynomial" => processing::polynomial_baseline(&buffer.x, &buffer.re, opts.degree, opts.max_iterations.min(50)),
        "linear" => processing::linear_baseline(&buffer.re),
        _ => {
            return Err(ProcessingError::UnknownAlgorithm {
                filter: FilterKind::BaselineCorrection,
                algorithm: opts.algorithm.clone(),
            })
        }
    };
    let re = buffer.re.iter().zip(&baseline).map(|(v, b)| v - b).collect();
    Ok(SpectrumBuffer {
        x: buffer.x.clone(),
        re,
        im: buffer.im.clone(),
        info: buffer.info.clone(),
    })
}

fn apply_apodization(buffer: &SpectrumBuffer, options: &FilterOptions) -> Result<SpectrumBuffer, ProcessingError> {
    let FilterOptions::Apodization(window) = options else {
        return Err(mismatch(FilterKind::Apodization, options));
    };
    let dwell = buffer.x_step().map(f64::abs).unwrap_or(1.0 / buffer.len().max(1) as f64);
    let (re, im) = processing::apodize(&buffer.re, &buffer.im, dwell, window);
    Ok(SpectrumBuffer {
        x: buffer.x.clone(),
        re,
        im,
        info: buffer.info.clone(),
    })
}

fn apply_zero_filling(buffer: &SpectrumBuffer, options: &FilterOptions) -> Result<SpectrumBuffer, ProcessingError> {
    let FilterOptions::ZeroFilling { nb_points } = options else {
        return Err(mismatch(FilterKind::ZeroFilling, options));
    };
    let shift = buffer.info.digital_filter.max(0.0).floor() as usize;
    let (x, re, im) = processing::zero_fill(&buffer.x, &buffer.re, &buffer.im, *nb_points, shift);
    Ok(SpectrumBuffer {
        x,
        re,
        im,
        info: buffer.info.clone(),
    })
}

fn apply_from_to(buffer: &SpectrumBuffer, options: &FilterOptions) -> Result<SpectrumBuffer, ProcessingError> {
    let FilterOptions::FromTo { from, to } = options else {
        return Err(mismatch(FilterKind::FromTo, options));
    };
    if buffer.is_empty() {
        return Ok(buffer.clone());
    }
    let (start, end) = buffer.index_window(*from, *to);
    Ok(SpectrumBuffer {
        x: buffer.x[start..=end].to_vec(),
        re: buffer.re[start..=end].to_vec(),
        im: if buffer.im.is_empty() {
            Vec::new()
        } else {
            buffer.im[start..=end].to_vec()
        },
        info: buffer.info.clone(),
    })
}

fn apply_shift_x(buffer: &SpectrumBuffer, options: &FilterOptions) -> Result<SpectrumBuffer, ProcessingError> {
    let FilterOptions::ShiftX { shift } = options else {
        return Err(mismatch(FilterKind::ShiftX, options));
    };
    Ok(SpectrumBuffer {
        x: buffer.x.iter().map(|v| v + shift).collect(),
        re: buffer.re.clone(),
        im: buffer.im.clone(),
        info: buffer.info.clone(),
    })
}

fn apply_absolute(buffer: &SpectrumBuffer, options: &FilterOptions) -> Result<SpectrumBuffer, ProcessingError> {
    if !matches!(options, FilterOptions::Absolute) {
        return Err(mismatch(FilterKind::Absolute, options));
    }
    let re = buffer
        .re
        .iter()
        .zip(&buffer.im)
        .map(|(r, i)| r.hypot(*i))
        .collect();
    let mut info = buffer.info.clone();
    info.is_complex = false;
    Ok(SpectrumBuffer {
        x: buffer.x.clone(),
        re,
        im: Vec::new(),
        info,
    })
}

/// Shared body of the three scaling filters
fn scale_channels(buffer: &SpectrumBuffer, scale: fn(&[f64]) -> Vec<f64>) -> SpectrumBuffer {
    SpectrumBuffer {
        x: buffer.x.clone(),
        re: scale(&buffer.re),
        im: if buffer.im.is_empty() { Vec::new() } else { scale(&buffer.im) },
        info: buffer.info.clone(),
    }
}

fn center_mean(values: &[f64]) -> Vec<f64> {
    let (mean, _) = processing::mean_std(values);
    values.iter().map(|v| v - mean).collect()
}

fn pareto(values: &[f64]) -> Vec<f64> {
    let (_, std) = processing::mean_std(values);
    if std == 0.0 {
        return values.to_vec();
    }
    let factor = std.sqrt();
    values.iter().map(|v| v / factor).collect()
}

fn unit_variance(values: &[f64]) -> Vec<f64> {
    let (_, std) = processing::mean_std(values);
    if std == 0.0 {
        return values.to_vec();
    }
    values.iter().map(|v| v / std).collect()
}

fn apply_center_mean(buffer: &SpectrumBuffer, options: &FilterOptions) -> Result<SpectrumBuffer, ProcessingError> {
    if !matches!(options, FilterOptions::CenterMean) {
        return Err(mismatch(FilterKind::CenterMean, options));
    }
    Ok(scale_channels(buffer, center_mean))
}

fn apply_pareto(buffer: &SpectrumBuffer, options: &FilterOptions) -> Result<SpectrumBuffer, ProcessingError> {
    if !matches!(options, FilterOptions::Pareto) {
        return Err(mismatch(FilterKind::Pareto, options));
    }
    Ok(scale_channels(buffer, pareto))
}

fn apply_standard_deviation(buffer: &SpectrumBuffer, options: &FilterOptions) -> Result<SpectrumBuffer, ProcessingError> {
    if !matches!(options, FilterOptions::StandardDeviation) {
        return Err(mismatch(FilterKind::StandardDeviation, options));
    }
    Ok(scale_channels(buffer, unit_variance))
}

// =========================================================================
//  Dispatch table
// =========================================================================

static FFT: FilterSpec = FilterSpec {
    kind: FilterKind::Fft,
    is_applicable: complex_fid,
    apply: apply_fft,
    reduce: replace,
};

static DIGITAL_FILTER: FilterSpec = FilterSpec {
    kind: FilterKind::DigitalFilter,
    is_applicable: complex_fid,
    apply: apply_digital_filter,
    reduce: replace,
};

static PHASE_CORRECTION: FilterSpec = FilterSpec {
    kind: FilterKind::PhaseCorrection,
    is_applicable: complex_ft,
    apply: apply_phase,
    reduce: sum_phase,
};

static AUTO_PHASE_CORRECTION: FilterSpec = FilterSpec {
    kind: FilterKind::AutoPhaseCorrection,
    is_applicable: complex_ft,
    apply: apply_phase,
    reduce: sum_phase,
};

static BASELINE_CORRECTION: FilterSpec = FilterSpec {
    kind: FilterKind::BaselineCorrection,
    is_applicable: frequency_domain,
    apply: apply_baseline,
    reduce: replace,
};

static APODIZATION: FilterSpec = FilterSpec {
    kind: FilterKind::Apodization,
    is_applicable: always,
    apply: apply_apodization,
    reduce: replace,
};

static ZERO_FILLING: FilterSpec = FilterSpec {
    kind: FilterKind::ZeroFilling,
    is_applicable: complex_fid,
    apply: apply_zero_filling,
    reduce: replace,
};

static FROM_TO: FilterSpec = FilterSpec {
    kind: FilterKind::FromTo,
    is_applicable: complex_ft,
    apply: apply_from_to,
    reduce: replace,
};

static SHIFT_X: FilterSpec = FilterSpec {
    kind: FilterKind::ShiftX,
    is_applicable: always,
    apply: apply_shift_x,
    reduce: sum_shift,
};

static ABSOLUTE: FilterSpec = FilterSpec {
    kind: FilterKind::Absolute,
    is_applicable: complex_ft,
    apply: apply_absolute,
    reduce: marker,
};

static CENTER_MEAN: FilterSpec = FilterSpec {
    kind: FilterKind::CenterMean,
    is_applicable: complex_ft,
    apply: apply_center_mean,
    reduce: marker,
};

static PARETO: FilterSpec = FilterSpec {
    kind: FilterKind::Pareto,
    is_applicable: complex_ft,
    apply: apply_pareto,
    reduce: marker,
};

static STANDARD_DEVIATION: FilterSpec = FilterSpec {
    kind: FilterKind::StandardDeviation,
    is_applicable: complex_ft,
    apply: apply_standard_deviation,
    reduce: marker,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn fid(n: usize, digital_filter: f64) -> SpectrumBuffer {
        let dwell = 1.0 / 4000.0;
        let x: Vec<f64> = (0..n).map(|i| i as f64 * dwell).collect();
        let re: Vec<f64> = x.iter().map(|t| (2.0 * PI * 500.0 * t).cos() * (-t * 20.0).exp()).collect();
        let im: Vec<f64> = x.iter().map(|t| (2.0 * PI * 500.0 * t).sin() * (-t * 20.0).exp()).collect();
        SpectrumBuffer::new(
            x,
            re,
            im,
            SpectrumInfo {
                digital_filter,
                ..SpectrumInfo::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_dispatch_table_is_consistent() {
        for kind in FilterKind::all() {
            assert_eq!(kind.spec().kind, *kind);
        }
    }

    #[test]
    fn test_fft_on_spectrum_is_inapplicable_and_leaves_buffer() {
        let spectrum = apply_filter(&fid(256, 0.0), &FilterOptions::Fft).unwrap();
        let before = spectrum.clone();
        let err = apply_filter(&spectrum, &FilterOptions::Fft).unwrap_err();
        assert!(matches!(
            err,
            ProcessingError::InapplicableFilter { filter: FilterKind::Fft, .. }
        ));
        assert_eq!(spectrum, before);
    }

    #[test]
    fn test_fft_sets_frequency_domain_and_pads() {
        let out = apply_filter(&fid(200, 0.0), &FilterOptions::Fft).unwrap();
        assert!(!out.info.is_fid);
        assert_eq!(out.len(), 256);
        assert_eq!(out.x.len(), 256);
        // 500 Hz at 400 MHz sits at 1.25 ppm
        let peak = out
            .re
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!((out.x[peak] - 1.25).abs() < 0.05, "peak at {}", out.x[peak]);
    }

    #[test]
    fn test_unknown_baseline_algorithm() {
        let spectrum = apply_filter(&fid(64, 0.0), &FilterOptions::Fft).unwrap();
        let opts = FilterOptions::BaselineCorrection(BaselineOptions {
            algorithm: "whittaker-magic".to_string(),
            ..BaselineOptions::default()
        });
        let err = apply_filter(&spectrum, &opts).unwrap_err();
        assert!(matches!(err, ProcessingError::UnknownAlgorithm { .. }));
    }

    #[test]
    fn test_absolute_clears_imaginary() {
        let spectrum = apply_filter(&fid(64, 0.0), &FilterOptions::Fft).unwrap();
        let abs = apply_filter(&spectrum, &FilterOptions::Absolute).unwrap();
        assert!(!abs.info.is_complex);
        assert!(abs.im.is_empty());
        assert!(abs.re.iter().all(|v| *v >= 0.0));
        assert!(apply_filter(&abs, &FilterOptions::Absolute).is_err());
        assert!(abs.validate().is_ok());
    }

    #[test]
    fn test_zero_filling_requires_fid() {
        let spectrum = apply_filter(&fid(64, 0.0), &FilterOptions::Fft).unwrap();
        assert!(apply_filter(&spectrum, &FilterOptions::ZeroFilling { nb_points: 128 }).is_err());
        let filled = apply_filter(&fid(64, 3.7), &FilterOptions::ZeroFilling { nb_points: 128 }).unwrap();
        assert_eq!(filled.len(), 128);
    }

    #[test]
    fn test_from_to_truncates_to_window() {
        let spectrum = apply_filter(&fid(256, 0.0), &FilterOptions::Fft).unwrap();
        let cut = apply_filter(&spectrum, &FilterOptions::FromTo { from: 0.0, to: 2.0 }).unwrap();
        assert!(cut.len() < spectrum.len());
        assert!(cut.x.first().copied().unwrap() >= -0.05);
        assert!(cut.x.last().copied().unwrap() <= 2.05);
    }

    #[test]
    fn test_scaling_filters_values() {
        let spectrum = apply_filter(&fid(128, 0.0), &FilterOptions::Fft).unwrap();

        let centered = apply_filter(&spectrum, &FilterOptions::CenterMean).unwrap();
        assert!(processing::mean_std(&centered.re).0.abs() < 1e-12);
        assert!(processing::mean_std(&centered.im).0.abs() < 1e-12);

        let (_, std_re) = processing::mean_std(&spectrum.re);
        let pareto = apply_filter(&spectrum, &FilterOptions::Pareto).unwrap();
        for (scaled, raw) in pareto.re.iter().zip(&spectrum.re) {
            assert!((scaled - raw / std_re.sqrt()).abs() < 1e-12);
        }

        let unit = apply_filter(&spectrum, &FilterOptions::StandardDeviation).unwrap();
        assert!((processing::mean_std(&unit.re).1 - 1.0).abs() < 1e-9);
        assert!((processing::mean_std(&unit.im).1 - 1.0).abs() < 1e-9);
        assert_eq!(unit.x, spectrum.x);
    }

    #[test]
    fn test_window_shapes() {
        let n = 64;
        let flat = SpectrumBuffer::new(
            (0..n).map(|i| i as f64 * 1e-3).collect(),
            vec![1.0; n],
            vec![1.0; n],
            SpectrumInfo::default(),
        )
        .unwrap();
        let weights = |window: WindowFunction| {
            apply_filter(&flat, &FilterOptions::Apodization(window)).unwrap().re
        };
        let decreasing = |w: &[f64]| w.windows(2).all(|p| p[1] <= p[0] + 1e-12);

        let gauss = weights(WindowFunction::Gaussian { gb: 0.3, lb_hz: 0.0 });
        assert!((gauss[0] - 1.0).abs() < 1e-12);
        assert!(decreasing(&gauss));
        assert!(gauss[n - 1] < 0.5);

        let cosine = weights(WindowFunction::CosineBell);
        assert!((cosine[0] - 1.0).abs() < 1e-12);
        assert!(decreasing(&cosine));
        assert!(cosine[n - 1] < 0.05);

        let shifted_sine = weights(WindowFunction::SineBell { power: 1.0, offset: 0.5, end: 1.0 });
        for (a, b) in shifted_sine.iter().zip(&cosine) {
            assert!((a - b).abs() < 1e-12);
        }

        let sine_squared = weights(WindowFunction::SineBell { power: 2.0, offset: 0.0, end: 1.0 });
        assert!(sine_squared[0].abs() < 1e-12);
        assert!((sine_squared[n / 2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_reduce_rules() {
        let a = FilterOptions::PhaseCorrection(PhaseParams { ph0: 10.0, ph1: 2.0 });
        let b = FilterOptions::PhaseCorrection(PhaseParams { ph0: 5.0, ph1: -1.0 });
        let r = reduce(&a, &b);
        assert!(r.once);
        assert_eq!(
            r.reduce,
            Some(FilterOptions::PhaseCorrection(PhaseParams { ph0: 15.0, ph1: 1.0 }))
        );

        let r = reduce(&FilterOptions::Pareto, &FilterOptions::Pareto);
        assert!(!r.once);
        assert!(r.reduce.is_none());

        let r = reduce(
            &FilterOptions::ZeroFilling { nb_points: 1024 },
            &FilterOptions::ZeroFilling { nb_points: 2048 },
        );
        assert_eq!(r.reduce, Some(FilterOptions::ZeroFilling { nb_points: 2048 }));
    }

    #[test]
    fn test_filter_options_serde_shape() {
        let json = serde_json::to_value(FilterOptions::ZeroFilling { nb_points: 4096 }).unwrap();
        assert_eq!(json["name"], "zeroFilling");
        assert_eq!(json["value"]["nbPoints"], 4096);
        let back: FilterOptions = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), FilterKind::ZeroFilling);
    }

    #[test]
    fn test_digital_filter_then_fft_matches_plain_fft_magnitude() {
        let delayed = {
            let mut b = fid(256, 0.0);
            b.re.rotate_right(4);
            b.im.rotate_right(4);
            b.info.digital_filter = 4.0;
            b
        };
        let corrected = apply_filter(&delayed, &FilterOptions::DigitalFilter).unwrap();
        let a = apply_filter(&corrected, &FilterOptions::Fft).unwrap();
        let b = apply_filter(&fid(256, 0.0), &FilterOptions::Fft).unwrap();
        for i in 0..a.len() {
            assert!((a.re[i] - b.re[i]).abs() < 1e-9);
        }
    }
}
