/// Range building: integration, signal detection, multiplicity
///
/// Multiplicity failures never abort a range: they are written to the
/// reproducibility log as warnings and the signal is kept without couplings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::model::{new_id, AtomCount, Peak, Range, Ranges, Signal, SignalKind};
use crate::data::spectrum::SpectrumBuffer;
use crate::log::reproducibility::ReproLog;
use crate::pipeline::error::ProcessingError;
use crate::pipeline::processing::trapezoid;
use super::multiplet::{analyse_multiplet, group_signals, weighted_center, MultipletOptions};
use super::peaks::{gsd, GsdOptions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RangeDetectionOptions {
    pub peak_picking: GsdOptions,
    /// Peaks further apart than this (Hz) belong to different signals
    pub max_j_hz: f64,
    /// Peaks further apart than this (Hz) start a new range in automatic detection
    pub join_distance_hz: f64,
    /// Automatic ranges extend this many peak widths beyond the outer peaks
    pub margin_factor: f64,
    pub compute_multiplicity: bool,
    pub multiplet_tolerance_hz: f64,
}

impl Default for RangeDetectionOptions {
    fn default() -> Self {
        Self {
            peak_picking: GsdOptions::default(),
            max_j_hz: 20.0,
            join_distance_hz: 25.0,
            margin_factor: 2.0,
            compute_multiplicity: true,
            multiplet_tolerance_hz: 0.5,
        }
    }
}

fn check_bounds(buffer: &SpectrumBuffer, from: f64, to: f64) -> Result<(f64, f64), ProcessingError> {
    if buffer.info.is_fid {
        return Err(ProcessingError::InvalidBuffer(
            "ranges need a frequency-domain spectrum".to_string(),
        ));
    }
    if !from.is_finite() || !to.is_finite() || from == to {
        return Err(ProcessingError::InvalidRange { from, to });
    }
    Ok((from.min(to), from.max(to)))
}

/// Integral of the real channel over `[from, to]`
pub fn integrate(buffer: &SpectrumBuffer, from: f64, to: f64) -> f64 {
    if buffer.is_empty() {
        return 0.0;
    }
    let (start, end) = buffer.index_window(from, to);
    trapezoid(&buffer.x[start..=end], &buffer.re[start..=end])
}

/// Build signals from the peaks of one range
pub fn detect_signals(
    peaks: &[Peak],
    frequency_mhz: f64,
    options: &RangeDetectionOptions,
    log: &mut ReproLog,
) -> Vec<Signal> {
    let multiplet_options = MultipletOptions {
        tolerance_hz: options.multiplet_tolerance_hz,
        ..MultipletOptions::default()
    };
    group_signals(peaks, frequency_mhz, options.max_j_hz)
        .into_iter()
        .map(|group| {
            let delta = weighted_center(&group);
            let js = if options.compute_multiplicity {
                match analyse_multiplet(&group, frequency_mhz, &multiplet_options) {
                    Ok(js) => js,
                    Err(e) => {
                        log.add_warning(
                            "createRange",
                            &format!("multiplicity of signal at {:.4} ppm: {}", delta, e),
                        );
                        Vec::new()
                    }
                }
            } else {
                Vec::new()
            };
            Signal::new(delta, js, group)
        })
        .collect()
}

/// Integrate `[from, to]` and detect its signals
pub fn create_range(
    buffer: &SpectrumBuffer,
    from: f64,
    to: f64,
    options: &RangeDetectionOptions,
    log: &mut ReproLog,
) -> Result<Range, ProcessingError> {
    let (from, to) = check_bounds(buffer, from, to)?;
    let absolute = integrate(buffer, from, to);

    let (start, end) = buffer.index_window(from, to);
    let peaks: Vec<Peak> = gsd(
        &buffer.x[start..=end],
        &buffer.re[start..=end],
        &options.peak_picking,
    )
    .into_iter()
    .map(|p| Peak::new(p.x, p.y, Some(p.width)))
    .collect();
    let signals = detect_signals(&peaks, buffer.info.origin_frequency, options, log);

    log::debug!(
        "Range {:.4}..{:.4}: absolute {:.4e}, {} signals",
        from,
        to,
        absolute,
        signals.len()
    );
    Ok(Range {
        id: new_id(),
        from,
        to,
        absolute,
        integration: None,
        kind: SignalKind::Signal,
        signals,
        dia_ids: Vec::new(),
        nb_atoms: AtomCount::default(),
        original_from: None,
        original_to: None,
    })
}

/// Recompute a range for new bounds, keeping its id, kind and range-level assignment.
///
/// `originalFrom`/`originalTo` keep the bounds the range had before its first resize.
pub fn resize_range(
    buffer: &SpectrumBuffer,
    range: &Range,
    from: f64,
    to: f64,
    options: &RangeDetectionOptions,
    log: &mut ReproLog,
) -> Result<Range, ProcessingError> {
    let mut resized = create_range(buffer, from, to, options, log)?;
    resized.id = range.id.clone();
    resized.kind = range.kind;
    resized.dia_ids = range.dia_ids.clone();
    resized.nb_atoms = range.nb_atoms;
    resized.original_from = range.original_from.or(Some(range.from));
    resized.original_to = range.original_to.or(Some(range.to));
    Ok(resized)
}

/// Split every range strictly containing `x` into `[from, x]` and `[x, to]`.
///
/// Keys are the ids of the ranges that were cut.
pub fn cut_range(
    buffer: &SpectrumBuffer,
    ranges: &[Range],
    x: f64,
    options: &RangeDetectionOptions,
    log: &mut ReproLog,
) -> Result<BTreeMap<String, Vec<Range>>, ProcessingError> {
    let mut cuts = BTreeMap::new();
    for range in ranges.iter().filter(|r| r.contains(x)) {
        let mut left = create_range(buffer, range.from, x, options, log)?;
        let mut right = create_range(buffer, x, range.to, options, log)?;
        left.kind = range.kind;
        right.kind = range.kind;
        cuts.insert(range.id.clone(), vec![left, right]);
    }
    Ok(cuts)
}

/// Detect ranges over the whole spectrum: picked peaks are clustered by
/// frequency and each cluster, widened by its peak widths, becomes a range.
pub fn auto_ranges_detection(
    buffer: &SpectrumBuffer,
    options: &RangeDetectionOptions,
    log: &mut ReproLog,
) -> Result<Vec<Range>, ProcessingError> {
    if buffer.info.is_fid {
        return Err(ProcessingError::InvalidBuffer(
            "ranges need a frequency-domain spectrum".to_string(),
        ));
    }
    if buffer.len() < 3 {
        return Ok(Vec::new());
    }
    let peaks: Vec<Peak> = gsd(&buffer.x, &buffer.re, &options.peak_picking)
        .into_iter()
        .filter(|p| p.y > 0.0)
        .map(|p| Peak::new(p.x, p.y, Some(p.width)))
        .collect();

    let x_min = buffer.x.iter().copied().fold(f64::INFINITY, f64::min);
    let x_max = buffer.x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut bounds: Vec<(f64, f64)> = Vec::new();
    for cluster in group_signals(&peaks, buffer.info.origin_frequency, options.join_distance_hz) {
        let from = cluster
            .iter()
            .map(|p| p.x - p.width.unwrap_or(0.0) * options.margin_factor)
            .fold(f64::INFINITY, f64::min)
            .max(x_min);
        let to = cluster
            .iter()
            .map(|p| p.x + p.width.unwrap_or(0.0) * options.margin_factor)
            .fold(f64::NEG_INFINITY, f64::max)
            .min(x_max);
        match bounds.last_mut() {
            Some(last) if from <= last.1 => last.1 = last.1.max(to),
            _ => bounds.push((from, to)),
        }
    }

    let mut ranges = Vec::with_capacity(bounds.len());
    for (from, to) in bounds {
        if to - from <= 0.0 {
            continue;
        }
        ranges.push(create_range(buffer, from, to, options, log)?);
    }
    log.add_entry(
        "autoRangesDetection",
        &format!("{} ranges from {} peaks", ranges.len(), peaks.len()),
        "",
    );
    Ok(ranges)
}

// =========================================================================
//  Range list
// =========================================================================

impl Ranges {
    pub fn add(&mut self, range: Range) {
        self.values.push(range);
        self.values.sort_by(|a, b| a.from.total_cmp(&b.from));
        self.update_integrations();
    }

    pub fn delete(&mut self, id: &str) -> Option<Range> {
        let pos = self.values.iter().position(|r| r.id == id)?;
        let removed = self.values.remove(pos);
        self.update_integrations();
        Some(removed)
    }

    pub fn get(&self, id: &str) -> Option<&Range> {
        self.values.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Range> {
        self.values.iter_mut().find(|r| r.id == id)
    }

    /// Replace a range by its resized version (same id)
    pub fn replace(&mut self, range: Range) -> bool {
        match self.values.iter_mut().find(|r| r.id == range.id) {
            Some(slot) => {
                *slot = range;
                self.update_integrations();
                true
            }
            None => false,
        }
    }

    /// Swap each cut range for its pieces
    pub fn replace_cut(&mut self, cuts: BTreeMap<String, Vec<Range>>) {
        let mut values = Vec::with_capacity(self.values.len() + cuts.len());
        for range in self.values.drain(..) {
            match cuts.get(&range.id) {
                Some(pieces) => values.extend(pieces.iter().cloned()),
                None => values.push(range),
            }
        }
        values.sort_by(|a, b| a.from.total_cmp(&b.from));
        self.values = values;
        self.update_integrations();
    }

    /// Recompute relative integrations.
    ///
    /// With a constant sum, `Signal` ranges share `options.sum`. Otherwise the
    /// scale of the first integrated range is kept and only missing values are filled.
    pub fn update_integrations(&mut self) {
        if self.options.is_sum_constant {
            let total: f64 = self
                .values
                .iter()
                .filter(|r| r.kind == SignalKind::Signal)
                .map(|r| r.absolute)
                .sum();
            if total == 0.0 {
                for r in &mut self.values {
                    r.integration = None;
                }
                return;
            }
            let factor = self.options.sum / total;
            for r in &mut self.values {
                r.integration = Some(r.absolute * factor);
            }
            return;
        }
        let factor = self
            .values
            .iter()
            .find_map(|r| match r.integration {
                Some(i) if r.absolute != 0.0 => Some(i / r.absolute),
                _ => None,
            })
            .unwrap_or(1.0);
        for r in &mut self.values {
            if r.integration.is_none() {
                r.integration = Some(r.absolute * factor);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::spectrum::SpectrumInfo;

    fn lorentzian(x: f64, center: f64, height: f64, width: f64) -> f64 {
        height * width * width / (width * width + 4.0 * (x - center).powi(2))
    }

    /// 400 MHz, 0..10 ppm with 0.0005 ppm (0.2 Hz) resolution
    fn spectrum(lines: &[(f64, f64)]) -> SpectrumBuffer {
        let x: Vec<f64> = (0..20000).map(|i| i as f64 * 0.0005).collect();
        let re = x
            .iter()
            .map(|&v| lines.iter().map(|&(c, h)| lorentzian(v, c, h, 0.0025)).sum())
            .collect();
        let info = SpectrumInfo {
            is_complex: false,
            is_fid: false,
            ..SpectrumInfo::default()
        };
        SpectrumBuffer::new(x, re, vec![], info).unwrap()
    }

    fn triplet(center: f64) -> Vec<(f64, f64)> {
        let j = 7.0 / 400.0;
        vec![(center - j, 1.0), (center, 2.0), (center + j, 1.0)]
    }

    #[test]
    fn test_create_range_detects_triplet() {
        let buffer = spectrum(&triplet(3.0));
        let mut log = ReproLog::new();
        let range = create_range(&buffer, 3.1, 2.9, &RangeDetectionOptions::default(), &mut log).unwrap();
        assert_eq!((range.from, range.to), (2.9, 3.1));
        assert!(range.absolute > 0.0);
        assert_eq!(range.signals.len(), 1);
        assert_eq!(range.signals[0].multiplicity(), "t");
        assert!((range.signals[0].delta - 3.0).abs() < 1e-3);
        assert!(log.warnings().next().is_none());
    }

    #[test]
    fn test_multiplicity_failure_is_soft() {
        // 0, 3 and 11 Hz: no first-order pattern
        let lines = vec![(3.0, 1.0), (3.0 + 3.0 / 400.0, 1.0), (3.0 + 11.0 / 400.0, 1.0)];
        let buffer = spectrum(&lines);
        let mut log = ReproLog::new();
        let range = create_range(&buffer, 2.95, 3.1, &RangeDetectionOptions::default(), &mut log).unwrap();
        assert_eq!(range.signals.len(), 1);
        assert_eq!(range.signals[0].multiplicity(), "m");
        assert_eq!(log.warnings().count(), 1);
    }

    #[test]
    fn test_invalid_bounds() {
        let buffer = spectrum(&triplet(3.0));
        let mut log = ReproLog::new();
        let err = create_range(&buffer, 3.0, 3.0, &RangeDetectionOptions::default(), &mut log);
        assert!(matches!(err, Err(ProcessingError::InvalidRange { .. })));
    }

    #[test]
    fn test_resize_keeps_identity() {
        let buffer = spectrum(&triplet(3.0));
        let mut log = ReproLog::new();
        let options = RangeDetectionOptions::default();
        let mut range = create_range(&buffer, 2.9, 3.1, &options, &mut log).unwrap();
        range.dia_ids.push("H1".into());
        let resized = resize_range(&buffer, &range, 2.95, 3.05, &options, &mut log).unwrap();
        assert_eq!(resized.id, range.id);
        assert_eq!(resized.dia_ids, vec!["H1".to_string()]);
        assert_eq!(resized.original_from, Some(2.9));
        let again = resize_range(&buffer, &resized, 2.8, 3.2, &options, &mut log).unwrap();
        assert_eq!(again.original_from, Some(2.9));
        assert_eq!(again.original_to, Some(3.1));
    }

    #[test]
    fn test_auto_ranges_and_integrations() {
        let mut lines = triplet(3.0);
        lines.extend([(7.0, 3.0)]);
        let buffer = spectrum(&lines);
        let mut log = ReproLog::new();
        let detected = auto_ranges_detection(&buffer, &RangeDetectionOptions::default(), &mut log).unwrap();
        assert_eq!(detected.len(), 2);
        assert!(detected[0].to < detected[1].from);

        let mut ranges = Ranges::default();
        for r in detected {
            ranges.add(r);
        }
        let total: f64 = ranges.values.iter().filter_map(|r| r.integration).sum();
        assert!((total - 100.0).abs() < 1e-9);
        let first = ranges.values[0].id.clone();
        ranges.delete(&first);
        assert!((ranges.values[0].integration.unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_replace_cut() {
        let buffer = spectrum(&triplet(3.0));
        let mut log = ReproLog::new();
        let options = RangeDetectionOptions::default();
        let mut ranges = Ranges::default();
        ranges.add(create_range(&buffer, 2.9, 3.1, &options, &mut log).unwrap());
        ranges.add(create_range(&buffer, 5.0, 5.5, &options, &mut log).unwrap());
        let cuts = cut_range(&buffer, &ranges.values, 3.0, &options, &mut log).unwrap();
        assert_eq!(cuts.len(), 1);
        ranges.replace_cut(cuts);
        assert_eq!(ranges.values.len(), 3);
        assert_eq!(ranges.values[0].to, 3.0);
        assert_eq!(ranges.values[1].from, 3.0);
    }
}
