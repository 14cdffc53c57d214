/// Peak picking (generalized signal detection)
///
/// Candidates are the local minima of the Savitzky–Golay second derivative.
/// Each candidate is moved to the true local maximum of the data and refined
/// by parabolic interpolation; everything below the noise threshold is
/// dropped outright. Overlapping candidates keep the larger |y|.

use serde::{Deserialize, Serialize};

use crate::data::model::Peak;
use crate::data::spectrum::{closest_index, SpectrumBuffer};
use crate::pipeline::processing::{median, solve_linear};
use super::fit::{fit_lorentzians, FitOptions, Lorentzian};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GsdOptions {
    /// Fixed noise level; estimated from the data when absent
    pub noise_level: Option<f64>,
    /// Multiplier applied to median(|y|) for the estimated noise level
    pub noise_factor: f64,
    /// Peaks lower than this fraction of max |y| are dropped
    pub min_max_ratio: f64,
    pub smooth_y: bool,
    pub sg_window: usize,
    pub sg_degree: usize,
    pub real_top_detection: bool,
    pub look_negative: bool,
}

impl Default for GsdOptions {
    fn default() -> Self {
        Self {
            noise_level: None,
            noise_factor: 3.0,
            min_max_ratio: 0.01,
            smooth_y: false,
            sg_window: 9,
            sg_degree: 3,
            real_top_detection: true,
            look_negative: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedPeak {
    pub index: usize,
    pub x: f64,
    pub y: f64,
    /// Distance between the inflection points, in x units
    pub width: f64,
}

// =========================================================================
//  Savitzky–Golay
// =========================================================================

/// Convolution weights for the `derivative`-th derivative at the window centre
pub fn savitzky_golay_coefficients(window: usize, degree: usize, derivative: usize) -> Option<Vec<f64>> {
    if window % 2 == 0 || degree >= window || derivative > degree {
        return None;
    }
    let half = (window / 2) as i64;
    let m = degree + 1;
    let mut gram = vec![vec![0.0; m]; m];
    for j in -half..=half {
        let jf = j as f64;
        for (r, row) in gram.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell += jf.powi((r + c) as i32);
            }
        }
    }
    let mut unit = vec![0.0; m];
    unit[derivative] = 1.0;
    let column = solve_linear(gram, unit)?;
    let factorial: f64 = (1..=derivative).map(|k| k as f64).product();
    Some(
        (-half..=half)
            .map(|j| {
                let jf = j as f64;
                factorial * column.iter().enumerate().map(|(k, v)| v * jf.powi(k as i32)).sum::<f64>()
            })
            .collect(),
    )
}

/// Savitzky–Golay smoothing or derivative (per index step), edges clamped
pub fn savitzky_golay(y: &[f64], window: usize, degree: usize, derivative: usize) -> Vec<f64> {
    let Some(coefficients) = savitzky_golay_coefficients(window, degree, derivative) else {
        log::warn!(
            "Invalid Savitzky–Golay setup (window {}, degree {}), data left unfiltered",
            window,
            degree
        );
        return if derivative == 0 { y.to_vec() } else { simple_derivative(y, derivative) };
    };
    let n = y.len() as i64;
    let half = (window / 2) as i64;
    (0..n)
        .map(|i| {
            coefficients
                .iter()
                .enumerate()
                .map(|(k, c)| {
                    let idx = (i + k as i64 - half).clamp(0, n - 1) as usize;
                    c * y[idx]
                })
                .sum()
        })
        .collect()
}

fn simple_derivative(y: &[f64], order: usize) -> Vec<f64> {
    let mut out = y.to_vec();
    for _ in 0..order {
        let n = out.len();
        out = (0..n)
            .map(|i| {
                let a = out[i.saturating_sub(1)];
                let b = out[(i + 1).min(n - 1)];
                (b - a) / 2.0
            })
            .collect();
    }
    out
}

// =========================================================================
//  GSD
// =========================================================================

/// Noise floor used for thresholding
pub fn noise_level(y: &[f64], options: &GsdOptions) -> f64 {
    match options.noise_level {
        Some(level) => level.abs(),
        None => {
            let abs: Vec<f64> = y.iter().map(|v| v.abs()).collect();
            median(&abs) * options.noise_factor
        }
    }
}

/// Detect peaks in `(x, y)`; the result is sorted by x ascending
pub fn gsd(x: &[f64], y: &[f64], options: &GsdOptions) -> Vec<DetectedPeak> {
    let n = y.len().min(x.len());
    if n < 3 {
        return Vec::new();
    }
    let x = &x[..n];
    let y = &y[..n];
    let max_abs = y.iter().map(|v| v.abs()).fold(0.0f64, f64::max);
    let threshold = noise_level(y, options).max(options.min_max_ratio * max_abs);
    let longest_odd = if n % 2 == 0 { n - 1 } else { n };
    let window = (options.sg_window.max(3) | 1).min(longest_odd);
    let degree = options.sg_degree.min(window - 1).max(2);

    let smoothed = if options.smooth_y {
        savitzky_golay(y, window, degree, 0)
    } else {
        y.to_vec()
    };

    let mut signs = vec![1.0];
    if options.look_negative {
        signs.push(-1.0);
    }

    let mut candidates: Vec<(DetectedPeak, usize, usize)> = Vec::new();
    for sign in signs {
        let ys: Vec<f64> = smoothed.iter().map(|v| v * sign).collect();
        let ddy = savitzky_golay(&ys, window, degree, 2);
        for i in 1..n - 1 {
            if !(ddy[i] < 0.0 && ddy[i] < ddy[i - 1] && ddy[i] <= ddy[i + 1]) {
                continue;
            }
            let mut top = i;
            if options.real_top_detection {
                while top + 1 < n && ys[top + 1] > ys[top] {
                    top += 1;
                }
                while top > 0 && ys[top - 1] > ys[top] {
                    top -= 1;
                }
            }
            let (px, py) = refine_top(x, &ys, top);
            if py < threshold {
                continue;
            }
            let (left, right) = inflection_window(&ddy, top);
            candidates.push((
                DetectedPeak {
                    index: top,
                    x: px,
                    y: py * sign,
                    width: (x[right] - x[left]).abs(),
                },
                left,
                right,
            ));
        }
    }

    // Larger |y| claims its inflection window first
    candidates.sort_by(|a, b| b.0.y.abs().total_cmp(&a.0.y.abs()));
    let mut accepted: Vec<(DetectedPeak, usize, usize)> = Vec::new();
    for candidate in candidates {
        let (peak, left, right) = candidate;
        let overlaps = accepted.iter().any(|(other, l, r)| {
            other.index == peak.index
                || (peak.index >= *l && peak.index <= *r)
                || (other.index >= left && other.index <= right)
        });
        if !overlaps {
            accepted.push((peak, left, right));
        }
    }

    let mut peaks: Vec<DetectedPeak> = accepted.into_iter().map(|(p, _, _)| p).collect();
    peaks.sort_by(|a, b| a.x.total_cmp(&b.x));
    log::debug!("GSD: {} peaks above {:.3e}", peaks.len(), threshold);
    peaks
}

/// Span of negative curvature around `top`
fn inflection_window(ddy: &[f64], top: usize) -> (usize, usize) {
    if ddy[top] >= 0.0 {
        return (top, top);
    }
    let mut left = top;
    while left > 0 && ddy[left - 1] < 0.0 {
        left -= 1;
    }
    let mut right = top;
    while right + 1 < ddy.len() && ddy[right + 1] < 0.0 {
        right += 1;
    }
    (left, right)
}

/// Parabolic interpolation through the top and its neighbours
fn refine_top(x: &[f64], y: &[f64], top: usize) -> (f64, f64) {
    if top == 0 || top + 1 >= y.len() {
        return (x[top], y[top]);
    }
    let (a, b, c) = (y[top - 1], y[top], y[top + 1]);
    let denom = a - 2.0 * b + c;
    if denom.abs() < f64::EPSILON {
        return (x[top], b);
    }
    let delta = (0.5 * (a - c) / denom).clamp(-0.5, 0.5);
    let step = if delta >= 0.0 { x[top + 1] - x[top] } else { x[top] - x[top - 1] };
    (x[top] + delta * step, b - 0.25 * (a - c) * delta)
}

// =========================================================================
//  Peak optimisation
// =========================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptimizeOptions {
    /// Peaks whose `x ± width·grouping_factor` intervals overlap are fitted together
    pub grouping_factor: f64,
    /// Half-extent of each fitted sub-array, in peak widths
    pub factor_width: f64,
    pub max_iterations: usize,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            grouping_factor: 1.0,
            factor_width: 4.0,
            max_iterations: 100,
        }
    }
}

/// Group peaks (sorted by x) whose widened intervals overlap
pub fn group_peaks(peaks: &[Peak], grouping_factor: f64, default_width: f64) -> Vec<Vec<Peak>> {
    let mut sorted = peaks.to_vec();
    sorted.sort_by(|a, b| a.x.total_cmp(&b.x));
    let mut groups: Vec<Vec<Peak>> = Vec::new();
    let mut group_end = f64::NEG_INFINITY;
    for peak in sorted {
        let half = peak.width.unwrap_or(default_width) * grouping_factor;
        match groups.last_mut() {
            Some(group) if peak.x - half <= group_end => {
                group_end = group_end.max(peak.x + half);
                group.push(peak);
            }
            _ => {
                group_end = peak.x + half;
                groups.push(vec![peak]);
            }
        }
    }
    groups
}

/// Refit the peaks inside `[from, to]` together with any newly detected ones.
///
/// With `detection` set, the window is searched again and peaks not already
/// known are added before fitting; `None` refits the given peaks only.
/// Peaks outside the window are returned untouched; fitted peaks keep their
/// ids. The result is sorted by x.
pub fn optimize_peaks(
    x: &[f64],
    y: &[f64],
    peaks: &[Peak],
    from: f64,
    to: f64,
    detection: Option<&GsdOptions>,
    options: &OptimizeOptions,
) -> Vec<Peak> {
    let (from, to) = (from.min(to), from.max(to));
    let (outside, inside): (Vec<Peak>, Vec<Peak>) =
        peaks.iter().cloned().partition(|p| p.x < from || p.x > to);

    let a = closest_index(x, from);
    let b = closest_index(x, to);
    let (start, end) = (a.min(b), a.max(b));
    if end <= start {
        return merge_sorted(outside, inside);
    }
    let wx = &x[start..=end];
    let wy = &y[start..=end];
    let step = (wx[1] - wx[0]).abs();

    let mut window_peaks = inside;
    let detected_peaks = detection.map(|o| gsd(wx, wy, o)).unwrap_or_default();
    for detected in detected_peaks {
        let known = window_peaks.iter().any(|p| {
            let tolerance = detected.width.max(p.width.unwrap_or(0.0)).max(step);
            (p.x - detected.x).abs() < tolerance
        });
        if !known {
            window_peaks.push(Peak::new(detected.x, detected.y, Some(detected.width)));
        }
    }

    let fit_options = FitOptions {
        max_iterations: options.max_iterations,
        ..FitOptions::default()
    };
    let default_width = step * 4.0;
    let mut fitted = Vec::with_capacity(window_peaks.len());
    for group in group_peaks(&window_peaks, options.grouping_factor, default_width) {
        let widest = group
            .iter()
            .map(|p| p.width.unwrap_or(default_width))
            .fold(default_width, f64::max);
        let lo = group.first().map(|p| p.x).unwrap_or(from) - widest * options.factor_width;
        let hi = group.last().map(|p| p.x).unwrap_or(to) + widest * options.factor_width;
        let (sx, sy): (Vec<f64>, Vec<f64>) = wx
            .iter()
            .zip(wy)
            .filter(|(v, _)| **v >= lo && **v <= hi)
            .map(|(a, b)| (*a, *b))
            .unzip();
        let initial: Vec<Lorentzian> = group
            .iter()
            .map(|p| Lorentzian {
                center: p.x,
                height: p.y,
                width: p.width.unwrap_or(default_width).max(step),
            })
            .collect();
        let lines = fit_lorentzians(&sx, &sy, &initial, &fit_options);
        for (peak, line) in group.into_iter().zip(lines) {
            fitted.push(Peak {
                id: peak.id,
                x: line.center,
                y: line.height,
                width: Some(line.width),
            });
        }
    }
    merge_sorted(outside, fitted)
}

fn merge_sorted(mut a: Vec<Peak>, b: Vec<Peak>) -> Vec<Peak> {
    a.extend(b);
    a.sort_by(|p, q| p.x.total_cmp(&q.x));
    a
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeakPickingOptions {
    #[serde(flatten)]
    pub gsd: GsdOptions,
    /// Refit all picked peaks with Lorentzians
    pub optimize: bool,
    pub optimize_options: OptimizeOptions,
}

/// Pick peaks on the real channel of a spectrum
pub fn auto_peak_picking(buffer: &SpectrumBuffer, options: &PeakPickingOptions) -> Vec<Peak> {
    if buffer.info.is_fid {
        log::warn!("Peak picking skipped: spectrum is still an FID");
        return Vec::new();
    }
    let peaks: Vec<Peak> = gsd(&buffer.x, &buffer.re, &options.gsd)
        .into_iter()
        .map(|p| Peak::new(p.x, p.y, Some(p.width)))
        .collect();
    if !options.optimize || buffer.len() < 2 {
        return peaks;
    }
    let (from, to) = (buffer.x[0], buffer.x[buffer.len() - 1]);
    // The whole spectrum was just picked, so only refit
    optimize_peaks(&buffer.x, &buffer.re, &peaks, from, to, None, &options.optimize_options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lorentzian(x: f64, center: f64, height: f64, width: f64) -> f64 {
        height * width * width / (width * width + 4.0 * (x - center).powi(2))
    }

    fn spectrum(lines: &[(f64, f64, f64)]) -> (Vec<f64>, Vec<f64>) {
        let x: Vec<f64> = (0..1000).map(|i| i as f64 * 0.01).collect();
        let y = x
            .iter()
            .map(|&v| lines.iter().map(|&(c, h, w)| lorentzian(v, c, h, w)).sum())
            .collect();
        (x, y)
    }

    #[test]
    fn test_sg_smoothing_preserves_cubic() {
        let y: Vec<f64> = (0..20).map(|i| (i as f64).powi(3) * 0.01 - i as f64).collect();
        let s = savitzky_golay(&y, 7, 3, 0);
        for i in 3..17 {
            assert!((s[i] - y[i]).abs() < 1e-8);
        }
        let d = savitzky_golay(&y, 7, 3, 1);
        let expected = 3.0 * 0.01 * 100.0 - 1.0;
        assert!((d[10] - expected).abs() < 1e-8);
    }

    #[test]
    fn test_gsd_finds_separated_lines_sorted() {
        let (x, y) = spectrum(&[(7.0, 5.0, 0.05), (2.0, 10.0, 0.05), (4.5, 2.0, 0.05)]);
        let peaks = gsd(&x, &y, &GsdOptions::default());
        assert_eq!(peaks.len(), 3);
        assert!((peaks[0].x - 2.0).abs() < 0.005);
        assert!((peaks[1].x - 4.5).abs() < 0.005);
        assert!((peaks[2].x - 7.0).abs() < 0.005);
        assert!((peaks[0].y - 10.0).abs() < 0.5);
        assert!(peaks[0].width > 0.0);
    }

    #[test]
    fn test_real_top_refines_off_grid_maximum() {
        let (x, y) = spectrum(&[(3.004, 10.0, 0.05)]);
        let peaks = gsd(&x, &y, &GsdOptions::default());
        assert_eq!(peaks.len(), 1);
        assert!((peaks[0].x - 3.004).abs() < 0.002);
    }

    #[test]
    fn test_threshold_discards_small_peaks() {
        let (x, y) = spectrum(&[(2.0, 10.0, 0.05), (6.0, 0.05, 0.05)]);
        let options = GsdOptions {
            min_max_ratio: 0.05,
            ..GsdOptions::default()
        };
        let peaks = gsd(&x, &y, &options);
        assert_eq!(peaks.len(), 1);
    }

    #[test]
    fn test_negative_peaks_only_when_requested() {
        let (x, mut y) = spectrum(&[(2.0, 10.0, 0.05)]);
        let (_, neg) = spectrum(&[(6.0, 8.0, 0.05)]);
        for (a, b) in y.iter_mut().zip(neg) {
            *a -= b;
        }
        assert_eq!(gsd(&x, &y, &GsdOptions::default()).len(), 1);
        let options = GsdOptions {
            look_negative: true,
            ..GsdOptions::default()
        };
        let peaks = gsd(&x, &y, &options);
        assert_eq!(peaks.len(), 2);
        assert!(peaks[1].y < 0.0);
    }

    #[test]
    fn test_group_peaks() {
        let peaks = vec![
            Peak::new(1.0, 1.0, Some(0.1)),
            Peak::new(1.15, 1.0, Some(0.1)),
            Peak::new(3.0, 1.0, Some(0.1)),
        ];
        let groups = group_peaks(&peaks, 1.0, 0.1);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn test_optimize_peaks_keeps_ids_and_outside_peaks() {
        let (x, y) = spectrum(&[(2.0, 10.0, 0.05), (6.0, 4.0, 0.05)]);
        let inside = Peak::new(2.02, 8.0, Some(0.08));
        let outside = Peak::new(6.0, 4.0, Some(0.05));
        let peaks = vec![outside.clone(), inside.clone()];
        let result = optimize_peaks(
            &x,
            &y,
            &peaks,
            1.5,
            2.5,
            Some(&GsdOptions::default()),
            &OptimizeOptions::default(),
        );
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].id, inside.id);
        assert!((result[0].x - 2.0).abs() < 1e-3);
        assert!((result[0].y - 10.0).abs() < 0.05);
        assert_eq!(result[1], outside);
    }

    #[test]
    fn test_optimize_peaks_detection_toggle() {
        let (x, y) = spectrum(&[(2.0, 10.0, 0.05), (2.4, 6.0, 0.05)]);
        let known = Peak::new(2.01, 9.0, Some(0.06));

        let refit_only = optimize_peaks(&x, &y, &[known.clone()], 1.5, 3.0, None, &OptimizeOptions::default());
        assert_eq!(refit_only.len(), 1);
        assert_eq!(refit_only[0].id, known.id);

        let redetected = optimize_peaks(
            &x,
            &y,
            &[known.clone()],
            1.5,
            3.0,
            Some(&GsdOptions::default()),
            &OptimizeOptions::default(),
        );
        assert_eq!(redetected.len(), 2);
        assert!(redetected.iter().any(|p| p.id == known.id));
        assert!(redetected.iter().any(|p| (p.x - 2.4).abs() < 0.01));
    }
}
