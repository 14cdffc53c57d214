/// NMR numeric kernels
///
/// Pure functions over channel slices. Each returns freshly allocated
/// arrays so a failed or superseded operation never leaves a half-written
/// buffer behind; `filters` wraps them into the filter catalog.

use std::f64::consts::PI;

use num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

/// Available window functions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WindowFunction {
    /// Exponential multiplication: line broadening in Hz
    #[serde(rename_all = "camelCase")]
    Exponential { lb_hz: f64 },
    /// Gaussian multiplication
    #[serde(rename_all = "camelCase")]
    Gaussian { gb: f64, lb_hz: f64 },
    /// Sine bell: power (1=sine, 2=sine-squared), offset (0-1), end (0-1)
    SineBell { power: f64, offset: f64, end: f64 },
    /// Cosine bell (equivalent to sine bell with offset=0.5)
    CosineBell,
    /// No apodization
    None,
}

impl std::fmt::Display for WindowFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowFunction::Exponential { lb_hz } => write!(f, "EM (LB={:.1} Hz)", lb_hz),
            WindowFunction::Gaussian { gb, lb_hz } => write!(f, "GM (GB={:.3}, LB={:.1} Hz)", gb, lb_hz),
            WindowFunction::SineBell { power, offset, end } => {
                write!(f, "Sine Bell (pow={:.1}, off={:.2}, end={:.2})", power, offset, end)
            }
            WindowFunction::CosineBell => write!(f, "Cosine Bell"),
            WindowFunction::None => write!(f, "None"),
        }
    }
}

impl WindowFunction {
    /// Equivalent NMRPipe function call, for the reproducibility log
    pub fn nmrpipe_command(&self) -> String {
        match self {
            WindowFunction::Exponential { lb_hz } => format!("nmrPipe -fn EM -lb {:.3}", lb_hz),
            WindowFunction::Gaussian { gb, lb_hz } => {
                format!("nmrPipe -fn GM -g1 {:.6} -g2 {:.3} -g3 {:.6}", gb, lb_hz, 0.0)
            }
            WindowFunction::SineBell { power, offset, end } => format!(
                "nmrPipe -fn SP -off {:.3} -end {:.3} -pow {:.1}",
                offset, end, power
            ),
            WindowFunction::CosineBell => "nmrPipe -fn SP -off 0.5 -end 1.0 -pow 1.0".to_string(),
            WindowFunction::None => String::new(),
        }
    }

    /// Window value at point `i` of `n`, with `dwell` seconds between points
    fn factor(&self, i: usize, n: usize, dwell: f64) -> f64 {
        let t = i as f64 * dwell;
        match self {
            WindowFunction::Exponential { lb_hz } => (-PI * lb_hz * t).exp(),
            WindowFunction::Gaussian { gb, lb_hz } => {
                let tmax = n as f64 * dwell;
                if *gb == 0.0 || tmax == 0.0 {
                    return (-PI * lb_hz * t).exp();
                }
                (-PI * lb_hz * t).exp() * (-(t / (2.0 * gb * tmax)).powi(2)).exp()
            }
            WindowFunction::SineBell { power, offset, end } => {
                let frac = i as f64 / n as f64;
                let angle = PI * (offset + frac * (end - offset));
                angle.sin().powf(*power)
            }
            WindowFunction::CosineBell => {
                let frac = i as f64 / n as f64;
                (PI * frac / 2.0).cos()
            }
            WindowFunction::None => 1.0,
        }
    }
}

// =========================================================================
//  Apodization / Window Functions
// =========================================================================

/// Multiply both channels by the window; `im` may be empty
pub fn apodize(re: &[f64], im: &[f64], dwell: f64, window: &WindowFunction) -> (Vec<f64>, Vec<f64>) {
    let n = re.len();
    let weights: Vec<f64> = (0..n).map(|i| window.factor(i, n, dwell)).collect();
    let new_re = re.iter().zip(&weights).map(|(v, w)| v * w).collect();
    let new_im = im.iter().zip(&weights).map(|(v, w)| v * w).collect();
    (new_re, new_im)
}

// =========================================================================
//  Zero Filling
// =========================================================================

/// Zero-fill (or truncate) to `target` points.
///
/// The last `shift` samples hold the group delay rotated out by the
/// digital-filter correction; they stay at the tail of the new arrays.
/// `shift` outside `[0, target)` is treated as 0.
pub fn zero_fill(
    x: &[f64],
    re: &[f64],
    im: &[f64],
    target: usize,
    shift: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let current = re.len();
    let length = current.min(target);
    let shift = if shift < target { shift.min(length) } else { 0 };

    let mut new_re = vec![0.0; target];
    let mut new_im = vec![0.0; if im.is_empty() { 0 } else { target }];

    let head = length - shift;
    new_re[..head].copy_from_slice(&re[..head]);
    if !im.is_empty() {
        new_im[..head].copy_from_slice(&im[..head]);
    }
    if shift > 0 {
        new_re[target - shift..].copy_from_slice(&re[current - shift..]);
        if !im.is_empty() {
            new_im[target - shift..].copy_from_slice(&im[current - shift..]);
        }
    }

    let mut new_x = Vec::with_capacity(target);
    new_x.extend_from_slice(&x[..length]);
    let step = if x.len() >= 2 { x[1] - x[0] } else { 1.0 };
    let mut last = new_x.last().copied().unwrap_or(-step);
    while new_x.len() < target {
        last += step;
        new_x.push(last);
    }

    (new_x, new_re, new_im)
}

/// Next power of two >= n
pub fn next_power_of_two(n: usize) -> usize {
    let mut p = 1;
    while p < n {
        p <<= 1;
    }
    p
}

/// Rotate both channels left by `points`, wrapping the head onto the tail
pub fn rotate_left(re: &[f64], im: &[f64], points: usize) -> (Vec<f64>, Vec<f64>) {
    let n = re.len();
    if n == 0 {
        return (Vec::new(), Vec::new());
    }
    let k = points % n;
    let mut new_re = re.to_vec();
    new_re.rotate_left(k);
    let mut new_im = im.to_vec();
    if !new_im.is_empty() {
        new_im.rotate_left(k);
    }
    (new_re, new_im)
}

// =========================================================================
//  Fourier Transform
// =========================================================================

/// Complex FFT of an FID whose length is already a power of two.
///
/// The first point is halved (NMRPipe `FT -auto` convention) and the halves
/// are swapped so that index 0 is the most negative frequency; the output
/// therefore runs in ascending frequency.
pub fn fourier_transform(re: &[f64], im: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let n = re.len();
    if n == 0 {
        return (Vec::new(), Vec::new());
    }

    let mut buffer: Vec<Complex<f64>> = re
        .iter()
        .zip(im.iter().chain(std::iter::repeat(&0.0)))
        .map(|(&r, &i)| Complex::new(r, i))
        .collect();

    buffer[0] *= 0.5;

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut buffer);

    // FFT shift (swap halves so 0 Hz is in the center)
    let half = n / 2;
    let shifted: Vec<Complex<f64>> = (0..n).map(|i| buffer[(i + half) % n]).collect();

    (
        shifted.iter().map(|c| c.re).collect(),
        shifted.iter().map(|c| c.im).collect(),
    )
}

/// Ascending chemical-shift axis for an `n` point spectrum.
///
/// `dwell` is the FID sampling interval in seconds. Without a spectrometer
/// frequency the axis is left in Hz.
pub fn frequency_axis(n: usize, dwell: f64, origin_frequency_mhz: f64, offset_hz: f64) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    let sw_hz = if dwell > 0.0 { 1.0 / dwell } else { n as f64 };
    let scale = if origin_frequency_mhz > 0.0 { origin_frequency_mhz } else { 1.0 };
    let half = (n / 2) as f64;
    (0..n)
        .map(|i| (offset_hz + (i as f64 - half) * sw_hz / n as f64) / scale)
        .collect()
}

// =========================================================================
//  Phase Correction
// =========================================================================

/// Apply zero-order and first-order phase correction (degrees)
pub fn phase_rotate(re: &[f64], im: &[f64], ph0_degrees: f64, ph1_degrees: f64) -> (Vec<f64>, Vec<f64>) {
    let n = re.len();
    let ph0 = ph0_degrees * PI / 180.0;
    let ph1 = ph1_degrees * PI / 180.0;

    let mut new_re = Vec::with_capacity(n);
    let mut new_im = Vec::with_capacity(n);
    for i in 0..n {
        let frac = i as f64 / n as f64;
        let (sin_p, cos_p) = (ph0 + ph1 * frac).sin_cos();
        let r = re[i];
        let m = im.get(i).copied().unwrap_or(0.0);
        new_re.push(r * cos_p - m * sin_p);
        new_im.push(r * sin_p + m * cos_p);
    }
    (new_re, new_im)
}

/// Estimate (ph0, ph1) in degrees.
///
/// Signal regions are located on the magnitude spectrum, each region gets
/// its own zero-order phase, and a weighted line through those phases
/// against position gives ph0/ph1. With fewer than two regions only ph0 is
/// searched over the whole spectrum.
pub fn estimate_phase(re: &[f64], im: &[f64]) -> (f64, f64) {
    let n = re.len();
    if n == 0 {
        return (0.0, 0.0);
    }

    let regions = signal_regions(re, im);
    if regions.len() < 2 {
        let ph0 = search_ph0(re, im, 0, n);
        return (normalize_degrees(ph0), 0.0);
    }

    // (position fraction, phase, weight)
    let mut points: Vec<(f64, f64, f64)> = Vec::with_capacity(regions.len());
    for &(start, end) in &regions {
        let local = search_ph0(re, im, start, end);
        let center = (start + end) as f64 / 2.0 / n as f64;
        let weight: f64 = (start..end).map(|i| re[i].hypot(im[i])).sum();
        points.push((center, local, weight));
    }

    // Unwrap so consecutive regions differ by less than half a turn
    for i in 1..points.len() {
        let prev = points[i - 1].1;
        while points[i].1 - prev > 180.0 {
            points[i].1 -= 360.0;
        }
        while points[i].1 - prev < -180.0 {
            points[i].1 += 360.0;
        }
    }

    let w_sum: f64 = points.iter().map(|p| p.2).sum();
    if w_sum <= 0.0 {
        return (0.0, 0.0);
    }
    let mean_x = points.iter().map(|p| p.0 * p.2).sum::<f64>() / w_sum;
    let mean_y = points.iter().map(|p| p.1 * p.2).sum::<f64>() / w_sum;
    let sxx: f64 = points.iter().map(|p| p.2 * (p.0 - mean_x).powi(2)).sum();
    let sxy: f64 = points.iter().map(|p| p.2 * (p.0 - mean_x) * (p.1 - mean_y)).sum();
    let ph1 = if sxx > 1e-12 { sxy / sxx } else { 0.0 };
    let ph0 = mean_y - ph1 * mean_x;

    (normalize_degrees(ph0), ph1)
}

/// Contiguous runs of the magnitude spectrum well above its median
fn signal_regions(re: &[f64], im: &[f64]) -> Vec<(usize, usize)> {
    let magnitude: Vec<f64> = re
        .iter()
        .enumerate()
        .map(|(i, r)| r.hypot(im.get(i).copied().unwrap_or(0.0)))
        .collect();
    let max = magnitude.iter().cloned().fold(0.0f64, f64::max);
    if max <= 0.0 {
        return Vec::new();
    }
    let threshold = (median(&magnitude) * 5.0).max(max * 0.05);

    let mut regions = Vec::new();
    let mut start: Option<usize> = None;
    for (i, &m) in magnitude.iter().enumerate() {
        match (m > threshold, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                if i - s >= 3 {
                    regions.push((s, i));
                }
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        if magnitude.len() - s >= 3 {
            regions.push((s, magnitude.len()));
        }
    }
    regions
}

/// Coarse 5° then fine 0.5° search for the ph0 maximising the absorption score
fn search_ph0(re: &[f64], im: &[f64], start: usize, end: usize) -> f64 {
    let mut best_ph0 = 0.0f64;
    let mut best_score = f64::NEG_INFINITY;

    let mut ph0 = -180.0;
    while ph0 <= 180.0 {
        let score = evaluate_phase(re, im, start, end, ph0);
        if score > best_score {
            best_score = score;
            best_ph0 = ph0;
        }
        ph0 += 5.0;
    }

    let center = best_ph0;
    let mut fine = center - 5.0;
    while fine <= center + 5.0 {
        let score = evaluate_phase(re, im, start, end, fine);
        if score > best_score {
            best_score = score;
            best_ph0 = fine;
        }
        fine += 0.5;
    }
    best_ph0
}

/// Evaluate phase quality: sum of positive real values, negatives penalised
fn evaluate_phase(re: &[f64], im: &[f64], start: usize, end: usize, ph0_deg: f64) -> f64 {
    let (sin_p, cos_p) = (ph0_deg * PI / 180.0).sin_cos();
    let mut score = 0.0;
    for i in start..end {
        let corrected = re[i] * cos_p - im.get(i).copied().unwrap_or(0.0) * sin_p;
        if corrected > 0.0 {
            score += corrected;
        } else {
            score += corrected * 2.0;
        }
    }
    score
}

fn normalize_degrees(value: f64) -> f64 {
    let mut v = value % 360.0;
    if v > 180.0 {
        v -= 360.0;
    } else if v <= -180.0 {
        v += 360.0;
    }
    v
}

// =========================================================================
//  Baseline Correction
// =========================================================================

/// Adaptive iteratively reweighted penalized least squares baseline
pub fn airpls_baseline(y: &[f64], lambda: f64, max_iterations: usize, tolerance: f64) -> Vec<f64> {
    let n = y.len();
    if n < 3 {
        return y.to_vec();
    }

    let abs_sum: f64 = y.iter().map(|v| v.abs()).sum();
    let mut weights = vec![1.0; n];
    let mut baseline = y.to_vec();

    for iteration in 1..=max_iterations.max(1) {
        baseline = whittaker_smooth(y, &weights, lambda);

        let mut neg_sum = 0.0;
        let mut neg_max = 0.0f64;
        for (v, b) in y.iter().zip(&baseline) {
            let d = v - b;
            if d < 0.0 {
                neg_sum += -d;
                neg_max = neg_max.max(-d);
            }
        }
        if neg_sum < tolerance * abs_sum || neg_sum == 0.0 {
            break;
        }

        let t = iteration as f64;
        for i in 0..n {
            let d = y[i] - baseline[i];
            weights[i] = if d >= 0.0 { 0.0 } else { (t * -d / neg_sum).exp() };
        }
        let edge = (t * neg_max / neg_sum).exp();
        weights[0] = edge;
        weights[n - 1] = edge;
    }
    baseline
}

/// Solve (W + λ DᵀD) z = W y with D the second-difference operator
fn whittaker_smooth(y: &[f64], weights: &[f64], lambda: f64) -> Vec<f64> {
    let n = y.len();
    // DᵀD bands
    let mut a0 = vec![6.0 * lambda; n];
    let mut a1 = vec![-4.0 * lambda; n - 1];
    let a2 = vec![lambda; n - 2];
    a0[0] = lambda;
    a0[n - 1] = lambda;
    if n > 3 {
        a0[1] = 5.0 * lambda;
        a0[n - 2] = 5.0 * lambda;
    } else {
        a0[1] = 4.0 * lambda;
    }
    a1[0] = -2.0 * lambda;
    a1[n - 2] = -2.0 * lambda;

    let mut rhs = Vec::with_capacity(n);
    for i in 0..n {
        a0[i] += weights[i];
        rhs.push(weights[i] * y[i]);
    }
    solve_pentadiagonal(&a0, &a1, &a2, &rhs)
}

/// LDLᵀ solve of a symmetric pentadiagonal system given its three bands
fn solve_pentadiagonal(a0: &[f64], a1: &[f64], a2: &[f64], b: &[f64]) -> Vec<f64> {
    let n = a0.len();
    let mut d = vec![0.0; n];
    let mut l1 = vec![0.0; n + 1];
    let mut l2 = vec![0.0; n + 2];

    for i in 0..n {
        let mut di = a0[i];
        if i >= 1 {
            di -= l1[i] * l1[i] * d[i - 1];
        }
        if i >= 2 {
            di -= l2[i] * l2[i] * d[i - 2];
        }
        d[i] = if di.abs() < 1e-300 { 1e-300 } else { di };
        if i + 2 < n {
            l2[i + 2] = a2[i] / d[i];
        }
        if i + 1 < n {
            let mut v = a1[i];
            if i >= 1 {
                v -= l2[i + 1] * l1[i] * d[i - 1];
            }
            l1[i + 1] = v / d[i];
        }
    }

    let mut z = vec![0.0; n];
    for i in 0..n {
        let mut v = b[i];
        if i >= 1 {
            v -= l1[i] * z[i - 1];
        }
        if i >= 2 {
            v -= l2[i] * z[i - 2];
        }
        z[i] = v;
    }
    for i in 0..n {
        z[i] /= d[i];
    }
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut v = z[i];
        if i + 1 < n {
            v -= l1[i + 1] * x[i + 1];
        }
        if i + 2 < n {
            v -= l2[i + 2] * x[i + 2];
        }
        x[i] = v;
    }
    x
}

/// Iterative polynomial baseline: points above the current fit are clipped
/// down to it and the fit repeated, so peaks stop pulling the curve up
pub fn polynomial_baseline(x: &[f64], y: &[f64], degree: usize, iterations: usize) -> Vec<f64> {
    let n = y.len();
    if n == 0 {
        return Vec::new();
    }
    let (lo, hi) = x
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let span = if hi > lo { hi - lo } else { 1.0 };
    let t: Vec<f64> = x.iter().map(|v| 2.0 * (v - lo) / span - 1.0).collect();

    let mut work = y.to_vec();
    let mut fit = vec![0.0; n];
    for _ in 0..iterations.max(1) {
        let coefficients = match polyfit(&t, &work, degree) {
            Some(c) => c,
            None => break,
        };
        fit = t.iter().map(|&ti| polyval(&coefficients, ti)).collect();
        for i in 0..n {
            work[i] = work[i].min(fit[i]);
        }
    }
    fit
}

/// Linear baseline through the mean of the first and last 10% of the spectrum
pub fn linear_baseline(y: &[f64]) -> Vec<f64> {
    let n = y.len();
    if n == 0 {
        return Vec::new();
    }
    let edge = ((n as f64 * 0.1) as usize).max(1);
    let left_mean: f64 = y[..edge].iter().sum::<f64>() / edge as f64;
    let right_mean: f64 = y[n - edge..].iter().sum::<f64>() / edge as f64;
    (0..n)
        .map(|i| left_mean + (right_mean - left_mean) * (i as f64 / n as f64))
        .collect()
}

// =========================================================================
//  Statistics & linear algebra helpers
// =========================================================================

pub fn median(values: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Mean and population standard deviation
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Trapezoidal integral of `y` over `x` (absolute step widths)
pub fn trapezoid(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| (xs[1] - xs[0]).abs() * (ys[0] + ys[1]) / 2.0)
        .sum()
}

/// Least-squares polynomial coefficients, lowest order first
pub fn polyfit(x: &[f64], y: &[f64], degree: usize) -> Option<Vec<f64>> {
    let m = degree + 1;
    if x.len() < m {
        return None;
    }
    let mut ata = vec![vec![0.0; m]; m];
    let mut aty = vec![0.0; m];
    for (&xi, &yi) in x.iter().zip(y) {
        let powers: Vec<f64> = (0..m).map(|k| xi.powi(k as i32)).collect();
        for r in 0..m {
            aty[r] += powers[r] * yi;
            for c in 0..m {
                ata[r][c] += powers[r] * powers[c];
            }
        }
    }
    solve_linear(ata, aty)
}

pub fn polyval(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Gaussian elimination with partial pivoting; None for singular systems
pub fn solve_linear(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-14 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let sum: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - sum) / a[row][row];
    }
    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}
