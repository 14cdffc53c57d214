/// Joint Lorentzian fitting (Levenberg–Marquardt)
///
/// A line is `height · w² / (w² + 4(x − center)²)` with `w` the full width at
/// half maximum, so `height` is the value at the top.

use crate::pipeline::processing::solve_linear;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lorentzian {
    pub center: f64,
    pub height: f64,
    pub width: f64,
}

impl Lorentzian {
    pub fn value(&self, x: f64) -> f64 {
        let w2 = self.width * self.width;
        let d = x - self.center;
        self.height * w2 / (w2 + 4.0 * d * d)
    }

    /// Partial derivatives with respect to (center, height, width)
    fn gradient(&self, x: f64) -> [f64; 3] {
        let w = self.width;
        let w2 = w * w;
        let d = x - self.center;
        let denom = w2 + 4.0 * d * d;
        let denom2 = denom * denom;
        [
            self.height * w2 * 8.0 * d / denom2,
            w2 / denom,
            self.height * 8.0 * w * d * d / denom2,
        ]
    }

    /// Area under the line
    pub fn area(&self) -> f64 {
        std::f64::consts::PI * self.height * self.width.abs() / 2.0
    }
}

pub fn sum_of_lorentzians(lines: &[Lorentzian], x: f64) -> f64 {
    lines.iter().map(|l| l.value(x)).sum()
}

#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    pub max_iterations: usize,
    pub initial_damping: f64,
    /// Stop when the relative change of the squared error falls below this
    pub tolerance: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            initial_damping: 1e-2,
            tolerance: 1e-10,
        }
    }
}

fn squared_error(x: &[f64], y: &[f64], lines: &[Lorentzian]) -> f64 {
    x.iter()
        .zip(y)
        .map(|(&xi, &yi)| {
            let r = yi - sum_of_lorentzians(lines, xi);
            r * r
        })
        .sum()
}

fn to_lines(params: &[f64]) -> Vec<Lorentzian> {
    params
        .chunks(3)
        .map(|c| Lorentzian {
            center: c[0],
            height: c[1],
            width: c[2].abs().max(f64::EPSILON),
        })
        .collect()
}

/// Fit all `initial` lines jointly to `(x, y)`.
///
/// Centers are kept inside the x span of the data. Returns the initial lines
/// unchanged when there is nothing to fit.
pub fn fit_lorentzians(x: &[f64], y: &[f64], initial: &[Lorentzian], options: &FitOptions) -> Vec<Lorentzian> {
    let p = initial.len() * 3;
    if initial.is_empty() || x.len() < p || x.len() != y.len() {
        return initial.to_vec();
    }
    let (x_min, x_max) = x
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    let mut params: Vec<f64> = initial
        .iter()
        .flat_map(|l| [l.center, l.height, l.width])
        .collect();
    let mut lines = to_lines(&params);
    let mut error = squared_error(x, y, &lines);
    let mut damping = options.initial_damping;

    for iteration in 0..options.max_iterations {
        // Normal equations J^T J and J^T r
        let mut jtj = vec![vec![0.0; p]; p];
        let mut jtr = vec![0.0; p];
        let mut row = vec![0.0; p];
        for (&xi, &yi) in x.iter().zip(y) {
            let r = yi - sum_of_lorentzians(&lines, xi);
            for (k, line) in lines.iter().enumerate() {
                let g = line.gradient(xi);
                row[3 * k..3 * k + 3].copy_from_slice(&g);
            }
            for a in 0..p {
                jtr[a] += row[a] * r;
                for b in a..p {
                    jtj[a][b] += row[a] * row[b];
                }
            }
        }
        for a in 0..p {
            for b in 0..a {
                jtj[a][b] = jtj[b][a];
            }
        }

        let mut improved = false;
        while damping < 1e12 {
            let mut system = jtj.clone();
            for (a, r) in system.iter_mut().enumerate() {
                r[a] += damping * jtj[a][a].max(1e-12);
            }
            let Some(step) = solve_linear(system, jtr.clone()) else {
                damping *= 10.0;
                continue;
            };
            let mut trial: Vec<f64> = params.iter().zip(&step).map(|(v, s)| v + s).collect();
            for c in trial.chunks_mut(3) {
                c[0] = c[0].clamp(x_min, x_max);
                c[2] = c[2].abs();
            }
            let trial_lines = to_lines(&trial);
            let trial_error = squared_error(x, y, &trial_lines);
            if trial_error.is_finite() && trial_error < error {
                let relative = (error - trial_error) / error.max(f64::MIN_POSITIVE);
                params = trial;
                lines = trial_lines;
                error = trial_error;
                damping = (damping / 10.0).max(1e-12);
                improved = true;
                if relative < options.tolerance {
                    log::debug!("Lorentzian fit converged after {} iterations", iteration + 1);
                    return lines;
                }
                break;
            }
            damping *= 10.0;
        }
        if !improved {
            break;
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(lines: &[Lorentzian]) -> (Vec<f64>, Vec<f64>) {
        let x: Vec<f64> = (0..400).map(|i| i as f64 * 0.01).collect();
        let y = x.iter().map(|&v| sum_of_lorentzians(lines, v)).collect();
        (x, y)
    }

    #[test]
    fn test_single_line_recovered() {
        let truth = [Lorentzian { center: 2.0, height: 5.0, width: 0.1 }];
        let (x, y) = sample(&truth);
        let start = [Lorentzian { center: 2.03, height: 4.0, width: 0.15 }];
        let fitted = fit_lorentzians(&x, &y, &start, &FitOptions::default());
        assert!((fitted[0].center - 2.0).abs() < 1e-4);
        assert!((fitted[0].height - 5.0).abs() < 1e-3);
        assert!((fitted[0].width - 0.1).abs() < 1e-4);
    }

    #[test]
    fn test_overlapping_pair_fitted_jointly() {
        let truth = [
            Lorentzian { center: 1.9, height: 3.0, width: 0.08 },
            Lorentzian { center: 2.05, height: 2.0, width: 0.08 },
        ];
        let (x, y) = sample(&truth);
        let start = [
            Lorentzian { center: 1.91, height: 3.3, width: 0.1 },
            Lorentzian { center: 2.04, height: 2.4, width: 0.1 },
        ];
        let fitted = fit_lorentzians(&x, &y, &start, &FitOptions::default());
        assert!((fitted[0].center - 1.9).abs() < 1e-3);
        assert!((fitted[1].center - 2.05).abs() < 1e-3);
        assert!((fitted[1].height - 2.0).abs() < 1e-2);
    }

    #[test]
    fn test_area() {
        let l = Lorentzian { center: 0.0, height: 2.0, width: 1.0 };
        assert!((l.area() - std::f64::consts::PI).abs() < 1e-12);
    }
}
