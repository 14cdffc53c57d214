/// First-order multiplet analysis
///
/// Lines are taken in Hz. The spacing between the first two lines is taken as
/// a coupling and removed by deconvolving a doublet of that size; this is
/// repeated until one line is left. Equal couplings are then counted into
/// d/t/q/p/h/hept patterns, largest coupling first.

use thiserror::Error;

use crate::data::model::{Coupling, Multiplicity, Peak};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MultiplicityError {
    #[error("no peaks to analyse")]
    NoPeaks,
    #[error("too many lines for a first-order pattern: {0}")]
    TooManyLines(usize),
    #[error("lines cannot be explained by a {0:.2} Hz coupling")]
    Unresolved(f64),
    #[error("spectrometer frequency must be positive, got {0}")]
    InvalidFrequency(f64),
}

#[derive(Debug, Clone, Copy)]
pub struct MultipletOptions {
    /// Two line positions closer than this (Hz) are the same position
    pub tolerance_hz: f64,
    /// Relative intensity left over after subtracting a line that still counts as a line
    pub intensity_tolerance: f64,
    pub max_lines: usize,
}

impl Default for MultipletOptions {
    fn default() -> Self {
        Self {
            tolerance_hz: 0.5,
            intensity_tolerance: 0.3,
            max_lines: 64,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Line {
    hz: f64,
    weight: f64,
}

/// Couplings explaining the peaks of one signal; empty for a singlet
pub fn analyse_multiplet(
    peaks: &[Peak],
    frequency_mhz: f64,
    options: &MultipletOptions,
) -> Result<Vec<Coupling>, MultiplicityError> {
    if peaks.is_empty() {
        return Err(MultiplicityError::NoPeaks);
    }
    if !(frequency_mhz > 0.0) {
        return Err(MultiplicityError::InvalidFrequency(frequency_mhz));
    }
    if peaks.len() > options.max_lines {
        return Err(MultiplicityError::TooManyLines(peaks.len()));
    }
    let mut lines: Vec<Line> = peaks
        .iter()
        .map(|p| Line {
            hz: p.x * frequency_mhz,
            weight: p.y.abs().max(f64::MIN_POSITIVE),
        })
        .collect();
    lines.sort_by(|a, b| a.hz.total_cmp(&b.hz));

    let mut js: Vec<f64> = Vec::new();
    while lines.len() > 1 {
        let j = lines[1].hz - lines[0].hz;
        if j < options.tolerance_hz {
            return Err(MultiplicityError::Unresolved(j));
        }
        lines = remove_doublet(&lines, j, options).ok_or(MultiplicityError::Unresolved(j))?;
        js.push(j);
    }
    Ok(count_couplings(js, options.tolerance_hz))
}

/// Undo the splitting of every line by `j`; None when some line has no partner
fn remove_doublet(lines: &[Line], j: f64, options: &MultipletOptions) -> Option<Vec<Line>> {
    let mut remaining: Vec<Line> = lines.to_vec();
    let mut result = Vec::with_capacity(lines.len() / 2 + 1);
    while !remaining.is_empty() {
        let first = remaining.remove(0);
        let partner = remaining
            .iter()
            .enumerate()
            .filter(|(_, l)| (l.hz - first.hz - j).abs() < options.tolerance_hz)
            .min_by(|a, b| (a.1.hz - first.hz - j).abs().total_cmp(&(b.1.hz - first.hz - j).abs()))
            .map(|(i, _)| i)?;
        let left_over = remaining[partner].weight - first.weight;
        if left_over > options.intensity_tolerance * first.weight {
            remaining[partner].weight = left_over;
        } else {
            remaining.remove(partner);
        }
        result.push(first);
    }
    Some(result)
}

fn count_couplings(mut js: Vec<f64>, tolerance_hz: f64) -> Vec<Coupling> {
    js.sort_by(|a, b| b.total_cmp(a));
    let mut groups: Vec<Vec<f64>> = Vec::new();
    for j in js {
        match groups.last_mut() {
            Some(group) if (group[0] - j).abs() < tolerance_hz => group.push(j),
            _ => groups.push(vec![j]),
        }
    }
    groups
        .into_iter()
        .map(|group| Coupling {
            multiplicity: Multiplicity::from_equivalent_nuclei(group.len()),
            coupling: group.iter().sum::<f64>() / group.len() as f64,
        })
        .collect()
}

/// Split peaks (any order) into signals: a gap wider than `max_j_hz` starts a new signal
pub fn group_signals(peaks: &[Peak], frequency_mhz: f64, max_j_hz: f64) -> Vec<Vec<Peak>> {
    let mut sorted = peaks.to_vec();
    sorted.sort_by(|a, b| a.x.total_cmp(&b.x));
    let mut groups: Vec<Vec<Peak>> = Vec::new();
    for peak in sorted {
        match groups.last_mut() {
            Some(group)
                if group
                    .last()
                    .map_or(false, |last| (peak.x - last.x) * frequency_mhz <= max_j_hz) =>
            {
                group.push(peak)
            }
            _ => groups.push(vec![peak]),
        }
    }
    groups
}

/// Intensity-weighted centre of a group of peaks
pub fn weighted_center(peaks: &[Peak]) -> f64 {
    let total: f64 = peaks.iter().map(|p| p.y.abs()).sum();
    if total == 0.0 {
        return peaks.iter().map(|p| p.x).sum::<f64>() / peaks.len().max(1) as f64;
    }
    peaks.iter().map(|p| p.x * p.y.abs()).sum::<f64>() / total
}

#[cfg(test)]
mod tests {
    use super::*;

    const MHZ: f64 = 400.0;

    fn lines(hz_and_weight: &[(f64, f64)]) -> Vec<Peak> {
        hz_and_weight
            .iter()
            .map(|&(hz, w)| Peak::new(1.0 + hz / MHZ, w, None))
            .collect()
    }

    fn symbols(js: &[Coupling]) -> String {
        js.iter().map(|j| j.multiplicity.symbol()).collect()
    }

    #[test]
    fn test_singlet() {
        let js = analyse_multiplet(&lines(&[(0.0, 1.0)]), MHZ, &MultipletOptions::default()).unwrap();
        assert!(js.is_empty());
    }

    #[test]
    fn test_triplet_and_quartet() {
        let t = analyse_multiplet(
            &lines(&[(0.0, 1.0), (7.0, 2.0), (14.0, 1.0)]),
            MHZ,
            &MultipletOptions::default(),
        )
        .unwrap();
        assert_eq!(symbols(&t), "t");
        assert!((t[0].coupling - 7.0).abs() < 1e-6);

        let q = analyse_multiplet(
            &lines(&[(0.0, 1.0), (7.0, 3.0), (14.0, 3.0), (21.0, 1.0)]),
            MHZ,
            &MultipletOptions::default(),
        )
        .unwrap();
        assert_eq!(symbols(&q), "q");
    }

    #[test]
    fn test_doublet_of_doublets_largest_first() {
        let js = analyse_multiplet(
            &lines(&[(0.0, 1.0), (2.0, 1.0), (10.0, 1.0), (12.0, 1.0)]),
            MHZ,
            &MultipletOptions::default(),
        )
        .unwrap();
        assert_eq!(symbols(&js), "dd");
        assert!((js[0].coupling - 10.0).abs() < 1e-6);
        assert!((js[1].coupling - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_doublet_of_triplets() {
        // d 10 Hz, t 3 Hz
        let js = analyse_multiplet(
            &lines(&[(0.0, 1.0), (3.0, 2.0), (6.0, 1.0), (10.0, 1.0), (13.0, 2.0), (16.0, 1.0)]),
            MHZ,
            &MultipletOptions::default(),
        )
        .unwrap();
        assert_eq!(symbols(&js), "dt");
    }

    #[test]
    fn test_irregular_pattern_fails() {
        let err = analyse_multiplet(
            &lines(&[(0.0, 1.0), (3.0, 1.0), (11.0, 1.0)]),
            MHZ,
            &MultipletOptions::default(),
        );
        assert!(matches!(err, Err(MultiplicityError::Unresolved(_))));
    }

    #[test]
    fn test_group_signals_by_max_j() {
        let peaks = lines(&[(0.0, 1.0), (7.0, 1.0), (60.0, 1.0)]);
        let groups = group_signals(&peaks, MHZ, 20.0);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
    }
}
