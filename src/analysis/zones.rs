/// 2D zone detection
///
/// Points above the threshold are grouped into 8-connected components; each
/// component is a zone whose local maxima become its signals. Homonuclear
/// spectra additionally go through a symmetry pass pairing every off-diagonal
/// zone with its mirror across the diagonal.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::data::model::{new_id, AtomCount, Delta, FromTo, Peak2D, Signal2D, SignalKind, Zone};
use crate::data::spectrum::Spectrum2D;
use crate::pipeline::error::ProcessingError;
use crate::pipeline::processing::median;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ZoneDetectionOptions {
    /// Multiplier of median(|z|) giving the noise level
    pub noise_factor: f64,
    /// Multiplier of the noise level giving the detection threshold
    pub threshold_factor: f64,
    /// Points below this fraction of max |z| are never part of a zone
    pub max_percent_cutoff: f64,
    /// Zones with fewer points are dropped by the clean pass
    pub min_points: usize,
    /// Zones whose top stays below `clean_ratio × threshold` are dropped by the clean pass
    pub clean_ratio: f64,
    pub clean: bool,
    pub enhance_symmetry: bool,
    /// Largest distance (ppm) between a zone centre and its mirror's centre
    pub symmetry_tolerance: f64,
}

impl Default for ZoneDetectionOptions {
    fn default() -> Self {
        Self {
            noise_factor: 3.0,
            threshold_factor: 1.0,
            max_percent_cutoff: 0.03,
            min_points: 3,
            clean_ratio: 1.5,
            clean: true,
            enhance_symmetry: true,
            symmetry_tolerance: 0.05,
        }
    }
}

/// Zone candidate in matrix coordinates
#[derive(Debug, Clone)]
struct Component {
    rows: (usize, usize),
    cols: (usize, usize),
    points: usize,
    top: f64,
    maxima: Vec<(usize, usize)>,
}

fn detection_threshold(spectrum: &Spectrum2D, options: &ZoneDetectionOptions) -> f64 {
    let values: Vec<f64> = spectrum.z.iter().flatten().map(|v| v.abs()).collect();
    let noise = median(&values) * options.noise_factor;
    (noise * options.threshold_factor).max(spectrum.max_abs() * options.max_percent_cutoff)
}

fn is_local_max(z: &[Vec<f64>], row: usize, col: usize) -> bool {
    let v = z[row][col].abs();
    for dr in -1i64..=1 {
        for dc in -1i64..=1 {
            if dr == 0 && dc == 0 {
                continue;
            }
            let r = row as i64 + dr;
            let c = col as i64 + dc;
            if r < 0 || c < 0 || r as usize >= z.len() || c as usize >= z[0].len() {
                continue;
            }
            let other = z[r as usize][c as usize].abs();
            // Plateaus: only the first point in scan order counts
            if other > v || (other == v && (dr < 0 || (dr == 0 && dc < 0))) {
                return false;
            }
        }
    }
    true
}

fn components(spectrum: &Spectrum2D, threshold: f64) -> Vec<Component> {
    let rows = spectrum.rows();
    let cols = spectrum.cols();
    let z = &spectrum.z;
    let mut seen = vec![vec![false; cols]; rows];
    let mut found = Vec::new();

    for r0 in 0..rows {
        for c0 in 0..cols {
            if seen[r0][c0] || z[r0][c0].abs() < threshold {
                continue;
            }
            let mut component = Component {
                rows: (r0, r0),
                cols: (c0, c0),
                points: 0,
                top: 0.0,
                maxima: Vec::new(),
            };
            let mut queue = VecDeque::from([(r0, c0)]);
            seen[r0][c0] = true;
            while let Some((r, c)) = queue.pop_front() {
                component.points += 1;
                component.rows = (component.rows.0.min(r), component.rows.1.max(r));
                component.cols = (component.cols.0.min(c), component.cols.1.max(c));
                component.top = component.top.max(z[r][c].abs());
                if is_local_max(z, r, c) {
                    component.maxima.push((r, c));
                }
                for (nr, nc) in neighbours(r, c, rows, cols) {
                    if !seen[nr][nc] && z[nr][nc].abs() >= threshold {
                        seen[nr][nc] = true;
                        queue.push_back((nr, nc));
                    }
                }
            }
            found.push(component);
        }
    }
    found
}

fn neighbours(r: usize, c: usize, rows: usize, cols: usize) -> impl Iterator<Item = (usize, usize)> {
    let r0 = r.saturating_sub(1);
    let c0 = c.saturating_sub(1);
    let r1 = (r + 1).min(rows - 1);
    let c1 = (c + 1).min(cols - 1);
    (r0..=r1)
        .flat_map(move |nr| (c0..=c1).map(move |nc| (nr, nc)))
        .filter(move |&(nr, nc)| nr != r || nc != c)
}

/// Sum of |z| over a block times the pixel area
fn volume(spectrum: &Spectrum2D, rows: (usize, usize), cols: (usize, usize)) -> f64 {
    let area = (spectrum.x_step() * spectrum.y_step()).abs();
    let sum: f64 = spectrum.z[rows.0..=rows.1]
        .iter()
        .flat_map(|row| row[cols.0..=cols.1].iter())
        .map(|v| v.abs())
        .sum();
    sum * area
}

fn signal_at(spectrum: &Spectrum2D, row: usize, col: usize) -> Signal2D {
    let x = spectrum.col_to_x(col as f64);
    let y = spectrum.row_to_y(row as f64);
    Signal2D {
        id: new_id(),
        x: Delta { delta: x },
        y: Delta { delta: y },
        peaks: vec![Peak2D { x, y, z: spectrum.z[row][col] }],
        kind: SignalKind::Signal,
        dia_ids: Vec::new(),
        nb_atoms: AtomCount::default(),
    }
}

fn to_zone(spectrum: &Spectrum2D, component: &Component) -> Zone {
    let half_x = spectrum.x_step().abs() / 2.0;
    let half_y = spectrum.y_step().abs() / 2.0;
    let x = FromTo::new(
        spectrum.col_to_x(component.cols.0 as f64),
        spectrum.col_to_x(component.cols.1 as f64),
    );
    let y = FromTo::new(
        spectrum.row_to_y(component.rows.0 as f64),
        spectrum.row_to_y(component.rows.1 as f64),
    );
    Zone {
        id: new_id(),
        x: FromTo { from: x.from - half_x, to: x.to + half_x },
        y: FromTo { from: y.from - half_y, to: y.to + half_y },
        absolute: volume(spectrum, component.rows, component.cols),
        kind: SignalKind::Signal,
        signals: component
            .maxima
            .iter()
            .map(|&(r, c)| signal_at(spectrum, r, c))
            .collect(),
        dia_ids: Vec::new(),
        nb_atoms: AtomCount::default(),
    }
}

/// Automatic zone picking; zones are returned sorted by x
pub fn auto_zones_detection(spectrum: &Spectrum2D, options: &ZoneDetectionOptions) -> Result<Vec<Zone>, ProcessingError> {
    spectrum.validate()?;
    if spectrum.info.is_fid {
        return Err(ProcessingError::InvalidBuffer(
            "zones need a frequency-domain spectrum".to_string(),
        ));
    }
    if spectrum.rows() == 0 || spectrum.cols() == 0 {
        return Ok(Vec::new());
    }
    let threshold = detection_threshold(spectrum, options);
    if !(threshold > 0.0) {
        return Ok(Vec::new());
    }

    let mut found = components(spectrum, threshold);
    let total = found.len();
    if options.clean {
        found.retain(|c| c.points >= options.min_points && c.top >= options.clean_ratio * threshold);
    }
    log::debug!(
        "Zones: {} components above {:.3e}, {} after cleaning",
        total,
        threshold,
        found.len()
    );

    let mut zones: Vec<(Zone, f64)> = found.iter().map(|c| (to_zone(spectrum, c), c.top)).collect();
    if options.enhance_symmetry && spectrum.info.is_homonuclear() {
        zones = enhance_symmetry(zones, options.symmetry_tolerance);
    }
    let mut zones: Vec<Zone> = zones.into_iter().map(|(z, _)| z).collect();
    zones.sort_by(|a, b| a.x.from.total_cmp(&b.x.from).then(a.y.from.total_cmp(&b.y.from)));
    Ok(zones)
}

fn on_diagonal(zone: &Zone) -> bool {
    zone.x.from <= zone.y.to && zone.y.from <= zone.x.to
}

fn center(zone: &Zone) -> (f64, f64) {
    (zone.x.center(), zone.y.center())
}

/// Pair every off-diagonal zone with the zone closest to its mirror position.
///
/// Zones are visited strongest first and a strong zone claims its mirror
/// before weaker ones can; among equally close mirrors the stronger wins.
/// Paired zones get mirrored boxes covering both extents. Off-diagonal zones
/// without a mirror are dropped.
fn enhance_symmetry(mut zones: Vec<(Zone, f64)>, tolerance: f64) -> Vec<(Zone, f64)> {
    zones.sort_by(|a, b| b.1.total_cmp(&a.1));
    let n = zones.len();
    let mut partner: Vec<Option<usize>> = vec![None; n];
    let mut keep = vec![false; n];

    for i in 0..n {
        if on_diagonal(&zones[i].0) {
            keep[i] = true;
            continue;
        }
        if partner[i].is_some() {
            continue;
        }
        let (cx, cy) = center(&zones[i].0);
        let mut best: Option<(usize, f64)> = None;
        for j in 0..n {
            if j == i || partner[j].is_some() || on_diagonal(&zones[j].0) {
                continue;
            }
            let (mx, my) = center(&zones[j].0);
            let distance = ((mx - cy).powi(2) + (my - cx).powi(2)).sqrt();
            if distance > tolerance {
                continue;
            }
            // Strict comparison: on ties the earlier (stronger) zone stays
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((j, distance));
            }
        }
        if let Some((j, _)) = best {
            partner[i] = Some(j);
            partner[j] = Some(i);
            keep[i] = true;
            keep[j] = true;
            let x = zones[i].0.x.union(&zones[j].0.y);
            let y = zones[i].0.y.union(&zones[j].0.x);
            zones[i].0.x = x;
            zones[i].0.y = y;
            zones[j].0.x = y;
            zones[j].0.y = x;
        }
    }

    let dropped = keep.iter().filter(|k| !**k).count();
    if dropped > 0 {
        log::debug!("Symmetry pass dropped {} unpaired zones", dropped);
    }
    zones
        .into_iter()
        .zip(keep)
        .filter_map(|(z, k)| k.then_some(z))
        .collect()
}

/// Manual zone over the given box: volume plus one signal at the strongest point
pub fn create_zone(spectrum: &Spectrum2D, x: FromTo, y: FromTo) -> Result<Zone, ProcessingError> {
    spectrum.validate()?;
    if spectrum.rows() == 0 || spectrum.cols() == 0 {
        return Err(ProcessingError::InvalidBuffer("empty 2D spectrum".to_string()));
    }
    if x.from == x.to || y.from == y.to {
        return Err(ProcessingError::InvalidRange { from: x.from, to: x.to });
    }
    let x = FromTo::new(x.from, x.to);
    let y = FromTo::new(y.from, y.to);
    let c0 = spectrum.x_to_col(x.from);
    let c1 = spectrum.x_to_col(x.to);
    let r0 = spectrum.y_to_row(y.from);
    let r1 = spectrum.y_to_row(y.to);
    let cols = (c0.min(c1), c0.max(c1));
    let rows = (r0.min(r1), r0.max(r1));

    let mut best = (rows.0, cols.0);
    for r in rows.0..=rows.1 {
        for c in cols.0..=cols.1 {
            if spectrum.z[r][c].abs() > spectrum.z[best.0][best.1].abs() {
                best = (r, c);
            }
        }
    }
    Ok(Zone {
        id: new_id(),
        x,
        y,
        absolute: volume(spectrum, rows, cols),
        kind: SignalKind::Signal,
        signals: vec![signal_at(spectrum, best.0, best.1)],
        dia_ids: Vec::new(),
        nb_atoms: AtomCount::default(),
    })
}
