use serde::{Deserialize, Serialize};

use crate::pipeline::error::ProcessingError;

/// Acquisition metadata carried alongside the numeric arrays of a 1D spectrum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectrumInfo {
    pub is_complex: bool,
    pub is_fid: bool,
    pub nucleus: String,
    /// Spectrometer frequency for this nucleus, in MHz
    pub origin_frequency: f64,
    /// Group delay of the digital filter, in points (fractional allowed)
    #[serde(default)]
    pub digital_filter: f64,
    /// Carrier offset from the reference frequency, in Hz
    #[serde(default)]
    pub frequency_offset: f64,
    /// Set once the integer part of the group delay has been rotated out
    #[serde(default)]
    pub digital_filter_applied: bool,
}

impl Default for SpectrumInfo {
    fn default() -> Self {
        Self {
            is_complex: true,
            is_fid: true,
            nucleus: "1H".to_string(),
            origin_frequency: 400.0,
            digital_filter: 0.0,
            frequency_offset: 0.0,
            digital_filter_applied: false,
        }
    }
}

/// Numeric arrays of one 1D spectrum.
///
/// `x` is time (s) while `info.is_fid` holds and ppm afterwards. `im` is empty
/// for real spectra. Buffers are values: filters never mutate them, they
/// build a new buffer and the caller swaps it in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumBuffer {
    pub x: Vec<f64>,
    pub re: Vec<f64>,
    #[serde(default)]
    pub im: Vec<f64>,
    pub info: SpectrumInfo,
}

impl SpectrumBuffer {
    /// Build a buffer, checking the array/flag invariants
    pub fn new(
        x: Vec<f64>,
        re: Vec<f64>,
        im: Vec<f64>,
        info: SpectrumInfo,
    ) -> Result<Self, ProcessingError> {
        let buffer = Self { x, re, im, info };
        buffer.validate()?;
        Ok(buffer)
    }

    pub fn validate(&self) -> Result<(), ProcessingError> {
        if self.x.len() != self.re.len() {
            return Err(ProcessingError::InvalidBuffer(format!(
                "x has {} points but re has {}",
                self.x.len(),
                self.re.len()
            )));
        }
        if !self.im.is_empty() && self.im.len() != self.re.len() {
            return Err(ProcessingError::InvalidBuffer(format!(
                "im has {} points but re has {}",
                self.im.len(),
                self.re.len()
            )));
        }
        if self.info.is_complex && self.im.is_empty() && !self.re.is_empty() {
            return Err(ProcessingError::InvalidBuffer(
                "complex spectrum without imaginary channel".to_string(),
            ));
        }
        if !self.info.is_complex && !self.im.is_empty() {
            return Err(ProcessingError::InvalidBuffer(
                "real spectrum carries an imaginary channel".to_string(),
            ));
        }
        if self.info.is_fid && !self.info.is_complex {
            return Err(ProcessingError::InvalidBuffer(
                "an FID must be complex".to_string(),
            ));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.re.len()
    }

    pub fn is_empty(&self) -> bool {
        self.re.is_empty()
    }

    /// Get the maximum absolute value of the real channel
    pub fn max_abs(&self) -> f64 {
        self.re.iter().map(|v| v.abs()).fold(0.0f64, f64::max)
    }

    /// Spacing between consecutive x values (dwell time for an FID)
    pub fn x_step(&self) -> Option<f64> {
        if self.x.len() < 2 {
            return None;
        }
        let step = self.x[1] - self.x[0];
        if step.is_finite() && step != 0.0 {
            Some(step)
        } else {
            None
        }
    }

    /// Index of the x value closest to `target`
    pub fn closest_index(&self, target: f64) -> usize {
        closest_index(&self.x, target)
    }

    /// Inclusive index window covering `[from, to]` in x space
    pub fn index_window(&self, from: f64, to: f64) -> (usize, usize) {
        let a = self.closest_index(from);
        let b = self.closest_index(to);
        (a.min(b), a.max(b))
    }
}

/// Index of the value in `xs` closest to `target`; 0 for an empty slice
pub fn closest_index(xs: &[f64], target: f64) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, &v) in xs.iter().enumerate() {
        let dist = (v - target).abs();
        if dist < best_dist {
            best_dist = dist;
            best = i;
        }
    }
    best
}

/// Acquisition metadata for a 2D spectrum; index 0 is the direct (x) axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spectrum2DInfo {
    pub nucleus: [String; 2],
    pub origin_frequency: [f64; 2],
    #[serde(default)]
    pub is_fid: bool,
}

impl Spectrum2DInfo {
    /// Homonuclear experiments (COSY, TOCSY, NOESY) share both axes' nucleus
    pub fn is_homonuclear(&self) -> bool {
        self.nucleus[0] == self.nucleus[1]
    }
}

/// Frequency-domain 2D spectrum: `z[row][col]`, rows follow y, columns x.
/// Both axes run linearly from min to max.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spectrum2D {
    pub z: Vec<Vec<f64>>,
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub info: Spectrum2DInfo,
}

impl Spectrum2D {
    pub fn rows(&self) -> usize {
        self.z.len()
    }

    pub fn cols(&self) -> usize {
        self.z.first().map(|r| r.len()).unwrap_or(0)
    }

    pub fn validate(&self) -> Result<(), ProcessingError> {
        let cols = self.cols();
        if self.z.iter().any(|row| row.len() != cols) {
            return Err(ProcessingError::InvalidBuffer(
                "2D matrix rows differ in length".to_string(),
            ));
        }
        Ok(())
    }

    pub fn x_step(&self) -> f64 {
        let cols = self.cols();
        if cols < 2 {
            0.0
        } else {
            (self.max_x - self.min_x) / (cols - 1) as f64
        }
    }

    pub fn y_step(&self) -> f64 {
        let rows = self.rows();
        if rows < 2 {
            0.0
        } else {
            (self.max_y - self.min_y) / (rows - 1) as f64
        }
    }

    pub fn col_to_x(&self, col: f64) -> f64 {
        self.min_x + col * self.x_step()
    }

    pub fn row_to_y(&self, row: f64) -> f64 {
        self.min_y + row * self.y_step()
    }

    pub fn x_to_col(&self, x: f64) -> usize {
        axis_to_index(x, self.min_x, self.x_step(), self.cols())
    }

    pub fn y_to_row(&self, y: f64) -> usize {
        axis_to_index(y, self.min_y, self.y_step(), self.rows())
    }

    /// Largest |z| in the matrix
    pub fn max_abs(&self) -> f64 {
        self.z
            .iter()
            .flat_map(|row| row.iter())
            .map(|v| v.abs())
            .fold(0.0f64, f64::max)
    }
}

fn axis_to_index(value: f64, min: f64, step: f64, len: usize) -> usize {
    if len == 0 || step == 0.0 {
        return 0;
    }
    let idx = ((value - min) / step).round();
    idx.clamp(0.0, (len - 1) as f64) as usize
}
