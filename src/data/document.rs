/// Stored spectrum documents
///
/// A document holds the raw data of each spectrum together with its filter
/// history and annotations. Processed data is never stored: it is rebuilt by
/// replaying the filters. Files are migrated before being deserialized.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::pipeline::error::ProcessingError;
use crate::pipeline::history::{FilterEntry, FilterPipeline};
use super::migration::{migrate, CURRENT_VERSION};
use super::model::{Peaks, Ranges, Zones};
use super::spectrum::{Spectrum2D, Spectrum2DInfo, SpectrumBuffer, SpectrumInfo};

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid spectrum {id}: {source}")]
    Spectrum { id: String, source: ProcessingError },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Data1D {
    pub x: Vec<f64>,
    pub re: Vec<f64>,
    #[serde(default)]
    pub im: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Data2D {
    pub z: Vec<Vec<f64>>,
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum1DDocument {
    pub id: String,
    pub info: SpectrumInfo,
    /// Raw data, before any filter
    pub data: Data1D,
    #[serde(default)]
    pub filters: Vec<FilterEntry>,
    #[serde(default)]
    pub peaks: Peaks,
    #[serde(default)]
    pub ranges: Ranges,
}

impl Spectrum1DDocument {
    pub fn new(id: &str, buffer: &SpectrumBuffer) -> Self {
        Self {
            id: id.to_string(),
            info: buffer.info.clone(),
            data: Data1D {
                x: buffer.x.clone(),
                re: buffer.re.clone(),
                im: buffer.im.clone(),
            },
            filters: Vec::new(),
            peaks: Peaks::default(),
            ranges: Ranges::default(),
        }
    }

    pub fn raw_buffer(&self) -> Result<SpectrumBuffer, ProcessingError> {
        SpectrumBuffer::new(
            self.data.x.clone(),
            self.data.re.clone(),
            self.data.im.clone(),
            self.info.clone(),
        )
    }

    /// Pipeline with the stored filters replayed on the raw data
    pub fn pipeline(&self) -> Result<FilterPipeline, ProcessingError> {
        FilterPipeline::with_entries(&self.id, self.raw_buffer()?, self.filters.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum2DDocument {
    pub id: String,
    pub info: Spectrum2DInfo,
    pub data: Data2D,
    #[serde(default)]
    pub zones: Zones,
}

impl Spectrum2DDocument {
    pub fn spectrum(&self) -> Result<Spectrum2D, ProcessingError> {
        let spectrum = Spectrum2D {
            z: self.data.z.clone(),
            min_x: self.data.min_x,
            max_x: self.data.max_x,
            min_y: self.data.min_y,
            max_y: self.data.max_y,
            info: self.info.clone(),
        };
        spectrum.validate()?;
        Ok(spectrum)
    }
}

/// 1D and 2D entries are told apart by the shape of their `data`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpectrumDocument {
    OneD(Spectrum1DDocument),
    TwoD(Spectrum2DDocument),
}

impl SpectrumDocument {
    pub fn id(&self) -> &str {
        match self {
            SpectrumDocument::OneD(s) => &s.id,
            SpectrumDocument::TwoD(s) => &s.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NmrDocument {
    pub version: u64,
    #[serde(default)]
    pub spectra: Vec<SpectrumDocument>,
}

impl Default for NmrDocument {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            spectra: Vec::new(),
        }
    }
}

impl NmrDocument {
    /// Parse a document of any version
    pub fn from_json(text: &str) -> Result<Self, DocumentError> {
        let raw: serde_json::Value = serde_json::from_str(text)?;
        let doc: NmrDocument = serde_json::from_value(migrate(raw))?;
        for spectrum in &doc.spectra {
            let checked = match spectrum {
                SpectrumDocument::OneD(s) => s.raw_buffer().map(|_| ()),
                SpectrumDocument::TwoD(s) => s.spectrum().map(|_| ()),
            };
            checked.map_err(|source| DocumentError::Spectrum {
                id: spectrum.id().to_string(),
                source,
            })?;
        }
        Ok(doc)
    }

    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let text = std::fs::read_to_string(path)?;
        let doc = Self::from_json(&text)?;
        log::info!("Loaded {} spectra from {}", doc.spectra.len(), path.display());
        Ok(doc)
    }

    pub fn to_json(&self) -> Result<String, DocumentError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), DocumentError> {
        std::fs::write(path, self.to_json()?)?;
        log::info!("Saved {} spectra to {}", self.spectra.len(), path.display());
        Ok(())
    }
}
