/// Annotation model: peaks, ranges, signals, zones
///
/// These are the structures the detectors produce and the assignment model
/// links to molecule atoms. Field names serialize in the camelCase shape of
/// the JSON documents (`diaIDs`, `nbAtoms`, `originalFrom`, ...).

use serde::{Deserialize, Serialize};

/// Fresh identifier for a detected feature
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
}

impl Peak {
    pub fn new(x: f64, y: f64, width: Option<f64>) -> Self {
        Self {
            id: new_id(),
            x,
            y,
            width,
        }
    }
}

/// What a range or signal stands for; only `Signal` counts toward integration sums
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalKind {
    #[default]
    Signal,
    Reference,
    Solvent,
    Impurity,
    Standard,
}

/// First-order splitting pattern of one coupling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Multiplicity {
    #[serde(rename = "s")]
    Singlet,
    #[serde(rename = "d")]
    Doublet,
    #[serde(rename = "t")]
    Triplet,
    #[serde(rename = "q")]
    Quartet,
    #[serde(rename = "p")]
    Quintet,
    #[serde(rename = "h")]
    Sextet,
    #[serde(rename = "hept")]
    Septet,
    #[serde(rename = "m")]
    Multiplet,
}

impl Multiplicity {
    /// Pattern produced by coupling to `n` equivalent spin-1/2 nuclei
    pub fn from_equivalent_nuclei(n: usize) -> Self {
        match n {
            0 => Multiplicity::Singlet,
            1 => Multiplicity::Doublet,
            2 => Multiplicity::Triplet,
            3 => Multiplicity::Quartet,
            4 => Multiplicity::Quintet,
            5 => Multiplicity::Sextet,
            6 => Multiplicity::Septet,
            _ => Multiplicity::Multiplet,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Multiplicity::Singlet => "s",
            Multiplicity::Doublet => "d",
            Multiplicity::Triplet => "t",
            Multiplicity::Quartet => "q",
            Multiplicity::Quintet => "p",
            Multiplicity::Sextet => "h",
            Multiplicity::Septet => "hept",
            Multiplicity::Multiplet => "m",
        }
    }
}

/// Scalar coupling constant, in Hz
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coupling {
    pub multiplicity: Multiplicity,
    pub coupling: f64,
}

/// Atom tally of an assignment target.
///
/// `ambiguous` flips every time an assigned atom is removed again; the
/// documents carry it as the sign of `nbAtoms`. A zero count has no sign, so
/// an ambiguous zero is written as `nbAtomsAmbiguous: true` next to it.
/// Owners embed it with `#[serde(flatten)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "AtomCountRecord", into = "AtomCountRecord")]
pub struct AtomCount {
    pub count: u32,
    pub ambiguous: bool,
}

impl AtomCount {
    pub fn is_zero(&self) -> bool {
        self.count == 0 && !self.ambiguous
    }

    /// Signed form written to documents
    pub fn signed(&self) -> i64 {
        if self.ambiguous {
            -(self.count as i64)
        } else {
            self.count as i64
        }
    }
}

impl From<i64> for AtomCount {
    fn from(value: i64) -> Self {
        Self {
            count: value.unsigned_abs().min(u32::MAX as u64) as u32,
            ambiguous: value < 0,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtomCountRecord {
    #[serde(default, skip_serializing_if = "is_zero_count")]
    nb_atoms: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    nb_atoms_ambiguous: bool,
}

fn is_zero_count(value: &i64) -> bool {
    *value == 0
}

impl From<AtomCountRecord> for AtomCount {
    fn from(r: AtomCountRecord) -> Self {
        let mut count = AtomCount::from(r.nb_atoms);
        if count.count == 0 {
            count.ambiguous = r.nb_atoms_ambiguous;
        }
        count
    }
}

impl From<AtomCount> for AtomCountRecord {
    fn from(c: AtomCount) -> Self {
        Self {
            nb_atoms: c.signed(),
            nb_atoms_ambiguous: c.count == 0 && c.ambiguous,
        }
    }
}

/// A multiplet inside a range. Its multiplicity string is always derived
/// from `js` (and the peak count when there are no couplings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SignalRecord", into = "SignalRecord")]
pub struct Signal {
    pub id: String,
    pub delta: f64,
    pub kind: SignalKind,
    pub js: Vec<Coupling>,
    pub peaks: Vec<Peak>,
    pub dia_ids: Vec<String>,
    pub nb_atoms: AtomCount,
}

impl Signal {
    pub fn new(delta: f64, js: Vec<Coupling>, peaks: Vec<Peak>) -> Self {
        Self {
            id: new_id(),
            delta,
            kind: SignalKind::Signal,
            js,
            peaks,
            dia_ids: Vec::new(),
            nb_atoms: AtomCount::default(),
        }
    }

    pub fn multiplicity(&self) -> String {
        if self.js.is_empty() {
            return if self.peaks.len() <= 1 { "s" } else { "m" }.to_string();
        }
        self.js.iter().map(|j| j.multiplicity.symbol()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignalRecord {
    id: String,
    delta: f64,
    #[serde(default)]
    kind: SignalKind,
    /// Written for readers; ignored when reading
    #[serde(default)]
    multiplicity: Option<String>,
    #[serde(default)]
    js: Vec<Coupling>,
    #[serde(default)]
    peaks: Vec<Peak>,
    #[serde(rename = "diaIDs", default, skip_serializing_if = "Vec::is_empty")]
    dia_ids: Vec<String>,
    #[serde(flatten)]
    nb_atoms: AtomCount,
}

impl From<SignalRecord> for Signal {
    fn from(r: SignalRecord) -> Self {
        Self {
            id: r.id,
            delta: r.delta,
            kind: r.kind,
            js: r.js,
            peaks: r.peaks,
            dia_ids: r.dia_ids,
            nb_atoms: r.nb_atoms,
        }
    }
}

impl From<Signal> for SignalRecord {
    fn from(s: Signal) -> Self {
        let multiplicity = Some(s.multiplicity());
        Self {
            id: s.id,
            delta: s.delta,
            kind: s.kind,
            multiplicity,
            js: s.js,
            peaks: s.peaks,
            dia_ids: s.dia_ids,
            nb_atoms: s.nb_atoms,
        }
    }
}

/// Integrated region of a 1D spectrum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    pub id: String,
    pub from: f64,
    pub to: f64,
    pub absolute: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration: Option<f64>,
    #[serde(default)]
    pub kind: SignalKind,
    #[serde(default)]
    pub signals: Vec<Signal>,
    #[serde(rename = "diaIDs", default, skip_serializing_if = "Vec::is_empty")]
    pub dia_ids: Vec<String>,
    #[serde(flatten)]
    pub nb_atoms: AtomCount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_from: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_to: Option<f64>,
}

impl Range {
    pub fn contains(&self, x: f64) -> bool {
        x > self.from && x < self.to
    }
}

/// Range list of a spectrum plus its integration normalisation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Ranges {
    #[serde(default)]
    pub values: Vec<Range>,
    #[serde(default)]
    pub options: RangesOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangesOptions {
    /// Total relative integration shared by all `Signal` ranges
    pub sum: f64,
    pub is_sum_constant: bool,
}

impl Default for RangesOptions {
    fn default() -> Self {
        Self {
            sum: 100.0,
            is_sum_constant: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Peaks {
    #[serde(default)]
    pub values: Vec<Peak>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FromTo {
    pub from: f64,
    pub to: f64,
}

impl FromTo {
    pub fn new(a: f64, b: f64) -> Self {
        Self {
            from: a.min(b),
            to: a.max(b),
        }
    }

    pub fn center(&self) -> f64 {
        (self.from + self.to) / 2.0
    }

    pub fn union(&self, other: &FromTo) -> FromTo {
        FromTo {
            from: self.from.min(other.from),
            to: self.to.max(other.to),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub delta: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak2D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal2D {
    pub id: String,
    pub x: Delta,
    pub y: Delta,
    #[serde(default)]
    pub peaks: Vec<Peak2D>,
    #[serde(default)]
    pub kind: SignalKind,
    #[serde(rename = "diaIDs", default, skip_serializing_if = "Vec::is_empty")]
    pub dia_ids: Vec<String>,
    #[serde(flatten)]
    pub nb_atoms: AtomCount,
}

/// Rectangular region of a 2D spectrum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub id: String,
    pub x: FromTo,
    pub y: FromTo,
    #[serde(default)]
    pub absolute: f64,
    #[serde(default)]
    pub kind: SignalKind,
    #[serde(default)]
    pub signals: Vec<Signal2D>,
    #[serde(rename = "diaIDs", default, skip_serializing_if = "Vec::is_empty")]
    pub dia_ids: Vec<String>,
    #[serde(flatten)]
    pub nb_atoms: AtomCount,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Zones {
    #[serde(default)]
    pub values: Vec<Zone>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiplicity_is_derived_from_couplings() {
        let mut signal = Signal::new(
            1.2,
            vec![
                Coupling { multiplicity: Multiplicity::Doublet, coupling: 7.1 },
                Coupling { multiplicity: Multiplicity::Triplet, coupling: 2.0 },
            ],
            vec![],
        );
        assert_eq!(signal.multiplicity(), "dt");
        signal.js.clear();
        assert_eq!(signal.multiplicity(), "s");
        signal.peaks = vec![Peak::new(1.0, 1.0, None), Peak::new(1.1, 1.0, None)];
        assert_eq!(signal.multiplicity(), "m");
    }

    #[test]
    fn test_stored_multiplicity_is_ignored_on_read() {
        let json = serde_json::json!({
            "id": "s1",
            "delta": 2.0,
            "multiplicity": "q",
            "js": [{ "multiplicity": "t", "coupling": 7.0 }]
        });
        let signal: Signal = serde_json::from_value(json).unwrap();
        assert_eq!(signal.multiplicity(), "t");
        let back = serde_json::to_value(&signal).unwrap();
        assert_eq!(back["multiplicity"], "t");
    }

    #[test]
    fn test_atom_count_signed_serialization() {
        let c = AtomCount { count: 3, ambiguous: true };
        assert_eq!(serde_json::to_value(c).unwrap(), serde_json::json!({ "nbAtoms": -3 }));
        let back: AtomCount = serde_json::from_value(serde_json::json!({ "nbAtoms": -3 })).unwrap();
        assert_eq!(back, c);
        let none: AtomCount = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(none.is_zero());
    }

    #[test]
    fn test_ambiguous_zero_survives_reload() {
        let mut range = Range {
            id: "r".into(),
            from: 1.0,
            to: 2.0,
            absolute: 1.0,
            integration: None,
            kind: SignalKind::Signal,
            signals: vec![],
            dia_ids: vec![],
            nb_atoms: AtomCount { count: 0, ambiguous: true },
            original_from: None,
            original_to: None,
        };
        let v = serde_json::to_value(&range).unwrap();
        assert!(v.get("nbAtoms").is_none());
        assert_eq!(v["nbAtomsAmbiguous"], true);
        let back: Range = serde_json::from_value(v).unwrap();
        assert_eq!(back.nb_atoms, range.nb_atoms);

        range.nb_atoms = AtomCount::default();
        let v = serde_json::to_value(&range).unwrap();
        assert!(v.get("nbAtoms").is_none());
        assert!(v.get("nbAtomsAmbiguous").is_none());
    }

    #[test]
    fn test_range_serde_names() {
        let range = Range {
            id: "r".into(),
            from: 1.0,
            to: 2.0,
            absolute: 10.0,
            integration: None,
            kind: SignalKind::Signal,
            signals: vec![],
            dia_ids: vec!["a1".into()],
            nb_atoms: AtomCount { count: 1, ambiguous: false },
            original_from: Some(0.9),
            original_to: None,
        };
        let v = serde_json::to_value(&range).unwrap();
        assert_eq!(v["diaIDs"][0], "a1");
        assert_eq!(v["nbAtoms"], 1);
        assert_eq!(v["originalFrom"], 0.9);
        assert!(v.get("integration").is_none());
    }
}
