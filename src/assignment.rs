/// Assignment model
///
/// Links detected features (ranges, signals, zones) to molecule atoms through
/// their `diaIDs`, and tracks which assignment is activated or highlighted in
/// a view.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::model::{AtomCount, Range, Signal, Signal2D, Zone};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentKey {
    pub id: String,
    pub axis: Axis,
}

/// How a second `activate` behaves while something is activated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivationMode {
    /// Any second call clears the activation
    ToggleAny,
    /// The same id clears it, a different id takes over
    #[default]
    ToggleSameId,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentState {
    mode: ActivationMode,
    activated: Option<AssignmentKey>,
    highlighted: Option<AssignmentKey>,
}

impl AssignmentState {
    pub fn new(mode: ActivationMode) -> Self {
        Self {
            mode,
            activated: None,
            highlighted: None,
        }
    }

    pub fn mode(&self) -> ActivationMode {
        self.mode
    }

    pub fn activated(&self) -> Option<&AssignmentKey> {
        self.activated.as_ref()
    }

    pub fn highlighted(&self) -> Option<&AssignmentKey> {
        self.highlighted.as_ref()
    }

    /// Toggle the activation; returns the new activated key
    pub fn activate(&mut self, id: &str, axis: Axis) -> Option<&AssignmentKey> {
        let key = AssignmentKey {
            id: id.to_string(),
            axis,
        };
        self.activated = match (&self.activated, self.mode) {
            (None, _) => Some(key),
            (Some(_), ActivationMode::ToggleAny) => None,
            (Some(current), ActivationMode::ToggleSameId) if current.id == id => None,
            (Some(_), ActivationMode::ToggleSameId) => Some(key),
        };
        self.activated.as_ref()
    }

    pub fn deactivate(&mut self) {
        self.activated = None;
    }

    pub fn highlight(&mut self, id: &str, axis: Axis) {
        self.highlighted = Some(AssignmentKey {
            id: id.to_string(),
            axis,
        });
    }

    pub fn clear_highlight(&mut self) {
        self.highlighted = None;
    }

    pub fn is_activated(&self, id: &str) -> bool {
        self.activated.as_ref().map_or(false, |k| k.id == id)
    }

    pub fn is_highlighted(&self, id: &str) -> bool {
        self.highlighted.as_ref().map_or(false, |k| k.id == id)
    }
}

// =========================================================================
//  Atom links
// =========================================================================

/// Feature that atoms can be assigned to
pub trait Assignable {
    fn feature_id(&self) -> &str;
    fn dia_ids(&self) -> &[String];
    fn dia_ids_mut(&mut self) -> &mut Vec<String>;
    fn atom_count_mut(&mut self) -> &mut AtomCount;
}

macro_rules! impl_assignable {
    ($($t:ty),*) => {
        $(impl Assignable for $t {
            fn feature_id(&self) -> &str {
                &self.id
            }
            fn dia_ids(&self) -> &[String] {
                &self.dia_ids
            }
            fn dia_ids_mut(&mut self) -> &mut Vec<String> {
                &mut self.dia_ids
            }
            fn atom_count_mut(&mut self) -> &mut AtomCount {
                &mut self.nb_atoms
            }
        })*
    };
}

impl_assignable!(Range, Signal, Zone, Signal2D);

/// Attach `dia_id` carrying `atoms` atoms; false when already attached
pub fn assign<T: Assignable + ?Sized>(target: &mut T, dia_id: &str, atoms: u32) -> bool {
    if target.dia_ids().iter().any(|d| d == dia_id) {
        return false;
    }
    target.dia_ids_mut().push(dia_id.to_string());
    let count = target.atom_count_mut();
    count.count = count.count.saturating_add(atoms);
    true
}

/// Detach `dia_id`; a no-op returning false when it is not attached.
///
/// Every effective removal flips the ambiguity marker, so removing the same
/// atom an even number of times restores the sign of `nbAtoms`.
pub fn unassign<T: Assignable + ?Sized>(target: &mut T, dia_id: &str, atoms: u32) -> bool {
    let Some(pos) = target.dia_ids().iter().position(|d| d == dia_id) else {
        return false;
    };
    target.dia_ids_mut().remove(pos);
    let count = target.atom_count_mut();
    count.count = count.count.saturating_sub(atoms);
    count.ambiguous = !count.ambiguous;
    true
}

/// Attach when absent, detach when present; returns true when attached
pub fn toggle<T: Assignable + ?Sized>(target: &mut T, dia_id: &str, atoms: u32) -> bool {
    if target.dia_ids().iter().any(|d| d == dia_id) {
        unassign(target, dia_id, atoms);
        false
    } else {
        assign(target, dia_id, atoms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FeatureKind {
    Range,
    Signal,
    Zone,
    Signal2D,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FeatureRef {
    pub kind: FeatureKind,
    pub id: String,
}

/// Reverse lookup from atom ids to the features carrying them
#[derive(Debug, Clone, Default)]
pub struct AssignmentIndex {
    by_atom: BTreeMap<String, Vec<FeatureRef>>,
}

impl AssignmentIndex {
    pub fn build(ranges: &[Range], zones: &[Zone]) -> Self {
        let mut index = Self::default();
        for range in ranges {
            index.insert(FeatureKind::Range, range);
            for signal in &range.signals {
                index.insert(FeatureKind::Signal, signal);
            }
        }
        for zone in zones {
            index.insert(FeatureKind::Zone, zone);
            for signal in &zone.signals {
                index.insert(FeatureKind::Signal2D, signal);
            }
        }
        index
    }

    fn insert(&mut self, kind: FeatureKind, feature: &dyn Assignable) {
        for dia_id in feature.dia_ids() {
            self.by_atom.entry(dia_id.clone()).or_default().push(FeatureRef {
                kind,
                id: feature.feature_id().to_string(),
            });
        }
    }

    pub fn features_for(&self, dia_id: &str) -> &[FeatureRef] {
        self.by_atom.get(dia_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Atom ids attached to the feature `id`
    pub fn atoms_for(&self, id: &str) -> Vec<&str> {
        self.by_atom
            .iter()
            .filter(|(_, features)| features.iter().any(|f| f.id == id))
            .map(|(atom, _)| atom.as_str())
            .collect()
    }

    pub fn is_assigned(&self, dia_id: &str) -> bool {
        self.by_atom.contains_key(dia_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{Peak, SignalKind};

    fn range(id: &str) -> Range {
        Range {
            id: id.to_string(),
            from: 1.0,
            to: 2.0,
            absolute: 1.0,
            integration: None,
            kind: SignalKind::Signal,
            signals: vec![Signal::new(1.5, vec![], vec![Peak::new(1.5, 1.0, None)])],
            dia_ids: vec![],
            nb_atoms: AtomCount::default(),
            original_from: None,
            original_to: None,
        }
    }

    #[test]
    fn test_activate_twice_clears_in_both_modes() {
        for mode in [ActivationMode::ToggleAny, ActivationMode::ToggleSameId] {
            let mut state = AssignmentState::new(mode);
            state.activate("r1", Axis::X);
            assert!(state.is_activated("r1"));
            state.activate("r1", Axis::X);
            assert!(state.activated().is_none());
        }
    }

    #[test]
    fn test_activation_modes_differ_on_other_id() {
        let mut any = AssignmentState::new(ActivationMode::ToggleAny);
        any.activate("r1", Axis::X);
        assert!(any.activate("r2", Axis::X).is_none());

        let mut same = AssignmentState::new(ActivationMode::ToggleSameId);
        same.activate("r1", Axis::X);
        assert_eq!(same.activate("r2", Axis::Y).map(|k| k.id.as_str()), Some("r2"));
    }

    #[test]
    fn test_highlight_overwrites() {
        let mut state = AssignmentState::default();
        state.highlight("a", Axis::X);
        state.highlight("b", Axis::Y);
        assert_eq!(
            state.highlighted(),
            Some(&AssignmentKey { id: "b".into(), axis: Axis::Y })
        );
        state.clear_highlight();
        assert!(state.highlighted().is_none());
    }

    #[test]
    fn test_assign_no_duplicates_and_unassign_noop() {
        let mut r = range("r1");
        assert!(assign(&mut r, "H1", 2));
        assert!(!assign(&mut r, "H1", 2));
        assert_eq!(r.dia_ids.len(), 1);
        assert_eq!(r.nb_atoms.count, 2);
        assert!(!unassign(&mut r, "H9", 1));
        assert_eq!(r.nb_atoms, AtomCount { count: 2, ambiguous: false });
    }

    #[test]
    fn test_sign_parity_after_even_removals() {
        let mut r = range("r1");
        assign(&mut r, "H1", 1);
        assign(&mut r, "H2", 1);
        let start = r.nb_atoms.signed().signum();
        unassign(&mut r, "H1", 1);
        assert_eq!(r.nb_atoms.signed().signum(), -start);
        toggle(&mut r, "H1", 1);
        toggle(&mut r, "H1", 1);
        assert_eq!(r.nb_atoms.signed().signum(), start);
        assert_eq!(r.nb_atoms.count, 1);
    }

    #[test]
    fn test_parity_survives_save_between_removal_and_readd() {
        let mut r = range("r1");
        assign(&mut r, "H1", 1);
        unassign(&mut r, "H1", 1);
        assert_eq!(r.nb_atoms, AtomCount { count: 0, ambiguous: true });

        let text = serde_json::to_string(&r).unwrap();
        let mut reloaded: Range = serde_json::from_str(&text).unwrap();
        assert_eq!(reloaded.nb_atoms, r.nb_atoms);

        assign(&mut r, "H1", 1);
        assign(&mut reloaded, "H1", 1);
        assert_eq!(reloaded.nb_atoms, r.nb_atoms);
        assert_eq!(reloaded.nb_atoms.signed(), -1);
    }

    #[test]
    fn test_index_reverse_lookup() {
        let mut r = range("r1");
        assign(&mut r, "H1", 1);
        assign(&mut r.signals[0], "H1", 1);
        let index = AssignmentIndex::build(&[r.clone()], &[]);
        assert_eq!(index.features_for("H1").len(), 2);
        assert_eq!(index.atoms_for("r1"), vec!["H1"]);
        assert!(!index.is_assigned("H2"));
    }
}
