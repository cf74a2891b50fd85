//! Snapshot diff used to discover the registration a script just created.
//!
//! The engine has no "register and return the identity" primitive, so the
//! dispatcher lists registrations immediately before and after submitting a
//! script and attributes whatever appeared in between to that script. This is
//! only reliable when nothing else registers against the same engine at the
//! same time; [`Reconciliation::Ambiguous`] is how that situation surfaces.

use std::collections::BTreeSet;

/// Registration identities known to the engine at one instant.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RegistrationSnapshot {
    ids: BTreeSet<String>,
}

impl RegistrationSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    /// Identities present in `self` but not in `earlier`, in sorted order.
    pub fn added_since(&self, earlier: &RegistrationSnapshot) -> Vec<String> {
        self.ids.difference(&earlier.ids).cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for RegistrationSnapshot {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// What the before/after diff says about the submitted script.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reconciliation {
    /// The script ran without leaving a registration behind.
    Unchanged,
    /// Exactly one new registration appeared.
    Created(String),
    /// Several registrations appeared; `chosen` is recorded but may belong to
    /// another client of the engine.
    Ambiguous {
        chosen: String,
        candidates: Vec<String>,
    },
}

/// Diff two snapshots. For ambiguous diffs the lexicographically smallest
/// identity is chosen so that repeated runs pick the same one.
pub fn reconcile(before: &RegistrationSnapshot, after: &RegistrationSnapshot) -> Reconciliation {
    let mut added = after.added_since(before);
    match added.len() {
        0 => Reconciliation::Unchanged,
        1 => Reconciliation::Created(added.remove(0)),
        _ => Reconciliation::Ambiguous {
            chosen: added[0].clone(),
            candidates: added,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(ids: &[&str]) -> RegistrationSnapshot {
        ids.iter().copied().collect()
    }

    #[test]
    fn single_new_identity_is_attributed() {
        let outcome = reconcile(&snapshot(&["id1"]), &snapshot(&["id1", "id2"]));
        assert_eq!(outcome, Reconciliation::Created("id2".into()));
    }

    #[test]
    fn no_new_identity_is_unchanged() {
        let outcome = reconcile(&snapshot(&["id1"]), &snapshot(&["id1"]));
        assert_eq!(outcome, Reconciliation::Unchanged);
    }

    #[test]
    fn several_new_identities_are_ambiguous() {
        let outcome = reconcile(&snapshot(&[]), &snapshot(&["idB", "idA"]));
        match outcome {
            Reconciliation::Ambiguous { chosen, candidates } => {
                assert_eq!(candidates, vec!["idA".to_string(), "idB".to_string()]);
                assert!(candidates.contains(&chosen));
                assert_eq!(chosen, "idA");
            }
            other => panic!("expected ambiguous outcome, got {other:?}"),
        }
    }

    #[test]
    fn vanished_identities_are_ignored() {
        // A registration removed by someone else between the two listings
        // must not be mistaken for anything.
        let outcome = reconcile(&snapshot(&["id1", "id2"]), &snapshot(&["id2", "id3"]));
        assert_eq!(outcome, Reconciliation::Created("id3".into()));
    }
}
