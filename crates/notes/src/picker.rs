//! Input note selection
//!
//! A join-split spends at most two notes, so the picker looks for the single
//! note or pair whose total covers the required value with the least excess.

use std::collections::HashSet;

use tree::Hash32;

use crate::note::Note;

/// Indices (ascending) into `sorted_values` of the cheapest covering
/// selection, or `None` when no single note or pair covers `required`.
///
/// Smallest total wins. On equal totals one note beats two, and between pairs
/// the one with the closest values wins.
pub fn pick(sorted_values: &[u128], required: u128) -> Option<Vec<usize>> {
    pick_by(sorted_values, required, |v| *v, |_, _| true)
}

/// [`pick`] over arbitrary items. `pairable` vetoes pairs that may not be
/// spent together.
pub fn pick_by<T>(
    sorted: &[T],
    required: u128,
    value: impl Fn(&T) -> u128,
    pairable: impl Fn(&T, &T) -> bool,
) -> Option<Vec<usize>> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }

    let mut best: Option<Candidate> = None;
    let mut consider = |c: Candidate| {
        if best.as_ref().map_or(true, |b| c.beats(b)) {
            best = Some(c);
        }
    };

    let single = sorted.partition_point(|t| value(t) < required);
    if single < n {
        consider(Candidate::single(single, value(&sorted[single])));
    }

    if n >= 2 {
        let (mut lo, mut hi) = (0usize, n - 1);
        while lo < hi {
            let sum = value(&sorted[lo]).saturating_add(value(&sorted[hi]));
            if sum >= required {
                // smallest partner of `hi` that may be spent alongside it
                if let Some(k) = (lo..hi).find(|&k| pairable(&sorted[k], &sorted[hi])) {
                    let (a, b) = (value(&sorted[k]), value(&sorted[hi]));
                    consider(Candidate::pair(k, hi, a, b));
                }
                hi -= 1;
            } else {
                lo += 1;
            }
        }
    }

    best.map(|c| c.indices)
}

struct Candidate {
    indices: Vec<usize>,
    total: u128,
    spread: u128,
}

impl Candidate {
    fn single(i: usize, v: u128) -> Self {
        Self { indices: vec![i], total: v, spread: 0 }
    }

    fn pair(i: usize, j: usize, a: u128, b: u128) -> Self {
        Self {
            indices: vec![i, j],
            total: a.saturating_add(b),
            spread: b.abs_diff(a),
        }
    }

    fn beats(&self, other: &Candidate) -> bool {
        (self.total, self.indices.len(), self.spread) < (other.total, other.indices.len(), other.spread)
    }
}

/// Picker over a user's stored notes of one asset.
///
/// Nullified notes and notes already reserved by an unsettled tx are never
/// picked. Unsettled outputs are admitted only when chaining is allowed, and
/// two unsettled notes are never spent together.
#[derive(Clone, Debug, Default)]
pub struct NotePicker {
    notes: Vec<Note>,
}

impl NotePicker {
    pub fn new(notes: impl IntoIterator<Item = Note>) -> Self {
        let mut notes: Vec<Note> = notes.into_iter().filter(|n| !n.nullified).collect();
        notes.sort_by_key(|n| n.value());
        Self { notes }
    }

    fn candidates(&self, excluded: &HashSet<Hash32>) -> Vec<&Note> {
        self.notes
            .iter()
            .filter(|n| n.is_spendable() && !excluded.contains(&n.nullifier))
            .collect()
    }

    pub fn pick(&self, value: u128, excluded: &HashSet<Hash32>) -> Option<Vec<Note>> {
        let candidates = self.candidates(excluded);
        let indices = pick_by(&candidates, value, |n| n.value(), |a, b| !(a.pending && b.pending))?;
        Some(indices.into_iter().map(|i| candidates[i].clone()).collect())
    }

    /// Total value of every note the picker may choose from.
    pub fn spendable_sum(&self, excluded: &HashSet<Hash32>) -> u128 {
        self.candidates(excluded)
            .iter()
            .fold(0u128, |acc, n| acc.saturating_add(n.value()))
    }

    /// Largest value a single join-split can spend.
    pub fn max_spendable_value(&self, excluded: &HashSet<Hash32>) -> u128 {
        let candidates = self.candidates(excluded);
        let Some((top, rest)) = candidates.split_last() else {
            return 0;
        };
        let partner = rest
            .iter()
            .rev()
            .find(|n| !(n.pending && top.pending))
            .map_or(0, |n| n.value());
        let best_pair = top.value().saturating_add(partner);

        // a pending top note may pair worse than the next two settled ones
        let settled: Vec<u128> = candidates.iter().filter(|n| !n.pending).map(|n| n.value()).collect();
        let best_settled = settled.iter().rev().take(2).fold(0u128, |acc, v| acc.saturating_add(*v));
        best_pair.max(best_settled)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}
