//! Resonance candidate selection from reconstructed muons.

use crate::mass::invariant_mass;
use crate::resonance::Resonances;
use msc_core::{Muon, MuonPair};

/// Best opposite-charge pair among `muons`.
///
/// Candidates must fall in the window of a selected resonance. Lower resonance
/// index wins, then the larger scalar pt sum. The returned pair has the negative
/// muon first.
pub fn find_best_pair(muons: &[Muon], resonances: &Resonances) -> Option<MuonPair> {
    let mut best: Option<(usize, f64, MuonPair)> = None;
    for (i, a) in muons.iter().enumerate() {
        for b in &muons[i + 1..] {
            if a.charge * b.charge >= 0 || !a.is_finite() || !b.is_finite() {
                continue;
            }
            let mass = invariant_mass(a, b);
            let Some(ires) = resonances.find_resonance(mass) else {
                continue;
            };
            let pt_sum = a.pt + b.pt;
            let better = match &best {
                None => true,
                Some((best_res, best_pt, _)) => {
                    ires < *best_res || (ires == *best_res && pt_sum > *best_pt)
                }
            };
            if better {
                let pair = if a.charge < 0 { MuonPair::new(*a, *b) } else { MuonPair::new(*b, *a) };
                best = Some((ires, pt_sum, pair));
            }
        }
    }
    best.map(|(_, _, pair)| pair)
}
