// Holding state derived from exchange balance snapshots

use crate::types::{BalanceSnapshot, HoldingState, Instrument};
use std::collections::HashMap;

/// Per-instrument holdings for the current universe, rebuilt from every snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Holdings {
    states: HashMap<Instrument, HoldingState>,
}

impl Holdings {
    /// Instruments missing from the snapshot are flat.
    pub fn from_snapshot(snapshot: &BalanceSnapshot, universe: &[Instrument]) -> Self {
        let states = universe
            .iter()
            .map(|instrument| {
                let size = snapshot.positions.get(instrument).copied().unwrap_or_default();
                (instrument.clone(), HoldingState { size })
            })
            .collect();
        Self { states }
    }

    pub fn get(&self, instrument: &Instrument) -> HoldingState {
        self.states.get(instrument).copied().unwrap_or(HoldingState::FLAT)
    }

    /// Number of universe instruments with an open position
    pub fn held_count(&self) -> usize {
        self.states.values().filter(|s| s.is_open()).count()
    }

    /// Open positions, sorted by instrument for deterministic order placement
    pub fn open_positions(&self) -> Vec<(Instrument, HoldingState)> {
        let mut open: Vec<_> = self
            .states
            .iter()
            .filter(|(_, s)| s.is_open())
            .map(|(i, s)| (i.clone(), *s))
            .collect();
        open.sort_by(|a, b| a.0.cmp(&b.0));
        open
    }
}
