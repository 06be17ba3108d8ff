use std::collections::HashMap;

use crate::types::{Unit, UnitId, UnitOutcome, UnitStatus};

/// One outcome per unit, keyed by unit id.
///
/// Iteration follows the original unit order given at construction, not the
/// order in which outcomes were recorded. Recording an outcome for a unit that
/// already has one replaces it.
#[derive(Debug, Clone, Default)]
pub struct BatchLedger {
    order: Vec<UnitId>,
    outcomes: HashMap<UnitId, UnitOutcome>,
}

impl BatchLedger {
    /// Create a ledger that will iterate in the order of `units`
    pub fn for_units(units: &[Unit]) -> Self {
        Self { order: units.iter().map(|u| u.id.clone()).collect(), outcomes: HashMap::with_capacity(units.len()) }
    }

    pub fn record(&mut self, outcome: UnitOutcome) {
        if !self.order.contains(&outcome.unit_id) {
            self.order.push(outcome.unit_id.clone());
        }
        self.outcomes.insert(outcome.unit_id.clone(), outcome);
    }

    pub fn get(&self, unit_id: &UnitId) -> Option<&UnitOutcome> {
        self.outcomes.get(unit_id)
    }

    pub fn contains(&self, unit_id: &UnitId) -> bool {
        self.outcomes.contains_key(unit_id)
    }

    /// Recorded outcomes in original unit order
    pub fn iter(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.order.iter().filter_map(|id| self.outcomes.get(id))
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn total_records(&self) -> usize {
        self.outcomes.values().map(UnitOutcome::record_count).sum()
    }

    pub fn expected_records(&self) -> u64 {
        self.outcomes.values().map(|o| o.expected_record_count).sum()
    }

    pub fn count_status(&self, status: UnitStatus) -> usize {
        self.outcomes.values().filter(|o| o.status() == status).count()
    }

    /// Copy of this ledger where every unit present in `overrides` takes the
    /// override's outcome instead of its own
    pub fn with_overrides(&self, overrides: &BatchLedger) -> BatchLedger {
        let mut merged = self.clone();
        for outcome in overrides.iter() {
            merged.record(outcome.clone());
        }
        merged
    }
}
