use serde::Serialize;

use crate::ledger::BatchLedger;
use crate::types::{UnitId, UnitStatus};

/// Why a unit needs another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    ZeroYield,
    Errored,
}

#[derive(Debug, Clone, Serialize)]
pub struct Gap {
    pub unit_id: UnitId,
    pub name: String,
    pub reason: GapReason,
    pub expected_records: u64,
    /// First reported error, if any
    pub error: Option<String>,
}

/// Ids of units that succeeded with nothing or failed outright, in ledger order
pub fn detect_gaps(ledger: &BatchLedger) -> Vec<UnitId> {
    ledger.iter().filter(|o| o.status().is_gap()).map(|o| o.unit_id.clone()).collect()
}

/// Same selection as [`detect_gaps`], with the detail needed for reporting
pub fn gap_report(ledger: &BatchLedger) -> Vec<Gap> {
    ledger
        .iter()
        .filter_map(|o| {
            let reason = match o.status() {
                UnitStatus::Success => return None,
                UnitStatus::ZeroYield => GapReason::ZeroYield,
                UnitStatus::Errored => GapReason::Errored,
            };
            Some(Gap {
                unit_id: o.unit_id.clone(),
                name: o.unit_name.clone(),
                reason,
                expected_records: o.expected_record_count,
                error: o.errors.first().cloned(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Record, Unit, UnitOutcome};
    use std::time::Duration;

    fn ledger() -> BatchLedger {
        let units = vec![
            Unit::new("ok", "Fine", 20, 10),
            Unit::new("zero", "Nothing", 20, 10),
            Unit::new("err", "Broken", 20, 10),
            Unit::new("empty", "Empty", 0, 10),
            Unit::new("partial", "Partial", 20, 10),
        ];
        let mut ledger = BatchLedger::for_units(&units);
        for unit in &units {
            let mut outcome = UnitOutcome::from_results(unit, Vec::new(), Duration::ZERO);
            match unit.id.as_str() {
                "ok" => outcome.records.push(Record::new("1", "1", unit.id.clone(), "g")),
                "err" => outcome.errors.push("W1: timeout".to_string()),
                "partial" => {
                    outcome.records.push(Record::new("2", "1", unit.id.clone(), "g"));
                    outcome.errors.push("W2: timeout".to_string());
                }
                _ => {}
            }
            ledger.record(outcome);
        }
        ledger
    }

    #[test]
    fn test_detect_gaps() {
        assert_eq!(detect_gaps(&ledger()), vec![UnitId::from("zero"), UnitId::from("err")]);
    }

    #[test]
    fn test_no_gaps_in_empty_ledger() {
        assert!(detect_gaps(&BatchLedger::default()).is_empty());
    }

    #[test]
    fn test_gap_report_reasons() {
        let gaps = gap_report(&ledger());
        assert_eq!(gaps.len(), 2);
        assert_eq!(gaps[0].reason, GapReason::ZeroYield);
        assert_eq!(gaps[0].error, None);
        assert_eq!(gaps[1].reason, GapReason::Errored);
        assert_eq!(gaps[1].error.as_deref(), Some("W1: timeout"));
        assert_eq!(gaps[1].expected_records, 20);
    }
}
