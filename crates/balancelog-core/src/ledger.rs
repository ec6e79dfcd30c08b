//! Measurement ledger
//!
//! Ordered, append-only record of accepted readings for the current session.
//! Insertion order is the display and export order.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::checkpoint::SessionState;
use crate::extract::Unit;

/// Device label used when neither the caller nor the session knows one
pub const UNKNOWN_DEVICE: &str = "Unknown";

/// Stable handle for addressing a measurement independent of its position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeasurementKey(Uuid);

impl MeasurementKey {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Rows from files without keys get a fresh one on load
impl Default for MeasurementKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MeasurementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One accepted reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Sequential id, starting at 1
    pub sample_id: u64,
    /// Editable name, `Sample_<id>` by default
    pub sample_name: String,
    /// Weight as read
    pub weight: f64,
    /// Unit of `weight`
    pub unit: Unit,
    /// Balance the reading came from
    #[serde(rename = "device", default)]
    pub device_label: String,
    /// Free-form operator comment
    #[serde(rename = "comments", default)]
    pub comment: String,
    /// Stable handle for edits
    #[serde(default)]
    pub key: MeasurementKey,
}

/// Fields collaborators are allowed to edit after acceptance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditableField {
    /// The sample name
    SampleName,
    /// The comment
    Comment,
}

/// The session's measurements plus identity cursor
#[derive(Debug, Clone)]
pub struct Ledger {
    entries: Vec<Measurement>,
    next_id: u64,
    last_device_label: String,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    /// Empty ledger; the first id is 1
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
            last_device_label: String::new(),
        }
    }

    /// Rebuild a ledger from a checkpoint.
    ///
    /// The cursor is raised past the highest stored id so identities are
    /// never handed out twice, even if the file was edited by hand.
    pub fn from_state(state: SessionState) -> Self {
        let max_id = state.data.iter().map(|m| m.sample_id).max().unwrap_or(0);
        Self {
            entries: state.data,
            next_id: state.sample_counter.max(max_id.saturating_add(1)).max(1),
            last_device_label: state.device_name,
        }
    }

    /// Checkpoint view of the ledger
    pub fn to_state(&self) -> SessionState {
        SessionState {
            data: self.entries.clone(),
            sample_counter: self.next_id,
            device_name: self.last_device_label.clone(),
        }
    }

    /// Accept a reading.
    ///
    /// The device label falls back to the last known label, then to
    /// [`UNKNOWN_DEVICE`]; whichever is used becomes the last known label.
    pub fn append(&mut self, weight: f64, unit: Unit, device_label: Option<&str>) -> Measurement {
        let label = device_label
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .or_else(|| Some(self.last_device_label.clone()).filter(|l| !l.is_empty()))
            .unwrap_or_else(|| UNKNOWN_DEVICE.to_string());

        let sample_id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        self.last_device_label = label.clone();

        let measurement = Measurement {
            sample_id,
            sample_name: format!("Sample_{}", sample_id),
            weight,
            unit,
            device_label: label,
            comment: String::new(),
            key: MeasurementKey::new(),
        };
        self.entries.push(measurement.clone());
        measurement
    }

    /// Edit a field in place. Returns false if the key is unknown.
    pub fn update(&mut self, key: MeasurementKey, field: EditableField, value: &str) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|m| m.key == key) else {
            return false;
        };
        match field {
            EditableField::SampleName => entry.sample_name = value.to_string(),
            EditableField::Comment => entry.comment = value.to_string(),
        }
        true
    }

    /// Drop every measurement and restart numbering at 1
    pub fn clear(&mut self) {
        self.entries.clear();
        self.next_id = 1;
        self.last_device_label.clear();
    }

    /// Copy of all measurements in insertion order
    pub fn snapshot(&self) -> Vec<Measurement> {
        self.entries.clone()
    }

    /// Most recent measurement
    pub fn latest(&self) -> Option<&Measurement> {
        self.entries.last()
    }

    /// Number of measurements
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no measurement has been accepted
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Next sample id to be assigned
    pub fn cursor(&self) -> u64 {
        self.next_id
    }

    /// Label stamped on the most recent reading
    pub fn last_device_label(&self) -> &str {
        &self.last_device_label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ids_strictly_increase() {
        let mut ledger = Ledger::new();
        let ids: Vec<u64> = (0..5)
            .map(|i| ledger.append(i as f64, Unit::Grams, None).sample_id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(ledger.cursor(), 6);
        assert_eq!(ledger.snapshot()[2].sample_name, "Sample_3");
    }

    #[test]
    fn test_clear_resets_counter() {
        let mut ledger = Ledger::new();
        ledger.append(1.0, Unit::Grams, Some("Precisa 321 LX"));
        ledger.append(2.0, Unit::Grams, None);
        ledger.clear();

        assert!(ledger.is_empty());
        assert_eq!(ledger.last_device_label(), "");
        assert_eq!(ledger.append(3.0, Unit::Grams, None).sample_id, 1);
    }

    #[test]
    fn test_device_label_fallback() {
        let mut ledger = Ledger::new();
        assert_eq!(ledger.append(1.0, Unit::Grams, None).device_label, UNKNOWN_DEVICE);

        ledger.append(1.0, Unit::Grams, Some("Bench A"));
        assert_eq!(ledger.append(1.0, Unit::Grams, Some("")).device_label, "Bench A");
        assert_eq!(ledger.append(1.0, Unit::Grams, Some("Bench B")).device_label, "Bench B");
        assert_eq!(ledger.append(1.0, Unit::Grams, None).device_label, "Bench B");
    }

    #[test]
    fn test_update_by_key() {
        let mut ledger = Ledger::new();
        let first = ledger.append(1.0, Unit::Grams, None);
        let second = ledger.append(2.0, Unit::Grams, None);
        assert_ne!(first.key, second.key);

        assert!(ledger.update(second.key, EditableField::Comment, "duplicate"));
        assert!(ledger.update(first.key, EditableField::SampleName, "Blank"));

        let rows = ledger.snapshot();
        assert_eq!(rows[0].sample_name, "Blank");
        assert_eq!(rows[1].comment, "duplicate");
        assert_eq!(rows[1].sample_name, "Sample_2");
    }

    #[test]
    fn test_update_unknown_key_is_noop() {
        let mut ledger = Ledger::new();
        let gone = ledger.append(1.0, Unit::Grams, None);
        ledger.clear();
        assert!(!ledger.update(gone.key, EditableField::Comment, "late edit"));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_state_round_trip_keeps_cursor_ahead() {
        let mut ledger = Ledger::new();
        ledger.append(1.0, Unit::Grams, Some("Bench"));
        ledger.append(2.0, Unit::Kilograms, None);

        let mut state = ledger.to_state();
        assert_eq!(state.sample_counter, 3);

        let restored = Ledger::from_state(state.clone());
        assert_eq!(restored.snapshot(), ledger.snapshot());
        assert_eq!(restored.cursor(), 3);
        assert_eq!(restored.last_device_label(), "Bench");

        // A stale counter never rewinds identities
        state.sample_counter = 1;
        assert_eq!(Ledger::from_state(state).cursor(), 3);
    }

    #[test]
    fn test_hand_edited_max_id_does_not_overflow() {
        let mut ledger = Ledger::new();
        ledger.append(1.0, Unit::Grams, None);
        let mut state = ledger.to_state();
        state.data[0].sample_id = u64::MAX;

        let mut restored = Ledger::from_state(state);
        assert_eq!(restored.cursor(), u64::MAX);
        assert_eq!(restored.append(2.0, Unit::Grams, None).sample_id, u64::MAX);
    }
}
