// ============================================================================
// Per-Node Dirty Tracking
// ============================================================================
//
// A ChangeSet remembers, for every field touched since the last commit, the
// value the field held before it was first touched. The live value stays on
// the node; a field counts as changed only while the two differ.
//
// ============================================================================

use crate::core::Fields;
use serde_json::Value;
use std::collections::BTreeMap;

/// Old and new value of one changed field. `None` means the field is absent.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// Raw tracking state of one field, used to restore a ChangeSet on rollback.
///
/// `None` means the field was not tracked at all.
pub type TrackedEntry = Option<Option<Value>>;

#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Snapshot taken when the field was first touched
    originals: BTreeMap<String, Option<Value>>,

    /// Changes moved aside by the last commit
    previous: BTreeMap<String, ChangeRecord>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots `current` the first time `field` is about to change.
    ///
    /// Later calls before a commit keep the first snapshot, so the recorded
    /// old value is always the value at the last persisted state.
    pub fn will_change(&mut self, field: &str, current: Option<&Value>) {
        if !self.originals.contains_key(field) {
            self.originals.insert(field.to_string(), current.cloned());
        }
    }

    pub fn is_tracked(&self, field: &str) -> bool {
        self.originals.contains_key(field)
    }

    pub fn is_changed(&self, field: &str, current: Option<&Value>) -> bool {
        self.change(field, current).is_some()
    }

    /// Like `is_changed`, optionally requiring specific old and new values.
    pub fn is_changed_with(
        &self,
        field: &str,
        current: Option<&Value>,
        from: Option<&Value>,
        to: Option<&Value>,
    ) -> bool {
        let Some(record) = self.change(field, current) else {
            return false;
        };

        if let Some(expected) = from {
            if record.old.as_ref() != Some(expected) {
                return false;
            }
        }
        if let Some(expected) = to {
            if record.new.as_ref() != Some(expected) {
                return false;
            }
        }
        true
    }

    pub fn change(&self, field: &str, current: Option<&Value>) -> Option<ChangeRecord> {
        let original = self.originals.get(field)?;
        if original.as_ref() == current {
            return None;
        }
        Some(ChangeRecord {
            old: original.clone(),
            new: current.cloned(),
        })
    }

    /// All fields that currently differ from their snapshot.
    pub fn changes(&self, fields: &Fields) -> BTreeMap<String, ChangeRecord> {
        self.originals
            .keys()
            .filter_map(|name| {
                self.change(name, fields.get(name))
                    .map(|record| (name.clone(), record))
            })
            .collect()
    }

    pub fn changed_fields(&self, fields: &Fields) -> Vec<String> {
        self.changes(fields).into_keys().collect()
    }

    pub fn has_changes(&self, fields: &Fields) -> bool {
        self.originals
            .iter()
            .any(|(name, original)| original.as_ref() != fields.get(name))
    }

    /// Field name → value pairs for `$set`.
    ///
    /// Removed fields are skipped; they belong to `$unset`. A resizable field
    /// whose new value is not an array is put into array form and its first
    /// element is written.
    pub fn setters<F>(&self, fields: &Fields, is_resizable: F) -> BTreeMap<String, Value>
    where
        F: Fn(&str) -> bool,
    {
        let mut mods = BTreeMap::new();
        for (name, record) in self.changes(fields) {
            let Some(new) = record.new else {
                continue;
            };
            let value = if is_resizable(&name) {
                normalize_resizable(new)
            } else {
                new
            };
            mods.insert(name, value);
        }
        mods
    }

    /// Moves every current change into the previous-changes history.
    pub fn commit(&mut self, fields: &Fields) {
        let names: Vec<String> = self.originals.keys().cloned().collect();
        self.commit_fields(names.iter().map(String::as_str), fields);
    }

    /// Commits only the named fields, leaving other tracked fields dirty.
    pub fn commit_fields<'a, I>(&mut self, names: I, fields: &Fields)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut committed = BTreeMap::new();
        for name in names {
            if let Some(record) = self.change(name, fields.get(name)) {
                committed.insert(name.to_string(), record);
            }
            self.originals.remove(name);
        }
        if !committed.is_empty() {
            self.previous = committed;
        }
    }

    pub fn previous_changes(&self) -> &BTreeMap<String, ChangeRecord> {
        &self.previous
    }

    /// Tracked fields with the value each held before it was first touched.
    pub fn snapshots(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.originals
            .iter()
            .map(|(name, original)| (name.as_str(), original.as_ref()))
    }

    pub fn entry(&self, field: &str) -> TrackedEntry {
        self.originals.get(field).cloned()
    }

    pub fn restore_entry(&mut self, field: &str, entry: TrackedEntry) {
        match entry {
            Some(original) => {
                self.originals.insert(field.to_string(), original);
            }
            None => {
                self.originals.remove(field);
            }
        }
    }
}

/// Array form of a value written to a resizable field, reduced to its first
/// element.
pub fn normalize_resizable(value: Value) -> Value {
    if value.is_array() {
        return value;
    }
    let mongoized = match value {
        Value::Null => Vec::new(),
        other => vec![other],
    };
    mongoized.into_iter().next().unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => Fields::new(),
        }
    }

    #[test]
    fn test_first_snapshot_wins() {
        let mut changes = ChangeSet::new();
        changes.will_change("name", Some(&json!("A")));
        changes.will_change("name", Some(&json!("B")));

        let live = fields(json!({ "name": "C" }));
        let record = changes.change("name", live.get("name")).unwrap();
        assert_eq!(record.old, Some(json!("A")));
        assert_eq!(record.new, Some(json!("C")));
    }

    #[test]
    fn test_reverting_to_original_is_not_a_change() {
        let mut changes = ChangeSet::new();
        changes.will_change("name", Some(&json!("A")));

        let live = fields(json!({ "name": "A" }));
        assert!(!changes.is_changed("name", live.get("name")));
        assert!(changes.changes(&live).is_empty());
        assert!(!changes.has_changes(&live));
    }

    #[test]
    fn test_snapshot_is_a_deep_copy() {
        let mut live = fields(json!({ "tags": ["a"] }));
        let mut changes = ChangeSet::new();
        changes.will_change("tags", live.get("tags"));

        if let Some(Value::Array(tags)) = live.get_mut("tags") {
            tags.push(json!("b"));
        }

        let record = changes.change("tags", live.get("tags")).unwrap();
        assert_eq!(record.old, Some(json!(["a"])));
        assert_eq!(record.new, Some(json!(["a", "b"])));
    }

    #[test]
    fn test_is_changed_with_filters() {
        let mut changes = ChangeSet::new();
        changes.will_change("qty", Some(&json!(1)));
        let live = fields(json!({ "qty": 2 }));
        let current = live.get("qty");

        assert!(changes.is_changed_with("qty", current, Some(&json!(1)), None));
        assert!(changes.is_changed_with("qty", current, None, Some(&json!(2))));
        assert!(!changes.is_changed_with("qty", current, Some(&json!(5)), None));
        assert!(!changes.is_changed_with("qty", current, None, Some(&json!(3))));
    }

    #[test]
    fn test_setters_skip_removed_fields_and_normalize_resizable() {
        let mut changes = ChangeSet::new();
        changes.will_change("name", Some(&json!("A")));
        changes.will_change("gone", Some(&json!(1)));
        changes.will_change("aliases", Some(&json!(["x"])));
        changes.will_change("labels", Some(&json!(["x"])));

        let live = fields(json!({ "name": "B", "aliases": "solo", "labels": ["y", "z"] }));
        let setters = changes.setters(&live, |name| name == "aliases" || name == "labels");

        assert_eq!(setters.len(), 3);
        assert_eq!(setters["name"], json!("B"));
        assert_eq!(setters["aliases"], json!("solo"));
        assert_eq!(setters["labels"], json!(["y", "z"]));
        assert!(!setters.contains_key("gone"));
    }

    #[test]
    fn test_commit_moves_changes_to_history() {
        let mut changes = ChangeSet::new();
        changes.will_change("name", Some(&json!("A")));
        changes.will_change("qty", Some(&json!(1)));
        let live = fields(json!({ "name": "B", "qty": 2 }));

        changes.commit_fields(["name"], &live);
        assert!(!changes.is_changed("name", live.get("name")));
        assert!(changes.is_changed("qty", live.get("qty")));
        assert_eq!(changes.previous_changes()["name"].old, Some(json!("A")));

        changes.commit(&live);
        assert!(changes.changes(&live).is_empty());
        assert!(changes.previous_changes().contains_key("qty"));
    }

    #[test]
    fn test_entry_restore_roundtrip() {
        let mut changes = ChangeSet::new();
        let before = changes.entry("name");
        changes.will_change("name", Some(&json!("A")));
        changes.restore_entry("name", before);
        assert!(!changes.is_tracked("name"));
    }

    #[test]
    fn test_normalize_resizable() {
        assert_eq!(normalize_resizable(json!(3)), json!(3));
        assert_eq!(normalize_resizable(Value::Null), Value::Null);
        assert_eq!(normalize_resizable(json!([1, 2])), json!([1, 2]));
    }
}
