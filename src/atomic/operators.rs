use crate::core::{Fields, ID_FIELD};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Update operators the engine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operator {
    Set,
    Unset,
    Push,
    Pull,
    AddToSet,
}

impl Operator {
    pub const ALL: [Operator; 5] = [
        Operator::Set,
        Operator::Unset,
        Operator::Push,
        Operator::Pull,
        Operator::AddToSet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Set => "$set",
            Operator::Unset => "$unset",
            Operator::Push => "$push",
            Operator::Pull => "$pull",
            Operator::AddToSet => "$addToSet",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == name)
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two paths one update must not carry together: equal paths under
/// different operators, or one path nested inside the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathConflict {
    pub first: (Operator, String),
    pub second: (Operator, String),
}

/// Operator → path → values, aggregated across a tree.
///
/// `$set` and `$unset` keep one value per path, the last one written.
/// Array operators keep every contribution; they render as a plain value
/// when there is one, otherwise `{"$each": [...]}` for `$push`/`$addToSet`
/// and `{"$in": [...]}` for `$pull`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperatorMap {
    buckets: BTreeMap<Operator, BTreeMap<String, Vec<Value>>>,
}

impl OperatorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: impl Into<String>, value: Value) {
        let path = path.into();
        if path == ID_FIELD {
            return;
        }
        self.bucket(Operator::Set).insert(path, vec![value]);
    }

    pub fn unset(&mut self, path: impl Into<String>) {
        self.bucket(Operator::Unset)
            .insert(path.into(), vec![Value::Bool(true)]);
    }

    pub fn push(&mut self, path: impl Into<String>, values: Vec<Value>) {
        self.append(Operator::Push, path.into(), values);
    }

    pub fn add_to_set(&mut self, path: impl Into<String>, values: Vec<Value>) {
        self.append(Operator::AddToSet, path.into(), values);
    }

    pub fn pull(&mut self, path: impl Into<String>, values: Vec<Value>) {
        self.append(Operator::Pull, path.into(), values);
    }

    fn append(&mut self, op: Operator, path: String, values: Vec<Value>) {
        if values.is_empty() {
            return;
        }
        self.bucket(op).entry(path).or_default().extend(values);
    }

    fn bucket(&mut self, op: Operator) -> &mut BTreeMap<String, Vec<Value>> {
        self.buckets.entry(op).or_default()
    }

    /// Folds another map in; `other` counts as visited later.
    pub fn merge(&mut self, other: OperatorMap) {
        for (op, entries) in other.buckets {
            for (path, values) in entries {
                match op {
                    Operator::Set | Operator::Unset => {
                        self.bucket(op).insert(path, values);
                    }
                    _ => self.append(op, path, values),
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(BTreeMap::is_empty)
    }

    /// Number of (operator, path) entries.
    pub fn len(&self) -> usize {
        self.buckets.values().map(BTreeMap::len).sum()
    }

    pub fn contains(&self, op: Operator, path: &str) -> bool {
        self.buckets
            .get(&op)
            .is_some_and(|entries| entries.contains_key(path))
    }

    /// The rendered wire value for one entry.
    pub fn get(&self, op: Operator, path: &str) -> Option<Value> {
        let values = self.buckets.get(&op)?.get(path)?;
        Some(render(op, values))
    }

    /// Raw contributions for one entry, before rendering.
    pub fn values(&self, op: Operator, path: &str) -> &[Value] {
        self.buckets
            .get(&op)
            .and_then(|entries| entries.get(path))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn paths(&self, op: Operator) -> Vec<&str> {
        self.buckets
            .get(&op)
            .map(|entries| entries.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn operators(&self) -> Vec<Operator> {
        self.buckets
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(op, _)| *op)
            .collect()
    }

    /// Rewrites every path through `rename`. Entries that land on the same
    /// path are combined as by `merge`.
    pub fn map_paths<F>(self, mut rename: F) -> Self
    where
        F: FnMut(&str) -> String,
    {
        let mut out = OperatorMap::new();
        for (op, entries) in self.buckets {
            for (path, values) in entries {
                let path = rename(&path);
                match op {
                    Operator::Set | Operator::Unset => {
                        out.bucket(op).insert(path, values);
                    }
                    _ => out.append(op, path, values),
                }
            }
        }
        out
    }

    /// Pairs of paths that overlap across entries.
    pub fn conflicts(&self) -> Vec<PathConflict> {
        let entries: Vec<(Operator, &str)> = self
            .buckets
            .iter()
            .flat_map(|(op, entries)| entries.keys().map(move |path| (*op, path.as_str())))
            .collect();

        let mut conflicts = Vec::new();
        for (i, (op_a, path_a)) in entries.iter().enumerate() {
            for (op_b, path_b) in &entries[i + 1..] {
                let same = path_a == path_b;
                if (same && op_a != op_b) || is_prefix(path_a, path_b) || is_prefix(path_b, path_a) {
                    conflicts.push(PathConflict {
                        first: (*op_a, path_a.to_string()),
                        second: (*op_b, path_b.to_string()),
                    });
                }
            }
        }
        conflicts
    }

    /// The update document sent to the database.
    pub fn to_document(&self) -> Fields {
        let mut document = Fields::new();
        for (op, entries) in &self.buckets {
            if entries.is_empty() {
                continue;
            }
            let rendered: Fields = entries
                .iter()
                .map(|(path, values)| (path.clone(), render(*op, values)))
                .collect();
            document.insert(op.as_str().to_string(), Value::Object(rendered));
        }
        document
    }
}

fn render(op: Operator, values: &[Value]) -> Value {
    match (op, values) {
        (Operator::Unset, _) => Value::Bool(true),
        (_, [single]) => single.clone(),
        (Operator::Set, values) => values.last().cloned().unwrap_or(Value::Null),
        (Operator::Pull, values) => json!({ "$in": values }),
        (_, values) => json!({ "$each": values }),
    }
}

/// `parent` names a strict ancestor of `child` in dot notation.
fn is_prefix(parent: &str, child: &str) -> bool {
    child.len() > parent.len()
        && child.starts_with(parent)
        && child.as_bytes()[parent.len()] == b'.'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_last_write_wins_and_skips_id() {
        let mut ops = OperatorMap::new();
        ops.set("name", json!("A"));
        ops.set("name", json!("B"));
        ops.set("_id", json!(9));

        assert_eq!(ops.len(), 1);
        assert_eq!(ops.get(Operator::Set, "name"), Some(json!("B")));
        assert!(!ops.contains(Operator::Set, "_id"));
    }

    #[test]
    fn test_array_operators_accumulate() {
        let mut ops = OperatorMap::new();
        ops.push("tags", vec![json!({ "_id": "t2" })]);
        assert_eq!(ops.get(Operator::Push, "tags"), Some(json!({ "_id": "t2" })));

        ops.push("tags", vec![json!({ "_id": "t3" })]);
        assert_eq!(
            ops.get(Operator::Push, "tags"),
            Some(json!({ "$each": [{ "_id": "t2" }, { "_id": "t3" }] }))
        );

        ops.pull("labels", vec![json!("a"), json!("b")]);
        assert_eq!(ops.get(Operator::Pull, "labels"), Some(json!({ "$in": ["a", "b"] })));
        assert_eq!(ops.values(Operator::Pull, "labels").len(), 2);
    }

    #[test]
    fn test_to_document_omits_empty_buckets() {
        let mut ops = OperatorMap::new();
        ops.push("tags", Vec::new());
        ops.unset("legacy");
        ops.set("name", json!("B"));

        assert_eq!(
            Value::Object(ops.to_document()),
            json!({ "$set": { "name": "B" }, "$unset": { "legacy": true } })
        );
        assert_eq!(ops.operators(), vec![Operator::Set, Operator::Unset]);
        assert!(OperatorMap::new().is_empty());
    }

    #[test]
    fn test_merge_prefers_later_sets() {
        let mut first = OperatorMap::new();
        first.set("name", json!("A"));
        first.add_to_set("labels", vec![json!("x")]);

        let mut second = OperatorMap::new();
        second.set("name", json!("B"));
        second.add_to_set("labels", vec![json!("y")]);

        first.merge(second);
        assert_eq!(first.get(Operator::Set, "name"), Some(json!("B")));
        assert_eq!(
            first.get(Operator::AddToSet, "labels"),
            Some(json!({ "$each": ["x", "y"] }))
        );
    }

    #[test]
    fn test_conflicts() {
        let mut ops = OperatorMap::new();
        ops.set("addresses.0.street", json!("Main"));
        ops.push("addresses", vec![json!({ "_id": "a9" })]);
        ops.set("address_count", json!(2));

        let conflicts = ops.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].first, (Operator::Set, "addresses.0.street".to_string()));
        assert_eq!(conflicts[0].second, (Operator::Push, "addresses".to_string()));
    }

    #[test]
    fn test_operator_names() {
        assert_eq!(Operator::parse("$addToSet"), Some(Operator::AddToSet));
        assert_eq!(Operator::parse("$inc"), None);
        assert_eq!(Operator::Pull.to_string(), "$pull");
    }

    #[test]
    fn test_map_paths() {
        let mut ops = OperatorMap::new();
        ops.set("items.3.qty", json!(4));
        let ops = ops.map_paths(|path| path.replace(".3.", ".$."));
        assert!(ops.contains(Operator::Set, "items.$.qty"));
    }
}
