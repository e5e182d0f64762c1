use nestdoc::atomic::{self, Operator};
use nestdoc::core::{EmbeddingKind, Fields, Model, Result, Schema};
use nestdoc::{Document, Flush, RecordingCollection};
use serde_json::{Value, json};

fn object(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}

fn schema() -> Schema {
    Schema::from_json(
        r#"[
            {
                "name": "person",
                "relations": [
                    { "name": "addresses", "kind": "embeds_many", "model": "address" },
                    { "name": "profile", "kind": "embeds_one", "model": "profile" }
                ],
                "resizable": ["aliases"],
                "shard_key": ["tenant"]
            },
            {
                "name": "address",
                "relations": [
                    { "name": "locations", "kind": "embeds_many", "model": "location" }
                ]
            },
            { "name": "location" },
            { "name": "profile" }
        ]"#,
    )
    .unwrap()
}

fn person() -> Document {
    Document::load(
        schema(),
        "person",
        object(json!({
            "_id": "p1",
            "tenant": "acme",
            "name": "Ann",
            "aliases": ["annie"],
            "addresses": [
                { "_id": "a0", "street": "Elm" },
                {
                    "_id": "a1",
                    "street": "Oak",
                    "locations": [{ "_id": "l0", "city": "Oslo" }]
                }
            ],
            "profile": { "_id": "pr", "bio": "hello" }
        })),
    )
    .unwrap()
}

#[test]
fn test_live_value_never_records_a_change() -> Result<()> {
    let mut doc = person();
    let root = doc.root();

    doc.set(root, "name", json!("Ann"))?;
    assert!(doc.changes(root)?.is_empty());

    doc.set(root, "name", json!("Bea"))?;
    doc.set(root, "name", json!("Ann"))?;
    assert!(!doc.is_changed(root, "name")?);
    assert!(!doc.is_dirty()?);
    Ok(())
}

#[test]
fn test_change_queries() -> Result<()> {
    let mut doc = person();
    let root = doc.root();
    doc.set(root, "name", json!("Bea"))?;

    let changes = doc.changes(root)?;
    assert_eq!(changes["name"].old, Some(json!("Ann")));
    assert_eq!(changes["name"].new, Some(json!("Bea")));
    assert!(doc.is_changed_with(root, "name", Some(&json!("Ann")), Some(&json!("Bea")))?);
    assert!(!doc.is_changed_with(root, "name", Some(&json!("Cy")), None)?);
    Ok(())
}

#[test]
fn test_flushed_update_covers_every_change() -> Result<()> {
    let mut doc = person();
    let collection = RecordingCollection::new("people");
    let root = doc.root();
    let addresses = doc.children_of(root, "addresses")?;
    let location = doc.children_of(addresses[1], "locations")?[0];

    doc.atomically(&collection, None, |doc| -> Result<()> {
        doc.set(root, "name", json!("Bea"))?;
        doc.set(addresses[0], "street", json!("Pine"))?;
        doc.set(location, "city", json!("Bergen"))?;
        Ok(())
    })?;

    let (filter, update) = collection.updates()?.remove(0);
    assert_eq!(Value::Object(filter), json!({ "_id": "p1", "tenant": "acme" }));
    assert_eq!(
        Value::Object(update),
        json!({
            "$set": {
                "name": "Bea",
                "addresses.0.street": "Pine",
                "addresses.1.locations.0.city": "Bergen"
            }
        })
    );

    for id in [root, addresses[0], location] {
        assert!(doc.changes(id)?.is_empty());
    }
    assert_eq!(doc.previous_changes(location)?["city"].old, Some(json!("Oslo")));
    Ok(())
}

#[test]
fn test_positions_are_recomputed() -> Result<()> {
    let mut doc = person();
    let collection = RecordingCollection::new("people");
    let root = doc.root();
    let addresses = doc.children_of(root, "addresses")?;

    assert_eq!(doc.embedding_kind(addresses[1])?, EmbeddingKind::EmbeddedMany(1));
    assert_eq!(atomic::position(&doc, addresses[1])?, "addresses.1");

    doc.atomically(&collection, None, |doc| -> Result<()> {
        doc.flag_for_destroy(addresses[0])
    })?;

    assert_eq!(doc.embedding_kind(addresses[1])?, EmbeddingKind::EmbeddedMany(0));
    assert_eq!(atomic::position(&doc, addresses[1])?, "addresses.0");
    Ok(())
}

#[test]
fn test_save_node_rewrites_single_level_index() -> Result<()> {
    let mut doc = person();
    let collection = RecordingCollection::new("people");
    let address = doc.children_of(doc.root(), "addresses")?[1];
    doc.set(address, "street", json!("Birch"))?;

    assert_eq!(
        doc.save_node(&collection, address)?,
        Flush::Updated { matched: 1, modified: 1 }
    );

    let (filter, update) = collection.updates()?.remove(0);
    assert_eq!(
        Value::Object(filter),
        json!({ "_id": "p1", "tenant": "acme", "addresses._id": "a1" })
    );
    assert_eq!(
        Value::Object(update),
        json!({ "$set": { "addresses.$.street": "Birch" } })
    );
    assert!(!doc.is_changed(address, "street")?);
    Ok(())
}

#[test]
fn test_save_node_keeps_nested_indices() -> Result<()> {
    let mut doc = person();
    let collection = RecordingCollection::new("people");
    let address = doc.children_of(doc.root(), "addresses")?[1];
    let location = doc.children_of(address, "locations")?[0];
    doc.set(location, "city", json!("Bergen"))?;

    doc.save_node(&collection, location)?;

    let (filter, update) = collection.updates()?.remove(0);
    assert_eq!(filter["addresses.locations._id"], json!("l0"));
    assert_eq!(
        Value::Object(update),
        json!({ "$set": { "addresses.1.locations.0.city": "Bergen" } })
    );
    Ok(())
}

#[test]
fn test_save_node_pushes_new_child_through_parent() -> Result<()> {
    let mut doc = person();
    let collection = RecordingCollection::new("people");
    let address = doc.children_of(doc.root(), "addresses")?[1];
    let location = doc.push_child(address, "locations", object(json!({ "_id": "l1" })))?;

    doc.save_node(&collection, location)?;

    let (filter, update) = collection.updates()?.remove(0);
    assert_eq!(filter["addresses._id"], json!("a1"));
    assert_eq!(
        Value::Object(update),
        json!({ "$push": { "addresses.$.locations": { "_id": "l1" } } })
    );
    assert!(doc.is_persisted(location)?);
    Ok(())
}

#[test]
fn test_shard_key_change_uses_stored_value() -> Result<()> {
    let mut doc = person();
    let collection = RecordingCollection::new("people");
    let root = doc.root();
    doc.set(root, "tenant", json!("globex"))?;

    let preview = atomic::selector(&doc, root)?;
    assert_eq!(preview["tenant"], json!("acme"));

    doc.save(&collection)?;
    let (filter, update) = collection.updates()?.remove(0);
    assert_eq!(filter["tenant"], json!("acme"));
    assert_eq!(
        Value::Object(update),
        json!({ "$set": { "tenant": "globex" } })
    );
    assert_eq!(atomic::selector(&doc, root)?["tenant"], json!("globex"));
    Ok(())
}

#[test]
fn test_resizable_and_unset_fields() -> Result<()> {
    let mut doc = person();
    let collection = RecordingCollection::new("people");
    let root = doc.root();

    doc.atomically(&collection, None, |doc| -> Result<()> {
        doc.set(root, "aliases", json!("ann"))?;
        doc.unset(root, "name")?;
        Ok(())
    })?;

    let (_, update) = collection.updates()?.remove(0);
    assert_eq!(
        Value::Object(update),
        json!({ "$set": { "aliases": "ann" }, "$unset": { "name": true } })
    );
    assert!(doc.node(root)?.pending_unsets().is_empty());
    Ok(())
}

#[test]
fn test_replaced_relation_flushes_as_full_array() -> Result<()> {
    let mut doc = person();
    let collection = RecordingCollection::new("people");
    let root = doc.root();

    let outcome = doc.atomically(&collection, None, |doc| -> Result<Vec<_>> {
        doc.replace_children(root, "addresses", vec![object(json!({ "_id": "a9" }))])
    })?;

    let (_, update) = collection.updates()?.remove(0);
    assert_eq!(
        Value::Object(update),
        json!({ "$set": { "addresses": [{ "_id": "a9", "locations": [] }] } })
    );
    assert_eq!(doc.children_of(root, "addresses")?, outcome.value);
    assert!(!doc.is_dirty()?);
    Ok(())
}

#[test]
fn test_aggregation_without_flush() -> Result<()> {
    let mut doc = person();
    let root = doc.root();
    let profile = doc.child(root, "profile")?.expect("profile loaded");
    doc.set(profile, "bio", json!("hi"))?;

    let aggregation = atomic::atomic_updates(&doc, root, None)?;
    assert_eq!(aggregation.operations.get(Operator::Set, "profile.bio"), Some(json!("hi")));
    assert_eq!(aggregation.plan.fields, vec![(profile, "bio".to_string())]);
    assert!(doc.is_changed(profile, "bio")?);
    Ok(())
}
