//! Cross-crate scenario tests: the store exercised the way client
//! applications use it.

use proptest::prelude::*;
use refstore_codec::Value;
use refstore_core::{Collection, Key, PatchOp};
use refstore_testkit::{
    attributes_strategy, cart_payload, json_array, json_object, person_registry, shop_registry,
    TestStore,
};

#[test]
fn person_scenario() {
    let store = TestStore::person();

    let john = store
        .add(json_object(r#"{"id": 1, "firstName": "John"}"#), "person")
        .unwrap();
    store
        .add(json_object(r#"{"id": 2, "firstName": "Jane"}"#), "person")
        .unwrap();

    assert_eq!(store.len(), 2);

    john.assign("lastName", Value::from("Williams")).unwrap();
    assert_eq!(john.get("lastName"), Some(Value::from("Williams")));
}

#[test]
fn cart_scenario_normalizes_nested_payloads() {
    let store = TestStore::shop();

    let cart = store.add(cart_payload(), "cart").unwrap();

    assert_eq!(store.find_all("cart").len(), 1);
    assert_eq!(store.find_all("user").len(), 1);
    assert_eq!(store.find_all("cartItem").len(), 2);
    assert_eq!(store.find_all("product").len(), 2);
    assert_eq!(store.len(), 6);

    // The cart's references resolve to the normalized members.
    let user = cart.ref_one("user").unwrap();
    assert_eq!(user.get("name"), Some(Value::from("Ada")));
    assert_eq!(user, store.find("user", 7).unwrap());

    let items = cart.ref_list("products").unwrap();
    assert_eq!(items.len(), 2);
    let pen = items.get(0).unwrap().ref_one("product").unwrap();
    assert_eq!(pen.get("name"), Some(Value::from("Pen")));
}

#[test]
fn reference_round_trip() {
    let store = TestStore::shop();
    let cart = store.add(cart_payload(), "cart").unwrap();
    let user = store.find("user", 7).unwrap();

    // Same instance, and the raw id matches.
    assert_eq!(cart.ref_one("user"), Some(user.clone()));
    assert_eq!(cart.ref_id("user"), user.record_id());

    // Rebuild from plain data: the relationship holds id-for-id, but
    // the instances are distinct objects.
    let snapshot = store.to_value();
    let rebuilt = Collection::from_snapshot(
        shop_registry(),
        snapshot.as_array().unwrap().to_vec(),
    )
    .unwrap();

    let rebuilt_cart = rebuilt.find("cart", 1).unwrap();
    let rebuilt_user = rebuilt_cart.ref_one("user").unwrap();
    assert_eq!(rebuilt_user.record_id(), user.record_id());
    assert_ne!(rebuilt_user, user);
    assert_eq!(rebuilt.len(), store.len());
}

#[test]
fn array_reference_reconciliation() {
    let store = TestStore::shop();
    for id in 1..=3 {
        store
            .add(json_object(&format!(r#"{{"id": {id}}}"#)), "cartItem")
            .unwrap();
    }
    let cart = store
        .add(json_object(r#"{"id": 1, "products": [1, 2, 3]}"#), "cart")
        .unwrap();

    let d = store.add(json_object(r#"{"id": 4}"#), "cartItem").unwrap();
    let products = cart.ref_list("products").unwrap();

    products.push(&d).unwrap();
    assert_eq!(products.len(), 4);
    assert_eq!(
        products.ids(),
        vec![
            Key::Integer(1),
            Key::Integer(2),
            Key::Integer(3),
            Key::Integer(4),
        ]
    );

    // Replacing one index updates only that slot in the key array.
    let e = store.add(json_object(r#"{"id": 5}"#), "cartItem").unwrap();
    products.set(0, &e).unwrap();
    assert_eq!(
        products.ids(),
        vec![
            Key::Integer(5),
            Key::Integer(2),
            Key::Integer(3),
            Key::Integer(4),
        ]
    );
    assert_eq!(products.get(0), Some(e));

    // The exposed sequence and the stored keys stay in lockstep.
    assert_eq!(cart.ref_ids("products"), products.ids());
}

#[test]
fn upsert_is_idempotent() {
    let store = TestStore::person();
    let payload = json_object(r#"{"id": 1, "name": "John"}"#);

    let first = store.add(payload.clone(), "person").unwrap();
    let second = store.add(payload.clone(), "person").unwrap();

    assert_eq!(store.len(), 1);
    assert_eq!(first, second);

    // Equivalent, attribute-wise, to a single add followed by update.
    let reference = TestStore::person();
    let model = reference.add(payload.clone(), "person").unwrap();
    model.update(payload).unwrap();
    assert_eq!(first.raw_attributes(), model.raw_attributes());
}

#[test]
fn patch_fidelity() {
    let store = TestStore::person();
    let model = store
        .add(json_object(r#"{"id": 1}"#), "person")
        .unwrap();
    let rx = store.subscribe();

    model.assign("firstName", Value::from("John")).unwrap();
    let patch = rx.try_recv().unwrap();
    assert_eq!(patch.path, "/person/1/firstName");
    assert_eq!(patch.op, PatchOp::Add);
    assert!(rx.try_recv().is_err(), "exactly one patch per assign");

    model.assign("firstName", Value::from("Jane")).unwrap();
    let patch = rx.try_recv().unwrap();
    assert_eq!(patch.op, PatchOp::Replace);
    assert_eq!(patch.old_value, Some(Value::from("John")));
    assert!(rx.try_recv().is_err());

    model.unassign("firstName");
    let patch = rx.try_recv().unwrap();
    assert_eq!(patch.op, PatchOp::Remove);
    assert_eq!(patch.path, "/person/1/firstName");
    assert!(rx.try_recv().is_err(), "exactly one patch per unassign");
}

#[test]
fn replaying_patches_reproduces_the_store() {
    let source = TestStore::person();
    let rx = source.subscribe();
    let replica = Collection::new(person_registry());

    let model = source
        .add(json_object(r#"{"id": 1, "name": "John"}"#), "person")
        .unwrap();
    model.assign("role", Value::from("admin")).unwrap();
    source
        .add(json_object(r#"{"id": 2, "name": "Jane"}"#), "person")
        .unwrap();
    source.remove("person", 2);

    for patch in rx.try_iter() {
        replica.apply_patch(&patch).unwrap();
    }

    assert_eq!(replica.snapshot(), source.snapshot());
}

#[test]
fn detached_models_degrade_and_recover() {
    let store = TestStore::shop();
    let cart = store.add(cart_payload(), "cart").unwrap();

    let removed = store.remove("cart", 1).unwrap();
    assert_eq!(removed, cart);
    assert!(cart.collection().is_none());

    // Plain attributes survive; resolution degrades.
    assert_eq!(cart.ref_id("user"), Some(Key::Integer(7)));
    assert_eq!(cart.ref_one("user"), None);
    assert!(cart.ref_all("products").is_empty());

    // Re-adding restores resolution.
    store.add_model(&cart).unwrap();
    assert!(cart.ref_one("user").is_some());
    assert_eq!(cart.ref_all("products").len(), 2);
}

#[test]
fn external_references_track_pointing_models() {
    let store = TestStore::shop();
    let cart = store.add(cart_payload(), "cart").unwrap();
    let user = store.find("user", 7).unwrap();

    let carts = user.ref_all("carts");
    assert_eq!(carts, vec![cart.clone()]);

    // Pointing the cart elsewhere removes it from the derived set.
    let other = store
        .add(json_object(r#"{"id": 8, "name": "Lin"}"#), "user")
        .unwrap();
    cart.set_ref("user", &other).unwrap();
    assert!(user.ref_all("carts").is_empty());
    assert_eq!(other.ref_all("carts"), vec![cart]);
}

#[test]
fn bulk_insert_and_batching() {
    let store = TestStore::person();
    let rx = store.subscribe();

    let models = store
        .insert(json_array(
            r#"[
                {"id": 1, "__type__": "person"},
                {"id": 2, "__type__": "person"}
            ]"#,
        ))
        .unwrap();

    assert_eq!(models.len(), 2);
    assert_eq!(store.len(), 2);

    // The whole import flushes as one ordered sequence.
    let paths: Vec<String> = rx.try_iter().map(|p| p.path).collect();
    assert_eq!(paths, vec!["/person/1", "/person/2"]);
}

proptest! {
    #[test]
    fn uniqueness_over_arbitrary_add_sequences(ids in proptest::collection::vec(0i64..10, 1..30)) {
        let store = TestStore::person();
        for id in &ids {
            let mut data = refstore_codec::Map::new();
            data.insert("id".to_string(), Value::Integer(*id));
            store.add(data, "person").unwrap();
        }

        let mut distinct: Vec<i64> = ids.clone();
        distinct.sort_unstable();
        distinct.dedup();

        prop_assert_eq!(store.len(), distinct.len());
        for id in distinct {
            prop_assert!(store.find("person", id).is_some());
        }
    }

    #[test]
    fn id_survives_arbitrary_updates(attrs in attributes_strategy(), new_id in 0i64..1000) {
        let store = TestStore::person();
        let mut data = refstore_codec::Map::new();
        data.insert("id".to_string(), Value::Integer(-1));
        let model = store.add(data, "person").unwrap();

        let mut update = attrs;
        update.insert("id".to_string(), Value::Integer(new_id));
        model.update(update).unwrap();

        prop_assert_eq!(model.record_id(), Some(Key::Integer(-1)));
        prop_assert!(store.find("person", -1).is_some());
    }
}
