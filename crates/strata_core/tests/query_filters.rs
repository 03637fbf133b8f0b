//! Query behavior over a seeded store: filtering, ordering, paging and the
//! find/first/last conveniences.

use strata_core::{Field, FieldDescriptor, Schema, SchemaBuilder, Store, Value};

const ID: Field<i64> = Field::new("id");
const FIRSTNAME: Field<&'static str> = Field::new("firstname");
const LASTNAME: Field<&'static str> = Field::new("lastname");

fn schema() -> SchemaBuilder {
    Schema::builder("PeopleDB").entity(
        "Person",
        [
            FieldDescriptor::integer("id"),
            FieldDescriptor::text("firstname"),
            FieldDescriptor::text("lastname"),
        ],
    )
}

/// Rows: (1, "Amy", "test"), (2, "Bob", "test"), (5, "Eve", "other"),
/// (6, "Zed", "test").
fn seeded_store() -> Store {
    let store = Store::open_in_memory(schema()).expect("store should open");
    let view = store.view_context();
    for (id, firstname, lastname) in [
        (1, "Amy", "test"),
        (2, "Bob", "test"),
        (5, "Eve", "other"),
        (6, "Zed", "test"),
    ] {
        let mut person = view.insert("Person").expect("insert should succeed");
        person.set_field(&ID, id);
        person.set_field(&FIRSTNAME, firstname);
        person.set_field(&LASTNAME, lastname);
        view.update(&person).expect("update should succeed");
    }
    view.save_cascade().expect("seed save should succeed");
    store
}

fn ids(rows: &[strata_core::Entity]) -> Vec<i64> {
    rows.iter()
        .map(|row| match row.get_field(&ID) {
            Value::Integer(id) => *id,
            other => panic!("unexpected id value: {other:?}"),
        })
        .collect()
}

#[test]
fn ordering_by_firstname_is_deterministic() {
    let store = seeded_store();
    let rows = store
        .query("Person")
        .order_by([FIRSTNAME.asc()])
        .execute()
        .expect("query should succeed");
    assert_eq!(ids(&rows), vec![1, 2, 5, 6]);

    let rows = store
        .query("Person")
        .order_by([FIRSTNAME.desc()])
        .execute()
        .expect("query should succeed");
    assert_eq!(ids(&rows), vec![6, 5, 2, 1]);
}

#[test]
fn conjunction_filters_to_the_intersection() {
    let store = seeded_store();
    let rows = store
        .query("Person")
        .filtered(ID.not_equals(5))
        .filtered(LASTNAME.equals("test"))
        .order_by([ID.asc()])
        .execute()
        .expect("query should succeed");
    assert_eq!(ids(&rows), vec![1, 2, 6]);

    // The intersection law: filtering twice equals filtering by the AND.
    let anded = store
        .query("Person")
        .filtered(ID.not_equals(5).and(LASTNAME.equals("test")))
        .order_by([ID.asc()])
        .execute()
        .expect("query should succeed");
    assert_eq!(ids(&anded), vec![1, 2, 6]);
}

#[test]
fn range_filter_selects_low_ids() {
    let store = seeded_store();
    let rows = store
        .query("Person")
        .filtered(ID.lt(4))
        .order_by([ID.asc()])
        .execute()
        .expect("query should succeed");
    assert_eq!(ids(&rows), vec![1, 2]);
}

#[test]
fn offset_and_limit_page_through_ordered_rows() {
    let store = seeded_store();
    let query = store.query("Person").order_by([ID.asc()]);

    let page = query
        .with_offset(1)
        .with_limit(2)
        .execute()
        .expect("query should succeed");
    assert_eq!(ids(&page), vec![2, 5]);

    let count = query
        .with_offset(1)
        .with_limit(2)
        .count()
        .expect("count should succeed");
    assert_eq!(count, 2);

    let total = query.count().expect("count should succeed");
    assert_eq!(total, 4);
}

#[test]
fn text_comparison_defaults_fold_case() {
    let store = seeded_store();
    let rows = store
        .query("Person")
        .filtered(FIRSTNAME.equals("amy"))
        .execute()
        .expect("query should succeed");
    assert_eq!(ids(&rows), vec![1]);
}

#[test]
fn first_and_last_follow_the_ordering() {
    let store = seeded_store();
    let query = store.query("Person").order_by([ID.asc()]);

    let first = query
        .first()
        .expect("first should succeed")
        .expect("store is not empty");
    assert_eq!(first.get_field(&ID), &Value::Integer(1));

    let last = query
        .last()
        .expect("last should succeed")
        .expect("store is not empty");
    assert_eq!(last.get_field(&ID), &Value::Integer(6));
}

#[test]
fn last_returns_the_final_row_of_the_executed_window() {
    let store = seeded_store();
    let query = store.query("Person").order_by([ID.asc()]);

    let last = query
        .last()
        .expect("last should succeed")
        .expect("store is not empty");
    assert_eq!(last.get_field(&ID), &Value::Integer(6));

    // With paging, last agrees with the tail of execute.
    let windowed = query.with_offset(1).with_limit(2);
    assert_eq!(ids(&windowed.execute().expect("query should succeed")), vec![2, 5]);
    let last = windowed
        .last()
        .expect("last should succeed")
        .expect("window is not empty");
    assert_eq!(last.get_field(&ID), &Value::Integer(5));
}

#[test]
fn find_by_returns_the_single_match() {
    let store = seeded_store();
    let found = store
        .query("Person")
        .find_by(ID, 5)
        .expect("find_by should succeed")
        .expect("id 5 exists");
    assert_eq!(found.get_field(&FIRSTNAME), &Value::Text("Eve".into()));

    let missing = store
        .query("Person")
        .find_by(ID, 99)
        .expect("find_by should succeed");
    assert!(missing.is_none());
}

#[test]
fn find_or_create_reuses_or_inserts() {
    let store = seeded_store();
    let query = store.query("Person");

    let existing = query
        .find_or_create(ID.equals(2))
        .expect("find_or_create should succeed");
    assert_eq!(existing.get_field(&FIRSTNAME), &Value::Text("Bob".into()));

    let fresh = query
        .find_or_create(ID.equals(42))
        .expect("find_or_create should succeed");
    assert!(fresh.get_field(&ID).is_null());
    assert!(!fresh.id().is_permanent());
}

#[test]
fn unknown_entity_fails_at_compile_not_at_apply() {
    let store = seeded_store();
    let error = store
        .query("Ghost")
        .execute()
        .expect_err("unknown entity must fail");
    assert!(matches!(
        error,
        strata_core::StoreError::QueryCompile { .. }
    ));
}
