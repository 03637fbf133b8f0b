//! Store-level behavior: disk durability across reopen, block-based save
//! helpers and bulk clearing.

use strata_core::{Field, FieldDescriptor, Schema, SchemaBuilder, Store, StoreError, Value};

const TITLE: Field<&'static str> = Field::new("title");
const DONE: Field<bool> = Field::new("done");

fn schema() -> SchemaBuilder {
    Schema::builder("TasksDB").entity(
        "Task",
        [FieldDescriptor::text("title"), FieldDescriptor::boolean("done")],
    )
}

#[test]
fn rows_survive_a_store_reopen() {
    let dir = tempfile::tempdir().expect("tempdir should create");
    let path = dir.path().join("tasks.sqlite3");

    {
        let store = Store::open(schema(), &path).expect("store should open");
        let view = store.view_context();
        let mut task = view.insert("Task").expect("insert should succeed");
        task.set_field(&TITLE, "write tests");
        task.set_field(&DONE, false);
        view.update(&task).expect("update should succeed");
        view.save_cascade().expect("cascade should succeed");
    }

    let store = Store::open(schema(), &path).expect("store should reopen");
    let rows = store.query("Task").execute().expect("query should succeed");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_field(&TITLE), &Value::Text("write tests".into()));
    assert_eq!(rows[0].get_field(&DONE), &Value::Bool(false));
    assert!(rows[0].id().is_permanent());
}

#[test]
fn dropping_a_store_discards_unsaved_changes() {
    let dir = tempfile::tempdir().expect("tempdir should create");
    let path = dir.path().join("tasks.sqlite3");

    {
        let store = Store::open(schema(), &path).expect("store should open");
        let view = store.view_context();
        let task = view.insert("Task").expect("insert should succeed");
        view.update(&task).expect("update should succeed");
        // No save: the pending insert dies with the store.
    }

    let store = Store::open(schema(), &path).expect("store should reopen");
    assert_eq!(store.query("Task").count().expect("count should succeed"), 0);
}

#[test]
fn save_sync_commits_the_block_in_one_cascade() {
    let store = Store::open_in_memory(schema()).expect("store should open");

    let report = store
        .save_sync(|ctx| {
            let mut task = ctx.insert("Task")?;
            task.set_field(&TITLE, "blocked work");
            ctx.update(&task)?;
            Ok(())
        })
        .expect("save_sync should succeed");
    assert!(report.committed >= 1);

    let found = store
        .query("Task")
        .find_by(TITLE, "blocked work")
        .expect("find_by should succeed");
    assert!(found.is_some());
}

#[test]
fn save_async_resolves_through_its_ticket() {
    let store = Store::open_in_memory(schema()).expect("store should open");

    let ticket = store
        .save_async(|ctx| {
            let mut task = ctx.insert("Task")?;
            task.set_field(&TITLE, "deferred work");
            ctx.update(&task)?;
            Ok(())
        })
        .expect("scheduling should succeed");

    let report = ticket.wait().expect("cascade should succeed");
    assert!(report.committed >= 1);
    assert_eq!(store.query("Task").count().expect("count should succeed"), 1);
}

#[test]
fn clear_all_removes_every_row_durably() {
    let dir = tempfile::tempdir().expect("tempdir should create");
    let path = dir.path().join("tasks.sqlite3");

    {
        let store = Store::open(schema(), &path).expect("store should open");
        let view = store.view_context();
        for title in ["one", "two", "three"] {
            let mut task = view.insert("Task").expect("insert should succeed");
            task.set_field(&TITLE, title);
            view.update(&task).expect("update should succeed");
        }
        view.save_cascade().expect("cascade should succeed");

        let removed = store.clear_all("Task").expect("clear should succeed");
        assert_eq!(removed, 3);
        assert_eq!(store.query("Task").count().expect("count should succeed"), 0);
    }

    let store = Store::open(schema(), &path).expect("store should reopen");
    assert_eq!(store.query("Task").count().expect("count should succeed"), 0);
}

#[test]
fn opening_with_an_unknown_entity_query_fails_cleanly() {
    let store = Store::open_in_memory(schema()).expect("store should open");
    let error = store
        .query("Nope")
        .count()
        .expect_err("unknown entity must fail");
    assert!(matches!(error, StoreError::QueryCompile { .. }));
}

#[test]
fn logging_bootstrap_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir should create");
    let logs = dir.path().join("logs");
    let logs = logs.to_string_lossy().into_owned();

    strata_core::init_logging("debug", &logs).expect("first init should succeed");
    strata_core::init_logging("debug", &logs).expect("same settings re-init is a no-op");
    let (level, _path) = strata_core::logging_status().expect("status should be set");
    assert_eq!(level, "debug");

    strata_core::init_logging("trace", &logs)
        .expect_err("conflicting settings must be rejected");
}
