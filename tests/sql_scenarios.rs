use jsonl_pg::engine::Engine;
use jsonl_pg::sql::execute;
use serde_json::{Map, Value as Json};
use std::fs;
use tempfile::TempDir;

fn open(dir: &TempDir) -> Engine {
    Engine::open(dir.path()).unwrap()
}

fn lines(dir: &TempDir, table: &str) -> Vec<Map<String, Json>> {
    let text = fs::read_to_string(dir.path().join(format!("{table}.jsonl"))).unwrap();
    text.lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn products_round_trip() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);

    execute(&engine, "CREATE TABLE products (id TEXT PRIMARY KEY, name TEXT, price TEXT)").unwrap();
    execute(&engine, "INSERT INTO products (id, name, price) VALUES ('p1', 'Widget', '9.99')").unwrap();
    execute(&engine, "INSERT INTO products (id, name, price) VALUES ('p2', 'Gadget', '19.99')").unwrap();

    let rows = lines(&dir, "products");
    assert_eq!(rows.len(), 2);
    for row in &rows {
        let mut keys: Vec<_> = row.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, ["id", "name", "price"]);
    }
    assert_eq!(rows[0]["id"], "p1");
    assert_eq!(rows[0]["name"], "Widget");
    assert_eq!(rows[0]["price"], "9.99");
    assert_eq!(rows[1]["price"], "19.99");

    let res = execute(&engine, "SELECT * FROM products").unwrap();
    assert_eq!(res.columns, ["id", "name", "price"]);
    assert_eq!(res.rows.len(), 2);
    assert_eq!(res.status, "SELECT 2");
    assert!(res
        .rows
        .iter()
        .any(|r| r[1].as_deref() == Some("Gadget") && r[2].as_deref() == Some("19.99")));
}

#[test]
fn unknown_column_leaves_file_unchanged() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);

    execute(&engine, "CREATE TABLE products (id TEXT PRIMARY KEY, name TEXT)").unwrap();
    execute(&engine, "INSERT INTO products (id, name) VALUES ('p1', 'Widget')").unwrap();
    let path = dir.path().join("products.jsonl");
    let before = fs::read(&path).unwrap();

    let err = execute(&engine, "INSERT INTO products (id, colour) VALUES ('p2', 'red')").unwrap_err();
    assert!(err.is_unknown_column(), "{err}");

    assert_eq!(fs::read(&path).unwrap(), before);
    let res = execute(&engine, "SELECT id FROM products").unwrap();
    assert_eq!(res.rows.len(), 1);
}

#[test]
fn tables_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open(&dir);
        execute(&engine, "CREATE TABLE users (id TEXT PRIMARY KEY, name TEXT NOT NULL)").unwrap();
        execute(&engine, "INSERT INTO users (id, name) VALUES ('u1', 'Alice'), ('u2', 'Bob')").unwrap();
        execute(&engine, "UPDATE users SET name = 'Bobby' WHERE id = 'u2'").unwrap();
    }

    let engine = open(&dir);
    let res = execute(&engine, "SELECT name FROM users WHERE id = 'u2'").unwrap();
    assert_eq!(res.rows, vec![vec![Some("Bobby".to_string())]]);

    let err = execute(&engine, "INSERT INTO users (id) VALUES ('u3')").unwrap_err();
    assert!(err.to_string().contains("not-null"), "{err}");

    let res = execute(&engine, "DELETE FROM users WHERE id = 'u1'").unwrap();
    assert_eq!(res.status, "DELETE 1");
    execute(&engine, "DROP TABLE users").unwrap();
    assert!(!dir.path().join("users.jsonl").exists());
    assert!(!dir.path().join("_schema").join("users.json").exists());
}

#[test]
fn generated_ids_fill_missing_primary_key() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);

    execute(
        &engine,
        "CREATE TABLE events (id TEXT PRIMARY KEY DEFAULT gen_random_uuid(), kind TEXT)",
    )
    .unwrap();
    let a = execute(&engine, "INSERT INTO events (kind) VALUES ('a')").unwrap();
    let b = execute(&engine, "INSERT INTO events (kind) VALUES ('b')").unwrap();

    let (a, b) = (a.last_id.unwrap(), b.last_id.unwrap());
    assert_eq!(a.len(), 36);
    assert_ne!(a, b);
    assert_eq!(lines(&dir, "events").len(), 2);
}

#[test]
fn concurrent_writers_lose_no_rows() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);
    execute(&engine, "CREATE TABLE a (id TEXT PRIMARY KEY, n TEXT)").unwrap();
    execute(&engine, "CREATE TABLE b (id TEXT PRIMARY KEY, n TEXT)").unwrap();

    std::thread::scope(|s| {
        for t in 0..8 {
            let engine = &engine;
            s.spawn(move || {
                for i in 0..40 {
                    let table = if (t + i) % 2 == 0 { "a" } else { "b" };
                    let sql = format!("INSERT INTO {table} (n) VALUES ('{t}-{i}')");
                    execute(engine, &sql).unwrap();
                }
            });
        }
    });

    let a = engine.rows().count("a").unwrap();
    let b = engine.rows().count("b").unwrap();
    assert_eq!(a + b, 320);
    assert_eq!(lines(&dir, "a").len(), a);
    assert_eq!(lines(&dir, "b").len(), b);
}

#[test]
fn dropped_table_is_not_resurrected_by_late_inserts() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);

    std::thread::scope(|s| {
        let engine = &engine;
        s.spawn(move || {
            for _ in 0..50 {
                execute(engine, "CREATE TABLE t (id TEXT PRIMARY KEY, v TEXT)").unwrap();
                execute(engine, "DROP TABLE t").unwrap();
            }
        });
        s.spawn(move || {
            for i in 0..200 {
                let sql = format!("INSERT INTO t (v) VALUES ('{i}')");
                if let Err(e) = execute(engine, &sql) {
                    assert!(e.is_not_found(), "{e}");
                }
            }
        });
    });

    assert!(!engine.catalog().table_exists("t"));
    assert!(!dir.path().join("t.jsonl").exists());
}

#[test]
fn nested_json_written_elsewhere_stays_readable() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);
    execute(&engine, "CREATE TABLE docs (id TEXT PRIMARY KEY, meta JSON)").unwrap();
    fs::write(
        dir.path().join("docs.jsonl"),
        "{\"id\":\"d1\",\"meta\":{\"k\":1}}\n",
    )
    .unwrap();

    let res = execute(&engine, "SELECT meta FROM docs WHERE id = 'd1'").unwrap();
    assert_eq!(res.rows, vec![vec![Some(r#"{"k":1}"#.to_string())]]);

    execute(&engine, "INSERT INTO docs (id, meta) VALUES ('d2', '[]')").unwrap();
    assert_eq!(lines(&dir, "docs")[0]["meta"]["k"], 1);
}
