use crate::database::Database;
use crate::error::SiltError;
use crate::utils::scalar::Value;

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn setup_users(db: &Database) {
    db.run("CREATE TABLE users (id INT, name TEXT)").unwrap();
    db.run("INSERT INTO users VALUES (1, 'Alice')").unwrap();
    db.run("INSERT INTO users VALUES (2, 'Bob')").unwrap();
}

#[test]
fn basic_round_trip() {
    let db = Database::open_temp().unwrap();
    setup_users(&db);

    let rows = db
        .run("SELECT * FROM users ORDER BY id")
        .unwrap()
        .expect_rows();
    assert_eq!(
        rows,
        vec![
            vec![Value::Int(1), text("Alice")],
            vec![Value::Int(2), text("Bob")],
        ]
    );
}

#[test]
fn projection_where_order_limit() {
    let db = Database::open_temp().unwrap();
    db.run("CREATE TABLE users (id INT, name TEXT, age INT)")
        .unwrap();
    db.run("INSERT INTO users VALUES (1, 'Alice', 30)").unwrap();
    db.run("INSERT INTO users VALUES (2, 'Bob', 25)").unwrap();
    db.run("INSERT INTO users VALUES (3, 'Carol', 35)").unwrap();

    let rows = db
        .run("SELECT name FROM users WHERE age > 25 ORDER BY age LIMIT 1")
        .unwrap()
        .expect_rows();
    assert_eq!(rows, vec![vec![text("Alice")]]);

    let rows = db
        .run("SELECT name FROM users WHERE age > 60")
        .unwrap()
        .expect_rows();
    assert!(rows.is_empty());
}

#[test]
fn join_resolves_colliding_column_names() {
    let db = Database::open_temp().unwrap();
    db.run("CREATE TABLE u (id INT, name TEXT)").unwrap();
    db.run("CREATE TABLE o (id INT, user_id INT, product TEXT)")
        .unwrap();
    db.run("INSERT INTO u VALUES (1, 'Alice')").unwrap();
    db.run("INSERT INTO u VALUES (2, 'Bob')").unwrap();
    db.run("INSERT INTO o VALUES (1, 1, 'Laptop')").unwrap();
    db.run("INSERT INTO o VALUES (2, 1, 'Mouse')").unwrap();
    db.run("INSERT INTO o VALUES (3, 2, 'Keyboard')").unwrap();

    let rows = db
        .run("SELECT name, product FROM u INNER JOIN o ON u.id = o.user_id")
        .unwrap()
        .expect_rows();
    assert_eq!(
        rows,
        vec![
            vec![text("Alice"), text("Laptop")],
            vec![text("Alice"), text("Mouse")],
            vec![text("Bob"), text("Keyboard")],
        ]
    );

    // `id` exists on both sides: selecting it unqualified is an error.
    let err = db
        .run("SELECT id FROM u INNER JOIN o ON u.id = o.user_id")
        .unwrap_err();
    assert!(err.to_string().contains("ambiguous"), "got: {err}");
}

#[test]
fn join_order_does_not_change_the_answer_set() {
    let db = Database::open_temp().unwrap();
    db.run("CREATE TABLE u (id INT, name TEXT)").unwrap();
    db.run("CREATE TABLE o (id INT, user_id INT, product TEXT)")
        .unwrap();
    db.run("INSERT INTO u VALUES (1, 'Alice')").unwrap();
    db.run("INSERT INTO u VALUES (2, 'Bob')").unwrap();
    db.run("INSERT INTO o VALUES (1, 1, 'Laptop')").unwrap();
    db.run("INSERT INTO o VALUES (2, 2, 'Mouse')").unwrap();

    let mut forward = db
        .run("SELECT name, product FROM u INNER JOIN o ON u.id = o.user_id")
        .unwrap()
        .expect_rows();
    let mut swapped = db
        .run("SELECT name, product FROM o INNER JOIN u ON u.id = o.user_id")
        .unwrap()
        .expect_rows();
    let key = |row: &Vec<Value>| format!("{}|{}", row[0], row[1]);
    forward.sort_by_key(key);
    swapped.sort_by_key(key);
    assert_eq!(forward, swapped);
}

#[test]
fn join_honors_table_aliases() {
    let db = Database::open_temp().unwrap();
    db.run("CREATE TABLE u (id INT, name TEXT)").unwrap();
    db.run("CREATE TABLE o (id INT, user_id INT, product TEXT)")
        .unwrap();
    db.run("INSERT INTO u VALUES (1, 'Alice')").unwrap();
    db.run("INSERT INTO o VALUES (10, 1, 'Laptop')").unwrap();

    let rows = db
        .run("SELECT a.name, b.product FROM u a INNER JOIN o AS b ON a.id = b.user_id")
        .unwrap()
        .expect_rows();
    assert_eq!(rows, vec![vec![text("Alice"), text("Laptop")]]);
}

#[test]
fn group_by_with_aggregates() {
    let db = Database::open_temp().unwrap();
    db.run("CREATE TABLE s (region TEXT, amt INT)").unwrap();
    db.run("INSERT INTO s VALUES ('W', 100)").unwrap();
    db.run("INSERT INTO s VALUES ('E', 25)").unwrap();
    db.run("INSERT INTO s VALUES ('W', 200)").unwrap();

    let rows = db
        .run("SELECT region, SUM(amt) FROM s GROUP BY region")
        .unwrap()
        .expect_rows();
    assert_eq!(rows.len(), 2);
    assert!(rows.contains(&vec![text("W"), Value::Int(300)]));
    assert!(rows.contains(&vec![text("E"), Value::Int(25)]));

    let rows = db
        .run("SELECT COUNT(*), AVG(amt) FROM s")
        .unwrap()
        .expect_rows();
    assert_eq!(rows, vec![vec![Value::Int(3), Value::Float(325.0 / 3.0)]]);
}

#[test]
fn count_matches_live_rows() {
    let db = Database::open_temp().unwrap();
    setup_users(&db);
    db.run("INSERT INTO users VALUES (3, 'Carol')").unwrap();
    db.run("DELETE FROM users WHERE id = 2").unwrap();

    let rows = db.run("SELECT COUNT(*) FROM users").unwrap().expect_rows();
    assert_eq!(rows, vec![vec![Value::Int(2)]]);
}

#[test]
fn update_rewrites_matching_rows() {
    let db = Database::open_temp().unwrap();
    setup_users(&db);

    let result = db
        .run("UPDATE users SET name = 'Bobby' WHERE id = 2")
        .unwrap();
    assert_eq!(
        result,
        crate::execution::StatementResult::Message("Updated 1 row(s)".to_string())
    );

    let rows = db
        .run("SELECT name FROM users ORDER BY id")
        .unwrap()
        .expect_rows();
    assert_eq!(rows, vec![vec![text("Alice")], vec![text("Bobby")]]);
}

#[test]
fn delete_hides_rows_from_scans() {
    let db = Database::open_temp().unwrap();
    setup_users(&db);
    db.run("DELETE FROM users WHERE name = 'Alice'").unwrap();

    let rows = db.run("SELECT * FROM users").unwrap().expect_rows();
    assert_eq!(rows, vec![vec![Value::Int(2), text("Bob")]]);
}

#[test]
fn alter_table_adds_column_reading_null_for_old_rows() {
    let db = Database::open_temp().unwrap();
    setup_users(&db);
    db.run("ALTER TABLE users ADD COLUMN age INT").unwrap();
    db.run("INSERT INTO users VALUES (3, 'Carol', 28)").unwrap();

    let rows = db
        .run("SELECT age FROM users ORDER BY id")
        .unwrap()
        .expect_rows();
    assert_eq!(
        rows,
        vec![vec![Value::Null], vec![Value::Null], vec![Value::Int(28)]]
    );
}

#[test]
fn drop_table_removes_schema() {
    let db = Database::open_temp().unwrap();
    setup_users(&db);
    db.run("DROP TABLE users").unwrap();

    let err = db.run("SELECT * FROM users").unwrap_err();
    assert!(matches!(err, SiltError::Schema(_)));
    assert!(db.list_tables().unwrap().is_empty());
}

#[test]
fn insert_type_mismatch_is_rejected() {
    let db = Database::open_temp().unwrap();
    db.run("CREATE TABLE t (n INT)").unwrap();

    let err = db.run("INSERT INTO t VALUES ('not a number')").unwrap_err();
    assert!(matches!(err, SiltError::Type(_)));
    // Numeric strings coerce.
    db.run("INSERT INTO t VALUES ('17')").unwrap();
    let rows = db.run("SELECT n FROM t").unwrap().expect_rows();
    assert_eq!(rows, vec![vec![Value::Int(17)]]);
}

#[test]
fn insert_arity_mismatch_is_rejected() {
    let db = Database::open_temp().unwrap();
    setup_users(&db);
    let err = db.run("INSERT INTO users VALUES (3)").unwrap_err();
    assert!(err.to_string().contains("column count mismatch"));
}

#[test]
fn text_values_may_not_contain_the_field_separator() {
    let db = Database::open_temp().unwrap();
    db.run("CREATE TABLE t (s TEXT)").unwrap();
    let err = db.run("INSERT INTO t VALUES ('a|b')").unwrap_err();
    assert!(matches!(err, SiltError::Type(_)));
}

#[test]
fn reserved_table_names_are_rejected() {
    let db = Database::open_temp().unwrap();
    let err = db.run("CREATE TABLE __catalog__evil (id INT)").unwrap_err();
    assert!(matches!(err, SiltError::Schema(_)));
}

#[test]
fn explain_prefers_index_when_selective() {
    let db = Database::open_temp().unwrap();
    db.run("CREATE TABLE t (c INT, pad TEXT)").unwrap();
    for i in 0..1000 {
        db.run(&format!("INSERT INTO t VALUES ({i}, 'x')")).unwrap();
    }

    let plan = match db.run("EXPLAIN SELECT * FROM t WHERE c = 42").unwrap() {
        crate::execution::StatementResult::Message(text) => text,
        other => panic!("expected plan text, got {other:?}"),
    };
    assert!(plan.contains("TableScan(t)"), "got plan:\n{plan}");
    assert!(plan.contains("cost=1000.0"), "got plan:\n{plan}");

    db.run("CREATE INDEX ix ON t(c)").unwrap();
    let plan = match db.run("EXPLAIN SELECT * FROM t WHERE c = 42").unwrap() {
        crate::execution::StatementResult::Message(text) => text,
        other => panic!("expected plan text, got {other:?}"),
    };
    assert!(plan.contains("IndexScan(t, ix)"), "got plan:\n{plan}");
    assert!(plan.contains("cost=15.0"), "got plan:\n{plan}");

    // The indexed query still answers correctly.
    let rows = db
        .run("SELECT c FROM t WHERE c = 42")
        .unwrap()
        .expect_rows();
    assert_eq!(rows, vec![vec![Value::Int(42)]]);
}

#[test]
fn select_with_or_predicate() {
    let db = Database::open_temp().unwrap();
    setup_users(&db);
    let rows = db
        .run("SELECT name FROM users WHERE id = 1 OR name = 'Bob' ORDER BY name")
        .unwrap()
        .expect_rows();
    assert_eq!(rows, vec![vec![text("Alice")], vec![text("Bob")]]);
}

#[test]
fn parse_errors_surface_verbatim() {
    let db = Database::open_temp().unwrap();
    let err = db.run("SELEC * FROM t").unwrap_err();
    assert!(matches!(err, SiltError::Parse(_)));
}

#[test]
fn describe_table_lists_columns_in_ordinal_order() {
    let db = Database::open_temp().unwrap();
    db.run("CREATE TABLE t (a INT, b TEXT, c FLOAT)").unwrap();
    let columns = db.describe_table("t").unwrap();
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
}

#[test]
fn float_columns_round_trip() {
    let db = Database::open_temp().unwrap();
    db.run("CREATE TABLE m (name TEXT, score FLOAT)").unwrap();
    db.run("INSERT INTO m VALUES ('a', 2.5)").unwrap();
    db.run("INSERT INTO m VALUES ('b', 1.25)").unwrap();

    let rows = db
        .run("SELECT score FROM m ORDER BY score")
        .unwrap()
        .expect_rows();
    assert_eq!(rows, vec![vec![Value::Float(1.25)], vec![Value::Float(2.5)]]);
}
