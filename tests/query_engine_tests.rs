//! Query semantics tests: NULL handling, aggregates, ordering, errors

use tablens_core::{DataSource, QueryEngine, TabLensError, Value};

async fn load(csv: &str) -> tablens_core::Dataset {
    DataSource::delimited_bytes(csv.as_bytes().to_vec(), b',', true)
        .load()
        .await
        .unwrap()
}

fn csv_with_nulls() -> &'static str {
    "id,val,tag\n1,10.0,a\n2,20.0,b\n3,,a\n,40.0,b\n"
}

#[tokio::test]
async fn test_count_star_vs_count_column() {
    let ds = load(csv_with_nulls()).await;
    let result = QueryEngine::execute("SELECT COUNT(*), COUNT(id), COUNT(val) FROM t", &ds).unwrap();
    assert_eq!(result.value(0, 0), &Value::Integer(4));
    assert_eq!(result.value(0, 1), &Value::Integer(3));
    assert_eq!(result.value(0, 2), &Value::Integer(3));
}

#[tokio::test]
async fn test_sum_and_avg_skip_nulls() {
    let ds = load(csv_with_nulls()).await;
    let result = QueryEngine::execute("SELECT SUM(val), AVG(val) FROM t", &ds).unwrap();
    assert_eq!(result.value(0, 0), &Value::Float(70.0));
    match result.value(0, 1) {
        Value::Float(avg) => assert!((avg - 70.0 / 3.0).abs() < 1e-9),
        other => panic!("unexpected value: {other:?}"),
    }
}

#[tokio::test]
async fn test_comparison_with_null_is_not_true() {
    let ds = load(csv_with_nulls()).await;
    // id = id is unknown for the NULL row, so it is filtered out.
    let eq = QueryEngine::execute("SELECT id FROM t WHERE id = id", &ds).unwrap();
    assert_eq!(eq.row_count, 3);
    // Negating unknown stays unknown; the NULL row never appears.
    let neq = QueryEngine::execute("SELECT id FROM t WHERE NOT (id = 1)", &ds).unwrap();
    assert_eq!(neq.row_count, 2);
}

#[tokio::test]
async fn test_is_null_predicates() {
    let ds = load(csv_with_nulls()).await;
    let nulls = QueryEngine::execute("SELECT tag FROM t WHERE id IS NULL", &ds).unwrap();
    assert_eq!(nulls.row_count, 1);
    let present = QueryEngine::execute("SELECT id FROM t WHERE val IS NOT NULL", &ds).unwrap();
    assert_eq!(present.row_count, 3);
}

#[tokio::test]
async fn test_three_valued_or_short_circuit() {
    let ds = load(csv_with_nulls()).await;
    // For the NULL-id row: (id = 1) is unknown, tag = 'b' is true,
    // unknown OR true is true.
    let result =
        QueryEngine::execute("SELECT tag FROM t WHERE id = 1 OR tag = 'b'", &ds).unwrap();
    assert_eq!(result.row_count, 3);
}

#[tokio::test]
async fn test_division_is_float_and_by_zero_is_null() {
    let ds = load("a,b\n10,4\n9,0\n").await;
    let result = QueryEngine::execute("SELECT a / b FROM t", &ds).unwrap();
    assert_eq!(result.value(0, 0), &Value::Float(2.5));
    assert!(result.value(1, 0).is_null());
}

#[tokio::test]
async fn test_integer_overflow_promotes_to_float() {
    let ds = load("a\n1\n").await;
    let result =
        QueryEngine::execute("SELECT 9223372036854775807 + 1 FROM t", &ds).unwrap();
    match result.value(0, 0) {
        Value::Float(x) => assert!((x - 9.223372036854776e18).abs() < 1e4),
        other => panic!("expected promoted float, got {other:?}"),
    }
}

#[tokio::test]
async fn test_order_by_nulls_last_ascending() {
    let ds = load(csv_with_nulls()).await;
    let result = QueryEngine::execute("SELECT id FROM t ORDER BY id", &ds).unwrap();
    assert_eq!(result.value(0, 0), &Value::Integer(1));
    assert!(result.value(3, 0).is_null());
}

#[tokio::test]
async fn test_order_by_multiple_keys() {
    let ds = load("g,x\nb,2\na,2\nb,1\na,1\n").await;
    let result = QueryEngine::execute("SELECT g, x FROM t ORDER BY g, x DESC", &ds).unwrap();
    let first: Vec<&Value> = (0..4).map(|r| result.value(r, 0)).collect();
    assert_eq!(
        first,
        vec![
            &Value::Text("a".into()),
            &Value::Text("a".into()),
            &Value::Text("b".into()),
            &Value::Text("b".into()),
        ]
    );
    assert_eq!(result.value(0, 1), &Value::Integer(2));
    assert_eq!(result.value(1, 1), &Value::Integer(1));
}

#[tokio::test]
async fn test_group_by_groups_nulls_together() {
    let ds = load("k,v\nx,1\n,2\nx,3\n,4\n").await;
    let result =
        QueryEngine::execute("SELECT k, COUNT(*), SUM(v) FROM t GROUP BY k", &ds).unwrap();
    assert_eq!(result.row_count, 2);
    // First-appearance order: 'x' group first, NULL group second.
    assert_eq!(result.value(0, 0), &Value::Text("x".into()));
    assert!(result.value(1, 0).is_null());
    assert_eq!(result.value(1, 1), &Value::Integer(2));
    assert_eq!(result.value(1, 2), &Value::Integer(6));
}

#[tokio::test]
async fn test_min_max_over_text() {
    let ds = load("name\ncarol\nalice\nbob\n").await;
    let result = QueryEngine::execute("SELECT MIN(name), MAX(name) FROM t", &ds).unwrap();
    assert_eq!(result.value(0, 0), &Value::Text("alice".into()));
    assert_eq!(result.value(0, 1), &Value::Text("carol".into()));
}

#[tokio::test]
async fn test_arithmetic_precedence() {
    let ds = load("a\n1\n").await;
    let result = QueryEngine::execute("SELECT 2 + 3 * 4, (2 + 3) * 4 FROM t", &ds).unwrap();
    assert_eq!(result.value(0, 0), &Value::Integer(14));
    assert_eq!(result.value(0, 1), &Value::Integer(20));
}

#[tokio::test]
async fn test_limit_applies_after_ordering() {
    let ds = load("x\n3\n1\n2\n").await;
    let result = QueryEngine::execute("SELECT x FROM t ORDER BY x DESC LIMIT 2", &ds).unwrap();
    assert_eq!(result.row_count, 2);
    assert_eq!(result.value(0, 0), &Value::Integer(3));
    assert_eq!(result.value(1, 0), &Value::Integer(2));
}

#[tokio::test]
async fn test_syntax_error_reports_position_and_token() {
    let ds = load("a\n1\n").await;
    let err = QueryEngine::execute("SELECT a FROM t WHERE", &ds).unwrap_err();
    match err {
        TabLensError::QuerySyntax { position, .. } => assert_eq!(position, 21),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_binding_error_before_any_rows_are_read() {
    let ds = load("a\n1\n").await;
    let err = QueryEngine::execute("SELECT a FROM t WHERE missing > 1", &ds).unwrap_err();
    assert!(matches!(err, TabLensError::QueryBinding { .. }));
}

#[tokio::test]
async fn test_quoted_identifiers_and_table() {
    let ds = load("order id,total\n1,5\n2,7\n").await;
    let result =
        QueryEngine::execute("SELECT \"order id\" FROM 'my file' WHERE total > 5", &ds).unwrap();
    assert_eq!(result.row_count, 1);
    assert_eq!(result.columns[0].name, "order id");
}

#[tokio::test]
async fn test_result_carries_fingerprint_and_sql() {
    let ds = load("a\n1\n").await;
    let sql = "SELECT a FROM t";
    let result = QueryEngine::execute(sql, &ds).unwrap();
    assert_eq!(result.sql, sql);
    assert_eq!(result.fingerprint, ds.fingerprint());
}
