//! Declarative query execution over a dataset snapshot
//!
//! The engine is a pure function of (snapshot, query text): it never mutates
//! the dataset store and holds no state of its own. Result row order is
//! deterministic when an ORDER BY is given; otherwise it follows source row
//! order (plain selects) or first-appearance group order (aggregates),
//! stable within a single execution.

pub mod ast;
pub mod eval;
pub mod parser;

use crate::dataset::{Dataset, Fingerprint, Value};
use crate::sketch::value_hash64;
use crate::{Result, TabLensError};
use ast::{Expr, OrderKey, SelectItem, SelectStatement};
use eval::Truth;
use std::collections::HashMap;
use tracing::debug;

/// One output column of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultColumn {
    pub name: String,
    pub values: Vec<Value>,
}

/// Immutable result of one query execution.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<ResultColumn>,
    pub row_count: usize,
    pub sql: String,
    pub fingerprint: Fingerprint,
}

impl QueryResult {
    pub fn column(&self, name: &str) -> Option<&ResultColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn value(&self, row: usize, col: usize) -> &Value {
        &self.columns[col].values[row]
    }
}

pub struct QueryEngine;

impl QueryEngine {
    /// Parse and bind without executing. Surfaces syntax and column errors
    /// with their original types, which execution through a cache would
    /// otherwise flatten.
    pub fn validate(sql: &str, dataset: &Dataset) -> Result<()> {
        let stmt = parser::parse(sql)?;
        bind(&stmt, dataset)
    }

    /// Parse, bind and execute `sql` against a snapshot.
    pub fn execute(sql: &str, dataset: &Dataset) -> Result<QueryResult> {
        let stmt = parser::parse(sql)?;
        bind(&stmt, dataset)?;
        debug!(table = %stmt.table, "executing query");

        let items = expand_items(&stmt.items, dataset);
        let rows = filter_rows(&stmt, dataset)?;

        let aggregate = !stmt.group_by.is_empty()
            || items.iter().any(|(expr, _)| expr.contains_aggregate());

        let mut result = if aggregate {
            execute_aggregate(&stmt, &items, dataset, &rows)?
        } else {
            execute_plain(&stmt, &items, dataset, rows)?
        };

        if let Some(limit) = stmt.limit {
            for col in &mut result.0 {
                col.values.truncate(limit);
            }
            result.1 = result.1.min(limit);
        }

        Ok(QueryResult {
            columns: result.0,
            row_count: result.1,
            sql: sql.to_string(),
            fingerprint: dataset.fingerprint(),
        })
    }
}

/// Check every referenced column exists before touching any data.
fn bind(stmt: &SelectStatement, dataset: &Dataset) -> Result<()> {
    let check = |expr: &Expr| -> Result<()> { check_columns(expr, dataset) };
    for item in &stmt.items {
        if let SelectItem::Expr { expr, .. } = item {
            check(expr)?;
        }
    }
    if let Some(pred) = &stmt.where_clause {
        check(pred)?;
        if pred.contains_aggregate() {
            return Err(TabLensError::Computation(
                "aggregate not allowed in WHERE".to_string(),
            ));
        }
    }
    for expr in &stmt.group_by {
        check(expr)?;
    }
    for key in &stmt.order_by {
        // Order keys may reference output aliases; those are validated
        // during execution instead.
        if !is_alias_or_position(&key.expr, &stmt.items) {
            check(&key.expr)?;
        }
    }
    Ok(())
}

fn check_columns(expr: &Expr, dataset: &Dataset) -> Result<()> {
    match expr {
        Expr::Literal(_) => Ok(()),
        Expr::Column(name) => {
            if dataset.column_index(name).is_some() {
                Ok(())
            } else {
                Err(TabLensError::QueryBinding {
                    column: name.clone(),
                })
            }
        }
        Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } => check_columns(expr, dataset),
        Expr::Binary { left, right, .. } => {
            check_columns(left, dataset)?;
            check_columns(right, dataset)
        }
        Expr::Aggregate { arg, .. } => match arg {
            Some(inner) => check_columns(inner, dataset),
            None => Ok(()),
        },
    }
}

fn is_alias_or_position(expr: &Expr, items: &[SelectItem]) -> bool {
    match expr {
        Expr::Literal(Value::Integer(_)) => true,
        Expr::Column(name) => items.iter().any(|item| {
            matches!(item, SelectItem::Expr { alias: Some(a), .. } if a == name)
        }),
        _ => false,
    }
}

/// Expand `*` into one item per dataset column and attach output names.
fn expand_items(items: &[SelectItem], dataset: &Dataset) -> Vec<(Expr, String)> {
    let mut out = Vec::new();
    for item in items {
        match item {
            SelectItem::Wildcard => {
                for col in dataset.columns() {
                    out.push((Expr::Column(col.name.clone()), col.name.clone()));
                }
            }
            SelectItem::Expr { expr, alias } => {
                let name = alias.clone().unwrap_or_else(|| expr.default_name());
                out.push((expr.clone(), name));
            }
        }
    }
    out
}

/// Row indices surviving the WHERE clause (Unknown excludes, per
/// three-valued logic).
fn filter_rows(stmt: &SelectStatement, dataset: &Dataset) -> Result<Vec<usize>> {
    let mut rows = Vec::new();
    for row in 0..dataset.row_count() {
        let keep = match &stmt.where_clause {
            None => true,
            Some(pred) => eval::eval_predicate(pred, dataset, row)? == Truth::True,
        };
        if keep {
            rows.push(row);
        }
    }
    Ok(rows)
}

type Columns = (Vec<ResultColumn>, usize);

fn execute_plain(
    stmt: &SelectStatement,
    items: &[(Expr, String)],
    dataset: &Dataset,
    mut rows: Vec<usize>,
) -> Result<Columns> {
    if !stmt.order_by.is_empty() {
        let mut keyed: Vec<(Vec<Value>, usize)> = Vec::with_capacity(rows.len());
        for row in rows {
            let mut keys = Vec::with_capacity(stmt.order_by.len());
            for key in &stmt.order_by {
                keys.push(order_key_plain(key, items, dataset, row)?);
            }
            keyed.push((keys, row));
        }
        keyed.sort_by(|a, b| compare_key_rows(&a.0, &b.0, &stmt.order_by));
        rows = keyed.into_iter().map(|(_, row)| row).collect();
    }

    let mut columns: Vec<ResultColumn> = items
        .iter()
        .map(|(_, name)| ResultColumn {
            name: name.clone(),
            values: Vec::with_capacity(rows.len()),
        })
        .collect();
    for &row in &rows {
        for ((expr, _), col) in items.iter().zip(&mut columns) {
            col.values.push(eval::eval_scalar(expr, dataset, row)?);
        }
    }
    Ok((columns, rows.len()))
}

/// Resolve an ORDER BY key for a plain select: 1-based output position,
/// output alias, or any expression over the source row.
fn order_key_plain(
    key: &OrderKey,
    items: &[(Expr, String)],
    dataset: &Dataset,
    row: usize,
) -> Result<Value> {
    if let Expr::Literal(Value::Integer(n)) = &key.expr {
        let idx = position_to_index(*n, items.len())?;
        return eval::eval_scalar(&items[idx].0, dataset, row);
    }
    if let Expr::Column(name) = &key.expr {
        if dataset.column_index(name).is_none() {
            if let Some(aliased) = find_alias(name, items) {
                return eval::eval_scalar(aliased, dataset, row);
            }
        }
    }
    eval::eval_scalar(&key.expr, dataset, row)
}

fn position_to_index(n: i64, len: usize) -> Result<usize> {
    if n >= 1 && (n as usize) <= len {
        Ok(n as usize - 1)
    } else {
        Err(TabLensError::Computation(format!(
            "ORDER BY position {n} is out of range"
        )))
    }
}

fn find_alias<'a>(name: &str, items: &'a [(Expr, String)]) -> Option<&'a Expr> {
    items
        .iter()
        .find(|(_, out_name)| out_name == name)
        .map(|(expr, _)| expr)
}

fn compare_key_rows(a: &[Value], b: &[Value], keys: &[OrderKey]) -> std::cmp::Ordering {
    for ((va, vb), key) in a.iter().zip(b).zip(keys) {
        let ord = eval::order_values(va, vb);
        let ord = if key.desc { ord.reverse() } else { ord };
        if ord != std::cmp::Ordering::Equal {
            return ord;
        }
    }
    std::cmp::Ordering::Equal
}

fn execute_aggregate(
    stmt: &SelectStatement,
    items: &[(Expr, String)],
    dataset: &Dataset,
    rows: &[usize],
) -> Result<Columns> {
    // Group rows by key values. NULL keys compare equal, per SQL GROUP BY.
    // Group order is first appearance.
    let mut group_rows: Vec<(Vec<Value>, Vec<usize>)> = Vec::new();
    let mut lookup: HashMap<u64, Vec<usize>> = HashMap::new();

    if stmt.group_by.is_empty() {
        group_rows.push((Vec::new(), rows.to_vec()));
    } else {
        for &row in rows {
            let mut key = Vec::with_capacity(stmt.group_by.len());
            for expr in &stmt.group_by {
                key.push(eval::eval_scalar(expr, dataset, row)?);
            }
            let hash = hash_key(&key);
            let candidates = lookup.entry(hash).or_default();
            match candidates
                .iter()
                .find(|&&idx| group_rows[idx].0 == key)
            {
                Some(&idx) => group_rows[idx].1.push(row),
                None => {
                    candidates.push(group_rows.len());
                    group_rows.push((key, vec![row]));
                }
            }
        }
    }

    // Every select item must be resolvable per group.
    let mut output_rows: Vec<Vec<Value>> = Vec::with_capacity(group_rows.len());
    for (key, rows) in &group_rows {
        let mut out = Vec::with_capacity(items.len());
        for (expr, _) in items {
            out.push(eval_in_group(expr, stmt, key, rows, dataset)?);
        }
        output_rows.push(out);
    }

    if !stmt.order_by.is_empty() {
        let mut keyed: Vec<(Vec<Value>, Vec<Value>)> = Vec::with_capacity(output_rows.len());
        for (group_idx, out) in output_rows.into_iter().enumerate() {
            let (key, rows) = &group_rows[group_idx];
            let mut sort_keys = Vec::with_capacity(stmt.order_by.len());
            for order in &stmt.order_by {
                sort_keys.push(order_key_aggregate(
                    order, stmt, items, &out, key, rows, dataset,
                )?);
            }
            keyed.push((sort_keys, out));
        }
        keyed.sort_by(|a, b| compare_key_rows(&a.0, &b.0, &stmt.order_by));
        output_rows = keyed.into_iter().map(|(_, out)| out).collect();
    }

    let mut columns: Vec<ResultColumn> = items
        .iter()
        .map(|(_, name)| ResultColumn {
            name: name.clone(),
            values: Vec::with_capacity(output_rows.len()),
        })
        .collect();
    for out in &output_rows {
        for (value, col) in out.iter().zip(&mut columns) {
            col.values.push(value.clone());
        }
    }
    let row_count = output_rows.len();
    Ok((columns, row_count))
}

fn hash_key(key: &[Value]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for v in key {
        h ^= value_hash64(v);
        h = h.wrapping_mul(0x1000_0000_01b3);
    }
    h
}

/// Evaluate a select item in aggregate context: group-by expressions take
/// the group's key value, aggregates fold over the group's rows, and
/// anything else recurses. A bare column outside GROUP BY is a binding
/// error.
fn eval_in_group(
    expr: &Expr,
    stmt: &SelectStatement,
    key: &[Value],
    rows: &[usize],
    dataset: &Dataset,
) -> Result<Value> {
    if let Some(idx) = stmt.group_by.iter().position(|g| g == expr) {
        return Ok(key[idx].clone());
    }
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Column(name) => Err(TabLensError::QueryBinding {
            column: format!("{name} (not in GROUP BY)"),
        }),
        Expr::Unary { op, expr: inner } => {
            let v = eval_in_group(inner, stmt, key, rows, dataset)?;
            // Reuse the scalar path via a literal rewrite.
            eval::eval_scalar(
                &Expr::Unary {
                    op: *op,
                    expr: Box::new(Expr::Literal(v)),
                },
                dataset,
                0,
            )
        }
        Expr::Binary { op, left, right } => {
            let l = eval_in_group(left, stmt, key, rows, dataset)?;
            let r = eval_in_group(right, stmt, key, rows, dataset)?;
            eval::eval_scalar(
                &Expr::Binary {
                    op: *op,
                    left: Box::new(Expr::Literal(l)),
                    right: Box::new(Expr::Literal(r)),
                },
                dataset,
                0,
            )
        }
        Expr::IsNull { expr: inner, negated } => {
            let v = eval_in_group(inner, stmt, key, rows, dataset)?;
            Ok(Value::Boolean(v.is_null() != *negated))
        }
        Expr::Aggregate {
            func,
            arg,
            distinct,
        } => {
            let mut acc = eval::Accumulator::new(*func, *distinct);
            for &row in rows {
                let value = match arg {
                    None => Value::Integer(1), // COUNT(*) counts rows
                    Some(inner) => eval::eval_scalar(inner, dataset, row)?,
                };
                acc.push(&value)?;
            }
            Ok(acc.finish())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn order_key_aggregate(
    order: &OrderKey,
    stmt: &SelectStatement,
    items: &[(Expr, String)],
    out: &[Value],
    key: &[Value],
    rows: &[usize],
    dataset: &Dataset,
) -> Result<Value> {
    if let Expr::Literal(Value::Integer(n)) = &order.expr {
        let idx = position_to_index(*n, out.len())?;
        return Ok(out[idx].clone());
    }
    if let Expr::Column(name) = &order.expr {
        if let Some(idx) = items.iter().position(|(_, out_name)| out_name == name) {
            return Ok(out[idx].clone());
        }
    }
    eval_in_group(&order.expr, stmt, key, rows, dataset)
}
