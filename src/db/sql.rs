//! SQL text builders
//!
//! Tables are quoted with backticks; column lists and conditions are
//! passed through verbatim.

use crate::value::Value;

/// MySQL paging suffix: `<template> LIMIT offset,limit;`
pub fn paged(template: &str, offset: usize, limit: usize) -> String {
    format!("{} LIMIT {},{};", trim_statement(template), offset, limit)
}

/// Postgres paging suffix: `<template> LIMIT limit OFFSET offset;`
pub fn pg_paged(template: &str, offset: usize, limit: usize) -> String {
    format!("{} LIMIT {} OFFSET {};", trim_statement(template), limit, offset)
}

/// `<template> LIMIT limit;`
pub fn limited(template: &str, limit: usize) -> String {
    format!("{} LIMIT {};", trim_statement(template), limit)
}

/// `?,?,?` for `n` parameters
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

/// `$1,$2,$3` for `n` parameters
pub fn pg_placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(",")
}

/// `SELECT cols FROM `table` [WHERE ..] [ORDER BY ..]` without terminator
pub fn select(columns: &[&str], table: &str, condition: Option<&str>, order_by: Option<&str>) -> String {
    let cols = if columns.is_empty() {
        "*".to_string()
    } else {
        columns.join(",")
    };
    let mut sql = format!("SELECT {} FROM `{}`", cols, table);
    push_clauses(&mut sql, condition, order_by);
    sql
}

/// `DELETE FROM `table` [WHERE ..] [ORDER BY ..]` without terminator
pub fn delete(table: &str, condition: Option<&str>, order_by: Option<&str>) -> String {
    let mut sql = format!("DELETE FROM `{}`", table);
    push_clauses(&mut sql, condition, order_by);
    sql
}

pub fn count(table: &str, condition: Option<&str>) -> String {
    let mut sql = format!("SELECT COUNT(1) FROM `{}`", table);
    push_clauses(&mut sql, condition, None);
    sql.push_str(" LIMIT 1;");
    sql
}

/// Parameterized insert for batched execution
pub fn insert(table: &str, columns: &[&str]) -> String {
    format!(
        "INSERT INTO `{}` ({}) VALUES ({});",
        table,
        columns.join(","),
        placeholders(columns.len())
    )
}

/// Parameterized update, `condition` may reference further `?` parameters
pub fn update(table: &str, columns: &[&str], condition: &str) -> String {
    let sets: Vec<String> = columns.iter().map(|c| format!("{}=?", c)).collect();
    format!(
        "UPDATE `{}` SET {} WHERE {};",
        table,
        sets.join(","),
        condition
    )
}

/// Insert with literal values
pub fn insert_values(table: &str, columns: &[&str], values: &[Value]) -> String {
    format!(
        "INSERT INTO `{}` ({}) VALUES ({});",
        table,
        columns.join(","),
        literals(values)
    )
}

/// `INSERT .. ON DUPLICATE KEY UPDATE` refreshing every non-null column
pub fn upsert(table: &str, columns: &[&str], values: &[Value]) -> String {
    let mut updates: Vec<String> = columns
        .iter()
        .zip(values)
        .filter(|(_, v)| !v.is_null())
        .map(|(c, v)| format!("{}={}", c, v.to_sql()))
        .collect();

    // All values null: keep the statement valid and the row untouched
    if updates.is_empty() {
        if let Some(first) = columns.first() {
            updates.push(format!("{}={}", first, first));
        }
    }

    format!(
        "INSERT INTO `{}` ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {};",
        table,
        columns.join(","),
        literals(values),
        updates.join(",")
    )
}

/// Statements applying a connection charset
pub fn charset_statements(charset: &str) -> [String; 3] {
    [
        format!("SET NAMES {};", charset),
        format!("SET CHARACTER SET {};", charset),
        format!("SET character_set_connection={};", charset),
    ]
}

fn literals(values: &[Value]) -> String {
    values
        .iter()
        .map(Value::to_sql)
        .collect::<Vec<_>>()
        .join(",")
}

fn push_clauses(sql: &mut String, condition: Option<&str>, order_by: Option<&str>) {
    if let Some(cond) = condition.filter(|c| !c.trim().is_empty()) {
        sql.push_str(" WHERE ");
        sql.push_str(cond);
    }
    if let Some(order) = order_by.filter(|o| !o.trim().is_empty()) {
        sql.push_str(" ORDER BY ");
        sql.push_str(order);
    }
}

fn trim_statement(template: &str) -> &str {
    template.trim().trim_end_matches(';').trim_end()
}
