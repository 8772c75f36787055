//! Multi-strategy resilient updates.
//!
//! Some writes trip server-side logic that fails for reasons unrelated to the
//! caller (a trigger recomputing a derived column, say). The caller hands over
//! an ordered list of strategies, widest first. Each one runs in its own
//! transaction and the first to succeed wins, so a failed strategy never
//! leaves a partial write behind.

use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteArguments;
use sqlx::{Sqlite, SqlitePool};
use tracing::{debug, warn};
use ts_rs::TS;

use crate::db::run_in_tx;
use crate::repo::{ensure_identifier, ensure_updatable};
use crate::time::now_ms;
use crate::{AppError, AppResult};

pub type FieldSet = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum StrategyMode {
    /// One UPDATE carrying every field.
    Atomic,
    /// One UPDATE per field, all inside the strategy's transaction.
    PerField,
}

#[derive(Debug, Clone)]
pub struct UpdateStrategy {
    pub label: String,
    pub mode: StrategyMode,
    pub fields: FieldSet,
}

impl UpdateStrategy {
    pub fn atomic(label: impl Into<String>, fields: FieldSet) -> Self {
        Self {
            label: label.into(),
            mode: StrategyMode::Atomic,
            fields,
        }
    }

    pub fn per_field(label: impl Into<String>, fields: FieldSet) -> Self {
        Self {
            label: label.into(),
            mode: StrategyMode::PerField,
            fields,
        }
    }

    /// An atomic strategy over the entries of `fields` named in `keys`.
    pub fn subset(label: impl Into<String>, fields: &FieldSet, keys: &[&str]) -> Self {
        let mut narrowed = FieldSet::new();
        for key in keys {
            if let Some(value) = fields.get(*key) {
                narrowed.insert((*key).to_string(), value.clone());
            }
        }
        Self::atomic(label, narrowed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UpdateTarget<'a> {
    pub table: &'a str,
    pub id: &'a str,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateAttempt {
    pub strategy: String,
    pub mode: StrategyMode,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub error: Option<AppError>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateOutcome {
    /// Index of the strategy that succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "number")]
    pub succeeded: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub strategy: Option<String>,
    pub attempts: Vec<UpdateAttempt>,
    pub written_fields: Vec<String>,
    /// Requested fields the winning strategy did not write.
    pub omitted_fields: Vec<String>,
    /// Error of the last failed strategy when nothing succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub last_error: Option<AppError>,
}

impl UpdateOutcome {
    fn new() -> Self {
        Self {
            succeeded: None,
            strategy: None,
            attempts: Vec::new(),
            written_fields: Vec::new(),
            omitted_fields: Vec::new(),
            last_error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.succeeded.is_some()
    }

    /// Succeeded, but not with the first strategy: some fields may be unwritten.
    pub fn is_degraded(&self) -> bool {
        matches!(self.succeeded, Some(index) if index > 0)
    }

    pub fn wrote(&self, field: &str) -> bool {
        self.written_fields.iter().any(|f| f == field)
    }
}

fn bind_value<'q>(
    q: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    v: &Value,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match v {
        Value::Null => q.bind(Option::<i64>::None),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(Option::<i64>::None)
            }
        }
        Value::Bool(b) => q.bind(*b as i64),
        Value::String(s) => q.bind(s.clone()),
        _ => q.bind(v.to_string()),
    }
}

/// One UPDATE statement: the SQL plus the values it binds, in order.
struct Statement {
    sql: String,
    values: Vec<Value>,
}

fn build_statements(table: &str, id: &str, strategy: &UpdateStrategy) -> AppResult<Vec<Statement>> {
    if strategy.fields.is_empty() {
        return Err(AppError::new("UPDATE/EMPTY_FIELDS", "Strategy has no fields to write")
            .with_context("strategy", strategy.label.clone()));
    }
    for column in strategy.fields.keys() {
        ensure_identifier(column)?;
    }

    let stamp = |mut assignments: Vec<String>, mut values: Vec<Value>| {
        if !assignments.iter().any(|a| a.starts_with("updated_at ")) {
            assignments.push("updated_at = ?".to_string());
            values.push(Value::from(now_ms()));
        }
        values.push(Value::from(id));
        Statement {
            sql: format!("UPDATE {table} SET {} WHERE id = ?", assignments.join(", ")),
            values,
        }
    };

    let statements = match strategy.mode {
        StrategyMode::Atomic => {
            let assignments = strategy.fields.keys().map(|c| format!("{c} = ?")).collect();
            let values = strategy.fields.values().cloned().collect();
            vec![stamp(assignments, values)]
        }
        StrategyMode::PerField => strategy
            .fields
            .iter()
            .map(|(column, value)| stamp(vec![format!("{column} = ?")], vec![value.clone()]))
            .collect(),
    };
    Ok(statements)
}

async fn run_strategy(
    pool: &SqlitePool,
    target: UpdateTarget<'_>,
    strategy: &UpdateStrategy,
) -> AppResult<()> {
    let statements = build_statements(target.table, target.id, strategy)?;
    let table = target.table.to_string();
    let id = target.id.to_string();

    run_in_tx(pool, move |tx| {
        async move {
            for statement in statements {
                let mut query = sqlx::query(&statement.sql);
                for value in &statement.values {
                    query = bind_value(query, value);
                }
                let res = query.execute(&mut **tx).await.map_err(AppError::from)?;
                if res.rows_affected() == 0 {
                    return Err(AppError::new("UPDATE/TARGET_MISSING", "No row matched the update target")
                        .with_context("table", table.clone())
                        .with_context("id", id.clone()));
                }
            }
            Ok(())
        }
        .boxed()
    })
    .await
}

/// Try each strategy in order and stop at the first that succeeds.
///
/// Strategy 0 is always attempted first and its success is final. When every
/// strategy fails the outcome carries the last error; nothing is written.
pub async fn apply_update(
    pool: &SqlitePool,
    target: UpdateTarget<'_>,
    strategies: &[UpdateStrategy],
) -> UpdateOutcome {
    let mut outcome = UpdateOutcome::new();

    if let Err(err) = ensure_updatable(target.table) {
        outcome.last_error = Some(err);
        return outcome;
    }
    if strategies.is_empty() {
        outcome.last_error = Some(AppError::new("UPDATE/NO_STRATEGY", "No update strategy given"));
        return outcome;
    }

    let mut requested: Vec<String> = Vec::new();
    for strategy in strategies {
        for key in strategy.fields.keys() {
            if !requested.contains(key) {
                requested.push(key.clone());
            }
        }
    }

    for (index, strategy) in strategies.iter().enumerate() {
        match run_strategy(pool, target, strategy).await {
            Ok(()) => {
                outcome.attempts.push(UpdateAttempt {
                    strategy: strategy.label.clone(),
                    mode: strategy.mode,
                    succeeded: true,
                    error: None,
                });
                outcome.succeeded = Some(index);
                outcome.strategy = Some(strategy.label.clone());
                outcome.written_fields = strategy.fields.keys().cloned().collect();
                outcome.omitted_fields = requested
                    .iter()
                    .filter(|key| !strategy.fields.contains_key(*key))
                    .cloned()
                    .collect();
                outcome.last_error = None;
                break;
            }
            Err(err) => {
                debug!(
                    target: "sitedesk",
                    event = "update_strategy_failed",
                    table = target.table,
                    id = target.id,
                    strategy = %strategy.label,
                    error = %err
                );
                outcome.attempts.push(UpdateAttempt {
                    strategy: strategy.label.clone(),
                    mode: strategy.mode,
                    succeeded: false,
                    error: Some(err.clone()),
                });
                outcome.last_error = Some(err);
            }
        }
    }

    if outcome.is_degraded() {
        warn!(
            target: "sitedesk",
            event = "update_degraded",
            table = target.table,
            id = target.id,
            strategy = outcome.strategy.as_deref().unwrap_or_default(),
            omitted = ?outcome.omitted_fields
        );
    } else if !outcome.is_success() {
        warn!(
            target: "sitedesk",
            event = "update_failed",
            table = target.table,
            id = target.id,
            attempts = outcome.attempts.len(),
            error = outcome.last_error.as_ref().map(|e| e.to_string()).unwrap_or_default()
        );
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> FieldSet {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn atomic_builds_one_statement_with_stamp() {
        let strategy = UpdateStrategy::atomic("full", fields(json!({"a": 1, "b": "x"})));
        let stmts = build_statements("projects", "p1", &strategy).unwrap();
        assert_eq!(stmts.len(), 1);
        assert_eq!(
            stmts[0].sql,
            "UPDATE projects SET a = ?, b = ?, updated_at = ? WHERE id = ?"
        );
        assert_eq!(stmts[0].values.len(), 4);
        assert_eq!(stmts[0].values[3], json!("p1"));
    }

    #[test]
    fn per_field_builds_one_statement_per_column() {
        let strategy = UpdateStrategy::per_field("each", fields(json!({"a": 1, "b": 2})));
        let stmts = build_statements("projects", "p1", &strategy).unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(stmts.iter().all(|s| s.sql.ends_with("updated_at = ? WHERE id = ?")));
    }

    #[test]
    fn explicit_updated_at_is_not_doubled() {
        let strategy = UpdateStrategy::atomic("full", fields(json!({"updated_at": 5})));
        let stmts = build_statements("projects", "p1", &strategy).unwrap();
        assert_eq!(stmts[0].sql, "UPDATE projects SET updated_at = ? WHERE id = ?");
    }

    #[test]
    fn rejects_bad_columns_and_empty_sets() {
        let bad = UpdateStrategy::atomic("bad", fields(json!({"a = 1; --": 1})));
        assert!(build_statements("projects", "p1", &bad).is_err());
        let empty = UpdateStrategy::atomic("empty", FieldSet::new());
        let err = build_statements("projects", "p1", &empty).err().unwrap();
        assert_eq!(err.code(), "UPDATE/EMPTY_FIELDS");
    }

    #[test]
    fn subset_keeps_only_named_keys() {
        let all = fields(json!({"a": 1, "b": 2, "c": 3}));
        let narrowed = UpdateStrategy::subset("ab", &all, &["a", "c", "missing"]);
        assert_eq!(narrowed.fields.len(), 2);
        assert!(narrowed.fields.contains_key("a"));
        assert!(narrowed.fields.contains_key("c"));
    }
}
