use std::collections::HashMap;

use crate::error::{SiltError, SiltResult};
use crate::execution::row::Row;
use crate::sql::ast::{AggregateCall, AggregateFunc, SelectItem};
use crate::utils::scalar::Value;

pub fn has_aggregates(projection: &[SelectItem]) -> bool {
    projection
        .iter()
        .any(|item| matches!(item, SelectItem::Aggregate(_)))
}

/// Group rows and evaluate the select list per group, in select-list order.
///
/// The grouping key is the tuple of values at the GROUP BY columns; with no
/// GROUP BY all rows form one implicit group. Groups are emitted in first-
/// appearance order. A non-aggregate select item takes its value from the
/// group's first row.
pub fn apply_aggregates(
    rows: &[Row],
    projection: &[SelectItem],
    group_by: &[String],
) -> SiltResult<Vec<Vec<Value>>> {
    let mut group_index: HashMap<Vec<String>, usize> = HashMap::new();
    let mut groups: Vec<Vec<&Row>> = vec![];

    if group_by.is_empty() {
        groups.push(rows.iter().collect());
    } else {
        for row in rows {
            let mut key = Vec::with_capacity(group_by.len());
            for column in group_by {
                key.push(row.resolve_strict(column)?.to_string());
            }
            match group_index.get(&key) {
                Some(&idx) => groups[idx].push(row),
                None => {
                    group_index.insert(key, groups.len());
                    groups.push(vec![row]);
                }
            }
        }
    }

    let mut output = Vec::with_capacity(groups.len());
    for group in &groups {
        let mut out_row = Vec::with_capacity(projection.len());
        for item in projection {
            let value = match item {
                SelectItem::Aggregate(call) => compute_aggregate(call, group)?,
                SelectItem::Column(name) => match group.first() {
                    Some(row) => row.resolve_strict(name)?,
                    None => Value::Null,
                },
                SelectItem::Wildcard => {
                    return Err(SiltError::Schema(
                        "'*' cannot be combined with GROUP BY or aggregates".to_string(),
                    ))
                }
            };
            out_row.push(value);
        }
        output.push(out_row);
    }
    Ok(output)
}

/// COUNT(*) counts rows; COUNT(col) counts non-null fields; SUM/MIN/MAX
/// keep the column's type; AVG is always a float. An empty input yields
/// null (except COUNT, which yields 0).
fn compute_aggregate(call: &AggregateCall, rows: &[&Row]) -> SiltResult<Value> {
    let Some(column) = &call.column else {
        return Ok(Value::Int(rows.len() as i32));
    };

    let mut values = vec![];
    for row in rows {
        let value = row.resolve_strict(column)?;
        if !value.is_null() {
            values.push(value);
        }
    }

    match call.func {
        AggregateFunc::Count => Ok(Value::Int(values.len() as i32)),
        AggregateFunc::Sum => sum(column, &values),
        AggregateFunc::Avg => match sum(column, &values)? {
            Value::Null => Ok(Value::Null),
            total => {
                let total = match total {
                    Value::Int(v) => v as f64,
                    Value::Float(v) => v,
                    _ => unreachable!("sum yields a numeric value"),
                };
                Ok(Value::Float(total / values.len() as f64))
            }
        },
        AggregateFunc::Min => Ok(extremum(&values, std::cmp::Ordering::Less)),
        AggregateFunc::Max => Ok(extremum(&values, std::cmp::Ordering::Greater)),
    }
}

fn sum(column: &str, values: &[Value]) -> SiltResult<Value> {
    if values.is_empty() {
        return Ok(Value::Null);
    }
    if values.iter().all(|v| matches!(v, Value::Int(_))) {
        let total: i64 = values
            .iter()
            .map(|v| match v {
                Value::Int(i) => *i as i64,
                _ => 0,
            })
            .sum();
        return Ok(i32::try_from(total)
            .map(Value::Int)
            .unwrap_or(Value::Float(total as f64)));
    }
    let mut total = 0.0;
    for value in values {
        match value {
            Value::Int(v) => total += *v as f64,
            Value::Float(v) => total += v,
            other => {
                return Err(SiltError::Type(format!(
                    "cannot aggregate non-numeric value '{other}' in column '{column}'"
                )))
            }
        }
    }
    Ok(Value::Float(total))
}

fn extremum(values: &[Value], keep: std::cmp::Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for value in values {
        best = match best {
            None => Some(value),
            Some(current) => match value.compare(current) {
                Some(ordering) if ordering == keep => Some(value),
                _ => Some(current),
            },
        };
    }
    best.cloned().unwrap_or(Value::Null)
}
