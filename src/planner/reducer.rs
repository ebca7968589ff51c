//! Collectors merging partial results.
//!
//! A task counts arrivals; the reducer only decides what the merged value looks
//! like. `and`, `or` and `sum` give the same result whatever the arrival order.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    /// Boolean conjunction of every value's truthiness.
    And,
    /// Boolean disjunction of every value's truthiness.
    Or,
    /// Numeric sum.
    Sum,
    /// Arrays appended in arrival order; scalars are appended as elements.
    Concat,
    /// Objects merged recursively, later keys win for scalars.
    Merge,
    /// Last value wins.
    #[default]
    Replace,
}

impl Reducer {
    /// Folds `value` into the accumulated `current` value.
    pub fn reduce(self, current: Option<Value>, value: Value) -> Value {
        let Some(current) = current else {
            return self.first(value);
        };
        match self {
            Reducer::And => Value::Bool(truthy(&current) && truthy(&value)),
            Reducer::Or => Value::Bool(truthy(&current) || truthy(&value)),
            Reducer::Sum => sum(&current, &value),
            Reducer::Concat => {
                let mut items = into_items(current);
                items.extend(into_items(value));
                Value::Array(items)
            }
            Reducer::Merge => merge(current, value),
            Reducer::Replace => value,
        }
    }

    fn first(self, value: Value) -> Value {
        match self {
            Reducer::And | Reducer::Or => Value::Bool(truthy(&value)),
            Reducer::Concat => Value::Array(into_items(value)),
            Reducer::Sum if !value.is_number() => Value::from(0),
            _ => value,
        }
    }
}

fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

fn sum(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x
                .checked_add(y)
                .map(Value::from)
                .unwrap_or_else(|| float(x as f64 + y as f64)),
            _ => float(x.as_f64().unwrap_or(0.0) + y.as_f64().unwrap_or(0.0)),
        },
        (Value::Number(_), _) => a.clone(),
        (_, Value::Number(_)) => b.clone(),
        _ => Value::from(0),
    }
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

fn into_items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn merge(current: Value, value: Value) -> Value {
    match (current, value) {
        (Value::Object(mut target), Value::Object(source)) => {
            merge_into(&mut target, source);
            Value::Object(target)
        }
        (_, value) => value,
    }
}

fn merge_into(target: &mut Map<String, Value>, source: Map<String, Value>) {
    for (key, value) in source {
        match target.get_mut(&key) {
            Some(existing) => {
                let current = existing.take();
                *existing = merge(current, value);
            }
            None => {
                target.insert(key, value);
            }
        }
    }
}
