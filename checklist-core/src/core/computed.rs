//! Named computations backing `computed` and `formula` fields.
//!
//! Computed columns pick one of a closed set of kinds; nothing is compiled or
//! evaluated from strings.

use crate::{FieldValue, Item};
use serde::{Deserialize, Serialize};

/// A computation a field definition can reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComputedKind {
    /// Sum of `field` over the direct children. A child without the field
    /// contributes the sum over its own children instead.
    SumOfChildren { field: String },
    /// Share of done leaves under the item, 0 to 100. Intermediate items are
    /// not counted; a leaf counts itself.
    PercentDone,
    /// Number of direct children.
    CountChildren,
    /// Number of direct children marked done.
    CountDone,
    /// Sum of several numeric fields on the item itself; missing fields count as 0.
    Sum { fields: Vec<String> },
    /// Product of several numeric fields on the item itself; empty if any is missing.
    Product { fields: Vec<String> },
}

impl ComputedKind {
    /// Evaluates the computation for `item`.
    #[must_use]
    pub fn evaluate(&self, item: &Item) -> FieldValue {
        match self {
            Self::SumOfChildren { field } => FieldValue::Number(sum_of_children(item, field)),
            Self::PercentDone => {
                let (done, total) = leaf_counts(item);
                FieldValue::Number(if total == 0 { 0.0 } else { done as f64 * 100.0 / total as f64 })
            }
            Self::CountChildren => FieldValue::Number(item.children.len() as f64),
            Self::CountDone => {
                FieldValue::Number(item.children.iter().filter(|c| c.done).count() as f64)
            }
            Self::Sum { fields } => FieldValue::Number(
                fields
                    .iter()
                    .filter_map(|f| item.fields.get(f).and_then(FieldValue::as_number))
                    .sum(),
            ),
            Self::Product { fields } => {
                let values: Option<Vec<f64>> = fields
                    .iter()
                    .map(|f| item.fields.get(f).and_then(FieldValue::as_number))
                    .collect();
                match values {
                    Some(v) if !v.is_empty() => FieldValue::Number(v.iter().product()),
                    _ => FieldValue::Empty,
                }
            }
        }
    }
}

fn sum_of_children(item: &Item, field: &str) -> f64 {
    item.children
        .iter()
        .map(|child| match child.fields.get(field).and_then(FieldValue::as_number) {
            Some(n) => n,
            None => sum_of_children(child, field),
        })
        .sum()
}

fn leaf_counts(item: &Item) -> (usize, usize) {
    if item.children.is_empty() {
        return (usize::from(item.done), 1);
    }
    item.children.iter().fold((0, 0), |(d, t), child| {
        let (cd, ct) = leaf_counts(child);
        (d + cd, t + ct)
    })
}
