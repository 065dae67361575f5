//! Iterator nodes.
//!
//! An iterator runs a nested set of components once per element of an
//! array, or once per index of a range, for every record it is started on.
//! Each element gets its own record in a child batch:
//!
//! ```text
//! variable, secret, connection   copied from the parent record
//! <upstream component>           copied from the parent record
//! <iterator id>.element          the element (array iteration)
//! <index name>                   the index (range iteration)
//! ```
//!
//! After the child batch ran, each `outputElements` template is rendered per
//! element and gathered into one array per field.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::RecipeError;
use crate::recipe::Recipe;

/// Index name used when a range iterator does not set `index`.
pub const DEFAULT_INDEX: &str = "i";

/// Key under the iterator's slot holding the current element.
pub const ELEMENT_KEY: &str = "element";

/// What an iterator walks over.
#[derive(Debug, Clone, PartialEq)]
pub enum IterationSource {
  /// Template rendering to the array to iterate over.
  Elements(Value),
  /// Template rendering to a range, exposed to the body under `index`.
  Range { template: Value, index: String },
}

/// A compiled iterator node.
#[derive(Debug, Clone)]
pub struct Iteration {
  pub source: IterationSource,
  /// The nested components. Its outputs are the `outputElements`.
  pub body: Arc<Recipe>,
}

impl Iteration {
  /// Gather each element's rendered output into one array per field.
  pub fn gather(&self, elements: &[Value]) -> Value {
    let mut gathered = Map::with_capacity(self.body.outputs().len());
    for key in self.body.outputs().keys() {
      let values = elements
        .iter()
        .map(|element| element.get(key).cloned().unwrap_or(Value::Null))
        .collect();
      gathered.insert(key.clone(), Value::Array(values));
    }
    Value::Object(gathered)
  }
}

/// Expand a rendered range into its indexes.
///
/// Accepts `[start, stop]`, `[start, stop, step]` or
/// `{"start": .., "stop": .., "step": ..}` with integer values. `stop` is
/// exclusive. Without a step the range counts up by one.
pub fn range_indexes(range: &Value) -> Result<Vec<i64>, RecipeError> {
  let invalid = |message: &str| RecipeError::InvalidRange(message.to_string());
  let integer = |value: &Value, name: &str| {
    value
      .as_i64()
      .ok_or_else(|| RecipeError::InvalidRange(format!("`{}` must be an integer, got {}", name, value)))
  };

  let (start, stop, step) = match range {
    Value::Array(items) => {
      if items.len() < 2 || items.len() > 3 {
        return Err(invalid("must be in the form [start, stop[, step]]"));
      }
      let step = match items.get(2) {
        Some(step) => Some(integer(step, "step")?),
        None => None,
      };
      (integer(&items[0], "start")?, integer(&items[1], "stop")?, step)
    }
    Value::Object(map) => {
      let start = map.get("start").ok_or_else(|| invalid("`start` is missing"))?;
      let stop = map.get("stop").ok_or_else(|| invalid("`stop` is missing"))?;
      let step = match map.get("step") {
        Some(step) => Some(integer(step, "step")?),
        None => None,
      };
      (integer(start, "start")?, integer(stop, "stop")?, step)
    }
    other => {
      return Err(RecipeError::InvalidRange(format!(
        "must be an array or an object, got {}",
        other
      )));
    }
  };

  match step {
    None if start > stop => Err(invalid("the `stop` should be larger than `start`")),
    None => Ok((start..stop).collect()),
    Some(0) => Err(invalid("the `step` should not be zero")),
    Some(step) if start > stop && step > 0 => Err(invalid("the `step` should be negative")),
    Some(step) if start < stop && step < 0 => Err(invalid("the `step` should be positive")),
    Some(step) => {
      let mut indexes = Vec::new();
      let mut current = start;
      while (step > 0 && current < stop) || (step < 0 && current > stop) {
        indexes.push(current);
        current += step;
      }
      Ok(indexes)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_range_forms() {
    assert_eq!(range_indexes(&json!([0, 3])).unwrap(), vec![0, 1, 2]);
    assert_eq!(range_indexes(&json!([0, 5, 2])).unwrap(), vec![0, 2, 4]);
    assert_eq!(range_indexes(&json!([5, 0, -2])).unwrap(), vec![5, 3, 1]);
    assert_eq!(
      range_indexes(&json!({ "start": 1, "stop": 4 })).unwrap(),
      vec![1, 2, 3]
    );
    assert_eq!(
      range_indexes(&json!({ "start": 0, "stop": 9, "step": 3 })).unwrap(),
      vec![0, 3, 6]
    );
    assert!(range_indexes(&json!([2, 2])).unwrap().is_empty());
  }

  #[test]
  fn test_range_errors() {
    let message = |range: Value| range_indexes(&range).unwrap_err().to_string();

    assert_eq!(
      message(json!([1])),
      "iterator range error, must be in the form [start, stop[, step]]"
    );
    assert_eq!(
      message(json!({ "stop": 1 })),
      "iterator range error, `start` is missing"
    );
    assert_eq!(
      message(json!([3, 1])),
      "iterator range error, the `stop` should be larger than `start`"
    );
    assert_eq!(
      message(json!([0, 3, 0])),
      "iterator range error, the `step` should not be zero"
    );
    assert_eq!(
      message(json!([3, 0, 1])),
      "iterator range error, the `step` should be negative"
    );
    assert_eq!(
      message(json!([0, 3, -1])),
      "iterator range error, the `step` should be positive"
    );
    assert!(message(json!(["a", 3])).contains("`start` must be an integer"));
    assert!(message(json!("0..3")).contains("must be an array or an object"));
  }
}
