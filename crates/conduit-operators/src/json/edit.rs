//! Field updates for `TASK_EDIT_VALUES`.

use serde::Deserialize;
use serde_json::{Map, Value};

/// What to do when an updated field does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
  /// Create missing fields, including intermediate objects.
  Create,
  /// Leave missing fields alone.
  Skip,
  /// Fail the whole record.
  Error,
}

impl ConflictResolution {
  pub fn from_name(name: &str) -> Option<Self> {
    match name {
      "create" => Some(Self::Create),
      "skip" => Some(Self::Skip),
      "error" => Some(Self::Error),
      _ => None,
    }
  }
}

/// One field assignment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
  pub field: String,
  #[serde(default)]
  pub new_value: Value,
}

/// Apply `updates` to one object.
///
/// Only [`ConflictResolution::Error`] turns a failed update into an error;
/// otherwise the update is dropped and the rest still apply.
pub fn apply_updates(
  data: &mut Value,
  updates: &[Update],
  dot_notation: bool,
  resolution: ConflictResolution,
) -> Result<(), String> {
  for update in updates {
    let path: Vec<&str> = if dot_notation {
      update.field.split('.').collect()
    } else {
      vec![update.field.as_str()]
    };
    let result = apply(data, &path, &update.new_value, resolution);
    if let Err(e) = result
      && resolution == ConflictResolution::Error
    {
      return Err(e);
    }
  }
  Ok(())
}

fn apply(
  data: &mut Value,
  path: &[&str],
  new_value: &Value,
  resolution: ConflictResolution,
) -> Result<(), String> {
  let Some((last, parents)) = path.split_last() else {
    return Err("empty field".to_string());
  };

  let mut current = data;
  for part in parents {
    current = child(current, part, resolution)?;
  }

  let Value::Object(object) = current else {
    return Err(format!("cannot set '{}' on a non-object", last));
  };
  match object.get_mut(*last) {
    Some(existing) => {
      if !same_kind(existing, new_value) {
        return Err(format!(
          "type mismatch: existing field '{}' has a different type than the new value",
          last
        ));
      }
      *existing = new_value.clone();
      Ok(())
    }
    None => match resolution {
      ConflictResolution::Create => {
        object.insert(last.to_string(), new_value.clone());
        Ok(())
      }
      ConflictResolution::Skip => Ok(()),
      ConflictResolution::Error => Err(format!("Field '{}' does not exist", last)),
    },
  }
}

fn child<'v>(
  current: &'v mut Value,
  part: &str,
  resolution: ConflictResolution,
) -> Result<&'v mut Value, String> {
  match current {
    Value::Object(object) => {
      if !object.contains_key(part) {
        if resolution != ConflictResolution::Create {
          return Err(format!("Field '{}' does not exist", part));
        }
        object.insert(part.to_string(), Value::Object(Map::new()));
      }
      object
        .get_mut(part)
        .ok_or_else(|| format!("Field '{}' does not exist", part))
    }
    Value::Array(items) => {
      let index: usize = part
        .parse()
        .map_err(|_| format!("'{}' is not an array index", part))?;
      items
        .get_mut(index)
        .ok_or_else(|| format!("index {} out of range", index))
    }
    _ => Err(format!("cannot descend into '{}'", part)),
  }
}

fn same_kind(a: &Value, b: &Value) -> bool {
  std::mem::discriminant(a) == std::mem::discriminant(b)
}
