//! `${...}` references and template rendering.
//!
//! A reference is a path into a record's memory:
//!
//! ```text
//! ${variable.name}
//! ${fetch.output.items[0]["display name"]}
//! ```
//!
//! The first segment is the reference parent: a trigger slot (`variable`,
//! `secret`, `connection`) or a component ID. Rendering a template walks
//! objects and arrays and replaces references inside strings:
//! - a string that is exactly one reference becomes the referenced value,
//!   keeping its JSON type
//! - references embedded in longer strings are interpolated; strings are
//!   inserted verbatim, everything else as JSON

use std::collections::BTreeSet;

use serde_json::Value;

use crate::error::RecipeError;

const OPEN: &str = "${";
const CLOSE: char = '}';

/// One segment of a reference path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Key(String),
  Index(usize),
}

/// A reference found inside a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference<'a> {
  /// Byte offset of `${`.
  pub start: usize,
  /// Byte offset just past the closing `}`.
  pub end: usize,
  /// The trimmed path between the braces.
  pub path: &'a str,
}

/// Find every reference in `text`, in order.
pub fn find_references(text: &str) -> Result<Vec<Reference<'_>>, RecipeError> {
  let mut refs = Vec::new();
  let mut offset = 0;

  while let Some(pos) = text[offset..].find(OPEN) {
    let start = offset + pos;
    let body_start = start + OPEN.len();
    let Some(len) = text[body_start..].find(CLOSE) else {
      return Err(RecipeError::InvalidReference {
        reference: text[start..].to_string(),
        message: "missing closing '}'".to_string(),
      });
    };
    let end = body_start + len + 1;
    let path = text[body_start..body_start + len].trim();
    if path.is_empty() {
      return Err(RecipeError::InvalidReference {
        reference: text[start..end].to_string(),
        message: "empty path".to_string(),
      });
    }
    refs.push(Reference { start, end, path });
    offset = end;
  }

  Ok(refs)
}

/// Split a reference path into segments.
pub fn parse_path(path: &str) -> Result<Vec<Segment>, RecipeError> {
  let invalid = |message: &str| RecipeError::InvalidReference {
    reference: path.to_string(),
    message: message.to_string(),
  };

  let mut segments = Vec::new();
  let mut key = String::new();
  let mut after_bracket = false;
  let mut chars = path.trim().chars();

  while let Some(c) = chars.next() {
    match c {
      '.' => {
        if key.is_empty() {
          if !after_bracket {
            return Err(invalid("empty path segment"));
          }
        } else {
          segments.push(Segment::Key(std::mem::take(&mut key)));
        }
        after_bracket = false;
      }
      '[' => {
        if !key.is_empty() {
          segments.push(Segment::Key(std::mem::take(&mut key)));
        } else if segments.is_empty() {
          return Err(invalid("path cannot start with an index"));
        }

        let mut inner = String::new();
        let mut closed = false;
        for c in chars.by_ref() {
          if c == ']' {
            closed = true;
            break;
          }
          inner.push(c);
        }
        if !closed {
          return Err(invalid("missing closing ']'"));
        }

        let inner = inner.trim();
        let quoted = inner
          .strip_prefix('"')
          .and_then(|s| s.strip_suffix('"'))
          .or_else(|| inner.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')));
        match quoted {
          Some(k) => segments.push(Segment::Key(k.to_string())),
          None => {
            let index = inner
              .parse::<usize>()
              .map_err(|_| invalid("index must be a non-negative integer or a quoted key"))?;
            segments.push(Segment::Index(index));
          }
        }
        after_bracket = true;
      }
      c if c.is_whitespace() => return Err(invalid("unexpected whitespace")),
      c => {
        if after_bracket {
          return Err(invalid("expected '.' or '[' after ']'"));
        }
        key.push(c);
      }
    }
  }

  if !key.is_empty() {
    segments.push(Segment::Key(key));
  } else if !after_bracket {
    return Err(invalid("empty path segment"));
  }

  Ok(segments)
}

/// The first segment of a path, which names a slot or a component.
pub fn reference_parent(path: &str) -> Result<String, RecipeError> {
  match parse_path(path)?.into_iter().next() {
    Some(Segment::Key(parent)) => Ok(parent),
    _ => Err(RecipeError::InvalidReference {
      reference: path.to_string(),
      message: "path must start with a name".to_string(),
    }),
  }
}

/// Collect the paths of all references inside a template value.
pub fn collect_paths(template: &Value) -> Result<BTreeSet<String>, RecipeError> {
  let mut paths = BTreeSet::new();
  collect_into(template, &mut paths)?;
  Ok(paths)
}

fn collect_into(template: &Value, paths: &mut BTreeSet<String>) -> Result<(), RecipeError> {
  match template {
    Value::String(s) => {
      for r in find_references(s)? {
        paths.insert(r.path.to_string());
      }
    }
    Value::Array(items) => {
      for item in items {
        collect_into(item, paths)?;
      }
    }
    Value::Object(map) => {
      for value in map.values() {
        collect_into(value, paths)?;
      }
    }
    _ => {}
  }
  Ok(())
}

/// Look up a path inside a value.
pub fn lookup<'v>(root: &'v Value, segments: &[Segment]) -> Option<&'v Value> {
  segments.iter().try_fold(root, |current, segment| match segment {
    Segment::Key(key) => current.get(key.as_str()),
    Segment::Index(index) => current.get(*index),
  })
}

/// Render a template against a context.
///
/// With `allow_unresolved`, missing paths render as `null` instead of
/// failing.
pub fn render(template: &Value, context: &Value, allow_unresolved: bool) -> Result<Value, RecipeError> {
  match template {
    Value::String(s) => render_str(s, context, allow_unresolved),
    Value::Array(items) => items
      .iter()
      .map(|item| render(item, context, allow_unresolved))
      .collect::<Result<Vec<_>, _>>()
      .map(Value::Array),
    Value::Object(map) => {
      let mut rendered = serde_json::Map::with_capacity(map.len());
      for (key, value) in map {
        rendered.insert(key.clone(), render(value, context, allow_unresolved)?);
      }
      Ok(Value::Object(rendered))
    }
    other => Ok(other.clone()),
  }
}

fn render_str(text: &str, context: &Value, allow_unresolved: bool) -> Result<Value, RecipeError> {
  let refs = find_references(text)?;
  if refs.is_empty() {
    return Ok(Value::String(text.to_string()));
  }

  if let [only] = refs.as_slice()
    && only.start == 0
    && only.end == text.len()
  {
    return resolve(only.path, context, allow_unresolved);
  }

  let mut out = String::with_capacity(text.len());
  let mut last = 0;
  for r in &refs {
    out.push_str(&text[last..r.start]);
    match resolve(r.path, context, allow_unresolved)? {
      Value::String(s) => out.push_str(&s),
      other => out.push_str(&other.to_string()),
    }
    last = r.end;
  }
  out.push_str(&text[last..]);

  Ok(Value::String(out))
}

fn resolve(path: &str, context: &Value, allow_unresolved: bool) -> Result<Value, RecipeError> {
  let segments = parse_path(path)?;
  match lookup(context, &segments) {
    Some(value) => Ok(value.clone()),
    None if allow_unresolved => Ok(Value::Null),
    None => Err(RecipeError::Unresolved(path.to_string())),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn context() -> Value {
    json!({
      "variable": { "name": "Ada", "age": 36, "tags": ["a", "b"] },
      "fetch": { "output": { "items": [{ "display name": "first" }] } }
    })
  }

  #[test]
  fn test_find_references() {
    let refs = find_references("Hi ${variable.name}, you are ${ variable.age }").unwrap();
    assert_eq!(refs.len(), 2);
    assert_eq!(refs[0].path, "variable.name");
    assert_eq!(refs[1].path, "variable.age");
    assert_eq!(refs[0].start, 3);
  }

  #[test]
  fn test_find_references_unterminated() {
    let err = find_references("${variable.name").unwrap_err();
    assert!(matches!(err, RecipeError::InvalidReference { .. }));
  }

  #[test]
  fn test_parse_path_segments() {
    let segments = parse_path(r#"fetch.output.items[0]["display name"]"#).unwrap();
    assert_eq!(
      segments,
      vec![
        Segment::Key("fetch".to_string()),
        Segment::Key("output".to_string()),
        Segment::Key("items".to_string()),
        Segment::Index(0),
        Segment::Key("display name".to_string()),
      ]
    );
  }

  #[test]
  fn test_parse_path_rejects_malformed() {
    assert!(parse_path("a..b").is_err());
    assert!(parse_path("a.").is_err());
    assert!(parse_path("[0]").is_err());
    assert!(parse_path("a[x]").is_err());
    assert!(parse_path("a[0").is_err());
    assert!(parse_path("a[0]b").is_err());
  }

  #[test]
  fn test_reference_parent() {
    assert_eq!(reference_parent("variable.name").unwrap(), "variable");
    assert_eq!(reference_parent("json-0.output[1]").unwrap(), "json-0");
  }

  #[test]
  fn test_render_whole_reference_keeps_type() {
    let rendered = render(&json!("${variable.age}"), &context(), false).unwrap();
    assert_eq!(rendered, json!(36));

    let rendered = render(&json!("${variable.tags}"), &context(), false).unwrap();
    assert_eq!(rendered, json!(["a", "b"]));
  }

  #[test]
  fn test_render_interpolates_embedded_references() {
    let rendered = render(
      &json!("${variable.name} is ${variable.age}, tags ${variable.tags}"),
      &context(),
      false,
    )
    .unwrap();
    assert_eq!(rendered, json!(r#"Ada is 36, tags ["a","b"]"#));
  }

  #[test]
  fn test_render_nested_template() {
    let template = json!({
      "who": "${variable.name}",
      "list": ["${fetch.output.items[0][\"display name\"]}", 1, true],
      "static": null
    });
    let rendered = render(&template, &context(), false).unwrap();
    assert_eq!(
      rendered,
      json!({ "who": "Ada", "list": ["first", 1, true], "static": null })
    );
  }

  #[test]
  fn test_render_unresolved() {
    let err = render(&json!("${variable.missing}"), &context(), false).unwrap_err();
    assert_eq!(err, RecipeError::Unresolved("variable.missing".to_string()));

    let rendered = render(&json!({ "x": "${other.output}" }), &context(), true).unwrap();
    assert_eq!(rendered, json!({ "x": null }));
  }

  #[test]
  fn test_collect_paths() {
    let paths = collect_paths(&json!({
      "a": "${variable.name}",
      "b": ["${fetch.output}", "x ${variable.name} y"]
    }))
    .unwrap();
    assert_eq!(
      paths.into_iter().collect::<Vec<_>>(),
      vec!["fetch.output".to_string(), "variable.name".to_string()]
    );
  }
}
