//! Component conditions.
//!
//! A condition decides per record whether a component runs. It is written
//! with `${...}` references and C-style boolean operators:
//!
//! ```text
//! ${variable.count} > 2 && !${fetch.output.empty}
//! ```
//!
//! Conditions are translated to a minijinja expression where every reference
//! becomes a subscript chain on the record memory (`memory["fetch"]["output"]`)
//! so component IDs containing `-` stay valid.

use minijinja::{Environment, UndefinedBehavior, Value, context};

use crate::error::RecipeError;
use crate::reference::{Segment, find_references, parse_path};

#[derive(Debug, Clone)]
pub struct Condition {
  component_id: String,
  source: String,
  expression: String,
}

impl Condition {
  /// Translate and compile a condition.
  pub fn parse(component_id: &str, source: &str) -> Result<Self, RecipeError> {
    let invalid = |message: String| RecipeError::InvalidCondition {
      component_id: component_id.to_string(),
      message,
    };

    let expression = translate(source).map_err(|e| invalid(e.to_string()))?;
    environment()
      .compile_expression(&expression)
      .map_err(|e| invalid(e.to_string()))?;

    Ok(Self {
      component_id: component_id.to_string(),
      source: source.to_string(),
      expression,
    })
  }

  /// The condition as written in the recipe.
  pub fn source(&self) -> &str {
    &self.source
  }

  /// Evaluate against one record's memory.
  pub fn evaluate(&self, record: &serde_json::Value) -> Result<bool, RecipeError> {
    let env = environment();
    let expr = env
      .compile_expression(&self.expression)
      .map_err(|e| self.error(e))?;
    let result = expr
      .eval(context! { memory => Value::from_serialize(record) })
      .map_err(|e| self.error(e))?;
    Ok(result.is_true())
  }

  fn error(&self, e: minijinja::Error) -> RecipeError {
    RecipeError::InvalidCondition {
      component_id: self.component_id.clone(),
      message: e.to_string(),
    }
  }
}

fn environment() -> Environment<'static> {
  let mut env = Environment::new();
  // Skipped upstream components leave holes in memory; those compare as
  // undefined instead of failing the lookup.
  env.set_undefined_behavior(UndefinedBehavior::Chainable);
  env
}

/// Rewrite references and operators outside string literals.
fn translate(source: &str) -> Result<String, RecipeError> {
  let mut out = String::with_capacity(source.len() * 2);
  let mut quote: Option<char> = None;
  let mut escaped = false;
  let mut rest = source;

  while let Some(c) = rest.chars().next() {
    if let Some(q) = quote {
      out.push(c);
      if escaped {
        escaped = false;
      } else if c == '\\' {
        escaped = true;
      } else if c == q {
        quote = None;
      }
      rest = &rest[c.len_utf8()..];
      continue;
    }

    if rest.starts_with("${") {
      let reference = find_references(rest)?
        .into_iter()
        .next()
        .ok_or_else(|| RecipeError::InvalidReference {
          reference: rest.to_string(),
          message: "missing closing '}'".to_string(),
        })?;
      out.push_str(&lookup_expression(&parse_path(reference.path)?));
      rest = &rest[reference.end..];
      continue;
    }

    if rest.starts_with("&&") {
      out.push_str(" and ");
      rest = &rest[2..];
      continue;
    }
    if rest.starts_with("||") {
      out.push_str(" or ");
      rest = &rest[2..];
      continue;
    }
    if c == '!' && !rest.starts_with("!=") {
      out.push_str(" not ");
      rest = &rest[1..];
      continue;
    }

    if c == '"' || c == '\'' {
      quote = Some(c);
    }
    out.push(c);
    rest = &rest[c.len_utf8()..];
  }

  Ok(out)
}

fn lookup_expression(segments: &[Segment]) -> String {
  let mut expr = String::from("memory");
  for segment in segments {
    match segment {
      Segment::Key(key) => {
        expr.push('[');
        expr.push_str(&serde_json::Value::String(key.clone()).to_string());
        expr.push(']');
      }
      Segment::Index(index) => {
        expr.push_str(&format!("[{}]", index));
      }
    }
  }
  expr
}
