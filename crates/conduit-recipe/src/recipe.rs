use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use conduit_config::{ComponentDef, OutputDef, RecipeDef, VariableDef};
use serde_json::Value;

use crate::condition::Condition;
use crate::error::RecipeError;
use crate::graph::Graph;
use crate::iteration::{DEFAULT_INDEX, Iteration, IterationSource};
use crate::reference::{self, Segment};

/// Trigger-level memory slot holding the trigger record fields.
pub const VARIABLE_SLOT: &str = "variable";
/// Trigger-level memory slot holding secrets.
pub const SECRET_SLOT: &str = "secret";
/// Trigger-level memory slot holding connection settings.
pub const CONNECTION_SLOT: &str = "connection";
/// Memory slot holding the rendered pipeline output.
pub const OUTPUT_SLOT: &str = "output";

const RESERVED: [&str; 4] = [VARIABLE_SLOT, SECRET_SLOT, CONNECTION_SLOT, OUTPUT_SLOT];

/// A compiled component node.
#[derive(Debug, Clone)]
pub struct Node {
  pub component_id: String,
  pub def: ComponentDef,
  pub condition: Option<Condition>,
  /// Set for iterator nodes.
  pub iteration: Option<Iteration>,
}

/// A validated recipe ready for execution.
///
/// Compilation checks every reference, builds the dependency graph and
/// orders components into dependency groups. A recipe that compiles cannot
/// fail structurally at run time except for component lookups, which depend
/// on the registry.
#[derive(Debug, Clone)]
pub struct Recipe {
  variables: BTreeMap<String, VariableDef>,
  outputs: BTreeMap<String, OutputDef>,
  nodes: BTreeMap<String, Node>,
  graph: Graph,
  groups: Vec<Vec<String>>,
}

impl Recipe {
  pub fn compile(def: RecipeDef) -> Result<Self, RecipeError> {
    let RecipeDef {
      variable,
      component,
      output,
      ..
    } = def;

    let mut declared: BTreeSet<String> = component.keys().cloned().collect();
    let scope = Scope {
      variables: &variable,
      components: &component,
      enclosing: BTreeMap::new(),
      output_location: OUTPUT_SLOT.to_string(),
    };
    let level = compile_level(&scope, &output, &mut declared)?;

    Ok(Self {
      variables: variable,
      outputs: output,
      nodes: level.nodes,
      graph: level.graph,
      groups: level.groups,
    })
  }

  pub fn node(&self, component_id: &str) -> Option<&Node> {
    self.nodes.get(component_id)
  }

  pub fn nodes(&self) -> impl Iterator<Item = &Node> {
    self.nodes.values()
  }

  /// Every node that runs a task, including those nested in iterators.
  pub fn task_nodes(&self) -> Vec<&Node> {
    let mut nodes = Vec::with_capacity(self.nodes.len());
    for node in self.nodes.values() {
      match &node.iteration {
        Some(iteration) => nodes.extend(iteration.body.task_nodes()),
        None => nodes.push(node),
      }
    }
    nodes
  }

  pub fn variables(&self) -> &BTreeMap<String, VariableDef> {
    &self.variables
  }

  pub fn outputs(&self) -> &BTreeMap<String, OutputDef> {
    &self.outputs
  }

  pub fn graph(&self) -> &Graph {
    &self.graph
  }

  /// Components in dependency order, grouped by what may run concurrently.
  pub fn dependency_groups(&self) -> &[Vec<String>] {
    &self.groups
  }

  /// Render the pipeline output for one record.
  ///
  /// References to components that were skipped or failed render as `null`.
  pub fn render_output(&self, record: &Value) -> Result<Value, RecipeError> {
    let mut rendered = serde_json::Map::with_capacity(self.outputs.len());
    for (key, output_def) in &self.outputs {
      rendered.insert(
        key.clone(),
        reference::render(&output_def.value, record, true)?,
      );
    }
    Ok(Value::Object(rendered))
  }
}

/// Names references may resolve against at one nesting level.
struct Scope<'a> {
  variables: &'a BTreeMap<String, VariableDef>,
  components: &'a BTreeMap<String, ComponentDef>,
  /// Names from enclosing levels, with the outer component they depend on.
  enclosing: BTreeMap<String, Option<String>>,
  output_location: String,
}

/// What a reference resolved to.
enum Target {
  Slot,
  Component(String),
  Enclosing(Option<String>),
}

struct Level {
  nodes: BTreeMap<String, Node>,
  graph: Graph,
  groups: Vec<Vec<String>>,
  /// Outer components referenced from this level.
  outer: BTreeSet<String>,
}

fn compile_level(
  scope: &Scope<'_>,
  outputs: &BTreeMap<String, OutputDef>,
  declared: &mut BTreeSet<String>,
) -> Result<Level, RecipeError> {
  let mut nodes = BTreeMap::new();
  let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
  let mut outer = BTreeSet::new();

  for (component_id, component_def) in scope.components.iter() {
    if RESERVED.contains(&component_id.as_str()) {
      return Err(RecipeError::ReservedComponentId(component_id.clone()));
    }

    let location = format!("{}.input", component_id);
    let mut paths = reference::collect_paths(&component_def.input)?;
    if component_def.is_iterator() {
      if let Some(range) = &component_def.range {
        paths.extend(reference::collect_paths(range)?);
      }
    }

    let condition = match &component_def.condition {
      Some(source) => {
        let condition = Condition::parse(component_id, source)?;
        for r in reference::find_references(source)? {
          paths.insert(r.path.to_string());
        }
        Some(condition)
      }
      None => None,
    };

    let mut upstream = BTreeSet::new();
    for path in &paths {
      match resolve(&location, path, scope)? {
        Target::Slot => {}
        Target::Component(parent) => {
          upstream.insert(parent);
        }
        Target::Enclosing(parent) => outer.extend(parent),
      }
    }

    let iteration = if component_def.is_iterator() {
      let (iteration, body_upstream) = compile_iteration(component_id, component_def, scope, declared)?;
      upstream.extend(body_upstream);
      Some(iteration)
    } else {
      if let Some(setup) = &component_def.setup {
        for path in reference::collect_paths(setup)? {
          let parent = reference::reference_parent(&path)?;
          if parent != SECRET_SLOT && parent != CONNECTION_SLOT {
            return Err(RecipeError::SetupReference {
              component_id: component_id.clone(),
              reference: path,
            });
          }
        }
      }
      None
    };

    dependencies.insert(component_id.clone(), upstream);
    nodes.insert(
      component_id.clone(),
      Node {
        component_id: component_id.clone(),
        def: component_def.clone(),
        condition,
        iteration,
      },
    );
  }

  for (key, output_def) in outputs {
    let location = format!("{}.{}", scope.output_location, key);
    for path in reference::collect_paths(&output_def.value)? {
      if let Target::Enclosing(parent) = resolve(&location, &path, scope)? {
        outer.extend(parent);
      }
    }
  }

  let graph = Graph::new(&dependencies);
  let groups = graph.dependency_groups()?;

  Ok(Level {
    nodes,
    graph,
    groups,
    outer,
  })
}

/// Compile an iterator's nested components into their own recipe.
///
/// Returns the iteration and the components of `scope` the body reads.
fn compile_iteration(
  component_id: &str,
  def: &ComponentDef,
  scope: &Scope<'_>,
  declared: &mut BTreeSet<String>,
) -> Result<(Iteration, BTreeSet<String>), RecipeError> {
  let invalid = |message: &str| RecipeError::InvalidIterator {
    component_id: component_id.to_string(),
    message: message.to_string(),
  };

  if !scope.enclosing.is_empty() {
    return Err(invalid("iterators cannot be nested"));
  }
  if def.setup.is_some() {
    return Err(invalid("iterators take no setup"));
  }
  if def.component.is_empty() {
    return Err(invalid("at least one nested component is required"));
  }

  for nested_id in def.component.keys() {
    if RESERVED.contains(&nested_id.as_str()) {
      return Err(RecipeError::ReservedComponentId(nested_id.clone()));
    }
    if !declared.insert(nested_id.clone()) {
      return Err(RecipeError::DuplicateComponentId(nested_id.clone()));
    }
  }

  let mut enclosing: BTreeMap<String, Option<String>> = scope
    .components
    .keys()
    .map(|id| (id.clone(), Some(id.clone())))
    .collect();
  enclosing.insert(component_id.to_string(), None);

  let source = if !def.input.is_null() {
    IterationSource::Elements(def.input.clone())
  } else if let Some(range) = &def.range {
    let index = def.index.clone().unwrap_or_else(|| DEFAULT_INDEX.to_string());
    if !matches!(reference::parse_path(&index).as_deref(), Ok([Segment::Key(_)]))
      || RESERVED.contains(&index.as_str())
      || enclosing.contains_key(&index)
      || def.component.contains_key(&index)
    {
      return Err(invalid(&format!("index name '{}' is not available", index)));
    }
    enclosing.insert(index.clone(), None);
    IterationSource::Range {
      template: range.clone(),
      index,
    }
  } else {
    return Err(invalid("either `input` or `range` is required"));
  };

  let outputs: BTreeMap<String, OutputDef> = def
    .output_elements
    .iter()
    .map(|(key, template)| {
      let output_def = OutputDef {
        title: None,
        value: Value::String(template.clone()),
      };
      (key.clone(), output_def)
    })
    .collect();

  let body_scope = Scope {
    variables: scope.variables,
    components: &def.component,
    enclosing,
    output_location: format!("{}.outputElements", component_id),
  };
  let level = compile_level(&body_scope, &outputs, declared)?;

  let body = Recipe {
    variables: scope.variables.clone(),
    outputs,
    nodes: level.nodes,
    graph: level.graph,
    groups: level.groups,
  };
  let iteration = Iteration {
    source,
    body: Arc::new(body),
  };
  Ok((iteration, level.outer))
}

/// Validate one reference path and say what it points at.
fn resolve(location: &str, path: &str, scope: &Scope<'_>) -> Result<Target, RecipeError> {
  let segments = reference::parse_path(path)?;
  let parent = match segments.first() {
    Some(Segment::Key(parent)) => parent.as_str(),
    _ => {
      return Err(RecipeError::InvalidReference {
        reference: path.to_string(),
        message: "path must start with a name".to_string(),
      });
    }
  };

  match parent {
    VARIABLE_SLOT => match segments.get(1) {
      Some(Segment::Key(name)) if scope.variables.contains_key(name) => Ok(Target::Slot),
      Some(Segment::Key(name)) => Err(RecipeError::UnknownVariable {
        location: location.to_string(),
        name: name.clone(),
      }),
      None => Ok(Target::Slot),
      Some(Segment::Index(_)) => Err(RecipeError::InvalidReference {
        reference: path.to_string(),
        message: "variables are addressed by name".to_string(),
      }),
    },
    SECRET_SLOT | CONNECTION_SLOT => Ok(Target::Slot),
    _ if scope.components.contains_key(parent) => Ok(Target::Component(parent.to_string())),
    _ => match scope.enclosing.get(parent) {
      Some(outer) => Ok(Target::Enclosing(outer.clone())),
      None => Err(RecipeError::UnknownReference {
        location: location.to_string(),
        parent: parent.to_string(),
        reference: path.to_string(),
      }),
    },
  }
}
