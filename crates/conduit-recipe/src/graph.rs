use std::collections::{BTreeMap, BTreeSet};

use crate::error::RecipeError;

/// Component dependency graph for traversal and scheduling.
///
/// Edges point from a component to the components that reference it.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Adjacency list: component_id -> list of downstream component_ids.
  adjacency: BTreeMap<String, Vec<String>>,
  /// Reverse adjacency: component_id -> list of upstream component_ids.
  reverse_adjacency: BTreeMap<String, Vec<String>>,
  /// Components with no upstream components.
  entry_points: Vec<String>,
}

impl Graph {
  /// Build a graph from each component's upstream set.
  pub fn new(dependencies: &BTreeMap<String, BTreeSet<String>>) -> Self {
    let mut adjacency: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut reverse_adjacency: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for component_id in dependencies.keys() {
      adjacency.entry(component_id.clone()).or_default();
      reverse_adjacency.entry(component_id.clone()).or_default();
    }

    for (to, upstream) in dependencies {
      for from in upstream {
        adjacency.entry(from.clone()).or_default().push(to.clone());
        reverse_adjacency
          .entry(to.clone())
          .or_default()
          .push(from.clone());
      }
    }

    let entry_points = reverse_adjacency
      .iter()
      .filter(|(_, incoming)| incoming.is_empty())
      .map(|(id, _)| id.clone())
      .collect();

    Self {
      adjacency,
      reverse_adjacency,
      entry_points,
    }
  }

  /// Get entry points (components without upstream components).
  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  /// Get downstream components for a given component.
  pub fn downstream(&self, component_id: &str) -> &[String] {
    self
      .adjacency
      .get(component_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get upstream components for a given component.
  pub fn upstream(&self, component_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(component_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Order components into groups that can run concurrently.
  ///
  /// Every component appears after all of its upstream components. Within a
  /// group, IDs are sorted.
  pub fn dependency_groups(&self) -> Result<Vec<Vec<String>>, RecipeError> {
    let mut remaining: BTreeMap<&str, usize> = self
      .reverse_adjacency
      .iter()
      .map(|(id, upstream)| (id.as_str(), upstream.len()))
      .collect();
    let mut groups = Vec::new();

    loop {
      let ready: Vec<String> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| id.to_string())
        .collect();
      if ready.is_empty() {
        break;
      }

      for id in &ready {
        remaining.remove(id.as_str());
        for down in self.downstream(id) {
          if let Some(count) = remaining.get_mut(down.as_str()) {
            *count -= 1;
          }
        }
      }
      groups.push(ready);
    }

    if !remaining.is_empty() {
      return Err(RecipeError::Cycle(
        remaining.keys().map(|id| id.to_string()).collect(),
      ));
    }

    Ok(groups)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn deps(edges: &[(&str, &[&str])]) -> BTreeMap<String, BTreeSet<String>> {
    edges
      .iter()
      .map(|(id, upstream)| {
        (
          id.to_string(),
          upstream.iter().map(|u| u.to_string()).collect(),
        )
      })
      .collect()
  }

  #[test]
  fn test_upstream_and_downstream() {
    let graph = Graph::new(&deps(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"])]));
    assert_eq!(graph.entry_points(), &["a".to_string()]);
    assert_eq!(graph.downstream("a"), &["b".to_string(), "c".to_string()]);
    assert_eq!(graph.upstream("c"), &["a".to_string(), "b".to_string()]);
    assert!(graph.upstream("missing").is_empty());
  }

  #[test]
  fn test_dependency_groups() {
    let graph = Graph::new(&deps(&[
      ("fetch", &[]),
      ("config", &[]),
      ("merge", &["fetch", "config"]),
      ("send", &["merge"]),
    ]));
    let groups = graph.dependency_groups().unwrap();
    assert_eq!(
      groups,
      vec![
        vec!["config".to_string(), "fetch".to_string()],
        vec!["merge".to_string()],
        vec!["send".to_string()],
      ]
    );
  }

  #[test]
  fn test_cycle_detected() {
    let graph = Graph::new(&deps(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"]), ("d", &[])]));
    let err = graph.dependency_groups().unwrap_err();
    assert_eq!(
      err,
      RecipeError::Cycle(vec!["a".to_string(), "b".to_string(), "c".to_string()])
    );
  }

  #[test]
  fn test_empty_graph() {
    let graph = Graph::new(&BTreeMap::new());
    assert!(graph.dependency_groups().unwrap().is_empty());
  }
}
