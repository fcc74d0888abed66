//! Dependency resolution: selection -> topologically ordered plan.
//!
//! Depth-first topological sort with three-state coloring. Roots are
//! visited in catalog insertion order and dependency lists in declared
//! order, so tasks with no ordering constraint keep catalog order and
//! reruns are deterministic.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::catalog::{Catalog, TaskDefinition};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("dependency cycle involving: {}", involved.join(" -> "))]
    Cycle { involved: Vec<String> },
    #[error("selected task '{0}' is not in the catalog")]
    UnknownTask(String),
}

/// Dependency-ordered task sequence. Immutable once built; consumed
/// exactly once via [`ExecutionPlan::into_tasks`].
#[derive(Debug)]
pub struct ExecutionPlan {
    tasks: Vec<TaskDefinition>,
}

impl ExecutionPlan {
    pub fn tasks(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    pub fn ids(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn into_tasks(self) -> Vec<TaskDefinition> {
        self.tasks
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Visited,
}

struct Sorter<'a> {
    by_id: HashMap<&'a str, &'a TaskDefinition>,
    marks: HashMap<&'a str, Mark>,
    /// Current DFS path, for cycle reporting.
    path: Vec<&'a str>,
    order: Vec<TaskDefinition>,
}

impl<'a> Sorter<'a> {
    fn visit(&mut self, task: &'a TaskDefinition) -> Result<(), ResolveError> {
        match self.marks.get(task.id.as_str()) {
            Some(Mark::Visited) => return Ok(()),
            Some(Mark::Visiting) => {
                // Back-edge: everything from the first occurrence of
                // this id on the path is part of the cycle.
                let pos = self
                    .path
                    .iter()
                    .position(|id| *id == task.id)
                    .unwrap_or(0);
                let mut involved: Vec<String> =
                    self.path[pos..].iter().map(|s| s.to_string()).collect();
                involved.push(task.id.clone());
                return Err(ResolveError::Cycle { involved });
            }
            None => {}
        }

        self.marks.insert(&task.id, Mark::Visiting);
        self.path.push(&task.id);

        for dep in &task.dependencies {
            // The loader guarantees dependencies resolve, but a catalog
            // built by hand may not have gone through it.
            let dep_task = self
                .by_id
                .get(dep.as_str())
                .copied()
                .ok_or_else(|| ResolveError::UnknownTask(dep.clone()))?;
            self.visit(dep_task)?;
        }

        self.path.pop();
        self.marks.insert(&task.id, Mark::Visited);
        self.order.push(task.clone());
        Ok(())
    }
}

/// Order the selected tasks plus their transitive prerequisites so that
/// every prerequisite precedes its dependents. Cycles are fatal.
pub fn resolve(selected: &[String], catalog: &Catalog) -> Result<ExecutionPlan, ResolveError> {
    let by_id: HashMap<&str, &TaskDefinition> =
        catalog.iter_tasks().map(|t| (t.id.as_str(), t)).collect();

    let wanted: HashSet<&str> = selected.iter().map(|s| s.as_str()).collect();
    for id in &wanted {
        if !by_id.contains_key(id) {
            return Err(ResolveError::UnknownTask(id.to_string()));
        }
    }

    let mut sorter = Sorter {
        by_id,
        marks: HashMap::new(),
        path: Vec::new(),
        order: Vec::new(),
    };

    // Roots in catalog insertion order keeps reruns deterministic.
    for task in catalog.iter_tasks() {
        if wanted.contains(task.id.as_str()) {
            sorter.visit(task)?;
        }
    }

    Ok(ExecutionPlan {
        tasks: sorter.order,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::{catalog_of, tweak};

    fn ids(plan: &ExecutionPlan) -> Vec<String> {
        plan.tasks().iter().map(|t| t.id.clone()).collect()
    }

    fn select(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_selecting_dependent_pulls_in_prerequisite() {
        let catalog = catalog_of(vec![tweak("a", &[]), tweak("b", &["a"])]);
        let plan = resolve(&select(&["b"]), &catalog).unwrap();
        assert_eq!(ids(&plan), vec!["a", "b"]);
    }

    #[test]
    fn test_prerequisites_precede_dependents() {
        let catalog = catalog_of(vec![
            tweak("base", &[]),
            tweak("mid", &["base"]),
            tweak("top", &["mid", "base"]),
            tweak("other", &[]),
        ]);
        let plan = resolve(&select(&["top", "other", "mid"]), &catalog).unwrap();
        let order = ids(&plan);
        for task in plan.tasks() {
            let own = order.iter().position(|i| *i == task.id).unwrap();
            for dep in &task.dependencies {
                let dep_pos = order.iter().position(|i| i == dep).unwrap();
                assert!(dep_pos < own, "{dep} must precede {}", task.id);
            }
        }
    }

    #[test]
    fn test_unconstrained_tasks_keep_catalog_order() {
        let catalog = catalog_of(vec![tweak("c", &[]), tweak("a", &[]), tweak("b", &[])]);
        // Selection order differs from catalog order; catalog order wins.
        let plan = resolve(&select(&["b", "a", "c"]), &catalog).unwrap();
        assert_eq!(ids(&plan), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_cycle_is_fatal_and_named() {
        let catalog = catalog_of(vec![
            tweak("a", &["b"]),
            tweak("b", &["c"]),
            tweak("c", &["a"]),
        ]);
        let err = resolve(&select(&["a"]), &catalog).unwrap_err();
        match err {
            ResolveError::Cycle { involved } => {
                for id in ["a", "b", "c"] {
                    assert!(involved.iter().any(|i| i == id), "{id} missing from cycle");
                }
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let catalog = catalog_of(vec![tweak("a", &["a"])]);
        let err = resolve(&select(&["a"]), &catalog).unwrap_err();
        assert!(matches!(err, ResolveError::Cycle { .. }));
    }

    #[test]
    fn test_unknown_selection_is_error() {
        let catalog = catalog_of(vec![tweak("a", &[])]);
        let err = resolve(&select(&["missing"]), &catalog).unwrap_err();
        assert!(matches!(err, ResolveError::UnknownTask(id) if id == "missing"));
    }

    #[test]
    fn test_shared_prerequisite_appears_once() {
        let catalog = catalog_of(vec![
            tweak("base", &[]),
            tweak("x", &["base"]),
            tweak("y", &["base"]),
        ]);
        let plan = resolve(&select(&["x", "y"]), &catalog).unwrap();
        assert_eq!(ids(&plan), vec!["base", "x", "y"]);
    }

    #[test]
    fn test_diamond_resolves_deterministically() {
        let catalog = catalog_of(vec![
            tweak("root", &[]),
            tweak("left", &["root"]),
            tweak("right", &["root"]),
            tweak("tip", &["left", "right"]),
        ]);
        let plan = resolve(&select(&["tip"]), &catalog).unwrap();
        assert_eq!(ids(&plan), vec!["root", "left", "right", "tip"]);
    }
}
