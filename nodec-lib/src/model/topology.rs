use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

/// Error type for topology operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyError<K: Debug + Clone> {
    /// Cycle detected while walking dependencies
    CycleDetected { path: Vec<K> },
}

impl<K: Debug + Clone> std::fmt::Display for TopologyError<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyError::CycleDetected { path } => {
                write!(f, "Cycle detected: ")?;
                for (i, node) in path.iter().enumerate() {
                    if i > 0 {
                        write!(f, " -> ")?;
                    }
                    write!(f, "{:?}", node)?;
                }
                Ok(())
            }
        }
    }
}

impl<K: Debug + Clone> std::error::Error for TopologyError<K> {}

/// Dependency-closure topological sort using DFS.
///
/// Starting from `roots`, follows `get_dependencies` and returns every node
/// reached, dependencies before dependents. Nodes unreachable from the roots
/// are not part of the result. Roots are visited in the order given, so a
/// caller passing all nodes in creation order gets a stable ordering back.
pub fn topological_sort<K>(
    roots: impl IntoIterator<Item = K>,
    get_dependencies: impl Fn(&K) -> Vec<K>,
) -> Result<Vec<K>, TopologyError<K>>
where
    K: Hash + Eq + Clone + Debug,
{
    let mut sorted = Vec::new();
    let mut visited = HashSet::new();
    let mut path = Vec::new();

    fn visit<K>(
        node: K,
        get_dependencies: &dyn Fn(&K) -> Vec<K>,
        visited: &mut HashSet<K>,
        path: &mut Vec<K>,
        sorted: &mut Vec<K>,
    ) -> Result<(), TopologyError<K>>
    where
        K: Hash + Eq + Clone + Debug,
    {
        if let Some(start) = path.iter().position(|n| *n == node) {
            let mut cycle = path[start..].to_vec();
            cycle.push(node);
            return Err(TopologyError::CycleDetected { path: cycle });
        }

        if visited.contains(&node) {
            return Ok(());
        }

        path.push(node.clone());
        for dependency in get_dependencies(&node) {
            visit(dependency, get_dependencies, visited, path, sorted)?;
        }
        path.pop();

        visited.insert(node.clone());
        sorted.push(node);
        Ok(())
    }

    for root in roots {
        visit(root, &get_dependencies, &mut visited, &mut path, &mut sorted)?;
    }

    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_chain() {
        // a -> b -> c
        let deps = |node: &&str| -> Vec<&str> {
            match *node {
                "b" => vec!["a"],
                "c" => vec!["b"],
                _ => vec![],
            }
        };

        let sorted = topological_sort(vec!["c"], deps).unwrap();
        assert_eq!(sorted, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_diamond() {
        // a -> b -> d
        // a -> c -> d
        let deps = |node: &&str| -> Vec<&str> {
            match *node {
                "b" => vec!["a"],
                "c" => vec!["a"],
                "d" => vec!["b", "c"],
                _ => vec![],
            }
        };

        let sorted = topological_sort(vec!["d"], deps).unwrap();
        assert_eq!(sorted, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_unreachable_nodes_are_skipped() {
        let deps = |node: &&str| -> Vec<&str> {
            match *node {
                "b" => vec!["a"],
                "x" => vec!["a"],
                _ => vec![],
            }
        };

        let sorted = topological_sort(vec!["b"], deps).unwrap();
        assert_eq!(sorted, vec!["a", "b"]);
    }

    #[test]
    fn test_cycle_detection() {
        // a -> b -> a
        let deps = |node: &&str| -> Vec<&str> {
            match *node {
                "a" => vec!["b"],
                "b" => vec!["a"],
                _ => vec![],
            }
        };

        match topological_sort(vec!["a"], deps) {
            Err(TopologyError::CycleDetected { path }) => assert_eq!(path, vec!["a", "b", "a"]),
            other => panic!("Expected cycle error, got {:?}", other),
        }
    }
}
