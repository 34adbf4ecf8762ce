//! Module dependency ordering
//!
//! Orders the modules of one directory so that sibling references load
//! first. References to modules outside the directory are left to the
//! reference resolver and do not constrain the order.

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::module::registry::discovery::DiscoveredModule;
use crate::module::traits::ModuleError;

/// Dependency resolution result
#[derive(Debug, Clone)]
pub struct DependencyResolution {
    /// Module names in load order (dependencies first)
    pub load_order: Vec<String>,
    /// Sibling dependencies per module
    pub dependencies: HashMap<String, Vec<String>>,
    /// References satisfied outside the directory
    pub external: Vec<String>,
}

/// Dependency resolver
pub struct ModuleDependencies;

impl ModuleDependencies {
    /// Determine load order
    pub fn resolve(
        discovered_modules: &[DiscoveredModule],
    ) -> Result<DependencyResolution, ModuleError> {
        let names: BTreeSet<String> = discovered_modules.iter().map(|m| m.name()).collect();

        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        let mut external = BTreeSet::new();

        for module in discovered_modules {
            let mut siblings = Vec::new();
            for reference in module.references() {
                if names.contains(&reference) {
                    siblings.push(reference);
                } else {
                    external.insert(reference);
                }
            }
            dependencies.insert(module.name(), siblings);
        }

        let load_order = Self::topological_sort(&dependencies)?;
        debug!("Dependency resolution complete: {:?}", load_order);

        Ok(DependencyResolution {
            load_order,
            dependencies,
            external: external.into_iter().collect(),
        })
    }

    /// Kahn's algorithm; ready modules are taken in name order
    fn topological_sort(
        dependencies: &HashMap<String, Vec<String>>,
    ) -> Result<Vec<String>, ModuleError> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut graph: HashMap<&str, Vec<&str>> = HashMap::new();

        for module in dependencies.keys() {
            in_degree.insert(module.as_str(), 0);
        }

        // Build reverse graph and calculate in-degrees
        for (module, deps) in dependencies {
            for dep in deps {
                graph.entry(dep.as_str()).or_default().push(module.as_str());
                *in_degree.entry(module.as_str()).or_insert(0) += 1;
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&module, _)| module)
            .collect();

        let mut result = Vec::with_capacity(dependencies.len());
        while let Some(module) = ready.pop_first() {
            result.push(module.to_string());

            if let Some(dependents) = graph.get(module) {
                for &dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(dependent);
                        }
                    }
                }
            }
        }

        if result.len() != dependencies.len() {
            let mut stuck: Vec<_> = in_degree
                .iter()
                .filter(|(_, &degree)| degree > 0)
                .map(|(&module, _)| module)
                .collect();
            stuck.sort_unstable();
            return Err(ModuleError::DependencyCycle(stuck.join(", ")));
        }

        Ok(result)
    }
}
