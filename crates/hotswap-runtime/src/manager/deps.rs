//! Dependency wiring, cycle detection and load ordering.

use std::collections::{BTreeMap, HashSet};

use hotswap_kernel::DependencyKind;
use hotswap_kernel::symbol::IMPORT;
use tracing::debug;

use crate::error::{HotswapError, HotswapResult};
use crate::hook::invoke_hook;
use crate::plugin::{LoadedPlugin, name_key};

type Graph = BTreeMap<String, LoadedPlugin>;

/// Wire the imports of every fresh plugin and order the generation.
pub(super) fn resolve(graph: &Graph) -> HotswapResult<Vec<LoadedPlugin>> {
    for plugin in graph.values().filter(|p| !p.is_carried_over()) {
        wire_imports(plugin, graph)?;
    }
    if let Some(cycle) = find_cycle(graph) {
        return Err(HotswapError::CyclicDependency(cycle));
    }
    check_carried_over(graph)?;
    order(graph)
}

fn wire_imports(plugin: &LoadedPlugin, graph: &Graph) -> HotswapResult<()> {
    debug!("<hotswap> invoking {}.{}", plugin.name(), IMPORT);
    let imports = invoke_hook(Some(plugin.name()), IMPORT, || (plugin.funcs().import)())?;
    let Some(imports) = imports else {
        plugin.set_dependencies(Vec::new());
        return Ok(());
    };

    let mut deps = Vec::with_capacity(imports.len());
    for dependency in imports.iter() {
        let field = match dependency.kind() {
            DependencyKind::Ignored(_) => continue,
            DependencyKind::Anonymous => {
                return Err(HotswapError::AnonymousDependency {
                    plugin: plugin.name().to_string(),
                    ty: dependency.expected_type().to_string(),
                });
            }
            DependencyKind::Named(field) => field,
        };
        let target = graph
            .get(&name_key(field))
            .ok_or_else(|| HotswapError::UnknownDependency {
                plugin: plugin.name().to_string(),
                dependency: field.clone(),
            })?;
        if !plugin.is_reloadable() && target.is_reloadable() {
            return Err(HotswapError::ReloadabilityMismatch {
                plugin: plugin.name().to_string(),
                dependency: target.name().to_string(),
            });
        }
        // No export: the edge still counts, the slot stays empty.
        if let Some(exported) = target.exported() {
            if !dependency.slot().assign(exported) {
                return Err(HotswapError::NotAssignable {
                    plugin: plugin.name().to_string(),
                    dependency: target.name().to_string(),
                    field: field.clone(),
                    expected: dependency.expected_type().to_string(),
                });
            }
        }
        deps.push(target.name().to_string());
    }
    plugin.set_dependencies(deps);
    Ok(())
}

/// First cycle found, as the path from its entry plugin back to itself.
fn find_cycle(graph: &Graph) -> Option<Vec<String>> {
    let mut path = Vec::new();
    graph
        .iter()
        .filter(|(_, p)| !p.dependencies().is_empty())
        .find_map(|(key, _)| walk(key, graph, &mut path))
}

fn walk(key: &str, graph: &Graph, path: &mut Vec<String>) -> Option<Vec<String>> {
    let plugin = graph.get(key)?;
    if let Some(pos) = path.iter().position(|k| k == key) {
        let mut cycle: Vec<String> = path[pos..]
            .iter()
            .filter_map(|k| graph.get(k).map(|p| p.name().to_string()))
            .collect();
        cycle.push(plugin.name().to_string());
        return Some(cycle);
    }

    path.push(key.to_string());
    let found = plugin
        .dependencies()
        .iter()
        .find_map(|dep| walk(&name_key(dep), graph, path));
    path.pop();
    found
}

/// A carried-over plugin must only depend on carried-over plugins.
fn check_carried_over(graph: &Graph) -> HotswapResult<()> {
    for plugin in graph.values().filter(|p| p.is_carried_over()) {
        for dep in plugin.dependencies() {
            match graph.get(&name_key(dep)) {
                None => {
                    return Err(HotswapError::UnknownDependency {
                        plugin: plugin.name().to_string(),
                        dependency: dep.clone(),
                    });
                }
                Some(d) if !d.is_carried_over() => {
                    return Err(HotswapError::StaleDependency {
                        rebuilt: d.name().to_string(),
                        stale: plugin.name().to_string(),
                    });
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

/// Order plugins so each follows its dependencies, breaking ties by name.
fn order(graph: &Graph) -> HotswapResult<Vec<LoadedPlugin>> {
    let n = graph.len();
    let mut ordered = Vec::with_capacity(n);
    let mut placed: HashSet<&str> = HashSet::with_capacity(n);
    let mut waiting = Vec::new();

    for (key, plugin) in graph {
        if plugin.dependencies().is_empty() {
            ordered.push(plugin.clone());
            placed.insert(key.as_str());
        } else {
            waiting.push((key.as_str(), plugin));
        }
    }

    for _ in 0..=n {
        if ordered.len() == n {
            return Ok(ordered);
        }
        for &(key, plugin) in &waiting {
            if placed.contains(key) {
                continue;
            }
            let ready = plugin
                .dependencies()
                .iter()
                .all(|dep| placed.contains(name_key(dep).as_str()));
            if ready {
                ordered.push(plugin.clone());
                placed.insert(key);
            }
        }
    }
    if ordered.len() == n {
        return Ok(ordered);
    }
    Err(HotswapError::Internal(format!(
        "failed to order {} plugins, {} left unplaced",
        n,
        n - ordered.len()
    )))
}
