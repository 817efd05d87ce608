//! Compilation ordering over the unit dependency graph.
//!
//! Units are visited depth first in declaration order, each unit's
//! dependencies in the order they were declared. A unit is emitted once all of
//! its dependencies have been emitted, so the same input always yields the
//! same order.

use std::collections::HashMap;

use itertools::Itertools;

use crate::{
    bytecode::FOUNDATION,
    unit::{CompileUnit, OutputKind},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("unit {name:?} is declared more than once")]
    DuplicateUnit { name: String },

    #[error("unit name {name:?} is reserved for the built-in module")]
    ReservedName { name: String },

    #[error("expected exactly one executable unit, found {found}: [{}]", .names.join(", "))]
    ExecutableCount { found: usize, names: Vec<String> },

    #[error("unit {unit:?} depends on {missing:?}, which is not part of the build")]
    UnknownDependency { unit: String, missing: String },

    #[error("cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
}

/// Checks the structural rules of a build request: unique names, none taken
/// by the built-in module, and exactly one executable root.
pub fn validate(units: &[CompileUnit]) -> Result<(), Error> {
    index_units(units)?;
    if let Some(unit) = units.iter().find(|u| u.name == FOUNDATION) {
        return Err(Error::ReservedName {
            name: unit.name.clone(),
        });
    }
    let executables = units
        .iter()
        .filter(|u| u.kind == OutputKind::Executable)
        .map(|u| u.name.clone())
        .collect_vec();
    if executables.len() != 1 {
        return Err(Error::ExecutableCount {
            found: executables.len(),
            names: executables,
        });
    }
    Ok(())
}

/// Orders `units` so that every unit comes after all units it depends on.
pub fn resolve(units: &[CompileUnit]) -> Result<Vec<&CompileUnit>, Error> {
    let index = index_units(units)?;

    // Unknown names are reported before any traversal so that a missing
    // dependency inside a cycle is still reported as missing.
    for unit in units {
        if let Some(missing) = unit
            .dependencies
            .iter()
            .find(|dep| !index.contains_key(dep.as_str()))
        {
            return Err(Error::UnknownDependency {
                unit: unit.name.clone(),
                missing: missing.clone(),
            });
        }
    }

    let mut resolver = Resolver {
        units,
        index,
        marks: vec![Mark::Unvisited; units.len()],
        path: vec![],
        order: Vec::with_capacity(units.len()),
    };
    for idx in 0..units.len() {
        resolver.visit(idx)?;
    }
    Ok(resolver.order.into_iter().map(|idx| &units[idx]).collect())
}

/// Groups an already resolved order into layers: units in one layer have no
/// dependency on each other and only depend on units of earlier layers.
pub fn layers<'u>(order: &[&'u CompileUnit]) -> Vec<Vec<&'u CompileUnit>> {
    let mut depth: HashMap<&str, usize> = HashMap::new();
    let mut layers: Vec<Vec<&'u CompileUnit>> = vec![];
    for unit in order {
        let layer = unit
            .dependencies
            .iter()
            .filter_map(|dep| depth.get(dep.as_str()))
            .map(|d| d + 1)
            .max()
            .unwrap_or(0);
        depth.insert(unit.name.as_str(), layer);
        if layers.len() <= layer {
            layers.resize_with(layer + 1, Vec::new);
        }
        layers[layer].push(unit);
    }
    layers
}

fn index_units(units: &[CompileUnit]) -> Result<HashMap<&str, usize>, Error> {
    let mut index = HashMap::with_capacity(units.len());
    for (idx, unit) in units.iter().enumerate() {
        if index.insert(unit.name.as_str(), idx).is_some() {
            return Err(Error::DuplicateUnit {
                name: unit.name.clone(),
            });
        }
    }
    Ok(index)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Active,
    Done,
}

struct Resolver<'u> {
    units: &'u [CompileUnit],
    index: HashMap<&'u str, usize>,
    marks: Vec<Mark>,
    path: Vec<usize>,
    order: Vec<usize>,
}

impl<'u> Resolver<'u> {
    fn visit(&mut self, idx: usize) -> Result<(), Error> {
        match self.marks[idx] {
            Mark::Done => return Ok(()),
            Mark::Active => return Err(self.cycle_error(idx)),
            Mark::Unvisited => {}
        }

        self.marks[idx] = Mark::Active;
        self.path.push(idx);
        let units = self.units;
        for dep in &units[idx].dependencies {
            let dep_idx = self.index[dep.as_str()];
            self.visit(dep_idx)?;
        }
        self.path.pop();
        self.marks[idx] = Mark::Done;
        self.order.push(idx);
        Ok(())
    }

    fn cycle_error(&self, closing: usize) -> Error {
        let start = self
            .path
            .iter()
            .position(|&idx| idx == closing)
            .unwrap_or(0);
        let cycle = self.path[start..]
            .iter()
            .chain([&closing])
            .map(|&idx| self.units[idx].name.clone())
            .collect();
        Error::CyclicDependency { cycle }
    }
}
