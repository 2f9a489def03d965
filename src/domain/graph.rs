//! Dependency resolution shared by the metric evaluator and the indicator cache.
//!
//! Both evaluate named values that declare the names they depend on. This
//! module only decides the order: callers own the values and run the
//! computations.

use std::collections::HashMap;

use super::error::StratsimError;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Returns the names that still need computing, dependencies before dependents.
///
/// The walk is depth-first in the order `targets` and each dependency list
/// are given. A name for which `is_present` holds is treated as a leaf and
/// never scheduled, so seeded inputs and previously computed values are not
/// recomputed. `dependencies_of` returns `None` for names that are neither
/// registered nor present, which fails with `MissingDependency`. Meeting a
/// name again while it is still being descended fails with `CyclicDependency`.
pub fn resolve_order<'a, I, D, P>(
    targets: I,
    dependencies_of: D,
    is_present: P,
) -> Result<Vec<String>, StratsimError>
where
    I: IntoIterator<Item = &'a str>,
    D: Fn(&str) -> Option<&'a [String]>,
    P: Fn(&str) -> bool,
{
    let mut marks: HashMap<&'a str, Mark> = HashMap::new();
    let mut order = Vec::new();
    for target in targets {
        visit(target, &dependencies_of, &is_present, &mut marks, &mut order)?;
    }
    Ok(order)
}

fn visit<'a, D, P>(
    name: &'a str,
    dependencies_of: &D,
    is_present: &P,
    marks: &mut HashMap<&'a str, Mark>,
    order: &mut Vec<String>,
) -> Result<(), StratsimError>
where
    D: Fn(&str) -> Option<&'a [String]>,
    P: Fn(&str) -> bool,
{
    match marks.get(name) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::InProgress) => {
            return Err(StratsimError::CyclicDependency {
                name: name.to_string(),
            });
        }
        None => {}
    }

    if is_present(name) {
        marks.insert(name, Mark::Done);
        return Ok(());
    }

    let parents = dependencies_of(name).ok_or_else(|| StratsimError::MissingDependency {
        name: name.to_string(),
    })?;

    marks.insert(name, Mark::InProgress);
    for parent in parents {
        visit(parent.as_str(), dependencies_of, is_present, marks, order)?;
    }
    marks.insert(name, Mark::Done);
    order.push(name.to_string());
    Ok(())
}
