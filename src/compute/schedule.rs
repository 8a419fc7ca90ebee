//! Dependency ordering for grid variables.

/// Order variables so that every variable runs after the ones it samples.
///
/// `dependencies[i]` lists the indices variable `i` reads. Self-references are
/// ignored since every kernel implicitly reads its own previous state. Ties
/// are broken by registration order, so independent variables keep the order
/// in which they were added.
///
/// Returns `Err(index)` naming one variable on a cycle.
pub fn dependency_order(dependencies: &[Vec<usize>]) -> Result<Vec<usize>, usize> {
    let count = dependencies.len();
    let mut pending = vec![0usize; count];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

    for (variable, deps) in dependencies.iter().enumerate() {
        for &dep in deps {
            if dep == variable || dep >= count {
                continue;
            }
            pending[variable] += 1;
            dependents[dep].push(variable);
        }
    }

    let mut order = Vec::with_capacity(count);
    let mut done = vec![false; count];

    while order.len() < count {
        let next = (0..count).find(|&i| !done[i] && pending[i] == 0);
        let Some(next) = next else {
            let stuck = (0..count).find(|&i| !done[i]).unwrap_or(0);
            return Err(stuck);
        };

        done[next] = true;
        order.push(next);
        for &dependent in &dependents[next] {
            pending[dependent] -= 1;
        }
    }

    Ok(order)
}
