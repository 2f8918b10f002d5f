//! Parallel dispatcher: fans out generation evaluation and disjoint
//! subgraph coloring across a `rayon` thread pool, then merges and validates
//! (spec.md §4.8).
//!
//! Grounded on the reference workflow engine's `rayon::prelude::*` usage in
//! `federated/aggregation.rs` and `patterns/hybrid_patterns.rs`: plain
//! `par_iter`/`into_par_iter` over an owned `Vec`, no custom thread-pool
//! plumbing. Merge order here is by chunk index, not completion order, to
//! satisfy the determinism guarantee in spec.md §5.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::calendar::Calendar;
use crate::colorer::{repair, CancelToken, DsaturColorer, WeekScope};
use crate::error::{SchedulerError, SchedulerResult};
use crate::graph::ConflictGraph;
use crate::model::{ClassId, Coloring, ScheduleConstraints};

/// Smallest component size worth splitting further; below this, a component
/// is colored whole on one worker.
const MIN_CHUNK_SIZE: usize = 8;

/// Partitions `graph` for parallel coloring: one chunk per connected
/// component, with any component larger than `MIN_CHUNK_SIZE * 2` further
/// split into equal vertex-count chunks. Boundary edges (ids straddling two
/// chunks of the same component) are kept in both chunks so each chunk's
/// local coloring sees every relevant neighbor, per spec.md §4.8.
fn partition(graph: &ConflictGraph) -> Vec<Vec<ClassId>> {
    let components = graph.connected_components();
    let mut chunks = Vec::new();
    for component in components {
        if component.len() <= MIN_CHUNK_SIZE * 2 {
            chunks.push(component);
            continue;
        }
        let target_chunks = (component.len() + MIN_CHUNK_SIZE - 1) / MIN_CHUNK_SIZE;
        let chunk_len = (component.len() + target_chunks - 1) / target_chunks;
        for base in component.chunks(chunk_len) {
            let mut chunk: Vec<ClassId> = base.to_vec();
            // Pull in any neighbor outside this chunk so boundary edges are
            // visible to the local coloring pass.
            let mut extra = Vec::new();
            for id in base {
                for n in graph.neighbors(id) {
                    if !chunk.contains(n) {
                        extra.push(n.clone());
                    }
                }
            }
            chunk.extend(extra);
            chunks.push(chunk);
        }
    }
    chunks
}

/// Colors a subgraph restricted to `ids`, reusing the full graph's
/// adjacency/available data so boundary edges are respected.
fn color_subgraph(
    graph: &ConflictGraph,
    ids: &[ClassId],
    constraints: &ScheduleConstraints,
    calendar: &Calendar,
    weeks: u32,
    cancel: &CancelToken,
) -> SchedulerResult<Coloring> {
    let subgraph = graph.restricted_to(ids);
    let scope = WeekScope::new(calendar, weeks);
    DsaturColorer::new(&subgraph, constraints, scope).color(cancel)
}

/// Colors disjoint (or boundary-overlapping) subgraphs of `graph` in
/// parallel, merges the results, then runs a final global validation. If
/// boundary conflicts remain after the merge, reruns repair on the
/// conflicting vertices (spec.md §4.8).
pub fn parallel_color(
    graph: &ConflictGraph,
    constraints: &ScheduleConstraints,
    calendar: &Calendar,
    weeks: u32,
    cancel: &CancelToken,
) -> SchedulerResult<Coloring> {
    let chunks = partition(graph);
    debug!(chunks = chunks.len(), vertices = graph.len(), "dispatcher partitioned graph");

    let results: Vec<SchedulerResult<Coloring>> = chunks
        .par_iter()
        .map(|ids| color_subgraph(graph, ids, constraints, calendar, weeks, cancel))
        .collect();

    let mut merged = Coloring::new();
    for (index, result) in results.into_iter().enumerate() {
        let coloring = result.map_err(|e| {
            warn!(chunk = index, error = %e, "dispatcher chunk failed to color");
            e
        })?;
        // Merge in chunk order, not completion order, so the result is
        // reproducible regardless of scheduling jitter.
        for (id, slot) in coloring.assignments {
            merged.assignments.entry(id).or_insert(slot);
        }
    }

    let scope = WeekScope::new(calendar, weeks);
    let conflicts = boundary_conflicts(graph, &scope, &merged);
    if conflicts.is_empty() {
        return Ok(merged);
    }

    warn!(conflicts = conflicts.len(), "dispatcher merge found boundary conflicts, repairing");
    let mut rng = ChaCha8Rng::seed_from_u64(0xDEC0_FFEE);
    repair(graph, constraints, &scope, merged, &mut rng).map_err(|_| {
        SchedulerError::infeasible_with(
            "parallel dispatcher could not repair boundary conflicts",
            conflicts,
        )
    })
}

/// Evaluates every chromosome in `population` in parallel via `fitness_fn`,
/// returning fitness values in the same order as the input (spec.md §4.8,
/// §5: "worker results are merged in a deterministic order").
pub fn parallel_evaluate<T, F>(population: &[T], fitness_fn: F) -> Vec<f64>
where
    T: Sync,
    F: Fn(&T) -> f64 + Sync,
{
    population.par_iter().map(fitness_fn).collect()
}

fn boundary_conflicts(
    graph: &ConflictGraph,
    scope: &WeekScope,
    coloring: &Coloring,
) -> Vec<ClassId> {
    let mut conflicting = Vec::new();
    for id in graph.order() {
        let Some(slot) = coloring.assignments.get(id) else {
            conflicting.push(id.clone());
            continue;
        };
        if !graph.available(id).contains(slot) || scope.slot_is_blacked_out_any_week(*slot) {
            conflicting.push(id.clone());
            continue;
        }
        for n in graph.neighbors(id) {
            if coloring.assignments.get(n) == Some(slot) {
                conflicting.push(id.clone());
                break;
            }
        }
    }
    conflicting.sort();
    conflicting.dedup();
    conflicting
}
