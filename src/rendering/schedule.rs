//! Ordering of render passes by their dependencies.

use crate::rendering::pass::{PassOutcome, RenderPassID};
use anyhow::{Result, anyhow, bail};
use petgraph::{algo, graphmap::DiGraphMap};
use std::collections::{BTreeSet, HashSet};

/// A fixed execution order for a set of render passes, in which every pass
/// comes after the passes it depends on. Among passes whose dependencies are
/// all satisfied, the one registered first comes first.
#[derive(Clone, Debug)]
pub struct PassSchedule {
    order: Vec<usize>,
}

/// What happened to each pass during one frame.
#[derive(Clone, Debug, Default)]
pub struct FrameExecution {
    executed: Vec<RenderPassID>,
    skipped: Vec<RenderPassID>,
    failed: HashSet<RenderPassID>,
    blocked: HashSet<RenderPassID>,
}

impl PassSchedule {
    /// Orders the passes with the given IDs and dependencies, listed in
    /// registration order.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The same pass ID is registered twice.
    /// - A pass depends on a pass that is not registered.
    /// - The dependencies are circular.
    pub fn new(passes: &[(RenderPassID, &[RenderPassID])]) -> Result<Self> {
        let mut graph = DiGraphMap::<RenderPassID, ()>::new();

        for (id, _) in passes {
            if graph.contains_node(*id) {
                bail!("Render pass {id} is registered more than once");
            }
            graph.add_node(*id);
        }

        for (id, dependencies) in passes {
            for dependency in *dependencies {
                if !graph.contains_node(*dependency) {
                    bail!("Render pass {id} depends on unregistered pass {dependency}");
                }
                // Edge directed from dependence to dependent
                graph.add_edge(*dependency, *id, ());
            }
        }

        algo::toposort(&graph, None).map_err(|cycle| {
            anyhow!(
                "Found circular render pass dependencies involving {}",
                cycle.node_id()
            )
        })?;

        let registration_index = |id: RenderPassID| {
            passes
                .iter()
                .position(|(registered, _)| *registered == id)
                .unwrap_or(usize::MAX)
        };

        let mut remaining_dependencies: Vec<usize> = passes
            .iter()
            .map(|(id, _)| graph.neighbors_directed(*id, petgraph::Incoming).count())
            .collect();

        let mut ready: BTreeSet<usize> = remaining_dependencies
            .iter()
            .enumerate()
            .filter_map(|(idx, count)| (*count == 0).then_some(idx))
            .collect();

        let mut order = Vec::with_capacity(passes.len());

        while let Some(idx) = ready.pop_first() {
            order.push(idx);
            for dependent in graph.neighbors_directed(passes[idx].0, petgraph::Outgoing) {
                let dependent_idx = registration_index(dependent);
                remaining_dependencies[dependent_idx] -= 1;
                if remaining_dependencies[dependent_idx] == 0 {
                    ready.insert(dependent_idx);
                }
            }
        }

        assert_eq!(order.len(), passes.len());

        Ok(Self { order })
    }

    /// Indices into the registration list, in execution order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }
}

impl FrameExecution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a pass with the given dependencies must be skipped because
    /// one of them failed or was itself skipped for that reason.
    pub fn is_blocked(&self, dependencies: &[RenderPassID]) -> bool {
        dependencies
            .iter()
            .any(|dependency| self.failed.contains(dependency) || self.blocked.contains(dependency))
    }

    pub fn record_outcome(&mut self, id: RenderPassID, outcome: PassOutcome) {
        match outcome {
            PassOutcome::Executed => self.executed.push(id),
            PassOutcome::Skipped => self.skipped.push(id),
        }
    }

    pub fn record_failure(&mut self, id: RenderPassID) {
        self.failed.insert(id);
    }

    pub fn record_blocked(&mut self, id: RenderPassID) {
        self.blocked.insert(id);
    }

    pub fn has_executed(&self, id: RenderPassID) -> bool {
        self.executed.contains(&id)
    }

    /// Passes that executed, in execution order.
    pub fn executed(&self) -> &[RenderPassID] {
        &self.executed
    }

    pub fn skipped(&self) -> &[RenderPassID] {
        &self.skipped
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RenderPassID as ID;

    fn ids_in_order(passes: &[(ID, &[ID])]) -> Vec<ID> {
        PassSchedule::new(passes)
            .unwrap()
            .order()
            .iter()
            .map(|idx| passes[*idx].0)
            .collect()
    }

    #[test]
    fn independent_passes_keep_registration_order() {
        let passes: &[(ID, &[ID])] = &[(ID::Shadow, &[]), (ID::Culling, &[]), (ID::Blit, &[])];
        assert_eq!(ids_in_order(passes), vec![ID::Shadow, ID::Culling, ID::Blit]);
    }

    #[test]
    fn dependencies_come_before_dependents() {
        let passes: &[(ID, &[ID])] = &[
            (ID::GBuffer, &[ID::Culling]),
            (ID::ConeTracing, &[ID::Voxelization, ID::GBuffer]),
            (ID::Voxelization, &[ID::Shadow]),
            (ID::Shadow, &[]),
            (ID::Culling, &[]),
        ];
        let order = ids_in_order(passes);
        let position = |id| order.iter().position(|other| *other == id).unwrap();

        assert!(position(ID::Culling) < position(ID::GBuffer));
        assert!(position(ID::Shadow) < position(ID::Voxelization));
        assert!(position(ID::Voxelization) < position(ID::ConeTracing));
        assert!(position(ID::GBuffer) < position(ID::ConeTracing));
        assert_eq!(order[0], ID::Shadow);
    }

    #[test]
    fn circular_dependencies_are_detected() {
        let passes: &[(ID, &[ID])] = &[
            (ID::Culling, &[ID::GBuffer]),
            (ID::GBuffer, &[ID::Downsample]),
            (ID::Downsample, &[ID::Culling]),
        ];
        let error = PassSchedule::new(passes).unwrap_err();
        assert!(error.to_string().contains("circular"));
    }

    #[test]
    fn unregistered_dependency_is_an_error() {
        let passes: &[(ID, &[ID])] = &[(ID::GBuffer, &[ID::Culling])];
        assert!(PassSchedule::new(passes).is_err());
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let passes: &[(ID, &[ID])] = &[(ID::Culling, &[]), (ID::Culling, &[])];
        assert!(PassSchedule::new(passes).is_err());
    }

    #[test]
    fn failures_block_transitive_dependents_only() {
        let mut execution = FrameExecution::new();
        execution.record_outcome(ID::Culling, PassOutcome::Executed);
        execution.record_failure(ID::Shadow);

        assert!(execution.is_blocked(&[ID::Shadow]));
        execution.record_blocked(ID::Voxelization);

        assert!(execution.is_blocked(&[ID::Voxelization, ID::GBuffer]));
        assert!(!execution.is_blocked(&[ID::Culling]));
        assert!(!execution.is_blocked(&[]));
        assert_eq!(execution.failure_count(), 1);
        assert_eq!(execution.blocked_count(), 1);
    }

    #[test]
    fn skipped_passes_do_not_block_dependents() {
        let mut execution = FrameExecution::new();
        execution.record_outcome(ID::Downsample, PassOutcome::Skipped);
        assert!(!execution.is_blocked(&[ID::Downsample]));
        assert!(!execution.has_executed(ID::Downsample));
        assert_eq!(execution.skipped(), &[ID::Downsample]);
    }
}
