//! Static dependency graphs over job flags

use crate::meta::{JobField, JobRecord};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Field -> the flags it requires
const UPSTREAM: &[(JobField, &[JobField])] = &[
    (
        JobField::OutOriginal,
        &[JobField::InLeafNumber, JobField::InLeafWidths],
    ),
    (JobField::OutSimulated, &[JobField::InVideo, JobField::InLength]),
    (
        JobField::OutDefoliation,
        &[JobField::OutOriginal, JobField::OutSimulated],
    ),
    (JobField::UpVideo, &[JobField::InVideo]),
    (JobField::UpOriginal, &[JobField::OutOriginal]),
    (JobField::UpSimulated, &[JobField::OutSimulated]),
    (JobField::UpDefoliation, &[JobField::OutDefoliation]),
];

/// Result of a readiness query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Readiness {
    /// Nothing raw is missing; every unset derived requirement can be rerun
    pub ready: bool,
    /// Raw inputs that must be supplied by the client
    pub missing: Vec<JobField>,
    /// Derived requirements that are unset but can be (re)computed now
    pub rerunnable: Vec<JobField>,
}

/// Upstream and downstream views of the field graph
///
/// Built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    upstream: BTreeMap<JobField, &'static [JobField]>,
    downstream: BTreeMap<JobField, Vec<JobField>>,
}

impl DependencyGraph {
    /// The pipeline's fixed graph
    pub fn standard() -> Self {
        let upstream: BTreeMap<_, _> = UPSTREAM.iter().copied().collect();

        let mut downstream: BTreeMap<JobField, Vec<JobField>> = BTreeMap::new();
        for (field, requirements) in &upstream {
            for requirement in requirements.iter() {
                downstream.entry(*requirement).or_default().push(*field);
            }
        }

        Self {
            upstream,
            downstream,
        }
    }

    /// Direct requirements of a field
    pub fn requirements(&self, field: JobField) -> &[JobField] {
        self.upstream.get(&field).copied().unwrap_or(&[])
    }

    /// Whether a field is computed from other fields
    pub fn is_derived(&self, field: JobField) -> bool {
        self.upstream.contains_key(&field)
    }

    /// Every field that goes stale when `field` changes
    pub fn dependents(&self, field: JobField) -> Vec<JobField> {
        let mut visited = BTreeSet::new();
        let mut stack = vec![field];

        while let Some(current) = stack.pop() {
            for next in self.downstream.get(&current).into_iter().flatten() {
                if visited.insert(*next) {
                    stack.push(*next);
                }
            }
        }

        visited.into_iter().collect()
    }

    /// Evaluate whether `target` can be produced from the flags in `record`
    ///
    /// Unset derived requirements are walked (post-order, explicit stack);
    /// those whose own requirements are satisfiable are reported as
    /// rerunnable instead of missing.
    pub fn readiness(&self, record: &JobRecord, target: JobField) -> Readiness {
        let mut satisfiable: HashMap<JobField, bool> = HashMap::new();
        let mut expanded = HashSet::new();
        let mut missing = BTreeSet::new();
        let mut rerunnable = BTreeSet::new();
        let mut stack = vec![target];

        while let Some(&field) = stack.last() {
            if satisfiable.contains_key(&field) {
                stack.pop();
                continue;
            }

            let pending: Vec<JobField> = self
                .requirements(field)
                .iter()
                .copied()
                .filter(|r| !record.flag(*r) && self.is_derived(*r))
                .filter(|r| !satisfiable.contains_key(r))
                .collect();

            // Second visit (or a cycle): evaluate with what is known
            if expanded.insert(field) && !pending.is_empty() {
                stack.extend(pending);
                continue;
            }
            stack.pop();

            let mut ok = true;
            for requirement in self.requirements(field) {
                if record.flag(*requirement) {
                    continue;
                }
                if !self.is_derived(*requirement) {
                    missing.insert(*requirement);
                    ok = false;
                } else if satisfiable.get(requirement).copied().unwrap_or(false) {
                    rerunnable.insert(*requirement);
                } else {
                    ok = false;
                }
            }
            satisfiable.insert(field, ok);
        }

        Readiness {
            ready: satisfiable.get(&target).copied().unwrap_or(false),
            missing: missing.into_iter().collect(),
            rerunnable: rerunnable.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(flags: &[JobField]) -> JobRecord {
        let mut record = JobRecord::new("J1");
        for flag in flags {
            record.set_flag(*flag, true);
        }
        record
    }

    #[test]
    fn all_inputs_present_makes_outputs_rerunnable() {
        let graph = DependencyGraph::standard();
        let record = record_with(JobField::inputs());

        let readiness = graph.readiness(&record, JobField::OutDefoliation);

        assert!(readiness.ready);
        assert!(readiness.missing.is_empty());
        assert_eq!(
            readiness.rerunnable,
            vec![JobField::OutOriginal, JobField::OutSimulated]
        );
    }

    #[test]
    fn missing_raw_inputs_are_reported() {
        let graph = DependencyGraph::standard();
        let record = record_with(&[JobField::InLeafNumber, JobField::InLeafWidths]);

        let readiness = graph.readiness(&record, JobField::OutDefoliation);

        assert!(!readiness.ready);
        assert_eq!(readiness.missing, vec![JobField::InVideo, JobField::InLength]);
        assert_eq!(readiness.rerunnable, vec![JobField::OutOriginal]);
    }

    #[test]
    fn produced_requirements_are_ready_without_reruns() {
        let graph = DependencyGraph::standard();
        let record = record_with(&[JobField::OutOriginal, JobField::OutSimulated]);

        let readiness = graph.readiness(&record, JobField::OutDefoliation);

        assert_eq!(
            readiness,
            Readiness {
                ready: true,
                missing: vec![],
                rerunnable: vec![],
            }
        );
    }

    #[test]
    fn upload_depends_on_output() {
        let graph = DependencyGraph::standard();
        let record = record_with(&[JobField::InVideo, JobField::InLength]);

        let readiness = graph.readiness(&record, JobField::UpSimulated);

        assert!(readiness.ready);
        assert_eq!(readiness.rerunnable, vec![JobField::OutSimulated]);

        let empty = graph.readiness(&JobRecord::new("J2"), JobField::UpVideo);
        assert_eq!(empty.missing, vec![JobField::InVideo]);
    }

    #[test]
    fn original_change_does_not_reach_simulated() {
        let graph = DependencyGraph::standard();

        let dependents = graph.dependents(JobField::OutOriginal);

        assert_eq!(
            dependents,
            vec![
                JobField::OutDefoliation,
                JobField::UpOriginal,
                JobField::UpDefoliation
            ]
        );
        assert!(!dependents.contains(&JobField::OutSimulated));
    }

    #[test]
    fn dependents_walk_diamond_once() {
        let graph = DependencyGraph::standard();

        let dependents = graph.dependents(JobField::InVideo);

        assert_eq!(
            dependents,
            vec![
                JobField::OutSimulated,
                JobField::OutDefoliation,
                JobField::UpVideo,
                JobField::UpSimulated,
                JobField::UpDefoliation,
            ]
        );
        assert!(graph.dependents(JobField::UpDefoliation).is_empty());
    }
}
