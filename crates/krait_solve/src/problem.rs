//! Explaining unsatisfiable solves.
//!
//! When the solver proves a request unsatisfiable it collects the original
//! rules involved in the final conflict into a [`Problem`]. From there a
//! [`ProblemGraph`] is built: solvables become nodes, requirements and
//! conflicts become edges, and equivalent candidates are merged so that the
//! rendered explanation talks about `c 1|2` instead of every build
//! separately.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fmt::Formatter;
use std::rc::Rc;

use itertools::Itertools;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::id::{RuleId, SolvableId, SpecId};
use crate::pool::Pool;
use crate::rules::RuleKind;
use crate::solver::Solver;

/// Why a solvable was excluded by a job.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ExcludeReason {
    /// A remove request matched the solvable.
    Removed(SpecId),

    /// A pin on the solvable's name does not match it.
    PinnedOut(SpecId),

    /// A higher-priority channel carries the solvable's name.
    StrictPriority,
}

/// A node in the problem graph.
#[derive(Copy, Clone, Eq, PartialEq)]
pub enum ProblemNode {
    /// A concrete candidate (or the root).
    Solvable(SolvableId),

    /// The sink for requirements without any candidate.
    UnresolvedDependency,
}

impl ProblemNode {
    fn solvable_id(self) -> SolvableId {
        match self {
            ProblemNode::Solvable(solvable_id) => solvable_id,
            ProblemNode::UnresolvedDependency => {
                panic!("expected a solvable node, found the unresolved-dependency node")
            }
        }
    }
}

/// An edge in the problem graph.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ProblemEdge {
    /// The source requires the spec; the target is one of its candidates.
    Requires(SpecId),

    /// The source conflicts with the target.
    Conflict(Conflict),
}

impl ProblemEdge {
    fn try_requires(self) -> Option<SpecId> {
        match self {
            ProblemEdge::Requires(spec_id) => Some(spec_id),
            ProblemEdge::Conflict(_) => None,
        }
    }
}

/// The conflict flavor of a [`ProblemEdge`].
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Conflict {
    /// The target competes with a frozen solvable.
    Locked,

    /// The target was excluded by a job.
    Excluded(ExcludeReason),

    /// The source constrains the target out.
    Constrains(SpecId),

    /// Source and target share a name.
    ForbidMultipleInstances,
}

/// A set of solvables merged into one logical node because they share a name
/// and the same conflict neighborhood.
pub struct MergedProblemNode {
    /// The merged solvables.
    pub ids: Vec<SolvableId>,
}

/// A realized view of one rule involved in a problem, for programmatic
/// consumption; the human-readable path is [`Problem::display_user_friendly`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProblemRule {
    /// A requested spec has no candidates at all.
    Job {
        /// The interned spec of the request.
        spec: SpecId,
    },

    /// A dependency of `solvable` has no candidates.
    NothingProvides {
        /// The solvable with the dangling dependency.
        solvable: SolvableId,
        /// The dependency without candidates.
        spec: SpecId,
    },

    /// A dependency of `solvable` participated in the conflict.
    Requires {
        /// The requiring solvable (root for jobs).
        solvable: SolvableId,
        /// The required spec.
        spec: SpecId,
    },

    /// Two candidates of the same name cannot be installed together.
    SameName {
        /// The first candidate.
        first: SolvableId,
        /// The second candidate.
        second: SolvableId,
    },

    /// `solvable` constrains `conflict` out of the solution.
    PackageConflicts {
        /// The solvable carrying the constrains spec.
        solvable: SolvableId,
        /// The excluded candidate.
        conflict: SolvableId,
        /// The constrains spec.
        spec: SpecId,
    },

    /// The solvable competes with a frozen package.
    Locked {
        /// The locked-out candidate.
        solvable: SolvableId,
    },

    /// The solvable was excluded by a job.
    Excluded {
        /// The excluded candidate.
        solvable: SolvableId,
        /// Why it was excluded.
        reason: ExcludeReason,
    },
}

/// The set of rules that prove a request unsatisfiable.
#[derive(Debug, Default)]
pub struct Problem {
    rules: Vec<RuleId>,
}

impl Problem {
    pub(crate) fn add_rule(&mut self, rule_id: RuleId) {
        if !self.rules.contains(&rule_id) {
            self.rules.push(rule_id);
        }
    }

    /// Returns the involved rules as [`ProblemRule`]s.
    pub fn problem_rules(&self, solver: &Solver<'_>) -> Vec<ProblemRule> {
        let pool = solver.pool();
        self.rules
            .iter()
            .filter_map(|rule_id| {
                Some(match solver.rules[rule_id.index()].kind {
                    RuleKind::InstallRoot | RuleKind::Learnt(..) => return None,
                    RuleKind::Requires(solvable_id, spec) => {
                        if !pool.candidates(spec).is_empty() {
                            ProblemRule::Requires {
                                solvable: solvable_id,
                                spec,
                            }
                        } else if solvable_id.is_root() {
                            ProblemRule::Job { spec }
                        } else {
                            ProblemRule::NothingProvides {
                                solvable: solvable_id,
                                spec,
                            }
                        }
                    }
                    RuleKind::ForbidMultipleInstances(first, second) => {
                        ProblemRule::SameName { first, second }
                    }
                    RuleKind::Constrains(solvable, conflict, spec) => {
                        ProblemRule::PackageConflicts {
                            solvable,
                            conflict,
                            spec,
                        }
                    }
                    RuleKind::Lock(solvable) => ProblemRule::Locked { solvable },
                    RuleKind::Exclude(solvable, reason) => {
                        ProblemRule::Excluded { solvable, reason }
                    }
                })
            })
            .collect()
    }

    /// Builds the problem graph.
    pub fn graph(&self, solver: &Solver<'_>) -> ProblemGraph {
        let mut graph = DiGraph::<ProblemNode, ProblemEdge>::default();
        let mut nodes: HashMap<SolvableId, NodeIndex> = HashMap::default();

        let root_node = Self::add_node(&mut graph, &mut nodes, SolvableId::root());
        let unresolved_node = graph.add_node(ProblemNode::UnresolvedDependency);

        for rule_id in &self.rules {
            let rule = &solver.rules[rule_id.index()];
            match rule.kind {
                RuleKind::InstallRoot => (),
                RuleKind::Learnt(..) => unreachable!("learnt rules are expanded beforehand"),
                RuleKind::Requires(package_id, spec_id) => {
                    let package_node = Self::add_node(&mut graph, &mut nodes, package_id);
                    let candidates = solver.pool().candidates(spec_id);
                    if candidates.is_empty() {
                        graph.add_edge(
                            package_node,
                            unresolved_node,
                            ProblemEdge::Requires(spec_id),
                        );
                    } else {
                        for &candidate_id in candidates {
                            let candidate_node =
                                Self::add_node(&mut graph, &mut nodes, candidate_id);
                            graph.add_edge(
                                package_node,
                                candidate_node,
                                ProblemEdge::Requires(spec_id),
                            );
                        }
                    }
                }
                RuleKind::ForbidMultipleInstances(instance1_id, instance2_id) => {
                    let node1 = Self::add_node(&mut graph, &mut nodes, instance1_id);
                    let node2 = Self::add_node(&mut graph, &mut nodes, instance2_id);
                    graph.add_edge(
                        node1,
                        node2,
                        ProblemEdge::Conflict(Conflict::ForbidMultipleInstances),
                    );
                }
                RuleKind::Constrains(package_id, dep_id, spec_id) => {
                    let package_node = Self::add_node(&mut graph, &mut nodes, package_id);
                    let dep_node = Self::add_node(&mut graph, &mut nodes, dep_id);
                    graph.add_edge(
                        package_node,
                        dep_node,
                        ProblemEdge::Conflict(Conflict::Constrains(spec_id)),
                    );
                }
                RuleKind::Lock(solvable_id) => {
                    let node = Self::add_node(&mut graph, &mut nodes, solvable_id);
                    graph.add_edge(root_node, node, ProblemEdge::Conflict(Conflict::Locked));
                }
                RuleKind::Exclude(solvable_id, reason) => {
                    let node = Self::add_node(&mut graph, &mut nodes, solvable_id);
                    graph.add_edge(
                        root_node,
                        node,
                        ProblemEdge::Conflict(Conflict::Excluded(reason)),
                    );
                }
            }
        }

        let unresolved_node = if graph
            .edges_directed(unresolved_node, Direction::Incoming)
            .next()
            .is_none()
        {
            graph.remove_node(unresolved_node);
            None
        } else {
            Some(unresolved_node)
        };

        ProblemGraph {
            graph,
            root_node,
            unresolved_dependency_node: unresolved_node,
        }
    }

    fn add_node(
        graph: &mut DiGraph<ProblemNode, ProblemEdge>,
        nodes: &mut HashMap<SolvableId, NodeIndex>,
        solvable_id: SolvableId,
    ) -> NodeIndex {
        *nodes
            .entry(solvable_id)
            .or_insert_with(|| graph.add_node(ProblemNode::Solvable(solvable_id)))
    }

    /// Renders the problem as the tree-style explanation shown to users.
    pub fn display_user_friendly<'a>(&self, solver: &'a Solver<'_>) -> DisplayUnsat<'a> {
        DisplayUnsat::new(self.graph(solver), solver.pool())
    }
}

/// The merged graph of one unsatisfiable solve.
pub struct ProblemGraph {
    graph: DiGraph<ProblemNode, ProblemEdge>,
    root_node: NodeIndex,
    unresolved_dependency_node: Option<NodeIndex>,
}

impl ProblemGraph {
    /// The underlying graph, for callers that render problems themselves.
    pub fn graph(&self) -> &DiGraph<ProblemNode, ProblemEdge> {
        &self.graph
    }

    /// The node representing the user's request.
    pub fn root_node(&self) -> NodeIndex {
        self.root_node
    }

    /// The sink node of requirements without candidates, when present.
    pub fn unresolved_node(&self) -> Option<NodeIndex> {
        self.unresolved_dependency_node
    }

    /// Merges solvables that share a name, the same predecessors and the
    /// same successors, so an explanation can report them as one.
    fn simplify(&self, pool: &Pool) -> HashMap<SolvableId, Rc<MergedProblemNode>> {
        let graph = &self.graph;

        let mut maybe_merge: HashMap<_, Vec<_>> = HashMap::new();
        for node_id in graph.node_indices() {
            let candidate = match graph[node_id] {
                ProblemNode::UnresolvedDependency => continue,
                ProblemNode::Solvable(solvable_id) if solvable_id.is_root() => continue,
                ProblemNode::Solvable(solvable_id) => solvable_id,
            };

            // The target of a conflict edge is never merged away.
            if graph
                .edges_directed(node_id, Direction::Incoming)
                .any(|edge| matches!(edge.weight(), ProblemEdge::Conflict(..)))
            {
                continue;
            }

            let predecessors: Vec<_> = graph
                .edges_directed(node_id, Direction::Incoming)
                .map(|edge| edge.source())
                .sorted_unstable()
                .collect();
            let successors: Vec<_> = graph
                .edges(node_id)
                .map(|edge| (edge.target(), *edge.weight()))
                .sorted_unstable()
                .collect();
            let name = pool.resolve_solvable(candidate).name_id();

            maybe_merge
                .entry((name, predecessors, successors))
                .or_default()
                .push((node_id, candidate));
        }

        let mut merged_candidates = HashMap::default();
        for mut group in maybe_merge.into_values() {
            if group.len() > 1 {
                group.sort_unstable_by(|&(_, a), &(_, b)| {
                    let version_a = &pool.resolve_solvable(a).record().package_record.version;
                    let version_b = &pool.resolve_solvable(b).record().package_record.version;
                    version_a.cmp(version_b)
                });
                let merged = Rc::new(MergedProblemNode {
                    ids: group.into_iter().map(|(_, id)| id).collect(),
                });
                for &id in &merged.ids {
                    merged_candidates.insert(id, merged.clone());
                }
            }
        }
        merged_candidates
    }

    /// A node is installable when every path from it to the leaves avoids
    /// conflict edges. Conflicts are propagated up the graph to find the
    /// complement set.
    fn get_installable_set(&self) -> HashSet<NodeIndex> {
        let mut non_installable: HashSet<NodeIndex> = HashSet::new();

        let mut conflicting_edges: Vec<_> = self
            .graph
            .edge_references()
            .filter(|edge| matches!(edge.weight(), ProblemEdge::Conflict(..)))
            .map(|edge| edge.source())
            .collect();

        if let Some(unresolved) = self.unresolved_dependency_node {
            conflicting_edges.extend(
                self.graph
                    .edges_directed(unresolved, Direction::Incoming)
                    .map(|edge| edge.source()),
            );
        }

        while let Some(source) = conflicting_edges.pop() {
            if non_installable.insert(source) {
                conflicting_edges.extend(
                    self.graph
                        .edges_directed(source, Direction::Incoming)
                        .map(|edge| edge.source()),
                );
            }
        }

        self.graph
            .node_indices()
            .filter(|node| !non_installable.contains(node))
            .collect()
    }
}

/// Displays the problem graph as an indented tree of requirements and
/// conflicts.
pub struct DisplayUnsat<'a> {
    graph: ProblemGraph,
    merged_candidates: HashMap<SolvableId, Rc<MergedProblemNode>>,
    installable_set: HashSet<NodeIndex>,
    pool: &'a Pool,
}

enum DisplayOp {
    Requirement(SpecId, Vec<EdgeIndex>),
    Candidate(NodeIndex),
}

impl<'a> DisplayUnsat<'a> {
    pub(crate) fn new(graph: ProblemGraph, pool: &'a Pool) -> Self {
        let merged_candidates = graph.simplify(pool);
        let installable_set = graph.get_installable_set();
        Self {
            graph,
            merged_candidates,
            installable_set,
            pool,
        }
    }

    /// Groups the requirement edges of a node by their spec, worst (fully
    /// conflicting) requirements first so they render prominently.
    fn grouped_requirements(&self, node: NodeIndex) -> Vec<(SpecId, Vec<EdgeIndex>)> {
        let graph = &self.graph.graph;
        graph
            .edges(node)
            .filter_map(|edge| edge.weight().try_requires().map(|spec| (spec, edge.id())))
            .sorted_by_key(|&(spec, _)| spec)
            .chunk_by(|&(spec, _)| spec)
            .into_iter()
            .map(|(spec, group)| (spec, group.map(|(_, edge)| edge).collect::<Vec<_>>()))
            .sorted_by_key(|(_, edges)| {
                edges.iter().any(|&edge| {
                    self.installable_set
                        .contains(&graph.edge_endpoints(edge).unwrap().1)
                })
            })
            .collect()
    }
}

impl fmt::Display for DisplayUnsat<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let graph = &self.graph.graph;
        let installable_nodes = &self.installable_set;
        let mut reported: HashSet<SolvableId> = HashSet::new();

        writeln!(f, "The following packages are incompatible")?;

        let mut stack: Vec<(DisplayOp, usize)> = self
            .grouped_requirements(self.graph.root_node)
            .into_iter()
            .map(|(spec, edges)| (DisplayOp::Requirement(spec, edges), 0))
            .collect();

        while let Some((op, depth)) = stack.pop() {
            let indent = " ".repeat(depth * 4);

            match op {
                DisplayOp::Requirement(spec_id, edges) => {
                    debug_assert!(!edges.is_empty());

                    let installable = edges.iter().any(|&edge| {
                        installable_nodes.contains(&graph.edge_endpoints(edge).unwrap().1)
                    });
                    let req = self.pool.resolve_spec(spec_id).to_string();
                    let target = graph.edge_endpoints(edges[0]).unwrap().1;
                    let missing =
                        edges.len() == 1 && graph[target] == ProblemNode::UnresolvedDependency;

                    if missing {
                        if depth == 0 {
                            writeln!(f, "{indent}|-- No candidates were found for {req}.")?;
                        } else {
                            writeln!(f, "{indent}|-- {req}, for which no candidates were found.")?;
                        }
                    } else if installable {
                        if depth == 0 {
                            writeln!(
                                f,
                                "{indent}|-- {req} can be installed with any of the following options:"
                            )?;
                        } else {
                            writeln!(f, "{indent}|-- {req}, which can be installed with any of the following options:")?;
                        }
                        stack.extend(
                            edges
                                .iter()
                                .filter(|&&edge| {
                                    installable_nodes
                                        .contains(&graph.edge_endpoints(edge).unwrap().1)
                                })
                                .map(|&edge| {
                                    (
                                        DisplayOp::Candidate(graph.edge_endpoints(edge).unwrap().1),
                                        depth + 1,
                                    )
                                }),
                        );
                    } else {
                        if depth == 0 {
                            writeln!(
                                f,
                                "{indent}|-- {req} cannot be installed because there are no viable options:"
                            )?;
                        } else {
                            writeln!(f, "{indent}|-- {req}, which cannot be installed because there are no viable options:")?;
                        }
                        stack.extend(edges.iter().map(|&edge| {
                            (
                                DisplayOp::Candidate(graph.edge_endpoints(edge).unwrap().1),
                                depth + 1,
                            )
                        }));
                    }
                }
                DisplayOp::Candidate(candidate) => {
                    let solvable_id = graph[candidate].solvable_id();
                    if reported.contains(&solvable_id) {
                        continue;
                    }

                    let solvable = self.pool.resolve_solvable(solvable_id);
                    let name = solvable.record().package_record.name.as_normalized();
                    let version = if let Some(merged) = self.merged_candidates.get(&solvable_id) {
                        reported.extend(merged.ids.iter().copied());
                        merged
                            .ids
                            .iter()
                            .map(|&id| {
                                self.pool
                                    .resolve_solvable(id)
                                    .record()
                                    .package_record
                                    .version
                                    .to_string()
                            })
                            .join(" | ")
                    } else {
                        solvable.record().package_record.version.to_string()
                    };

                    let is_conflict_source = graph
                        .edges(candidate)
                        .any(|edge| edge.weight().try_requires().is_none());
                    let is_leaf = graph.edges(candidate).next().is_none();

                    if is_conflict_source {
                        writeln!(
                            f,
                            "{indent}|-- {name} {version}, which conflicts with the versions reported above."
                        )?;
                    } else if is_leaf {
                        writeln!(f, "{indent}|-- {name} {version}")?;
                    } else {
                        writeln!(f, "{indent}|-- {name} {version} would require")?;
                        stack.extend(
                            self.grouped_requirements(candidate)
                                .into_iter()
                                .map(|(spec, edges)| {
                                    (DisplayOp::Requirement(spec, edges), depth + 1)
                                }),
                        );
                    }
                }
            }
        }

        // Conflicts with the root itself: locked and excluded candidates.
        for edge in graph.edges(self.graph.root_node) {
            let conflict = match edge.weight() {
                ProblemEdge::Requires(_) => continue,
                ProblemEdge::Conflict(conflict) => conflict,
            };
            let target = graph[edge.target()].solvable_id();
            let solvable = self.pool.resolve_solvable(target);
            let record = &solvable.record().package_record;
            match conflict {
                Conflict::Locked => writeln!(
                    f,
                    "|-- {} {} is frozen, but another version is required as reported above",
                    record.name.as_normalized(),
                    record.version
                )?,
                Conflict::Excluded(ExcludeReason::Removed(_)) => writeln!(
                    f,
                    "|-- {} {} was requested to be removed",
                    record.name.as_normalized(),
                    record.version
                )?,
                Conflict::Excluded(ExcludeReason::PinnedOut(spec)) => writeln!(
                    f,
                    "|-- {} {} is outside the pinned range {}",
                    record.name.as_normalized(),
                    record.version,
                    self.pool.resolve_spec(*spec)
                )?,
                Conflict::Excluded(ExcludeReason::StrictPriority) => writeln!(
                    f,
                    "|-- {} {} comes from a lower-priority channel",
                    record.name.as_normalized(),
                    record.version
                )?,
                Conflict::Constrains(_) | Conflict::ForbidMultipleInstances => unreachable!(),
            }
        }

        Ok(())
    }
}
