//! Declarative branch routing and loop protection.
//!
//! Decision points route on [`Branch`] configs: ordered by descending
//! priority, each branch combines field/operator/value [`Condition`]s with
//! AND/OR logic, and the first satisfied branch wins. A single branch may
//! be marked `fallback` and is taken when nothing else matches. Two
//! branches sharing the top priority resolve first-declared-wins.
//!
//! Loop protection is a pure function of the visit log: a run is flagged
//! when the current node has been revisited past the per-node cap, or when
//! the total visit count exceeds the iteration cap. The per-node check runs
//! first, so a loop report names the repeated node whenever both trip in
//! the same step.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::state::RunState;
use crate::types::{NodeId, Severity};

/// Field of [`RunState`] a condition reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    /// `true` once the run carries a blocker-severity finding.
    HasBlockers,
    /// The run's current overall severity, compared by its wire form.
    Severity,
    /// Number of findings recorded so far.
    FindingCount,
    /// Number of recoverable errors recorded so far.
    ErrorCount,
    /// The response stored by a resumed human prompt, `null` if none.
    UserResponse,
}

/// Comparison applied between the field value and the configured value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// String containment on the field's display form.
    Contains,
}

/// How a branch combines its conditions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionCombinator {
    #[default]
    And,
    Or,
}

/// One `field operator value` predicate over run state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: ConditionField,
    pub operator: ConditionOperator,
    pub value: Value,
}

impl Condition {
    pub fn new(field: ConditionField, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field,
            operator,
            value,
        }
    }

    /// Shorthand for the most common shape, `field eq value`.
    pub fn eq(field: ConditionField, value: Value) -> Self {
        Self::new(field, ConditionOperator::Eq, value)
    }

    fn read(&self, state: &RunState) -> Value {
        match self.field {
            ConditionField::HasBlockers => Value::Bool(state.has_blockers()),
            ConditionField::Severity => Value::String(state.severity.as_str().to_string()),
            ConditionField::FindingCount => Value::from(state.findings.len() as u64),
            ConditionField::ErrorCount => Value::from(state.errors.len() as u64),
            ConditionField::UserResponse => {
                state.user_response.clone().unwrap_or(Value::Null)
            }
        }
    }

    /// Evaluate this condition against the run state.
    pub fn matches(&self, state: &RunState) -> bool {
        let actual = self.read(state);
        match self.operator {
            ConditionOperator::Eq => values_equal(&actual, &self.value),
            ConditionOperator::Ne => !values_equal(&actual, &self.value),
            ConditionOperator::Gt => compare_numeric(&actual, &self.value, |o| o > 0.0),
            ConditionOperator::Gte => compare_numeric(&actual, &self.value, |o| o >= 0.0),
            ConditionOperator::Lt => compare_numeric(&actual, &self.value, |o| o < 0.0),
            ConditionOperator::Lte => compare_numeric(&actual, &self.value, |o| o <= 0.0),
            ConditionOperator::Contains => {
                display_form(&actual).contains(&display_form(&self.value))
            }
        }
    }
}

// Equality with numeric coercion so `1` and `1.0` agree; everything else
// compares structurally.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare_numeric(a: &Value, b: &Value, pred: impl Fn(f64) -> bool) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => pred(x - y),
        _ => false,
    }
}

fn display_form(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A declarative routing rule attached to a decision point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    /// Identifier reported in transition records and events.
    pub id: String,
    /// Node this branch routes to; may be the END sentinel.
    pub target: NodeId,
    /// Higher priority is evaluated first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub combinator: ConditionCombinator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Taken only when no non-fallback branch matched.
    #[serde(default)]
    pub fallback: bool,
}

impl Branch {
    pub fn new(id: impl Into<String>, target: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            target: target.into(),
            priority: 0,
            combinator: ConditionCombinator::And,
            conditions: Vec::new(),
            fallback: false,
        }
    }

    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn any_of(mut self, conditions: Vec<Condition>) -> Self {
        self.combinator = ConditionCombinator::Or;
        self.conditions = conditions;
        self
    }

    #[must_use]
    pub fn fallback(mut self) -> Self {
        self.fallback = true;
        self
    }

    /// Whether this branch's conditions hold for the given state. A branch
    /// with no conditions always matches (AND over the empty set).
    pub fn matches(&self, state: &RunState) -> bool {
        match self.combinator {
            ConditionCombinator::And => self.conditions.iter().all(|c| c.matches(state)),
            ConditionCombinator::Or => self.conditions.iter().any(|c| c.matches(state)),
        }
    }
}

/// The branch chosen by [`evaluate_branches`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchDecision {
    pub branch_id: String,
    pub target: NodeId,
}

/// Routing failed: no branch matched and no fallback was declared.
#[derive(Debug, Error, Diagnostic)]
pub enum RoutingError {
    #[error("no branch matched at node '{node}' and no fallback is declared")]
    #[diagnostic(
        code(probeflow::branching::no_match),
        help("Declare a branch with `fallback: true` to catch unmatched states.")
    )]
    NoMatch { node: NodeId },
}

/// Pick the highest-priority satisfied branch, else the fallback.
///
/// Non-fallback branches are considered in descending priority; the sort is
/// stable, so equal priorities resolve in declaration order. The fallback
/// branch is consulted only after every other branch has failed; its own
/// conditions are ignored.
pub fn evaluate_branches(
    node: &NodeId,
    state: &RunState,
    branches: &[Branch],
) -> Result<BranchDecision, RoutingError> {
    let mut candidates: Vec<&Branch> = branches.iter().filter(|b| !b.fallback).collect();
    candidates.sort_by_key(|b| std::cmp::Reverse(b.priority));

    for branch in candidates {
        if branch.matches(state) {
            return Ok(BranchDecision {
                branch_id: branch.id.clone(),
                target: branch.target.clone(),
            });
        }
    }

    if let Some(fb) = branches.iter().find(|b| b.fallback) {
        return Ok(BranchDecision {
            branch_id: fb.id.clone(),
            target: fb.target.clone(),
        });
    }

    Err(RoutingError::NoMatch { node: node.clone() })
}

/// Why loop protection flagged a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopReason {
    /// The current node exceeded the per-node revisit cap.
    RepeatVisits,
    /// The total visit count exceeded the iteration cap.
    IterationCap,
}

/// Report produced when loop protection trips.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopReport {
    pub node: NodeId,
    pub visits: usize,
    pub reason: LoopReason,
}

/// Visit-count caps for loop protection.
#[derive(Clone, Copy, Debug)]
pub struct LoopPolicy {
    /// A node may appear this many times in the visit log before the next
    /// occurrence is flagged.
    pub max_same_node_visits: usize,
    /// Upper bound on total visits in one run.
    pub max_iterations: usize,
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self {
            max_same_node_visits: 2,
            max_iterations: 50,
        }
    }
}

impl LoopPolicy {
    /// Flag the run if the current node's visit count or the total visit
    /// count exceeds its cap. The per-node check runs first so the report
    /// names the repeated node when both caps trip at once.
    pub fn detect_loop(&self, state: &RunState) -> Option<LoopReport> {
        let visits = state.visit_count(&state.current_node);
        if visits > self.max_same_node_visits {
            return Some(LoopReport {
                node: state.current_node.clone(),
                visits,
                reason: LoopReason::RepeatVisits,
            });
        }
        if state.visited_nodes.len() > self.max_iterations {
            return Some(LoopReport {
                node: state.current_node.clone(),
                visits,
                reason: LoopReason::IterationCap,
            });
        }
        None
    }
}

/// Build the standard severity routing table: one branch per severity in
/// strength order (blocker highest priority) plus a fallback to the info
/// handler for runs with no matching severity.
pub fn severity_routing(
    blocker_node: impl Into<NodeId>,
    major_node: impl Into<NodeId>,
    minor_node: impl Into<NodeId>,
    info_node: impl Into<NodeId>,
) -> Vec<Branch> {
    let info_node = info_node.into();
    let sev_branch = |sev: Severity, target: NodeId, priority: i32| {
        Branch::new(format!("severity-{sev}"), target)
            .priority(priority)
            .when(Condition::eq(
                ConditionField::Severity,
                Value::String(sev.as_str().to_string()),
            ))
    };
    vec![
        sev_branch(Severity::Blocker, blocker_node.into(), 40),
        sev_branch(Severity::Major, major_node.into(), 30),
        sev_branch(Severity::Minor, minor_node.into(), 20),
        sev_branch(Severity::Info, info_node.clone(), 10),
        Branch::new("severity-default", info_node).fallback(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Finding;

    fn state_with_severity(sev: Severity) -> RunState {
        let mut state = RunState::new("ep");
        state.escalate_severity(sev);
        state
    }

    #[test]
    fn highest_priority_match_wins() {
        let state = state_with_severity(Severity::Blocker);
        let branches = vec![
            Branch::new("low", "a").priority(1).when(Condition::eq(
                ConditionField::HasBlockers,
                Value::Bool(true),
            )),
            Branch::new("high", "b").priority(9).when(Condition::eq(
                ConditionField::HasBlockers,
                Value::Bool(true),
            )),
        ];
        let decision = evaluate_branches(&"n".to_string(), &state, &branches).unwrap();
        assert_eq!(decision.branch_id, "high");
        assert_eq!(decision.target, "b");
    }

    #[test]
    fn equal_priority_resolves_first_declared() {
        let state = state_with_severity(Severity::Blocker);
        let branches = vec![
            Branch::new("first", "a").priority(5),
            Branch::new("second", "b").priority(5),
        ];
        let decision = evaluate_branches(&"n".to_string(), &state, &branches).unwrap();
        assert_eq!(decision.branch_id, "first");
    }

    #[test]
    fn fallback_taken_when_nothing_matches() {
        let state = state_with_severity(Severity::None);
        let branches = vec![
            Branch::new("blockers", "a").when(Condition::eq(
                ConditionField::HasBlockers,
                Value::Bool(true),
            )),
            Branch::new("default", "b").fallback(),
        ];
        let decision = evaluate_branches(&"n".to_string(), &state, &branches).unwrap();
        assert_eq!(decision.branch_id, "default");
    }

    #[test]
    fn no_match_and_no_fallback_is_routing_error() {
        let state = state_with_severity(Severity::None);
        let branches = vec![Branch::new("blockers", "a").when(Condition::eq(
            ConditionField::HasBlockers,
            Value::Bool(true),
        ))];
        let err = evaluate_branches(&"triage".to_string(), &state, &branches).unwrap_err();
        assert!(matches!(err, RoutingError::NoMatch { node } if node == "triage"));
    }

    #[test]
    fn or_combinator_needs_one_condition() {
        let mut state = state_with_severity(Severity::Minor);
        state.record_error(crate::errors::ErrorEvent::run("x"));
        let branch = Branch::new("any", "t").any_of(vec![
            Condition::eq(ConditionField::HasBlockers, Value::Bool(true)),
            Condition::new(ConditionField::ErrorCount, ConditionOperator::Gte, Value::from(1)),
        ]);
        assert!(branch.matches(&state));
    }

    #[test]
    fn numeric_coercion_compares_counts() {
        let mut state = RunState::new("ep");
        state.record_finding(Finding::info("a", "m"));
        state.record_finding(Finding::info("b", "m"));
        let cond = Condition::new(ConditionField::FindingCount, ConditionOperator::Gt, Value::from(1.5));
        assert!(cond.matches(&state));
    }

    #[test]
    fn same_node_cap_checked_before_iteration_cap() {
        let policy = LoopPolicy {
            max_same_node_visits: 2,
            max_iterations: 2,
        };
        let mut state = RunState::new("ep");
        state.current_node = "spin".into();
        for _ in 0..3 {
            state.record_visit(&"spin".to_string(), "spin", 1);
        }
        // Both caps exceeded; the per-node reason must win.
        let report = policy.detect_loop(&state).unwrap();
        assert_eq!(report.reason, LoopReason::RepeatVisits);
        assert_eq!(report.node, "spin");
        assert_eq!(report.visits, 3);
    }

    #[test]
    fn iteration_cap_trips_on_long_runs() {
        let policy = LoopPolicy::default();
        let mut state = RunState::new("ep");
        state.current_node = "z".into();
        for i in 0..51 {
            state.record_visit(&format!("n{i}"), "n", 1);
        }
        let report = policy.detect_loop(&state).unwrap();
        assert_eq!(report.reason, LoopReason::IterationCap);
    }

    #[test]
    fn severity_routing_has_strength_order_and_fallback() {
        let branches = severity_routing("b", "maj", "min", "inf");
        assert_eq!(branches.len(), 5);
        assert!(branches[0].priority > branches[1].priority);
        assert!(branches[4].fallback);
        assert_eq!(branches[4].target, "inf");

        let state = state_with_severity(Severity::Blocker);
        let decision = evaluate_branches(&"triage".to_string(), &state, &branches).unwrap();
        assert_eq!(decision.target, "b");
    }
}
