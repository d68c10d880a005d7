//! Graph Validation
//!
//! Structural checks on an assembled graph:
//! - Acyclicity, `wait_on` edges included
//! - Producers of every data node match its template
//! - Parameter assignments use the template's dimensions and declared values
//!
//! Problems are collected into [`Findings`] instead of aborting on the
//! first one, so a caller sees everything in one pass.

use std::collections::{HashMap, HashSet};
use std::fmt;

use log::{debug, info};
use serde::Serialize;

use super::{Availability, Graph, NodeRef, TemplateKind};
use crate::workflow::parameters::Assignment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Nodes on (or trapped between) dependency loops
    Cycle,
    /// Generated data without any producer
    DanglingData,
    /// A producer that the template does not declare, or any producer of
    /// available data
    UnexpectedProducer,
    /// Assignment dimensions differ from the template's
    UndeclaredParameter,
    /// Assignment value outside the declared value set
    InvalidParameterValue,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cycle => "cycle",
            Self::DanglingData => "dangling data",
            Self::UnexpectedProducer => "unexpected producer",
            Self::UndeclaredParameter => "undeclared parameter",
            Self::InvalidParameterValue => "invalid parameter value",
        };
        write!(f, "{}", name)
    }
}

/// One structural problem, with the labels of the nodes involved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub nodes: Vec<String>,
    pub message: String,
}

impl Finding {
    fn new(kind: FindingKind, nodes: Vec<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            nodes,
            message: message.into(),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Findings(Vec<Finding>);

impl Findings {
    pub fn is_clean(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Finding> {
        self.0.iter()
    }

    pub fn of_kind(&self, kind: FindingKind) -> impl Iterator<Item = &Finding> {
        self.0.iter().filter(move |f| f.kind == kind)
    }

    pub fn into_vec(self) -> Vec<Finding> {
        self.0
    }
}

impl fmt::Display for Findings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self.0.iter().map(|finding| finding.to_string()).collect();
        write!(f, "{}", lines.join("\n"))
    }
}

/// Runs every structural check on `graph`.
pub fn validate(graph: &Graph) -> Findings {
    info!(
        "Validating graph '{}': {} task nodes, {} data nodes",
        graph.name(),
        graph.tasks().len(),
        graph.data().len()
    );

    let mut findings = Vec::new();
    check_acyclic(graph, &mut findings);
    check_producers(graph, &mut findings);
    check_assignments(graph, &mut findings);

    for finding in &findings {
        debug!("{}", finding);
    }
    info!("Validation finished: {} finding(s)", findings.len());
    Findings(findings)
}

fn check_acyclic(graph: &Graph, findings: &mut Vec<Finding>) {
    let Err(stuck) = graph.topological_order() else {
        debug!("Graph is acyclic");
        return;
    };

    // Kahn leaves loops plus everything downstream of them; peel off the
    // downstream part so only nodes on or between loops remain.
    let mut remaining: HashSet<NodeRef> = stuck.iter().copied().collect();
    let mut out_degree: HashMap<NodeRef, usize> = stuck
        .iter()
        .map(|n| {
            let degree = graph
                .successors(*n)
                .iter()
                .filter(|s| remaining.contains(s))
                .count();
            (*n, degree)
        })
        .collect();
    let mut sinks: Vec<NodeRef> = stuck
        .iter()
        .copied()
        .filter(|n| out_degree[n] == 0)
        .collect();
    while let Some(sink) = sinks.pop() {
        remaining.remove(&sink);
        for predecessor in graph.predecessors(sink) {
            if !remaining.contains(&predecessor) {
                continue;
            }
            if let Some(degree) = out_degree.get_mut(&predecessor) {
                *degree -= 1;
                if *degree == 0 {
                    sinks.push(predecessor);
                }
            }
        }
    }

    let nodes: Vec<String> = stuck
        .iter()
        .filter(|n| remaining.contains(n))
        .map(|n| graph.label(*n))
        .collect();
    let message = format!(
        "Dependency loop through {} node(s): {}",
        nodes.len(),
        nodes.join(" -> ")
    );
    findings.push(Finding::new(FindingKind::Cycle, nodes, message));
}

fn check_producers(graph: &Graph, findings: &mut Vec<Finding>) {
    for data in graph.data() {
        let label = data.label();

        if data.availability == Availability::Available {
            if !data.producers.is_empty() {
                findings.push(Finding::new(
                    FindingKind::UnexpectedProducer,
                    vec![label.clone()],
                    format!("Available data '{}' has {} producer(s)", label, data.producers.len()),
                ));
            }
            continue;
        }

        if data.producers.is_empty() {
            let consumers: Vec<String> = data
                .consumers
                .iter()
                .map(|t| graph.task(*t).label())
                .collect();
            findings.push(Finding::new(
                FindingKind::DanglingData,
                std::iter::once(label.clone()).chain(consumers.iter().cloned()).collect(),
                format!(
                    "Generated data '{}' has no producer (consumed by: {})",
                    label,
                    consumers.join(", ")
                ),
            ));
            continue;
        }

        let declared = graph
            .templates()
            .iter()
            .find(|t| t.name == data.name && t.kind == TemplateKind::GeneratedData)
            .map(|t| t.producers.as_slice());
        for producer in &data.producers {
            let task = graph.task(*producer);
            if declared.map_or(true, |names| !names.contains(&task.name)) {
                findings.push(Finding::new(
                    FindingKind::UnexpectedProducer,
                    vec![label.clone(), task.label()],
                    format!("'{}' is produced by undeclared task '{}'", label, task.label()),
                ));
            }
        }
    }
}

fn check_assignment(
    graph: &Graph,
    template: &str,
    expected: TemplateKind,
    label: &str,
    assignment: &Assignment,
    findings: &mut Vec<Finding>,
) {
    let space = graph.parameters();

    match graph
        .templates()
        .iter()
        .find(|t| t.name == template && t.kind == expected)
    {
        Some(summary) => {
            let spanned: Vec<&str> = assignment.dimensions().collect();
            let declared: Vec<&str> = summary.dimensions.iter().map(|d| d.as_str()).collect();
            if spanned != declared {
                findings.push(Finding::new(
                    FindingKind::UndeclaredParameter,
                    vec![label.to_string()],
                    format!(
                        "'{}' spans [{}] but its template spans [{}]",
                        label,
                        spanned.join(", "),
                        declared.join(", ")
                    ),
                ));
            }
        }
        _ => {
            findings.push(Finding::new(
                FindingKind::UndeclaredParameter,
                vec![label.to_string()],
                format!("'{}' has no matching template", label),
            ));
        }
    }

    for (dimension, value) in assignment.iter() {
        if !space.is_declared_value(dimension, value) {
            findings.push(Finding::new(
                FindingKind::InvalidParameterValue,
                vec![label.to_string()],
                format!(
                    "'{}' uses {}={}, which is not a declared value",
                    label, dimension, value
                ),
            ));
        }
    }
}

fn check_assignments(graph: &Graph, findings: &mut Vec<Finding>) {
    for task in graph.tasks() {
        check_assignment(
            graph,
            &task.name,
            TemplateKind::Task,
            &task.label(),
            &task.assignment,
            findings,
        );
    }
    for data in graph.data() {
        let kind = match data.availability {
            Availability::Available => TemplateKind::AvailableData,
            Availability::Generated => TemplateKind::GeneratedData,
        };
        check_assignment(graph, &data.name, kind, &data.label(), &data.assignment, findings);
    }
}
