//! Assembled Workflow Graph
//!
//! The compiled form of a workflow: an arena of task and data nodes linked
//! by index handles. A data node produced in one cycle and consumed from
//! many later ones is stored once and referenced by [`DataId`].
//!
//! # Structure
//!
//! - [`assembler`]: builds a [`Graph`] from a [`crate::workflow::WorkflowConfig`]
//! - [`validator`]: structural checks returning [`Findings`]
//! - [`render`]: text views of a graph for diagnostics
//!
//! Edges:
//!
//! - data -> task: a task input
//! - task -> data: a task output
//! - task -> task: a `wait_on` ordering constraint, no data exchanged

pub mod assembler;
pub mod render;
pub mod validator;

use std::collections::{HashSet, VecDeque};

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::calendar::date::serialize_opt_date;
use crate::calendar::format_datetime;
use crate::workflow::cycling::CyclePoint;
use crate::workflow::parameters::{Assignment, ParameterSpace};

pub use assembler::compile;
pub use validator::{validate, Finding, FindingKind, Findings};

/// Handle of a task node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(pub usize);

/// Handle of a data node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DataId(pub usize);

/// Either kind of node, as returned by [`Graph::topological_order`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum NodeRef {
    Task(TaskId),
    Data(DataId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    /// Supplied from outside the workflow
    Available,
    /// Produced by tasks of the workflow
    Generated,
}

/// One end of an input or output edge, with its optional port label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Port {
    pub data: DataId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskNode {
    pub id: TaskId,
    pub name: String,
    /// Cycle that first instantiated this node
    pub cycle: String,
    #[serde(serialize_with = "serialize_opt_date")]
    pub date: Option<NaiveDateTime>,
    #[serde(serialize_with = "serialize_opt_date")]
    pub end_date: Option<NaiveDateTime>,
    pub assignment: Assignment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub options: IndexMap<String, Value>,
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
    pub wait_on: Vec<TaskId>,
    /// Reverse of `wait_on`: tasks that wait on this one
    #[serde(skip)]
    pub waited_by: Vec<TaskId>,
}

impl TaskNode {
    pub fn label(&self) -> String {
        node_label(&self.name, &self.date, &self.assignment)
    }

    pub fn input_ids(&self) -> impl Iterator<Item = DataId> + '_ {
        self.inputs.iter().map(|p| p.data)
    }

    pub fn output_ids(&self) -> impl Iterator<Item = DataId> + '_ {
        self.outputs.iter().map(|p| p.data)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataNode {
    pub id: DataId,
    pub name: String,
    #[serde(serialize_with = "serialize_opt_date")]
    pub date: Option<NaiveDateTime>,
    pub assignment: Assignment,
    pub availability: Availability,
    pub producers: Vec<TaskId>,
    pub consumers: Vec<TaskId>,
}

impl DataNode {
    pub fn label(&self) -> String {
        node_label(&self.name, &self.date, &self.assignment)
    }

    pub fn is_available(&self) -> bool {
        self.availability == Availability::Available
    }
}

/// One expanded cycle point and the task nodes it holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleRecord {
    #[serde(flatten)]
    pub point: CyclePoint,
    pub tasks: Vec<TaskId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Task,
    AvailableData,
    GeneratedData,
}

/// What the graph remembers about each template, for validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateSummary {
    pub name: String,
    pub kind: TemplateKind,
    /// Spanned dimensions in declaration order
    pub dimensions: Vec<String>,
    /// Task templates declared to produce this data
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub producers: Vec<String>,
}

/// `name [date] (dim=value, ...)`
pub fn node_label(name: &str, date: &Option<NaiveDateTime>, assignment: &Assignment) -> String {
    let mut label = name.to_string();
    if let Some(date) = date {
        label.push_str(&format!(" [{}]", format_datetime(date)));
    }
    if !assignment.is_empty() {
        label.push_str(&format!(" ({})", assignment));
    }
    label
}

/// A compiled workflow.
///
/// Nodes are kept in creation order, which is deterministic for a given
/// configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Graph {
    name: String,
    parameters: ParameterSpace,
    templates: Vec<TemplateSummary>,
    cycles: Vec<CycleRecord>,
    tasks: Vec<TaskNode>,
    data: Vec<DataNode>,
}

impl Graph {
    pub(crate) fn new(name: impl Into<String>, parameters: ParameterSpace) -> Self {
        Self {
            name: name.into(),
            parameters,
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &ParameterSpace {
        &self.parameters
    }

    pub fn templates(&self) -> &[TemplateSummary] {
        &self.templates
    }

    pub fn template(&self, name: &str) -> Option<&TemplateSummary> {
        self.templates.iter().find(|t| t.name == name)
    }

    pub fn cycles(&self) -> &[CycleRecord] {
        &self.cycles
    }

    pub fn tasks(&self) -> &[TaskNode] {
        &self.tasks
    }

    pub fn data(&self) -> &[DataNode] {
        &self.data
    }

    pub fn task(&self, id: TaskId) -> &TaskNode {
        &self.tasks[id.0]
    }

    pub fn data_node(&self, id: DataId) -> &DataNode {
        &self.data[id.0]
    }

    pub fn find_task(
        &self,
        name: &str,
        date: Option<NaiveDateTime>,
        assignment: &Assignment,
    ) -> Option<&TaskNode> {
        self.tasks
            .iter()
            .find(|t| t.name == name && t.date == date && t.assignment == *assignment)
    }

    pub fn find_data(
        &self,
        name: &str,
        date: Option<NaiveDateTime>,
        assignment: &Assignment,
    ) -> Option<&DataNode> {
        self.data
            .iter()
            .find(|d| d.name == name && d.date == date && d.assignment == *assignment)
    }

    /// Task nodes of one template, in creation order.
    pub fn tasks_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a TaskNode> + 'a {
        self.tasks.iter().filter(move |t| t.name == name)
    }

    pub fn data_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DataNode> + 'a {
        self.data.iter().filter(move |d| d.name == name)
    }

    pub fn label(&self, node: NodeRef) -> String {
        match node {
            NodeRef::Task(id) => self.task(id).label(),
            NodeRef::Data(id) => self.data_node(id).label(),
        }
    }

    /// Tasks that must finish before `id` starts: producers of its inputs
    /// and the tasks it waits on.
    pub fn parents(&self, id: TaskId) -> Vec<TaskId> {
        let task = self.task(id);
        let mut seen = HashSet::new();
        task.input_ids()
            .flat_map(|d| self.data_node(d).producers.iter().copied())
            .chain(task.wait_on.iter().copied())
            .filter(|t| seen.insert(*t))
            .collect()
    }

    /// Tasks that start only after `id` finishes.
    pub fn children(&self, id: TaskId) -> Vec<TaskId> {
        let mut seen = HashSet::new();
        self.task(id)
            .output_ids()
            .flat_map(|d| self.data_node(d).consumers.iter().copied())
            .chain(self.task(id).waited_by.iter().copied())
            .filter(|t| seen.insert(*t))
            .collect()
    }

    /// Successors of a node in the combined task/data graph.
    pub fn successors(&self, node: NodeRef) -> Vec<NodeRef> {
        match node {
            NodeRef::Task(id) => self
                .task(id)
                .output_ids()
                .map(NodeRef::Data)
                .chain(self.task(id).waited_by.iter().map(|t| NodeRef::Task(*t)))
                .collect(),
            NodeRef::Data(id) => self
                .data_node(id)
                .consumers
                .iter()
                .map(|t| NodeRef::Task(*t))
                .collect(),
        }
    }

    /// Predecessors of a node in the combined task/data graph.
    pub fn predecessors(&self, node: NodeRef) -> Vec<NodeRef> {
        match node {
            NodeRef::Task(id) => {
                let task = self.task(id);
                let mut seen = HashSet::new();
                task.input_ids()
                    .map(NodeRef::Data)
                    .chain(task.wait_on.iter().map(|t| NodeRef::Task(*t)))
                    .filter(|n| seen.insert(*n))
                    .collect()
            }
            NodeRef::Data(id) => self
                .data_node(id)
                .producers
                .iter()
                .map(|t| NodeRef::Task(*t))
                .collect(),
        }
    }

    fn all_nodes(&self) -> impl Iterator<Item = NodeRef> + '_ {
        self.tasks
            .iter()
            .map(|t| NodeRef::Task(t.id))
            .chain(self.data.iter().map(|d| NodeRef::Data(d.id)))
    }

    fn slot(&self, node: NodeRef) -> usize {
        match node {
            NodeRef::Task(id) => id.0,
            NodeRef::Data(id) => self.tasks.len() + id.0,
        }
    }

    /// Orders every node so that each comes after all of its predecessors,
    /// including `wait_on` edges (Kahn's algorithm).
    ///
    /// Ties are broken by creation order, so the result is deterministic.
    /// If the graph has a cycle, returns the nodes that could not be
    /// ordered instead.
    pub fn topological_order(&self) -> Result<Vec<NodeRef>, Vec<NodeRef>> {
        let size = self.tasks.len() + self.data.len();
        let mut in_degree = vec![0usize; size];

        for node in self.all_nodes() {
            for successor in self.successors(node) {
                in_degree[self.slot(successor)] += 1;
            }
        }

        let mut queue: VecDeque<NodeRef> = self
            .all_nodes()
            .filter(|n| in_degree[self.slot(*n)] == 0)
            .collect();
        let mut order = Vec::with_capacity(size);

        while let Some(node) = queue.pop_front() {
            order.push(node);
            for successor in self.successors(node) {
                let slot = self.slot(successor);
                in_degree[slot] -= 1;
                if in_degree[slot] == 0 {
                    queue.push_back(successor);
                }
            }
        }

        if order.len() == size {
            Ok(order)
        } else {
            Err(self
                .all_nodes()
                .filter(|n| in_degree[self.slot(*n)] > 0)
                .collect())
        }
    }

    /// Task nodes only, in topological order.
    pub fn task_order(&self) -> Result<Vec<TaskId>, Vec<NodeRef>> {
        Ok(self
            .topological_order()?
            .into_iter()
            .filter_map(|n| match n {
                NodeRef::Task(id) => Some(id),
                NodeRef::Data(_) => None,
            })
            .collect())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub(crate) fn add_template(&mut self, summary: TemplateSummary) {
        self.templates.push(summary);
    }

    pub(crate) fn add_cycle(&mut self, point: CyclePoint) -> usize {
        self.cycles.push(CycleRecord {
            point,
            tasks: Vec::new(),
        });
        self.cycles.len() - 1
    }

    pub(crate) fn attach_to_cycle(&mut self, cycle: usize, task: TaskId) {
        let tasks = &mut self.cycles[cycle].tasks;
        if !tasks.contains(&task) {
            tasks.push(task);
        }
    }

    pub(crate) fn push_task(
        &mut self,
        name: impl Into<String>,
        cycle: impl Into<String>,
        date: Option<NaiveDateTime>,
        end_date: Option<NaiveDateTime>,
        assignment: Assignment,
    ) -> TaskId {
        let id = TaskId(self.tasks.len());
        self.tasks.push(TaskNode {
            id,
            name: name.into(),
            cycle: cycle.into(),
            date,
            end_date,
            assignment,
            plugin: None,
            options: IndexMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            wait_on: Vec::new(),
            waited_by: Vec::new(),
        });
        id
    }

    pub(crate) fn task_mut(&mut self, id: TaskId) -> &mut TaskNode {
        &mut self.tasks[id.0]
    }

    pub(crate) fn push_data(
        &mut self,
        name: impl Into<String>,
        date: Option<NaiveDateTime>,
        assignment: Assignment,
        availability: Availability,
    ) -> DataId {
        let id = DataId(self.data.len());
        self.data.push(DataNode {
            id,
            name: name.into(),
            date,
            assignment,
            availability,
            producers: Vec::new(),
            consumers: Vec::new(),
        });
        id
    }

    /// Adds a data -> task edge. Repeated edges are ignored.
    pub(crate) fn link_input(&mut self, task: TaskId, data: DataId, port: Option<String>) {
        let node = &mut self.tasks[task.0];
        if node.inputs.iter().any(|p| p.data == data && p.port == port) {
            return;
        }
        node.inputs.push(Port { data, port });

        let consumers = &mut self.data[data.0].consumers;
        if !consumers.contains(&task) {
            consumers.push(task);
        }
    }

    /// Adds a task -> data edge. Repeated edges are ignored.
    pub(crate) fn link_output(&mut self, task: TaskId, data: DataId, port: Option<String>) {
        let node = &mut self.tasks[task.0];
        if node.outputs.iter().any(|p| p.data == data) {
            return;
        }
        node.outputs.push(Port { data, port });

        let producers = &mut self.data[data.0].producers;
        if !producers.contains(&task) {
            producers.push(task);
        }
    }

    /// Makes `task` wait for `target`. Repeated edges are ignored.
    pub(crate) fn link_wait(&mut self, task: TaskId, target: TaskId) {
        let waits = &mut self.tasks[task.0].wait_on;
        if !waits.contains(&target) {
            waits.push(target);
            self.tasks[target.0].waited_by.push(task);
        }
    }
}
