//! Graph Assembler
//!
//! Turns a [`WorkflowConfig`] into a [`Graph`]. Runs in three passes over
//! every (cycle point, task, parameter assignment):
//!
//! 1. create task nodes and their output data nodes
//! 2. resolve inputs (guards, lags, dates, parameter selection) and wire
//!    data -> task edges
//! 3. resolve `wait_on` targets against the task nodes from pass 1
//!
//! Nodes are looked up by (template name, date, assignment) across the
//! whole expansion, so a data node produced in one cycle and consumed with
//! a lag from a later one is a single node with several consumers.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDateTime;
use log::{debug, info};

use super::{node_label, Availability, DataId, Graph, TaskId, TemplateKind, TemplateSummary};
use crate::calendar::format_datetime;
use crate::error::{describe_date, ConfigError};
use crate::workflow::cycling::{self, CyclePoint, Horizon};
use crate::workflow::model::{
    CycleConfig, CycleTaskConfig, DataItemConfig, OutputConfig, TargetRef, TaskConfig,
    WorkflowConfig,
};
use crate::workflow::parameters::{Assignment, ParameterSpace};
use crate::workflow::parser::check_config;
use crate::workflow::temporal::{RefSite, Resolution};

type NodeKey = (String, Option<NaiveDateTime>, Assignment);

/// A task node as instantiated by one cycle point.
struct Occurrence<'a> {
    task: TaskId,
    cycle: &'a CycleConfig,
    date: Option<NaiveDateTime>,
    binding: &'a CycleTaskConfig,
    template: &'a TaskConfig,
    assignment: Assignment,
}

struct Assembler<'a> {
    config: &'a WorkflowConfig,
    space: ParameterSpace,
    /// Range that lags and explicit dates must land in
    horizon: Horizon,
    graph: Graph,
    task_index: HashMap<NodeKey, TaskId>,
    data_index: HashMap<NodeKey, DataId>,
    /// Available data, and data produced only in undated cycles
    undated_data: HashSet<&'a str>,
    /// Tasks attached only to undated cycles
    undated_tasks: HashSet<&'a str>,
}

/// Compiles a workflow configuration into a graph.
///
/// # Example
///
/// ```rust,no_run
/// use cycleflow::graph::{compile, validate};
/// use cycleflow::workflow::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_workflow("icon.yml")?;
///     let graph = compile(&config)?;
///     let findings = validate(&graph);
///     println!("{} task nodes, {} findings", graph.tasks().len(), findings.len());
///     Ok(())
/// }
/// ```
pub fn compile(config: &WorkflowConfig) -> Result<Graph, ConfigError> {
    info!("Compiling workflow '{}'", config.name);
    check_config(config)?;

    let declared = Horizon::new(config.start_date, config.stop_date);
    if let (Some(start), Some(stop)) = (declared.start, declared.stop) {
        if stop < start {
            return Err(ConfigError::HorizonStopBeforeStart {
                workflow: config.name.clone(),
                start: format_datetime(&start),
                stop: format_datetime(&stop),
            });
        }
    }

    let mut expanded = Vec::with_capacity(config.cycles.len());
    for cycle in &config.cycles {
        let points = cycling::expand(cycle, &declared)?;
        info!("Cycle '{}': {} point(s)", cycle.name, points.len());
        expanded.push((cycle, points));
    }

    let horizon = reference_horizon(&declared, &expanded);
    debug!(
        "Reference horizon: {} .. {}",
        describe_date(&horizon.start),
        describe_date(&horizon.stop)
    );

    let space = ParameterSpace::from_declarations(&config.parameters)?;
    let mut assembler = Assembler::new(config, space, horizon);
    assembler.summarize_templates()?;

    let occurrences = assembler.instantiate(&expanded)?;
    for occurrence in &occurrences {
        assembler.wire_inputs(occurrence)?;
    }
    for occurrence in &occurrences {
        assembler.wire_waits(occurrence)?;
    }

    let graph = assembler.graph;
    info!(
        "Assembled graph '{}': {} cycle point(s), {} task node(s), {} data node(s)",
        graph.name(),
        graph.cycles().len(),
        graph.tasks().len(),
        graph.data().len()
    );
    Ok(graph)
}

/// The declared workflow horizon, with open ends filled from the span of
/// all dated cycle points.
fn reference_horizon(declared: &Horizon, expanded: &[(&CycleConfig, Vec<CyclePoint>)]) -> Horizon {
    let dates: Vec<NaiveDateTime> = expanded
        .iter()
        .flat_map(|(_, points)| points.iter().filter_map(|p| p.date))
        .collect();
    Horizon::new(
        declared.start.or_else(|| dates.iter().min().copied()),
        declared.stop.or_else(|| dates.iter().max().copied()),
    )
}

fn is_dated(cycle: &CycleConfig) -> bool {
    cycle.period.is_some() || cycle.start_date.is_some()
}

impl<'a> Assembler<'a> {
    fn new(config: &'a WorkflowConfig, space: ParameterSpace, horizon: Horizon) -> Self {
        let mut dated_tasks = HashSet::new();
        let mut dated_data = HashSet::new();
        let mut undated_tasks = HashSet::new();
        let mut undated_data = HashSet::new();

        for cycle in &config.cycles {
            let (tasks, data) = if is_dated(cycle) {
                (&mut dated_tasks, &mut dated_data)
            } else {
                (&mut undated_tasks, &mut undated_data)
            };
            for binding in &cycle.tasks {
                let Some(template) = config.get_task(&binding.name) else {
                    continue;
                };
                tasks.insert(template.name.as_str());
                for output in binding.effective_outputs(template) {
                    data.insert(output.name.as_str());
                }
            }
        }

        undated_tasks.retain(|name| !dated_tasks.contains(name));
        undated_data.retain(|name| !dated_data.contains(name));
        undated_data.extend(config.data.available.iter().map(|d| d.name.as_str()));

        Self {
            config,
            graph: Graph::new(config.name.clone(), space.clone()),
            space,
            horizon,
            task_index: HashMap::new(),
            data_index: HashMap::new(),
            undated_data,
            undated_tasks,
        }
    }

    fn undeclared<'n>(owner: &'static str, name: &'n str) -> impl FnOnce(String) -> ConfigError + 'n {
        move |parameter| ConfigError::UndeclaredParameter {
            owner,
            name: name.to_string(),
            parameter,
        }
    }

    fn summarize_templates(&mut self) -> Result<(), ConfigError> {
        let config = self.config;

        for task in &config.tasks {
            let dimensions = self
                .space
                .canonical(&task.parameters)
                .map_err(Self::undeclared("Task", &task.name))?;
            self.graph.add_template(TemplateSummary {
                name: task.name.clone(),
                kind: TemplateKind::Task,
                dimensions,
                producers: Vec::new(),
            });
        }

        for data in &config.data.available {
            let dimensions = self
                .space
                .canonical(&data.parameters)
                .map_err(Self::undeclared("Data", &data.name))?;
            self.graph.add_template(TemplateSummary {
                name: data.name.clone(),
                kind: TemplateKind::AvailableData,
                dimensions,
                producers: Vec::new(),
            });
        }

        for data in &config.data.generated {
            let dimensions = self
                .space
                .canonical(&data.parameters)
                .map_err(Self::undeclared("Data", &data.name))?;

            let mut producers: Vec<String> = Vec::new();
            for binding in config.cycles.iter().flat_map(|c| &c.tasks) {
                let Some(template) = config.get_task(&binding.name) else {
                    continue;
                };
                let produces = binding
                    .effective_outputs(template)
                    .iter()
                    .any(|o| o.name == data.name);
                if produces && !producers.contains(&template.name) {
                    producers.push(template.name.clone());
                }
            }

            self.graph.add_template(TemplateSummary {
                name: data.name.clone(),
                kind: TemplateKind::GeneratedData,
                dimensions,
                producers,
            });
        }
        Ok(())
    }

    fn task_template(&self, cycle: &str, name: &str) -> Result<&'a TaskConfig, ConfigError> {
        self.config
            .get_task(name)
            .ok_or_else(|| ConfigError::UnknownTask {
                cycle: cycle.to_string(),
                task: name.to_string(),
            })
    }

    fn data_template(
        &self,
        task: &str,
        name: &str,
    ) -> Result<(&'a DataItemConfig, Availability), ConfigError> {
        match self.config.get_data(name) {
            Some((data, true)) => Ok((data, Availability::Available)),
            Some((data, false)) => Ok((data, Availability::Generated)),
            None => Err(ConfigError::UnknownData {
                task: task.to_string(),
                data: name.to_string(),
            }),
        }
    }

    /// Pass 1: task nodes and their outputs.
    fn instantiate(
        &mut self,
        expanded: &[(&'a CycleConfig, Vec<CyclePoint>)],
    ) -> Result<Vec<Occurrence<'a>>, ConfigError> {
        let mut occurrences = Vec::new();

        for (cycle, points) in expanded {
            let cycle: &'a CycleConfig = *cycle;
            for point in points {
                let record = self.graph.add_cycle(point.clone());

                for binding in &cycle.tasks {
                    let template = self.task_template(&cycle.name, &binding.name)?;
                    let assignments = self
                        .space
                        .expand(&template.parameters)
                        .map_err(Self::undeclared("Task", &template.name))?;

                    for assignment in assignments {
                        let task = self.task_node(cycle, point, template, &assignment);
                        self.graph.attach_to_cycle(record, task);

                        for output in binding.effective_outputs(template) {
                            let data = self.output_node(template, output, point.date, &assignment)?;
                            self.graph.link_output(task, data, output.port.clone());
                        }

                        occurrences.push(Occurrence {
                            task,
                            cycle,
                            date: point.date,
                            binding,
                            template,
                            assignment,
                        });
                    }
                }
            }
        }

        debug!("Instantiated {} task occurrence(s)", occurrences.len());
        Ok(occurrences)
    }

    fn task_node(
        &mut self,
        cycle: &CycleConfig,
        point: &CyclePoint,
        template: &TaskConfig,
        assignment: &Assignment,
    ) -> TaskId {
        let key = (template.name.clone(), point.date, assignment.clone());
        if let Some(id) = self.task_index.get(&key) {
            debug!(
                "Cycle '{}' reuses task node {}",
                cycle.name,
                self.graph.task(*id).label()
            );
            return *id;
        }

        let id = self.graph.push_task(
            &template.name,
            &cycle.name,
            point.date,
            point.end_date,
            assignment.clone(),
        );
        let node = self.graph.task_mut(id);
        node.plugin = template.plugin.clone();
        node.options = template.options.clone();
        debug!("Created task node {}", node.label());

        self.task_index.insert(key, id);
        id
    }

    fn data_node(
        &mut self,
        name: &str,
        date: Option<NaiveDateTime>,
        assignment: Assignment,
        availability: Availability,
    ) -> DataId {
        let key = (name.to_string(), date, assignment);
        if let Some(id) = self.data_index.get(&key) {
            return *id;
        }

        let id = self
            .graph
            .push_data(name, date, key.2.clone(), availability);
        debug!("Created data node {}", self.graph.data_node(id).label());
        self.data_index.insert(key, id);
        id
    }

    fn output_node(
        &mut self,
        template: &TaskConfig,
        output: &OutputConfig,
        date: Option<NaiveDateTime>,
        assignment: &Assignment,
    ) -> Result<DataId, ConfigError> {
        let (data, _) = self.data_template(&template.name, &output.name)?;
        let dimensions = self
            .space
            .canonical(&data.parameters)
            .map_err(Self::undeclared("Data", &data.name))?;

        if let Some(missing) = dimensions.iter().find(|d| assignment.get(d).is_none()) {
            return Err(ConfigError::InvalidParameterReference {
                task: template.name.clone(),
                target: output.name.clone(),
                parameter: missing.clone(),
                reason: "an output cannot span a dimension its producer does not".to_string(),
            });
        }

        Ok(self.data_node(
            &output.name,
            date,
            assignment.narrow(&dimensions),
            Availability::Generated,
        ))
    }

    fn check_horizon(
        &self,
        occurrence: &Occurrence<'_>,
        target: &str,
        referenced: &NaiveDateTime,
    ) -> Result<(), ConfigError> {
        if self.horizon.contains(referenced) {
            return Ok(());
        }
        Err(ConfigError::OutsideHorizon {
            task: occurrence.template.name.clone(),
            date: describe_date(&occurrence.date),
            target: target.to_string(),
            referenced: format_datetime(referenced),
            horizon_start: describe_date(&self.horizon.start),
            horizon_stop: describe_date(&self.horizon.stop),
        })
    }

    /// Dates a reference points at from one occurrence, `None` when its
    /// guard is not met.
    fn referenced_dates(
        &self,
        occurrence: &Occurrence<'_>,
        target: &TargetRef,
        undated_target: bool,
    ) -> Result<Option<Vec<Option<NaiveDateTime>>>, ConfigError> {
        let site = RefSite {
            task: &occurrence.template.name,
            cycle: &occurrence.cycle.name,
            target: &target.name,
        };

        match target.temporal.resolve(occurrence.date, site)? {
            Resolution::Inactive => {
                debug!(
                    "{}: reference to '{}' inactive at this date",
                    node_label(&occurrence.template.name, &occurrence.date, &occurrence.assignment),
                    target.name
                );
                Ok(None)
            }
            Resolution::Undated if undated_target => Ok(Some(vec![None])),
            Resolution::Undated => Err(ConfigError::MissingDateReference {
                task: occurrence.template.name.clone(),
                cycle: occurrence.cycle.name.clone(),
                target: target.name.clone(),
            }),
            Resolution::Dates(_) if undated_target => {
                if target.temporal.target_cycle.is_current() {
                    Ok(Some(vec![None]))
                } else {
                    Err(ConfigError::DateOnUndatedTarget {
                        task: occurrence.template.name.clone(),
                        target: target.name.clone(),
                    })
                }
            }
            Resolution::Dates(dates) => {
                for date in &dates {
                    self.check_horizon(occurrence, &target.name, date)?;
                }
                Ok(Some(dates.into_iter().map(Some).collect()))
            }
        }
    }

    /// Pass 2: data -> task edges.
    fn wire_inputs(&mut self, occurrence: &Occurrence<'a>) -> Result<(), ConfigError> {
        for input in occurrence.binding.effective_inputs(occurrence.template) {
            let (data, availability) = self.data_template(&occurrence.template.name, &input.name)?;
            let undated = self.undated_data.contains(input.name.as_str());
            let Some(dates) = self.referenced_dates(occurrence, input, undated)? else {
                continue;
            };

            let selections = self.space.select(
                &occurrence.assignment,
                &occurrence.template.name,
                &input.name,
                &data.parameters,
                &input.parameters,
            )?;

            for date in &dates {
                for selection in &selections {
                    let id = self.data_node(&input.name, *date, selection.clone(), availability);
                    self.graph.link_input(occurrence.task, id, input.port.clone());
                }
            }
        }
        Ok(())
    }

    /// Pass 3: task -> task ordering edges.
    fn wire_waits(&mut self, occurrence: &Occurrence<'a>) -> Result<(), ConfigError> {
        for wait in occurrence.binding.effective_wait_on(occurrence.template) {
            let target = self.task_template(&occurrence.cycle.name, &wait.name)?;
            let undated = self.undated_tasks.contains(wait.name.as_str());
            let Some(dates) = self.referenced_dates(occurrence, wait, undated)? else {
                continue;
            };

            let selections = self.space.select(
                &occurrence.assignment,
                &occurrence.template.name,
                &wait.name,
                &target.parameters,
                &wait.parameters,
            )?;

            for date in &dates {
                for selection in &selections {
                    let key = (wait.name.clone(), *date, selection.clone());
                    let Some(id) = self.task_index.get(&key).copied() else {
                        return Err(ConfigError::UnresolvedWaitOn {
                            task: occurrence.template.name.clone(),
                            date: describe_date(&occurrence.date),
                            target: node_label(&wait.name, date, selection),
                            referenced: describe_date(date),
                        });
                    };
                    self.graph.link_wait(occurrence.task, id);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{parse_datetime, Duration};
    use crate::graph::{validate, FindingKind, NodeRef, TaskNode};
    use crate::workflow::model::{CycleTaskConfig, DataItemConfig, TargetRef};
    use crate::workflow::parameters::{ParamRef, ParamValue};
    use crate::workflow::parser::parse_workflow;
    use crate::workflow::temporal::When;

    fn at(text: &str) -> NaiveDateTime {
        parse_datetime(text).unwrap()
    }

    const ICON_ENSEMBLE: &str = r#"
name: icon_ensemble
parameters:
  foo: [0, 1]
  bar: [3.0]
cycles:
  - bimonthly:
      start_date: 2026-01-01T00:00
      stop_date: 2026-07-01T00:00
      period: P2M
      tasks:
        - icon:
            inputs:
              - initial_conditions:
                  when:
                    at: 2026-01-01T00:00
              - icon_restart:
                  when:
                    after: 2026-01-01T00:00
                  target_cycle:
                    lag: -P2M
            outputs: [icon_output, icon_restart]
tasks:
  - icon:
      plugin: icon
      parameters: [foo, bar]
data:
  available:
    - initial_conditions:
        parameters: [foo]
  generated:
    - icon_output:
        parameters: [foo, bar]
    - icon_restart:
        parameters: [foo, bar]
"#;

    fn icon_graph() -> Graph {
        let config = parse_workflow(ICON_ENSEMBLE, "test").unwrap();
        compile(&config).unwrap()
    }

    fn input_names(graph: &Graph, task: TaskId) -> Vec<String> {
        graph
            .task(task)
            .input_ids()
            .map(|d| graph.data_node(d).name.clone())
            .collect()
    }

    #[test]
    fn test_icon_ensemble_node_counts() {
        let graph = icon_graph();
        assert_eq!(graph.cycles().len(), 4);
        assert_eq!(graph.tasks_named("icon").count(), 8);
        assert_eq!(graph.data_named("icon_restart").count(), 8);
        assert_eq!(graph.data_named("icon_output").count(), 8);
        assert_eq!(graph.data_named("initial_conditions").count(), 2);
        assert!(graph.cycles().iter().all(|c| c.tasks.len() == 2));
    }

    #[test]
    fn test_icon_ensemble_first_cycle_uses_initial_conditions() {
        let graph = icon_graph();
        let first: Vec<&TaskNode> = graph
            .tasks_named("icon")
            .filter(|t| t.date == Some(at("2026-01-01")))
            .collect();
        assert_eq!(first.len(), 2);

        for task in first {
            assert_eq!(input_names(&graph, task.id), vec!["initial_conditions"]);
            let ic = graph.data_node(task.inputs[0].data);
            assert_eq!(ic.date, None);
            assert!(ic.is_available());
            assert_eq!(ic.assignment.get("foo"), task.assignment.get("foo"));
        }
    }

    #[test]
    fn test_icon_ensemble_later_cycles_chain_restarts() {
        let graph = icon_graph();
        let later: Vec<&TaskNode> = graph
            .tasks_named("icon")
            .filter(|t| t.date != Some(at("2026-01-01")))
            .collect();
        assert_eq!(later.len(), 6);

        for task in later {
            assert_eq!(input_names(&graph, task.id), vec!["icon_restart"]);
            let restart = graph.data_node(task.inputs[0].data);
            let previous = Duration::months(-2).add_to(task.date.unwrap()).unwrap();
            assert_eq!(restart.date, Some(previous));
            assert_eq!(restart.assignment, task.assignment);

            let producer = graph.task(restart.producers[0]);
            assert_eq!(restart.producers.len(), 1);
            assert_eq!(producer.date, Some(previous));
            assert_eq!(producer.assignment, task.assignment);
            assert_eq!(graph.parents(task.id), vec![producer.id]);
        }
    }

    #[test]
    fn test_icon_ensemble_is_valid_and_ordered() {
        let graph = icon_graph();
        assert!(validate(&graph).is_clean());

        let order = graph.task_order().unwrap();
        let dates: Vec<NaiveDateTime> = order.iter().filter_map(|id| graph.task(*id).date).collect();
        let mut sorted = dates.clone();
        sorted.sort();
        assert_eq!(dates, sorted);
    }

    #[test]
    fn test_compile_is_deterministic() {
        let config = parse_workflow(ICON_ENSEMBLE, "test").unwrap();
        let first = compile(&config).unwrap();
        let second = compile(&config).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());

        let foo: Vec<String> = first
            .tasks_named("icon")
            .map(|t| t.assignment.to_string())
            .take(2)
            .collect();
        assert_eq!(foo, vec!["foo=0, bar=3.0", "foo=1, bar=3.0"]);
    }

    fn daily_config() -> WorkflowConfig {
        let cycle = CycleConfig::new("daily")
            .dated(at("2026-01-01"), at("2026-01-03"), Duration::days(1))
            .with_task(CycleTaskConfig::new("produce").with_output("field"))
            .with_task(
                CycleTaskConfig::new("consume")
                    .with_input(TargetRef::new("field"))
                    .with_input(TargetRef::new("field").lag(Duration::days(-1)).when(When::Window {
                        before: None,
                        after: Some(at("2026-01-01")),
                    })),
            );
        WorkflowConfig::new("daily")
            .with_cycle(cycle)
            .with_task(TaskConfig::new("produce"))
            .with_task(TaskConfig::new("consume"))
            .with_generated(DataItemConfig::new("field"))
    }

    #[test]
    fn test_lagged_data_is_shared() {
        let graph = compile(&daily_config()).unwrap();
        assert_eq!(graph.data_named("field").count(), 3);

        let field = graph
            .find_data("field", Some(at("2026-01-02")), &Assignment::empty())
            .unwrap();
        let consumer_dates: Vec<Option<NaiveDateTime>> = field
            .consumers
            .iter()
            .map(|t| graph.task(*t).date)
            .collect();
        assert_eq!(
            consumer_dates,
            vec![Some(at("2026-01-02")), Some(at("2026-01-03"))]
        );
        assert!(validate(&graph).is_clean());
    }

    fn ensemble_config() -> WorkflowConfig {
        let cycle = CycleConfig::new("main")
            .with_task(
                CycleTaskConfig::new("icon")
                    .with_input(TargetRef::new("forcing"))
                    .with_output("out"),
            )
            .with_task(CycleTaskConfig::new("reduce").with_input(TargetRef::new("out")));
        WorkflowConfig::new("ensemble")
            .with_parameter("foo", vec![ParamValue::Int(0), ParamValue::Int(1)])
            .with_parameter("bar", vec![ParamValue::Float(3.0)])
            .with_cycle(cycle)
            .with_task(TaskConfig::new("icon").with_parameters(&["foo", "bar"]))
            .with_task(TaskConfig::new("reduce").with_parameters(&["bar"]))
            .with_available(DataItemConfig::new("forcing").with_parameters(&["bar"]))
            .with_generated(DataItemConfig::new("out").with_parameters(&["foo", "bar"]))
    }

    #[test]
    fn test_fan_in_over_missing_dimension() {
        let graph = compile(&ensemble_config()).unwrap();
        let reduce: Vec<_> = graph.tasks_named("reduce").collect();
        assert_eq!(reduce.len(), 1);
        assert_eq!(reduce[0].inputs.len(), 2);

        let foos: Vec<String> = reduce[0]
            .input_ids()
            .map(|d| graph.data_node(d).assignment.to_string())
            .collect();
        assert_eq!(foos, vec!["foo=0, bar=3.0", "foo=1, bar=3.0"]);
    }

    #[test]
    fn test_broadcast_to_extra_dimension() {
        let graph = compile(&ensemble_config()).unwrap();
        assert_eq!(graph.data_named("forcing").count(), 1);

        let icons: Vec<_> = graph.tasks_named("icon").collect();
        assert_eq!(icons.len(), 2);
        assert_eq!(icons[0].inputs[0].data, icons[1].inputs[0].data);
        assert_eq!(graph.data_node(icons[0].inputs[0].data).consumers.len(), 2);
    }

    #[test]
    fn test_pinned_parameter_value() {
        let mut config = ensemble_config();
        config.cycles[0].tasks[1] = CycleTaskConfig::new("reduce").with_input(
            TargetRef::new("out").with_param("foo", ParamRef::Value(ParamValue::Int(1))),
        );
        let graph = compile(&config).unwrap();
        let reduce = graph.tasks_named("reduce").next().unwrap();
        assert_eq!(reduce.inputs.len(), 1);
        assert_eq!(
            graph.data_node(reduce.inputs[0].data).assignment.get("foo"),
            Some(&ParamValue::Int(1))
        );
    }

    #[test]
    fn test_single_on_unspanned_dimension_rejected() {
        let mut config = ensemble_config();
        config.cycles[0].tasks[1] = CycleTaskConfig::new("reduce")
            .with_input(TargetRef::new("out").with_param("foo", ParamRef::Single));
        assert!(matches!(
            compile(&config),
            Err(ConfigError::InvalidParameterReference { .. })
        ));
    }

    #[test]
    fn test_lag_outside_horizon_rejected() {
        let mut config = daily_config();
        config.cycles[0].tasks[1] = CycleTaskConfig::new("consume")
            .with_input(TargetRef::new("field").lag(Duration::days(-1)));
        match compile(&config) {
            Err(ConfigError::OutsideHorizon { referenced, .. }) => {
                assert_eq!(referenced, "2025-12-31T00:00:00")
            }
            other => panic!("expected OutsideHorizon, got {:?}", other),
        }
    }

    #[test]
    fn test_workflow_horizon_bounds_references() {
        let config = daily_config().with_horizon(at("2026-01-01"), at("2026-01-02"));
        let graph = compile(&config).unwrap();
        assert_eq!(graph.cycles().len(), 2);
        assert_eq!(graph.tasks_named("consume").count(), 2);

        // the guard only suppresses the lag on 2026-01-01, which is dropped
        let config = daily_config().with_horizon(at("2026-01-02"), at("2026-01-03"));
        assert!(matches!(
            compile(&config),
            Err(ConfigError::OutsideHorizon { .. })
        ));
    }

    #[test]
    fn test_reversed_workflow_horizon_names_the_workflow() {
        let config = daily_config().with_horizon(at("2026-01-03"), at("2026-01-01"));
        let err = compile(&config).unwrap_err();

        assert!(matches!(err, ConfigError::HorizonStopBeforeStart { .. }));
        let message = err.to_string();
        assert!(message.starts_with(&format!("Workflow '{}'", config.name)));
        assert!(!message.contains("Cycle"));
    }

    #[test]
    fn test_missing_producer_inside_horizon_is_dangling() {
        let mut config = daily_config();
        config.cycles[0].period = Some(Duration::days(2));
        config.cycles[0].stop_date = Some(at("2026-01-05"));
        let graph = compile(&config).unwrap();

        let findings = validate(&graph);
        let dangling: Vec<_> = findings.of_kind(FindingKind::DanglingData).collect();
        assert_eq!(dangling.len(), 2);
        assert!(dangling[0].message.contains("2026-01-02"));
    }

    #[test]
    fn test_lag_on_available_data_rejected() {
        let mut config = ensemble_config();
        config.cycles[0] = CycleConfig::new("main")
            .dated(at("2026-01-01"), at("2026-01-03"), Duration::days(1))
            .with_task(
                CycleTaskConfig::new("icon")
                    .with_input(TargetRef::new("forcing").lag(Duration::days(-1)))
                    .with_output("out"),
            );
        assert!(matches!(
            compile(&config),
            Err(ConfigError::DateOnUndatedTarget { .. })
        ));
    }

    #[test]
    fn test_undated_cycle_needs_date_for_dated_data() {
        let mut config = daily_config();
        config.cycles.push(
            CycleConfig::new("post").with_task(
                CycleTaskConfig::new("consume").with_input(TargetRef::new("field")),
            ),
        );
        assert!(matches!(
            compile(&config),
            Err(ConfigError::MissingDateReference { .. })
        ));

        let mut config = daily_config();
        config.cycles.push(CycleConfig::new("post").with_task(
            CycleTaskConfig::new("consume")
                .with_input(TargetRef::new("field").on_dates(vec![at("2026-01-03")])),
        ));
        let graph = compile(&config).unwrap();
        let post = graph.find_task("consume", None, &Assignment::empty()).unwrap();
        assert_eq!(post.inputs.len(), 1);
        assert_eq!(graph.data_node(post.inputs[0].data).date, Some(at("2026-01-03")));
    }

    #[test]
    fn test_dated_cycle_reads_undated_output() {
        let mut config = daily_config();
        config.cycles.insert(
            0,
            CycleConfig::new("init").with_task(CycleTaskConfig::new("setup").with_output("grid")),
        );
        config.tasks.push(TaskConfig::new("setup"));
        config.data.generated.push(DataItemConfig::new("grid"));
        config.cycles[1].tasks[0] = CycleTaskConfig::new("produce")
            .with_input(TargetRef::new("grid"))
            .with_output("field");

        let graph = compile(&config).unwrap();
        assert_eq!(graph.data_named("grid").count(), 1);
        let grid = graph.data_named("grid").next().unwrap();
        assert_eq!(grid.date, None);
        assert_eq!(grid.consumers.len(), 3);
        assert!(validate(&graph).is_clean());
    }

    #[test]
    fn test_wait_on_links_tasks() {
        let mut config = daily_config();
        config.cycles[0].tasks[0] = CycleTaskConfig::new("produce")
            .with_output("field")
            .waits_on(TargetRef::new("consume").lag(Duration::days(-1)).when(When::Window {
                before: None,
                after: Some(at("2026-01-01")),
            }));
        let graph = compile(&config).unwrap();

        let produce = graph
            .find_task("produce", Some(at("2026-01-02")), &Assignment::empty())
            .unwrap();
        let consume = graph
            .find_task("consume", Some(at("2026-01-01")), &Assignment::empty())
            .unwrap();
        assert_eq!(produce.wait_on, vec![consume.id]);
        assert!(graph.children(consume.id).contains(&produce.id));
        assert!(validate(&graph).is_clean());
    }

    #[test]
    fn test_unresolved_wait_on_rejected() {
        let mut config = daily_config();
        config.cycles[0].tasks[0] = CycleTaskConfig::new("produce")
            .with_output("field")
            .waits_on(TargetRef::new("consume").on_dates(vec![at("2026-01-02T12:00")]));
        assert!(matches!(
            compile(&config),
            Err(ConfigError::UnresolvedWaitOn { .. })
        ));
    }

    #[test]
    fn test_wait_on_loop_is_a_finding() {
        let mut config = daily_config();
        config.cycles[0].tasks[0] = CycleTaskConfig::new("produce")
            .with_output("field")
            .waits_on(TargetRef::new("consume"));
        let graph = compile(&config).unwrap();

        let findings = validate(&graph);
        assert_eq!(findings.of_kind(FindingKind::Cycle).count(), 1);
        assert!(graph.topological_order().is_err());
    }

    #[test]
    fn test_duplicate_identity_reuses_node() {
        let mut config = daily_config();
        config.cycles.push(
            CycleConfig::new("extra")
                .at(at("2026-01-02"))
                .with_task(CycleTaskConfig::new("produce").with_output("field")),
        );
        let graph = compile(&config).unwrap();

        assert_eq!(graph.tasks_named("produce").count(), 3);
        let reused = graph
            .find_task("produce", Some(at("2026-01-02")), &Assignment::empty())
            .unwrap();
        assert_eq!(reused.cycle, "daily");
        assert_eq!(reused.outputs.len(), 1);
        assert!(graph.cycles().last().unwrap().tasks.contains(&reused.id));
    }

    #[test]
    fn test_template_defaults_and_overrides() {
        let mut config = daily_config();
        config.tasks[1].inputs = Some(vec![TargetRef::new("field").with_port("input_file")]);
        config.cycles[0].tasks[1] = CycleTaskConfig::new("consume");
        let graph = compile(&config).unwrap();
        let consume = graph.tasks_named("consume").next().unwrap();
        assert_eq!(consume.inputs.len(), 1);
        assert_eq!(consume.inputs[0].port.as_deref(), Some("input_file"));

        let mut binding = CycleTaskConfig::new("consume");
        binding.inputs = Some(Vec::new());
        config.cycles[0].tasks[1] = binding;
        let graph = compile(&config).unwrap();
        assert!(graph.tasks_named("consume").all(|t| t.inputs.is_empty()));
    }

    #[test]
    fn test_output_dimension_not_spanned_by_producer() {
        let mut config = ensemble_config();
        config.data.generated[0].parameters = vec!["foo".to_string()];
        config.tasks[0].parameters = vec!["bar".to_string()];
        assert!(matches!(
            compile(&config),
            Err(ConfigError::InvalidParameterReference { .. })
        ));
    }

    #[test]
    fn test_plugin_and_options_are_carried() {
        let mut config = ensemble_config();
        config.tasks[0] = config.tasks[0]
            .clone()
            .with_plugin("icon")
            .with_option("computer", serde_json::json!("santis"));
        let graph = compile(&config).unwrap();
        let icon = graph.tasks_named("icon").next().unwrap();
        assert_eq!(icon.plugin.as_deref(), Some("icon"));
        assert_eq!(icon.options["computer"], serde_json::json!("santis"));
    }

    #[test]
    fn test_template_summaries() {
        let graph = compile(&daily_config()).unwrap();
        let field = graph.template("field").unwrap();
        assert_eq!(field.kind, TemplateKind::GeneratedData);
        assert_eq!(field.producers, vec!["produce"]);
        assert_eq!(graph.templates().len(), 3);
        assert!(matches!(
            graph.topological_order().unwrap()[0],
            NodeRef::Task(_)
        ));
    }
}
