//! Text rendering of a compiled graph for terminals.
//!
//! ```text
//! bimonthly [2026-03-01T00:00:00]
//!   icon (foo=0, bar=3.0)
//!     input   icon_restart [2026-01-01T00:00:00] (foo=0, bar=3.0)
//!     output  icon_output [2026-03-01T00:00:00] (foo=0, bar=3.0)
//! ```

use colored::Colorize;

use super::{Graph, NodeRef, TaskId};
use crate::calendar::format_datetime;

fn cycle_heading(graph: &Graph, index: usize) -> String {
    let record = &graph.cycles()[index];
    match record.point.date {
        Some(date) => format!("{} [{}]", record.point.cycle, format_datetime(&date)),
        None => record.point.cycle.clone(),
    }
}

/// One line per cycle point, task, and edge.
pub fn render_tree(graph: &Graph) -> String {
    let mut lines = vec![format!(
        "{} {} ({} tasks, {} data)",
        "Workflow".bold(),
        graph.name().bold(),
        graph.tasks().len(),
        graph.data().len()
    )];

    for (index, record) in graph.cycles().iter().enumerate() {
        lines.push(cycle_heading(graph, index).cyan().bold().to_string());

        for id in &record.tasks {
            let task = graph.task(*id);
            let mut name = task.name.clone();
            if !task.assignment.is_empty() {
                name.push_str(&format!(" ({})", task.assignment));
            }
            lines.push(format!("  {}", name.green()));

            for port in &task.inputs {
                let data = graph.data_node(port.data);
                let label = match &port.port {
                    Some(p) => format!("{} as {}", data.label(), p),
                    None => data.label(),
                };
                let label = if data.is_available() {
                    label.dimmed().to_string()
                } else {
                    label
                };
                lines.push(format!("    {}   {}", "input".yellow(), label));
            }
            for data in task.output_ids() {
                lines.push(format!("    {}  {}", "output".blue(), graph.data_node(data).label()));
            }
            for target in &task.wait_on {
                lines.push(format!("    {}    {}", "wait".magenta(), graph.task(*target).label()));
            }
        }
    }

    lines.join("\n")
}

/// Numbered task list in execution order.
pub fn render_order(graph: &Graph, order: &[TaskId]) -> String {
    let width = order.len().to_string().len();
    order
        .iter()
        .enumerate()
        .map(|(i, id)| {
            format!(
                "{:>width$}. {}",
                i + 1,
                graph.label(NodeRef::Task(*id)),
                width = width
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
