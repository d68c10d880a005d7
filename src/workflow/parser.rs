//! Workflow Parser
//!
//! Loads workflow definitions from YAML files and runs the checks that only
//! need the templates themselves: duplicate names, declared parameters,
//! known references, reserved task names. Date arithmetic and node wiring
//! are left to the graph assembler.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use log::{debug, info, warn};

use super::model::{WorkflowConfig, ROOT_TASK};
use super::parameters::ParameterSpace;
use crate::error::{ConfigError, LoadError};

/// Loads a workflow from a YAML file.
///
/// This function:
/// 1. Reads and parses the YAML file
/// 2. Names the workflow after the file stem unless it names itself
/// 3. Applies `ROOT` task defaults
/// 4. Checks template references
///
/// # Example
///
/// ```rust,no_run
/// use cycleflow::workflow::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_workflow("icon.yml")?;
///     println!("Loaded {} cycles", config.cycles.len());
///     Ok(())
/// }
/// ```
pub fn load_workflow(path: &str) -> Result<WorkflowConfig, LoadError> {
    info!("Loading workflow from: {}", path);

    let yaml_content = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_string(),
        source,
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    let stem = Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("workflow");
    parse_workflow(&yaml_content, stem)
}

/// Parses a workflow from YAML text.
///
/// `default_name` is used when the document has no `name` key.
pub fn parse_workflow(yaml: &str, default_name: &str) -> Result<WorkflowConfig, LoadError> {
    let mut config: WorkflowConfig = serde_yaml::from_str(yaml)?;

    if config.name.trim().is_empty() {
        config.name = default_name.to_string();
    }

    info!(
        "Parsed workflow '{}': {} parameters, {} cycles, {} tasks, {} data",
        config.name,
        config.parameters.len(),
        config.cycles.len(),
        config.tasks.len(),
        config.data.available.len() + config.data.generated.len()
    );

    for (owner, key, field) in misspelled_option_keys(&config) {
        warn!(
            "'{}' has option '{}', which looks like a misspelled '{}' and is passed through untouched",
            owner, key, field
        );
    }

    apply_root_defaults(&mut config);
    check_config(&config)?;
    Ok(config)
}

const TASK_FIELDS: &[&str] = &["plugin", "parameters", "inputs", "outputs", "wait_on"];
const DATA_FIELDS: &[&str] = &["parameters"];

/// Option keys within two edits of a recognised field name, as
/// `(template, key, field)`.
pub fn misspelled_option_keys(config: &WorkflowConfig) -> Vec<(String, String, String)> {
    let tasks = config
        .tasks
        .iter()
        .map(|t| (&t.name, &t.options, TASK_FIELDS));
    let data = config
        .data
        .available
        .iter()
        .chain(&config.data.generated)
        .map(|d| (&d.name, &d.options, DATA_FIELDS));

    let mut found = Vec::new();
    for (owner, options, fields) in tasks.chain(data) {
        for key in options.keys() {
            let lowered = key.to_lowercase();
            if let Some(field) = fields
                .iter()
                .find(|f| lowered.len() > 3 && edit_distance(&lowered, f) <= 2)
            {
                found.push((owner.clone(), key.clone(), field.to_string()));
            }
        }
    }
    found
}

/// Levenshtein distance over chars.
fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == *cb {
                diagonal
            } else {
                1 + diagonal.min(above).min(row[j])
            };
            diagonal = above;
        }
    }
    row[b.len()]
}

/// Copies `ROOT` settings into every task lacking them and drops `ROOT`.
pub fn apply_root_defaults(config: &mut WorkflowConfig) {
    let Some(position) = config.tasks.iter().position(|t| t.name == ROOT_TASK) else {
        return;
    };
    let root = config.tasks.remove(position);

    for task in &mut config.tasks {
        if task.plugin.is_none() {
            task.plugin = root.plugin.clone();
        }
        for (key, value) in &root.options {
            if !task.options.contains_key(key) {
                task.options.insert(key.clone(), value.clone());
            }
        }
    }

    debug!(
        "Applied ROOT defaults ({} option(s)) to {} task(s)",
        root.options.len(),
        config.tasks.len()
    );
}

fn check_unique<'a>(
    kind: &'static str,
    names: impl Iterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ConfigError::DuplicateName {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

/// Checks everything that can be checked without expanding cycles.
///
/// The graph assembler calls this too, so configs built in code get the
/// same checks as parsed ones.
pub fn check_config(config: &WorkflowConfig) -> Result<(), ConfigError> {
    let space = ParameterSpace::from_declarations(&config.parameters)?;

    if config.cycles.is_empty() {
        return Err(ConfigError::Empty("cycles"));
    }

    check_unique("cycle", config.cycles.iter().map(|c| c.name.as_str()))?;
    check_unique("task", config.tasks.iter().map(|t| t.name.as_str()))?;
    check_unique(
        "data",
        config
            .data
            .available
            .iter()
            .chain(&config.data.generated)
            .map(|d| d.name.as_str()),
    )?;

    for task in &config.tasks {
        if let Some(parameter) = task.parameters.iter().find(|p| !space.contains(p)) {
            return Err(ConfigError::UndeclaredParameter {
                owner: "Task",
                name: task.name.clone(),
                parameter: parameter.clone(),
            });
        }
    }
    for data in config.data.available.iter().chain(&config.data.generated) {
        if let Some(parameter) = data.parameters.iter().find(|p| !space.contains(p)) {
            return Err(ConfigError::UndeclaredParameter {
                owner: "Data",
                name: data.name.clone(),
                parameter: parameter.clone(),
            });
        }
    }

    let mut produced: HashSet<&str> = HashSet::new();
    for cycle in &config.cycles {
        for cycle_task in &cycle.tasks {
            if cycle_task.name == ROOT_TASK {
                return Err(ConfigError::ReservedTask {
                    task: cycle_task.name.clone(),
                    cycle: cycle.name.clone(),
                });
            }
            let template = config
                .get_task(&cycle_task.name)
                .ok_or_else(|| ConfigError::UnknownTask {
                    cycle: cycle.name.clone(),
                    task: cycle_task.name.clone(),
                })?;

            for output in cycle_task.effective_outputs(template) {
                match config.get_data(&output.name) {
                    None => {
                        return Err(ConfigError::UnknownData {
                            task: template.name.clone(),
                            data: output.name.clone(),
                        })
                    }
                    Some((_, true)) => {
                        return Err(ConfigError::OutputIsAvailable {
                            task: template.name.clone(),
                            data: output.name.clone(),
                        })
                    }
                    Some((data, false)) => {
                        produced.insert(data.name.as_str());
                    }
                }
            }

            for wait in cycle_task.effective_wait_on(template) {
                if wait.name == ROOT_TASK || config.get_task(&wait.name).is_none() {
                    return Err(ConfigError::UnknownTask {
                        cycle: cycle.name.clone(),
                        task: wait.name.clone(),
                    });
                }
            }
        }
    }

    for cycle in &config.cycles {
        for cycle_task in &cycle.tasks {
            let Some(template) = config.get_task(&cycle_task.name) else {
                continue;
            };
            for input in cycle_task.effective_inputs(template) {
                match config.get_data(&input.name) {
                    None => {
                        return Err(ConfigError::UnknownData {
                            task: template.name.clone(),
                            data: input.name.clone(),
                        })
                    }
                    Some((data, false)) if !produced.contains(data.name.as_str()) => {
                        return Err(ConfigError::NeverProduced {
                            task: template.name.clone(),
                            data: input.name.clone(),
                        })
                    }
                    _ => {}
                }
            }
        }
    }

    debug!("Configuration checks passed for '{}'", config.name);
    Ok(())
}

/// Serializes a workflow back to YAML.
pub fn to_yaml(config: &WorkflowConfig) -> Result<String, LoadError> {
    Ok(serde_yaml::to_string(config)?)
}

/// Saves a workflow to a YAML file.
///
/// # Arguments
///
/// * `config` - The workflow to save
/// * `path` - Output file path
pub fn save_workflow(config: &WorkflowConfig, path: &str) -> Result<(), LoadError> {
    let yaml_content = to_yaml(config)?;
    fs::write(path, yaml_content).map_err(|source| LoadError::Io {
        path: path.to_string(),
        source,
    })?;
    info!("Workflow saved to: {}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MINIMAL: &str = r#"
parameters:
  foo: [0, 1]
cycles:
  - main:
      tasks:
        - prepare
        - run:
            inputs: [grid, prepared]
            outputs: [result]
tasks:
  - ROOT:
      plugin: shell
      computer: localhost
  - prepare:
      outputs: [prepared]
  - run:
      plugin: icon
      parameters: [foo]
data:
  available:
    - grid
  generated:
    - prepared
    - result:
        parameters: [foo]
"#;

    fn parse(yaml: &str) -> Result<WorkflowConfig, LoadError> {
        parse_workflow(yaml, "test")
    }

    fn config_error(yaml: &str) -> ConfigError {
        match parse(yaml) {
            Err(LoadError::Config(err)) => err,
            other => panic!("expected a config error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_minimal_workflow() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.name, "test");
        assert_eq!(config.tasks.len(), 2);
        assert!(config.get_task(ROOT_TASK).is_none());
    }

    #[test]
    fn test_root_defaults_are_inherited() {
        let config = parse(MINIMAL).unwrap();
        let prepare = config.get_task("prepare").unwrap();
        let run = config.get_task("run").unwrap();
        assert_eq!(prepare.plugin.as_deref(), Some("shell"));
        assert_eq!(run.plugin.as_deref(), Some("icon"));
        assert_eq!(run.options["computer"], serde_json::json!("localhost"));
    }

    #[test]
    fn test_misspelled_option_keys_are_reported() {
        assert!(misspelled_option_keys(&parse(MINIMAL).unwrap()).is_empty());

        let yaml = r#"
cycles:
  - main:
      tasks: [run]
tasks:
  - run:
      paramters: [foo]
      wait-on: [prepare]
      command: run.sh
data:
  generated:
    - result:
        Parameters: [foo]
        path: /scratch/result
"#;
        let config: WorkflowConfig = serde_yaml::from_str(yaml).unwrap();
        let found = misspelled_option_keys(&config);
        assert_eq!(
            found,
            vec![
                ("run".to_string(), "paramters".to_string(), "parameters".to_string()),
                ("run".to_string(), "wait-on".to_string(), "wait_on".to_string()),
                ("result".to_string(), "Parameters".to_string(), "parameters".to_string()),
            ]
        );
        assert_eq!(config.get_task("run").unwrap().parameters.len(), 0);
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("paramters", "parameters"), 1);
        assert_eq!(edit_distance("input", "inputs"), 1);
        assert_eq!(edit_distance("command", "outputs"), 7);
        assert_eq!(edit_distance("", "plugin"), 6);
    }

    #[test]
    fn test_name_from_document_wins() {
        let yaml = format!("name: named\n{}", MINIMAL);
        assert_eq!(parse(&yaml).unwrap().name, "named");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let yaml = MINIMAL.replace("    - prepared\n", "    - prepared\n    - grid\n");
        assert!(matches!(
            config_error(&yaml),
            ConfigError::DuplicateName { kind: "data", .. }
        ));
    }

    #[test]
    fn test_undeclared_parameter_rejected() {
        let yaml = MINIMAL.replace("parameters: [foo]\n", "parameters: [member]\n");
        assert!(matches!(
            config_error(&yaml),
            ConfigError::UndeclaredParameter { .. }
        ));
    }

    #[test]
    fn test_unknown_task_in_cycle_rejected() {
        let yaml = MINIMAL.replace("        - prepare\n", "        - missing\n");
        assert!(matches!(config_error(&yaml), ConfigError::UnknownTask { .. }));
    }

    #[test]
    fn test_root_in_cycle_rejected() {
        let yaml = MINIMAL.replace("        - prepare\n", "        - ROOT\n");
        assert!(matches!(config_error(&yaml), ConfigError::ReservedTask { .. }));
    }

    #[test]
    fn test_unknown_input_rejected() {
        let yaml = MINIMAL.replace("inputs: [grid, prepared]", "inputs: [grid, mesh]");
        assert!(matches!(config_error(&yaml), ConfigError::UnknownData { .. }));
    }

    #[test]
    fn test_input_never_produced_rejected() {
        let yaml = MINIMAL.replace("      outputs: [prepared]\n", "");
        assert!(matches!(config_error(&yaml), ConfigError::NeverProduced { .. }));
    }

    #[test]
    fn test_output_of_available_data_rejected() {
        let yaml = MINIMAL.replace("outputs: [result]", "outputs: [grid]");
        assert!(matches!(
            config_error(&yaml),
            ConfigError::OutputIsAvailable { .. }
        ));
    }

    #[test]
    fn test_empty_parameter_values_rejected() {
        let yaml = MINIMAL.replace("foo: [0, 1]", "foo: []");
        assert!(matches!(
            config_error(&yaml),
            ConfigError::InvalidParameterValues { .. }
        ));
    }

    #[test]
    fn test_no_cycles_rejected() {
        assert!(matches!(
            config_error("tasks: []\n"),
            ConfigError::Empty("cycles")
        ));
    }

    #[test]
    fn test_invalid_duration_is_yaml_error() {
        let yaml = MINIMAL.replace("  - main:\n", "  - main:\n      period: P2X\n");
        assert!(matches!(parse(&yaml), Err(LoadError::Yaml(_))));
    }

    #[test]
    fn test_load_workflow_uses_file_stem() {
        let temp_dir = tempdir().unwrap();
        let workflow_path = temp_dir.path().join("icon_ensemble.yml");
        std::fs::write(&workflow_path, MINIMAL).unwrap();

        let config = load_workflow(workflow_path.to_str().unwrap()).unwrap();
        assert_eq!(config.name, "icon_ensemble");
    }

    #[test]
    fn test_load_workflow_file_not_found() {
        let result = load_workflow("/nonexistent/path/workflow.yaml");
        assert!(matches!(result, Err(LoadError::Io { .. })));
    }

    #[test]
    fn test_load_workflow_invalid_yaml() {
        let temp_dir = tempdir().unwrap();
        let workflow_path = temp_dir.path().join("bad.yaml");
        std::fs::write(&workflow_path, "this is not valid yaml: [[[").unwrap();

        let result = load_workflow(workflow_path.to_str().unwrap());
        assert!(matches!(result, Err(LoadError::Yaml(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = tempdir().unwrap();
        let workflow_path = temp_dir.path().join("saved.yaml");
        let config = parse(MINIMAL).unwrap();

        save_workflow(&config, workflow_path.to_str().unwrap()).unwrap();
        assert!(workflow_path.exists());

        let reloaded = load_workflow(workflow_path.to_str().unwrap()).unwrap();
        assert_eq!(reloaded, config);
    }
}
