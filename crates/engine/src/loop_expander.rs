//! Loop expansion: turn a loop task's data source into a chain of subtasks.
//!
//! A `.csv` source yields one subtask per non-empty row; any other file is
//! read line by line. Subtasks are named `<loop>_<n>` (1-based). That prefix
//! is the only link back to the loop, so loop names must not be prefixes of
//! unrelated task names.

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::error::EngineError;
use crate::models::{ConditionTable, ConditionTarget, Task, TaskId, TaskType};
use crate::registry::TaskRegistry;
use crate::run_context::RunContext;

/// Which vocabulary generated subtasks use.
///
/// The two strategies intentionally stay distinct: a loop that starts the
/// workflow produces decision subtasks routed by `done`/`retry`/`exit`, a
/// loop reached mid-run produces regular subtasks labelled
/// `complete`/`retry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionStrategy {
    /// The start task is a loop; expanded once before the first cycle.
    AuthorTime,
    /// A loop task reached during traversal; expanded on first visit.
    Runtime,
}

/// Read the rows of a loop source. Empty rows and lines are dropped.
///
/// CSV rows with more than one field are rendered as a question/answer
/// block; the remaining fields are re-joined with commas.
pub fn read_loop_rows(path: &Path) -> Result<Vec<String>, EngineError> {
    let content = fs::read_to_string(path).map_err(|source| EngineError::LoopSourceIo {
        path: path.to_path_buf(),
        source,
    })?;

    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

    if !is_csv {
        return Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quote(b'"')
        .escape(Some(b'\\'))
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|source| EngineError::LoopSourceCsv {
            path: path.to_path_buf(),
            source,
        })?;

        let mut fields = record.iter().map(str::trim);
        let Some(first) = fields.next() else {
            continue;
        };
        let rest: Vec<&str> = fields.collect();
        let row = if rest.is_empty() {
            first.to_owned()
        } else {
            format!("Question: {}\nAnswer: {}", first, rest.join(","))
        };

        if row.is_empty() {
            continue;
        }
        debug!("processing CSV row {}: {}", i + 1, row);
        rows.push(row);
    }
    Ok(rows)
}

/// Build the subtasks for `loop_task` from `rows`, already chained.
fn build_subtasks(loop_task: &Task, rows: &[String], strategy: ExpansionStrategy) -> Vec<Task> {
    let inherited = loop_task.next_tasks.clone();
    let names: Vec<String> = (1..=rows.len())
        .map(|n| format!("{}_{}", loop_task.name, n))
        .collect();

    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let description = if loop_task.description.is_empty() {
                row.clone()
            } else {
                format!("{}\n{}", loop_task.description, row)
            };

            // Each subtask points at the next one; the last returns control
            // to whatever followed the loop.
            let successor = names.get(i + 1).map(|next| vec![next.clone()]);
            let next_tasks = successor.clone().unwrap_or_else(|| inherited.clone());
            let forward = successor.unwrap_or_else(|| {
                if inherited.is_empty() {
                    vec!["next".to_owned()]
                } else {
                    inherited.clone()
                }
            });

            let (task_type, condition): (TaskType, ConditionTable) = match strategy {
                ExpansionStrategy::AuthorTime => (
                    TaskType::Decision,
                    [
                        ("done", ConditionTarget::Names(forward)),
                        ("retry", ConditionTarget::to("current")),
                        ("exit", ConditionTarget::exit()),
                    ]
                    .into_iter()
                    .collect(),
                ),
                ExpansionStrategy::Runtime => (
                    TaskType::Regular,
                    [
                        ("complete", ConditionTarget::Names(forward)),
                        ("retry", ConditionTarget::to("current")),
                    ]
                    .into_iter()
                    .collect(),
                ),
            };

            Task {
                name: names[i].clone(),
                description,
                expected_output: loop_task.expected_output.clone(),
                agent: loop_task.agent.clone(),
                task_type,
                next_tasks,
                condition,
                is_start: i == 0,
                ..Task::default()
            }
        })
        .collect()
}

/// Expand the loop task `loop_id` into subtasks and splice them into the
/// registry. Returns the ids created, in chain order.
///
/// Runs at most once per loop task: a task whose subtasks already exist
/// yields an empty list. The runtime strategy also points the loop task's
/// `next_tasks` at the first subtask.
pub fn expand_loop(
    registry: &mut TaskRegistry,
    ctx: &mut RunContext,
    loop_id: TaskId,
    strategy: ExpansionStrategy,
) -> Result<Vec<TaskId>, EngineError> {
    let loop_task = registry.get(loop_id).ok_or(EngineError::UnknownTask(loop_id))?;
    if loop_task.subtasks_created {
        debug!("subtasks already created for loop task {}", loop_task.name);
        return Ok(Vec::new());
    }
    let Some(path) = loop_task.input_file.clone() else {
        return Ok(Vec::new());
    };

    let rows = read_loop_rows(&path)?;
    let subtasks = build_subtasks(loop_task, &rows, strategy);
    let loop_name = loop_task.name.clone();
    let first_name = subtasks.first().map(|t| t.name.clone());

    // All or nothing: a clash leaves the registry untouched.
    if let Some(taken) = subtasks.iter().find(|t| registry.id_of(&t.name).is_some()) {
        return Err(EngineError::DuplicateTaskName(taken.name.clone()));
    }

    let mut created = Vec::with_capacity(subtasks.len());
    for subtask in subtasks {
        created.push(registry.insert(subtask)?);
    }

    if let Some(first_name) = first_name {
        let loop_task = registry.get_mut(loop_id).ok_or(EngineError::UnknownTask(loop_id))?;
        loop_task.subtasks_created = true;
        if strategy == ExpansionStrategy::Runtime {
            loop_task.next_tasks = vec![first_name];
        }
        ctx.track_loop(&loop_name, created.len());
        info!(
            "created {} tasks from {} for loop task {}",
            created.len(),
            path.display(),
            loop_name
        );
    }

    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn source(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(suffix)
            .tempfile()
            .expect("temp file");
        file.write_all(content.as_bytes()).expect("write source");
        file
    }

    fn loop_registry(path: &Path, next: &[&str]) -> (TaskRegistry, TaskId) {
        let mut reg = TaskRegistry::from_tasks(vec![
            Task::new("qa", "Check the answer")
                .with_type(TaskType::Loop)
                .with_agent("checker")
                .with_expected_output("verdict")
                .with_input_file(path)
                .with_next(next.iter().copied()),
            Task::new("summary", ""),
        ])
        .unwrap();
        let id = reg.id_of("qa").unwrap();
        link(&mut reg);
        (reg, id)
    }

    fn link(reg: &mut TaskRegistry) {
        crate::graph::link_previous_tasks(reg);
    }

    #[test]
    fn csv_rows_render_question_answer_blocks() {
        let file = source(
            ".csv",
            "What is 2+2?,4\n\n\"Capital of France, please\",Paris, France\nplain row\n,\n\"say \\\"hi\\\"\"\n",
        );
        let rows = read_loop_rows(file.path()).expect("readable");
        assert_eq!(
            rows,
            vec![
                "Question: What is 2+2?\nAnswer: 4".to_string(),
                "Question: Capital of France, please\nAnswer: Paris,France".to_string(),
                "plain row".to_string(),
                "Question: \nAnswer: ".to_string(),
                "say \"hi\"".to_string(),
            ]
        );
    }

    #[test]
    fn text_sources_yield_non_empty_lines() {
        let file = source(".txt", "first\n\n  second  \n");
        assert_eq!(read_loop_rows(file.path()).unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn missing_source_is_an_io_error() {
        let err = read_loop_rows(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, EngineError::LoopSourceIo { .. }));
    }

    #[test]
    fn author_time_expansion_chains_decision_subtasks() {
        let file = source(".csv", "a,1\nb,2\nc,3\n");
        let (mut reg, qa) = loop_registry(file.path(), &["summary"]);
        let mut ctx = RunContext::default();

        let created = expand_loop(&mut reg, &mut ctx, qa, ExpansionStrategy::AuthorTime).unwrap();
        assert_eq!(created.len(), 3);

        let names: Vec<&str> = created
            .iter()
            .map(|id| reg.get(*id).unwrap().name.as_str())
            .collect();
        assert_eq!(names, vec!["qa_1", "qa_2", "qa_3"]);

        let first = reg.by_name("qa_1").unwrap();
        assert_eq!(first.task_type, TaskType::Decision);
        assert!(first.is_start);
        assert_eq!(first.agent.as_deref(), Some("checker"));
        assert_eq!(first.expected_output.as_deref(), Some("verdict"));
        assert_eq!(first.description, "Check the answer\nQuestion: a\nAnswer: 1");
        assert_eq!(first.next_tasks, vec!["qa_2"]);
        assert_eq!(first.condition.get("done").and_then(|t| t.target()), Some("qa_2"));
        assert!(first.condition.get("exit").is_some_and(|t| t.is_exit()));

        let last = reg.by_name("qa_3").unwrap();
        assert!(!last.is_start);
        assert_eq!(last.next_tasks, vec!["summary"]);
        assert_eq!(last.condition.get("done").and_then(|t| t.target()), Some("summary"));

        let loop_task = reg.get(qa).unwrap();
        assert!(loop_task.subtasks_created);
        assert_eq!(loop_task.next_tasks, vec!["summary"]);
        assert_eq!(ctx.loop_progress("qa").map(|p| p.remaining), Some(3));
    }

    #[test]
    fn runtime_expansion_uses_complete_vocabulary() {
        let file = source(".txt", "one\ntwo\n");
        let (mut reg, qa) = loop_registry(file.path(), &["summary"]);
        let mut ctx = RunContext::default();

        expand_loop(&mut reg, &mut ctx, qa, ExpansionStrategy::Runtime).unwrap();

        let first = reg.by_name("qa_1").unwrap();
        assert_eq!(first.task_type, TaskType::Regular);
        assert_eq!(first.condition.get("complete").and_then(|t| t.target()), Some("qa_2"));
        assert!(first.condition.get("done").is_none());

        let last = reg.by_name("qa_2").unwrap();
        assert_eq!(last.next_tasks, vec!["summary"]);
        assert_eq!(reg.get(qa).unwrap().next_tasks, vec!["qa_1"]);
    }

    #[test]
    fn loop_without_successors_routes_done_to_placeholder() {
        let file = source(".txt", "only\n");
        let (mut reg, qa) = loop_registry(file.path(), &[]);
        let mut ctx = RunContext::default();
        expand_loop(&mut reg, &mut ctx, qa, ExpansionStrategy::AuthorTime).unwrap();

        let only = reg.by_name("qa_1").unwrap();
        assert!(only.next_tasks.is_empty());
        assert_eq!(only.condition.get("done").and_then(|t| t.target()), Some("next"));
    }

    #[test]
    fn name_clash_leaves_the_registry_untouched() {
        let file = source(".csv", "a,1\nb,2\nc,3\n");
        let (mut reg, qa) = loop_registry(file.path(), &["summary"]);
        reg.insert(Task::new("qa_2", "unrelated")).unwrap();
        let before = reg.len();
        let mut ctx = RunContext::default();

        let err = expand_loop(&mut reg, &mut ctx, qa, ExpansionStrategy::Runtime).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTaskName(ref name) if name == "qa_2"));
        assert_eq!(reg.len(), before);
        assert!(reg.id_of("qa_1").is_none());
        assert!(!reg.get(qa).unwrap().subtasks_created);
        assert_eq!(reg.get(qa).unwrap().next_tasks, vec!["summary"]);
        assert!(ctx.loop_progress("qa").is_none());
    }

    #[test]
    fn expansion_runs_once() {
        let file = source(".txt", "one\n");
        let (mut reg, qa) = loop_registry(file.path(), &[]);
        let mut ctx = RunContext::default();

        let first = expand_loop(&mut reg, &mut ctx, qa, ExpansionStrategy::Runtime).unwrap();
        assert_eq!(first.len(), 1);
        let again = expand_loop(&mut reg, &mut ctx, qa, ExpansionStrategy::Runtime).unwrap();
        assert!(again.is_empty());
        assert_eq!(reg.len(), 3);
    }
}
