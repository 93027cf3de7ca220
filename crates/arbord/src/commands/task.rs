use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use walkdir::WalkDir;

use arbor_core::{AllocationId, ConfigMap, JobId, TaskId};
use arbor_scheduler::{record_allocation_exit, AllocationExit, CreateTaskRequest, ExitReason};
use arbor_state::{ContextFile, Task};

use super::Context;

pub struct CreateArgs {
    pub config_file: Option<PathBuf>,
    pub fork: Option<TaskId>,
    pub parent: Option<TaskId>,
    pub no_pause: Option<bool>,
    pub context_dir: Option<PathBuf>,
    pub project: Option<String>,
}

pub async fn create(ctx: &Context, args: CreateArgs) -> anyhow::Result<()> {
    let config = args
        .config_file
        .as_deref()
        .map(load_launch_config)
        .transpose()?;
    let context_directory = match args.context_dir.as_deref() {
        Some(dir) => read_context_dir(dir)?,
        None => Vec::new(),
    };

    let request = CreateTaskRequest {
        config,
        forked_from: args.fork,
        parent_id: args.parent,
        no_pause: args.no_pause,
        context_directory,
        project_id: args.project,
    };
    let created = ctx.service.create_generic_task(&ctx.user, request).await?;

    println!("✓ Created task {}", created.task_id);
    println!("  Job:        {}", created.job_id);
    println!("  Allocation: {}", created.allocation_id);
    Ok(())
}

pub async fn kill(ctx: &Context, task_id: &TaskId, from_root: bool) -> anyhow::Result<()> {
    ctx.service
        .kill_generic_task(&ctx.user, task_id, from_root)
        .await?;
    println!("✓ Kill requested for {task_id}");
    Ok(())
}

pub async fn pause(ctx: &Context, task_id: &TaskId) -> anyhow::Result<()> {
    ctx.service.pause_generic_task(&ctx.user, task_id).await?;
    println!("✓ Pause requested for {task_id}");
    Ok(())
}

pub async fn unpause(ctx: &Context, task_id: &TaskId) -> anyhow::Result<()> {
    ctx.service.unpause_generic_task(&ctx.user, task_id).await?;
    println!("✓ Resumed {task_id}");
    Ok(())
}

pub async fn set_priority(ctx: &Context, job_id: &JobId, priority: i32) -> anyhow::Result<()> {
    ctx.service
        .set_job_priority(&ctx.user, job_id, priority)
        .await?;
    println!("✓ Job {job_id} priority set to {priority}");
    Ok(())
}

pub async fn show(ctx: &Context, task_id: &TaskId) -> anyhow::Result<()> {
    let tree = ctx.service.task_tree(&ctx.user, task_id).await?;
    print!("{}", format_tree(&tree));
    Ok(())
}

pub fn report_exit(
    ctx: &Context,
    allocation_id: AllocationId,
    reason: ExitReason,
) -> anyhow::Result<()> {
    let exit = AllocationExit {
        allocation_id,
        reason,
    };
    match record_allocation_exit(ctx.service.store(), &ctx.priorities, &exit)? {
        Some(state) => println!("✓ {} exited; task is now {state}", exit.allocation_id),
        None => println!("✓ {} exited; task state unchanged", exit.allocation_id),
    }
    Ok(())
}

/// Read a launch config. `.json` files are parsed as JSON, anything else as
/// TOML. The top level must be a table.
pub fn load_launch_config(path: &Path) -> anyhow::Result<ConfigMap> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read launch config {}", path.display()))?;
    let value: serde_json::Value = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&raw)?,
        _ => toml::from_str(&raw)?,
    };
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => anyhow::bail!("launch config {} must be a table", path.display()),
    }
}

/// Every regular file under `dir`, keyed by its path relative to `dir`.
pub fn read_context_dir(dir: &Path) -> anyhow::Result<Vec<ContextFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir)?;
        files.push(ContextFile {
            path: relative.to_string_lossy().replace('\\', "/"),
            content: std::fs::read(entry.path())
                .with_context(|| format!("read {}", entry.path().display()))?,
        });
    }
    Ok(files)
}

/// Render tasks as an indented tree, children under their parent.
fn format_tree(tasks: &[Task]) -> String {
    let mut children: HashMap<&TaskId, Vec<&Task>> = HashMap::new();
    for task in tasks {
        if let Some(parent) = &task.parent_id {
            children.entry(parent).or_default().push(task);
        }
    }

    let mut out = String::new();
    let mut stack: Vec<(&Task, usize)> = tasks
        .iter()
        .filter(|t| t.parent_id.is_none())
        .map(|t| (t, 0))
        .collect();
    stack.reverse();
    while let Some((task, depth)) = stack.pop() {
        out.push_str(&format!(
            "{}{}  {}  job={}\n",
            "  ".repeat(depth),
            task.task_id,
            task.state,
            task.job_id
        ));
        if let Some(kids) = children.get(&task.task_id) {
            stack.extend(kids.iter().rev().map(|kid| (*kid, depth + 1)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_state::{TaskState, TaskType};

    #[test]
    fn launch_config_from_toml_and_json() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("task.toml");
        std::fs::write(
            &toml_path,
            "entrypoint = [\"python\", \"train.py\"]\n[resources]\nslots = 4\n",
        )
        .unwrap();
        let map = load_launch_config(&toml_path).unwrap();
        assert_eq!(map["resources"]["slots"], 4);

        let json_path = dir.path().join("task.json");
        std::fs::write(&json_path, r#"{"entrypoint": ["sh"]}"#).unwrap();
        let map = load_launch_config(&json_path).unwrap();
        assert_eq!(map["entrypoint"][0], "sh");

        std::fs::write(&json_path, "[1, 2]").unwrap();
        assert!(load_launch_config(&json_path).is_err());
    }

    #[test]
    fn context_dir_is_read_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.py"), b"print(1)").unwrap();
        std::fs::create_dir(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib").join("util.py"), b"x = 2").unwrap();

        let files = read_context_dir(dir.path()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["lib/util.py", "main.py"]);
        assert_eq!(files[1].content, b"print(1)");
    }

    #[test]
    fn tree_rendering_nests_children() {
        let task = |id: &str, parent: Option<&str>| Task {
            task_id: TaskId::from(id),
            task_type: TaskType::Generic,
            job_id: JobId::from(format!("job-{id}")),
            parent_id: parent.map(TaskId::from),
            state: TaskState::Active,
            no_pause: None,
            start_time: 0,
            end_time: None,
            forked_from: None,
            config: None,
        };
        let tasks = vec![
            task("r", None),
            task("a", Some("r")),
            task("b", Some("r")),
            task("a1", Some("a")),
        ];

        let rendered = format_tree(&tasks);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("r  ACTIVE"));
        assert!(lines[1].starts_with("  a  "));
        assert!(lines[2].starts_with("    a1  "));
        assert!(lines[3].starts_with("  b  "));
    }
}
