//! Task forest — in-memory parent/child index over the task table.
//!
//! Tasks link to their parent; the forest inverts those links into an
//! adjacency list so subtrees can be walked top-down. Two walks are offered:
//!
//! - [`TaskForest::children`] prunes: a task whose state is in the override
//!   set is left out and nothing below it is visited.
//! - [`TaskForest::descendants`] does not prune: every task reachable from
//!   the root is returned.
//!
//! Kill and pause use both, so a task below an excluded node may have its
//! state changed by propagation without ever being signaled.

use std::collections::{HashMap, HashSet, VecDeque};

use arbor_core::TaskId;
use arbor_state::{StateResult, StateStore, Task, TaskState};

/// Snapshot of the task forest.
#[derive(Debug, Default)]
pub struct TaskForest {
    tasks: HashMap<TaskId, Task>,
    /// parent → children, ordered by start time then id.
    children: HashMap<TaskId, Vec<TaskId>>,
    roots: Vec<TaskId>,
}

impl TaskForest {
    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let tasks: HashMap<TaskId, Task> = tasks
            .into_iter()
            .map(|task| (task.task_id.clone(), task))
            .collect();

        let mut children: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        let mut roots = Vec::new();
        for task in tasks.values() {
            match &task.parent_id {
                Some(parent) => children
                    .entry(parent.clone())
                    .or_default()
                    .push(task.task_id.clone()),
                None => roots.push(task.task_id.clone()),
            }
        }

        let order = |a: &TaskId, b: &TaskId| {
            let key = |id: &TaskId| tasks.get(id).map(|t| t.start_time);
            key(a).cmp(&key(b)).then_with(|| a.cmp(b))
        };
        for siblings in children.values_mut() {
            siblings.sort_by(order);
        }
        roots.sort_by(order);

        Self {
            tasks,
            children,
            roots,
        }
    }

    /// Build the forest from every task in the store.
    pub fn load(store: &StateStore) -> StateResult<Self> {
        Ok(Self::from_tasks(store.list_tasks()?))
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks without a parent.
    pub fn roots(&self) -> &[TaskId] {
        &self.roots
    }

    /// The root of the tree containing `task_id`.
    ///
    /// Returns `None` when the task is not reachable from any root: it is
    /// unknown, its parent chain dangles, or the chain loops.
    pub fn find_root(&self, task_id: &TaskId) -> Option<&TaskId> {
        let mut seen = HashSet::new();
        let mut current = self.tasks.get(task_id)?;
        loop {
            if !seen.insert(&current.task_id) {
                return None;
            }
            match &current.parent_id {
                None => return Some(&current.task_id),
                Some(parent) => current = self.tasks.get(parent)?,
            }
        }
    }

    /// `root` and its descendants, breadth first, skipping any task whose
    /// state is in `override_states` together with its whole subtree.
    pub fn children(&self, root: &TaskId, override_states: &[TaskState]) -> Vec<&Task> {
        self.walk(root, |task| !override_states.contains(&task.state))
    }

    /// `root` and every task reachable below it, breadth first.
    pub fn descendants(&self, root: &TaskId) -> Vec<&Task> {
        self.walk(root, |_| true)
    }

    fn walk(&self, root: &TaskId, enter: impl Fn(&Task) -> bool) -> Vec<&Task> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            let Some(task) = self.tasks.get(id) else {
                continue;
            };
            if !seen.insert(id) || !enter(task) {
                continue;
            }
            out.push(task);
            if let Some(kids) = self.children.get(id) {
                queue.extend(kids.iter());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::JobId;
    use arbor_state::TaskType;

    fn task(id: &str, parent: Option<&str>, state: TaskState) -> Task {
        Task {
            task_id: TaskId::from(id),
            task_type: TaskType::Generic,
            job_id: JobId::from(format!("job-{id}")),
            parent_id: parent.map(TaskId::from),
            state,
            no_pause: None,
            start_time: 1000,
            end_time: None,
            forked_from: None,
            config: None,
        }
    }

    fn ids(tasks: &[&Task]) -> Vec<String> {
        let mut ids: Vec<String> = tasks.iter().map(|t| t.task_id.to_string()).collect();
        ids.sort();
        ids
    }

    /// r ─┬─ a ─┬─ a1
    ///    │     └─ a2
    ///    └─ b ─── b1 ─── b11
    /// s (second root)
    fn sample() -> TaskForest {
        TaskForest::from_tasks(vec![
            task("r", None, TaskState::Active),
            task("a", Some("r"), TaskState::Active),
            task("a1", Some("a"), TaskState::Active),
            task("a2", Some("a"), TaskState::Active),
            task("b", Some("r"), TaskState::Completed),
            task("b1", Some("b"), TaskState::Active),
            task("b11", Some("b1"), TaskState::Active),
            task("s", None, TaskState::Active),
        ])
    }

    #[test]
    fn roots_are_parentless_tasks() {
        let forest = sample();
        assert_eq!(forest.roots(), &[TaskId::from("r"), TaskId::from("s")]);
        assert_eq!(forest.len(), 8);
    }

    #[test]
    fn find_root_of_root_is_itself() {
        let forest = sample();
        for root in ["r", "s"] {
            assert_eq!(forest.find_root(&TaskId::from(root)), Some(&TaskId::from(root)));
        }
    }

    #[test]
    fn find_root_walks_up() {
        let forest = sample();
        assert_eq!(forest.find_root(&TaskId::from("b11")), Some(&TaskId::from("r")));
        assert_eq!(forest.find_root(&TaskId::from("a2")), Some(&TaskId::from("r")));
    }

    #[test]
    fn find_root_unreachable() {
        let forest = TaskForest::from_tasks(vec![
            task("orphan", Some("gone"), TaskState::Active),
            task("x", Some("y"), TaskState::Active),
            task("y", Some("x"), TaskState::Active),
        ]);
        assert_eq!(forest.find_root(&TaskId::from("orphan")), None);
        assert_eq!(forest.find_root(&TaskId::from("x")), None);
        assert_eq!(forest.find_root(&TaskId::from("missing")), None);
    }

    #[test]
    fn children_with_empty_overrides_is_full_subtree() {
        let forest = sample();
        let all = forest.children(&TaskId::from("r"), &[]);
        assert_eq!(ids(&all), vec!["a", "a1", "a2", "b", "b1", "b11", "r"]);
        assert_eq!(all[0].task_id, TaskId::from("r"));
    }

    #[test]
    fn children_prunes_below_excluded_node() {
        let forest = sample();
        let kept = forest.children(&TaskId::from("r"), &[TaskState::Completed]);
        // b is Completed: b, b1 and b11 all disappear.
        assert_eq!(ids(&kept), vec!["a", "a1", "a2", "r"]);
    }

    #[test]
    fn children_of_excluded_root_is_empty() {
        let forest = sample();
        assert!(forest
            .children(&TaskId::from("b"), &[TaskState::Completed])
            .is_empty());
    }

    #[test]
    fn descendants_do_not_prune() {
        let forest = sample();
        let all = forest.descendants(&TaskId::from("r"));
        assert_eq!(ids(&all), vec!["a", "a1", "a2", "b", "b1", "b11", "r"]);
        assert_eq!(ids(&forest.descendants(&TaskId::from("b1"))), vec!["b1", "b11"]);
    }

    #[test]
    fn unknown_root_has_no_descendants() {
        let forest = sample();
        assert!(forest.descendants(&TaskId::from("zzz")).is_empty());
        assert!(forest.children(&TaskId::from("zzz"), &[]).is_empty());
    }

    #[test]
    fn cycles_do_not_hang_walks() {
        let forest = TaskForest::from_tasks(vec![
            task("x", Some("y"), TaskState::Active),
            task("y", Some("x"), TaskState::Active),
        ]);
        assert_eq!(ids(&forest.descendants(&TaskId::from("x"))), vec!["x", "y"]);
    }

    #[test]
    fn load_from_store() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(TaskForest::load(&store).unwrap().is_empty());
    }
}
