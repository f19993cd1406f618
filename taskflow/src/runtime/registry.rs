//! Group registry mapping group names to their live task records.

use super::record::{TaskId, TaskInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Thread-safe group → ordered record list map.
///
/// Records are appended on submit and removed on their terminal transition;
/// a group whose list becomes empty is pruned. The lock is only held for
/// list mutation or to copy a snapshot.
#[derive(Default)]
pub(crate) struct GroupRegistry {
    groups: Mutex<HashMap<String, Vec<Arc<TaskInfo>>>>,
}

impl GroupRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, info: Arc<TaskInfo>) {
        self.groups
            .lock()
            .entry(info.group.clone())
            .or_default()
            .push(info);
    }

    /// Removes a record. Returns true if it was present.
    pub(crate) fn remove(&self, group: &str, id: TaskId) -> bool {
        let mut groups = self.groups.lock();
        let Some(records) = groups.get_mut(group) else {
            return false;
        };
        let before = records.len();
        records.retain(|info| info.id != id);
        let removed = records.len() < before;
        if records.is_empty() {
            groups.remove(group);
        }
        removed
    }

    /// Copies the current members of one group, or of all groups.
    pub(crate) fn snapshot(&self, group: Option<&str>) -> Vec<Arc<TaskInfo>> {
        let groups = self.groups.lock();
        match group {
            Some(name) => groups.get(name).cloned().unwrap_or_default(),
            None => groups.values().flatten().cloned().collect(),
        }
    }

    pub(crate) fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn len(&self, group: Option<&str>) -> usize {
        let groups = self.groups.lock();
        match group {
            Some(name) => groups.get(name).map_or(0, Vec::len),
            None => groups.values().map(Vec::len).sum(),
        }
    }
}

impl std::fmt::Debug for GroupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupRegistry")
            .field("groups", &self.group_names())
            .field("records", &self.len(None))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::runtime::record::TaskHandle;
    use chrono::Utc;
    use std::time::Instant;

    fn info(group: &str) -> Arc<TaskInfo> {
        let handle: TaskHandle<()> = TaskHandle::new(None);
        Arc::new(TaskInfo {
            id: TaskId::new(),
            name: "test".to_string(),
            group: group.to_string(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
            submitted_at: Instant::now(),
            token: CancellationToken::new(),
            control: handle.control(),
        })
    }

    #[test]
    fn test_insert_and_snapshot_order() {
        let registry = GroupRegistry::new();
        let first = info("g");
        let second = info("g");
        registry.insert(Arc::clone(&first));
        registry.insert(Arc::clone(&second));
        registry.insert(info("other"));

        let snapshot = registry.snapshot(Some("g"));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, first.id);
        assert_eq!(snapshot[1].id, second.id);
        assert_eq!(registry.len(None), 3);
    }

    #[test]
    fn test_remove_prunes_empty_group() {
        let registry = GroupRegistry::new();
        let record = info("g");
        registry.insert(Arc::clone(&record));

        assert!(registry.remove("g", record.id));
        assert!(registry.group_names().is_empty());
        assert!(!registry.remove("g", record.id));
    }

    #[test]
    fn test_remove_keeps_siblings() {
        let registry = GroupRegistry::new();
        let first = info("g");
        let second = info("g");
        registry.insert(Arc::clone(&first));
        registry.insert(Arc::clone(&second));

        registry.remove("g", first.id);
        assert_eq!(registry.len(Some("g")), 1);
        assert_eq!(registry.group_names(), vec!["g".to_string()]);
    }

    #[test]
    fn test_snapshot_unknown_group() {
        let registry = GroupRegistry::new();
        assert!(registry.snapshot(Some("missing")).is_empty());
        assert_eq!(registry.len(Some("missing")), 0);
    }
}
