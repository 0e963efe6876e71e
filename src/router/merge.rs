//! 就绪任务合并
//!
//! 从就绪列表头部取第一个任务；若其可合并，则贪心地收集其后连续的可合并、同类型任务，
//! 直到 max_merge_size，遇到第一个不可合并（或类型不同）的任务即停止。

use crate::workflow::Task;

/// 从就绪列表中取出下一批要派发的任务（按就绪顺序）
pub fn merge_ready_batch(ready: &[&Task], max_merge_size: usize) -> Vec<Task> {
    let Some(lead) = ready.first() else {
        return Vec::new();
    };
    let mut batch = vec![(*lead).clone()];
    if !lead.metadata.mergeable {
        return batch;
    }

    let limit = max_merge_size.max(1);
    for task in ready.iter().skip(1) {
        if batch.len() >= limit {
            break;
        }
        if !task.metadata.mergeable || task.task_type() != lead.task_type() {
            break;
        }
        batch.push((*task).clone());
    }
    batch
}
