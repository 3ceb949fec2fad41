//! Research progress reporting.
//!
//! Each recursion frame owns its own `ResearchProgress` record scoped to its
//! own sub-query count: an observer sees `completed_queries/total_queries`
//! reset whenever a new frame begins reporting. That frame-local contract is
//! deliberate; callers that want a monotonic view can additionally subscribe
//! to the derived tree-wide `TreeProgress` aggregate.
//!
//! Updates are merged with the pure [`ResearchProgress::apply`] so the only
//! mutable progress state lives in the frame that owns the record.

use serde::Serialize;
use std::sync::{Arc, Mutex};

/// A frame-local progress record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResearchProgress {
    /// Remaining recursive levels below this frame. Constant for the frame.
    pub current_depth: usize,
    /// Depth of the whole research run.
    pub total_depth: usize,
    /// Sibling queries planned at this frame. Constant for the frame.
    pub current_breadth: usize,
    /// Breadth of the whole research run.
    pub total_breadth: usize,
    /// The query most recently planned or resolved in this frame.
    pub current_query: Option<String>,
    /// Queries planned at this frame.
    pub total_queries: usize,
    /// Queries of this frame whose branch has resolved.
    pub completed_queries: usize,
}

/// A partial progress update; unset fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub current_depth: Option<usize>,
    pub total_depth: Option<usize>,
    pub current_breadth: Option<usize>,
    pub total_breadth: Option<usize>,
    pub current_query: Option<String>,
    pub total_queries: Option<usize>,
    pub completed_queries: Option<usize>,
}

impl ResearchProgress {
    /// Shallow-merge `update` into this record, returning the merged record.
    /// Pure: `self` is left untouched.
    pub fn apply(&self, update: &ProgressUpdate) -> ResearchProgress {
        ResearchProgress {
            current_depth: update.current_depth.unwrap_or(self.current_depth),
            total_depth: update.total_depth.unwrap_or(self.total_depth),
            current_breadth: update.current_breadth.unwrap_or(self.current_breadth),
            total_breadth: update.total_breadth.unwrap_or(self.total_breadth),
            current_query: update
                .current_query
                .clone()
                .or_else(|| self.current_query.clone()),
            total_queries: update.total_queries.unwrap_or(self.total_queries),
            completed_queries: update.completed_queries.unwrap_or(self.completed_queries),
        }
    }
}

/// Derived tree-wide aggregate across every frame of a research run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeProgress {
    /// Queries planned so far across the whole tree.
    pub total_queries: usize,
    /// Branches resolved so far across the whole tree.
    pub completed_queries: usize,
}

/// Callback receiving each frame-local record after an update.
pub type ProgressCallback = dyn Fn(&ResearchProgress) + Send + Sync;

/// Callback receiving the tree-wide aggregate after it changes.
pub type TreeProgressCallback = dyn Fn(&TreeProgress) + Send + Sync;

/// Observer handle passed into a research run.
///
/// Both callbacks are optional. Callbacks are invoked inline from the
/// orchestrator's driver; a panicking callback is the collaborator's
/// responsibility and is neither caught nor retried here.
#[derive(Clone, Default)]
pub struct ResearchObserver {
    on_progress: Option<Arc<ProgressCallback>>,
    on_tree_progress: Option<Arc<TreeProgressCallback>>,
    tree: Arc<Mutex<TreeProgress>>,
}

impl ResearchObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to frame-local progress records.
    pub fn with_progress_callback(mut self, callback: Arc<ProgressCallback>) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Subscribe to the derived tree-wide aggregate.
    pub fn with_tree_callback(mut self, callback: Arc<TreeProgressCallback>) -> Self {
        self.on_tree_progress = Some(callback);
        self
    }

    /// Snapshot of the tree-wide aggregate.
    pub fn tree(&self) -> TreeProgress {
        *self.tree.lock().unwrap()
    }

    /// Push a frame-local record to the subscriber, if any.
    pub(crate) fn emit(&self, progress: &ResearchProgress) {
        if let Some(callback) = &self.on_progress {
            callback(progress);
        }
    }

    /// Record `n` newly planned queries in the tree aggregate.
    pub(crate) fn tree_planned(&self, n: usize) {
        let snapshot = {
            let mut tree = self.tree.lock().unwrap();
            tree.total_queries += n;
            *tree
        };
        if let Some(callback) = &self.on_tree_progress {
            callback(&snapshot);
        }
    }

    /// Record one resolved branch in the tree aggregate.
    pub(crate) fn tree_completed(&self) {
        let snapshot = {
            let mut tree = self.tree.lock().unwrap();
            tree.completed_queries += 1;
            *tree
        };
        if let Some(callback) = &self.on_tree_progress {
            callback(&snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_merges_only_set_fields() {
        let progress = ResearchProgress {
            current_depth: 2,
            total_depth: 2,
            current_breadth: 4,
            total_breadth: 4,
            current_query: Some("initial".to_string()),
            total_queries: 4,
            completed_queries: 1,
        };
        let update = ProgressUpdate {
            completed_queries: Some(2),
            current_query: Some("next".to_string()),
            ..Default::default()
        };
        let merged = progress.apply(&update);
        assert_eq!(merged.completed_queries, 2);
        assert_eq!(merged.current_query.as_deref(), Some("next"));
        assert_eq!(merged.current_depth, 2);
        assert_eq!(merged.total_queries, 4);
    }

    #[test]
    fn test_apply_is_pure() {
        let progress = ResearchProgress::default();
        let update = ProgressUpdate {
            total_queries: Some(7),
            ..Default::default()
        };
        let merged = progress.apply(&update);
        assert_eq!(progress.total_queries, 0);
        assert_eq!(merged.total_queries, 7);
    }

    #[test]
    fn test_apply_keeps_current_query_when_unset() {
        let progress = ResearchProgress {
            current_query: Some("kept".to_string()),
            ..Default::default()
        };
        let merged = progress.apply(&ProgressUpdate::default());
        assert_eq!(merged.current_query.as_deref(), Some("kept"));
    }

    #[test]
    fn test_observer_tree_accounting() {
        let observer = ResearchObserver::new();
        observer.tree_planned(3);
        observer.tree_completed();
        observer.tree_planned(2);
        observer.tree_completed();
        let tree = observer.tree();
        assert_eq!(tree.total_queries, 5);
        assert_eq!(tree.completed_queries, 2);
    }

    #[test]
    fn test_observer_invokes_callbacks() {
        let frames: Arc<Mutex<Vec<ResearchProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let trees: Arc<Mutex<Vec<TreeProgress>>> = Arc::new(Mutex::new(Vec::new()));

        let frames_sink = frames.clone();
        let trees_sink = trees.clone();
        let observer = ResearchObserver::new()
            .with_progress_callback(Arc::new(move |p| {
                frames_sink.lock().unwrap().push(p.clone());
            }))
            .with_tree_callback(Arc::new(move |t| {
                trees_sink.lock().unwrap().push(*t);
            }));

        observer.emit(&ResearchProgress {
            total_queries: 2,
            ..Default::default()
        });
        observer.tree_planned(2);

        assert_eq!(frames.lock().unwrap().len(), 1);
        assert_eq!(frames.lock().unwrap()[0].total_queries, 2);
        assert_eq!(trees.lock().unwrap().len(), 1);
        assert_eq!(trees.lock().unwrap()[0].total_queries, 2);
    }
}
