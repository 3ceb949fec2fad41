//! Recursive research orchestration.
//!
//! The fan-out/fan-in controller: expands a topic into planned queries, runs
//! each through retrieval and distillation under a concurrency limiter, and
//! recurses on the follow-up directions with halved breadth and decremented
//! depth. Results merge upward with insertion-ordered, exact-equality
//! set-union semantics.
//!
//! The recursion is an explicit task tree rather than self-invocation: frames
//! live in an arena indexed by `FrameId` with parent `(frame, unit)` links,
//! and a single driver loop routes planning and unit completions back into
//! the arena. Native stack depth stays constant regardless of research depth.
//!
//! Failure isolation: a failed unit contributes an empty result to its
//! frame's union and still advances progress; siblings and the rest of the
//! tree are unaffected. The only fatal errors are configuration errors,
//! raised by [`run_research`] before the tree starts.

use crate::config::{ConcurrencyScope, DelverConfig, ResearchConfig};
use crate::distill::distill_documents;
use crate::error::DelverError;
use crate::generation::{ObjectGenerator, OpenAiCompatibleGenerator};
use crate::planner::{PlannedQuery, plan_queries};
use crate::progress::{ProgressUpdate, ResearchObserver, ResearchProgress};
use crate::search::{ContentFormat, SearchOptions, SearchProvider, create_search_provider};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Seed state for a research run.
#[derive(Debug, Clone, Default)]
pub struct ResearchRequest {
    /// The research topic or combined prompt.
    pub query: String,
    /// Sibling queries planned at the root frame.
    pub breadth: usize,
    /// Remaining recursive levels below the root frame. The root frame
    /// searches regardless; `depth` governs how many times branches may
    /// recurse after it.
    pub depth: usize,
    /// Learnings carried over from earlier research (continuation).
    pub learnings: Vec<String>,
    /// URLs carried over from earlier research.
    pub visited_urls: Vec<String>,
}

impl ResearchRequest {
    pub fn new(query: impl Into<String>, breadth: usize, depth: usize) -> Self {
        Self {
            query: query.into(),
            breadth,
            depth,
            learnings: Vec::new(),
            visited_urls: Vec::new(),
        }
    }
}

/// The accumulated output of a research run: learnings and visited URLs,
/// deduplicated by exact value equality, insertion order kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResearchResult {
    pub learnings: Vec<String>,
    pub visited_urls: Vec<String>,
}

/// Breadth of a child frame: half the parent's, rounded up. Never reaches 0
/// while the parent breadth is at least 1.
fn next_breadth(breadth: usize) -> usize {
    breadth.div_ceil(2)
}

type FrameId = usize;

type EventFuture = Pin<Box<dyn Future<Output = Event> + Send>>;

/// One recursion frame in the arena.
struct Frame {
    breadth: usize,
    depth: usize,
    /// Parent frame and the unit index within it whose branch this frame is.
    parent: Option<(FrameId, usize)>,
    /// Accumulated learnings at frame creation; read-only seed for units.
    seed_learnings: Arc<Vec<String>>,
    /// Accumulated URLs at frame creation.
    seed_urls: Arc<Vec<String>>,
    /// Queries planned for this frame, set on the planning event.
    planned: Vec<PlannedQuery>,
    /// Frame-local progress record.
    progress: ResearchProgress,
    /// Per-branch results, in planned order; `None` until the branch resolves.
    branch_results: Vec<Option<ResearchResult>>,
    /// Branches not yet resolved.
    remaining: usize,
    /// Limiter for units started by this frame. Per-frame scope gives each
    /// frame its own; global scope shares one across the tree.
    limiter: Arc<Semaphore>,
}

impl Frame {
    /// Set-union of every resolved branch, insertion order kept.
    fn union(&self) -> ResearchResult {
        let mut learnings = Vec::new();
        let mut urls = Vec::new();
        let mut seen_learnings = HashSet::new();
        let mut seen_urls = HashSet::new();
        for branch in self.branch_results.iter().flatten() {
            for learning in &branch.learnings {
                if seen_learnings.insert(learning.clone()) {
                    learnings.push(learning.clone());
                }
            }
            for url in &branch.visited_urls {
                if seen_urls.insert(url.clone()) {
                    urls.push(url.clone());
                }
            }
        }
        ResearchResult {
            learnings,
            visited_urls: urls,
        }
    }
}

/// How one unit's branch continues after retrieval and distillation.
enum UnitOutcome {
    /// Leaf branch: depth is exhausted, the accumulated state is the result.
    Terminal(ResearchResult),
    /// Recursive branch: spawn a child frame seeded with the accumulated
    /// state, researching the follow-up prompt.
    Expand {
        follow_up: String,
        learnings: Vec<String>,
        urls: Vec<String>,
    },
    /// The unit failed; the branch contributes nothing.
    Failed,
}

enum Event {
    Planned {
        frame: FrameId,
        queries: Vec<PlannedQuery>,
    },
    UnitSettled {
        frame: FrameId,
        unit: usize,
        outcome: UnitOutcome,
    },
}

/// The recursive research engine.
///
/// Holds the retrieval backend, the structured-generation backend, and the
/// research configuration, all fixed for the lifetime of the engine.
pub struct ResearchEngine {
    search: Arc<dyn SearchProvider>,
    generator: Arc<dyn ObjectGenerator>,
    config: ResearchConfig,
}

impl ResearchEngine {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        generator: Arc<dyn ObjectGenerator>,
        config: ResearchConfig,
    ) -> Self {
        Self {
            search,
            generator,
            config,
        }
    }

    /// Run the research tree to completion and return the merged result.
    ///
    /// Never fails: branch-level errors are isolated and contribute empty
    /// results. Progress is pushed through `observer` as frames plan and
    /// branches resolve.
    pub async fn run(&self, request: ResearchRequest, observer: ResearchObserver) -> ResearchResult {
        if request.breadth == 0 {
            debug!("Research requested with breadth 0; nothing to plan");
            return ResearchResult::default();
        }

        info!(
            query = %request.query,
            breadth = request.breadth,
            depth = request.depth,
            provider = self.search.name(),
            scope = %self.config.concurrency_scope,
            "Starting research"
        );

        let global_limiter = match self.config.concurrency_scope {
            ConcurrencyScope::Global => Some(Arc::new(Semaphore::new(self.config.concurrency))),
            ConcurrencyScope::PerFrame => None,
        };

        let mut frames: Vec<Frame> = Vec::new();
        let mut tasks: FuturesUnordered<EventFuture> = FuturesUnordered::new();
        let mut final_result: Option<ResearchResult> = None;

        let root = self.new_frame(
            &mut frames,
            request.breadth,
            request.depth,
            None,
            request.learnings,
            request.visited_urls,
            &global_limiter,
        );
        tasks.push(self.plan_future(root, request.query, &frames[root]));

        while let Some(event) = tasks.next().await {
            match event {
                Event::Planned { frame, queries } => {
                    if let Some(result) =
                        self.on_planned(&mut frames, frame, queries, &observer, &mut tasks)
                    {
                        final_result = Some(result);
                    }
                }
                Event::UnitSettled {
                    frame,
                    unit,
                    outcome,
                } => {
                    if let Some(result) =
                        self.on_unit_settled(&mut frames, frame, unit, outcome, &observer, &mut tasks)
                    {
                        final_result = Some(result);
                    }
                }
            }
        }

        let result = final_result.unwrap_or_default();
        info!(
            learnings = result.learnings.len(),
            urls = result.visited_urls.len(),
            "Research complete"
        );
        result
    }

    fn new_frame(
        &self,
        frames: &mut Vec<Frame>,
        breadth: usize,
        depth: usize,
        parent: Option<(FrameId, usize)>,
        seed_learnings: Vec<String>,
        seed_urls: Vec<String>,
        global_limiter: &Option<Arc<Semaphore>>,
    ) -> FrameId {
        let limiter = match global_limiter {
            Some(shared) => shared.clone(),
            None => Arc::new(Semaphore::new(self.config.concurrency)),
        };
        frames.push(Frame {
            breadth,
            depth,
            parent,
            seed_learnings: Arc::new(seed_learnings),
            seed_urls: Arc::new(seed_urls),
            planned: Vec::new(),
            progress: ResearchProgress {
                current_depth: depth,
                total_depth: depth,
                current_breadth: breadth,
                total_breadth: breadth,
                current_query: None,
                total_queries: 0,
                completed_queries: 0,
            },
            branch_results: Vec::new(),
            remaining: 0,
            limiter,
        });
        frames.len() - 1
    }

    fn plan_future(&self, frame_id: FrameId, topic: String, frame: &Frame) -> EventFuture {
        let generator = self.generator.clone();
        let seed_learnings = frame.seed_learnings.clone();
        let breadth = frame.breadth;
        Box::pin(async move {
            let queries = plan_queries(generator.as_ref(), &topic, &seed_learnings, breadth).await;
            Event::Planned {
                frame: frame_id,
                queries,
            }
        })
    }

    fn unit_future(&self, frame_id: FrameId, unit: usize, planned: PlannedQuery, frame: &Frame) -> EventFuture {
        let search = self.search.clone();
        let generator = self.generator.clone();
        let seed_learnings = frame.seed_learnings.clone();
        let seed_urls = frame.seed_urls.clone();
        let limiter = frame.limiter.clone();
        let breadth = frame.breadth;
        let depth = frame.depth;
        let config = self.config.clone();
        Box::pin(async move {
            let permit = match limiter.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    // Limiter closed; treat as a failed unit.
                    return Event::UnitSettled {
                        frame: frame_id,
                        unit,
                        outcome: UnitOutcome::Failed,
                    };
                }
            };
            let outcome = run_unit(
                search.as_ref(),
                generator.as_ref(),
                &planned,
                breadth,
                depth,
                &seed_learnings,
                &seed_urls,
                &config,
            )
            .await;
            drop(permit);
            Event::UnitSettled {
                frame: frame_id,
                unit,
                outcome,
            }
        })
    }

    /// Handle a frame's planning result. Returns the final result when the
    /// event completed the root frame.
    fn on_planned(
        &self,
        frames: &mut Vec<Frame>,
        frame_id: FrameId,
        queries: Vec<PlannedQuery>,
        observer: &ResearchObserver,
        tasks: &mut FuturesUnordered<EventFuture>,
    ) -> Option<ResearchResult> {
        observer.tree_planned(queries.len());
        {
            let frame = &mut frames[frame_id];
            frame.progress = frame.progress.apply(&ProgressUpdate {
                total_queries: Some(queries.len()),
                current_query: queries.first().map(|q| q.query.clone()),
                ..Default::default()
            });
            observer.emit(&frame.progress);
        }

        if queries.is_empty() {
            // No expansion at this branch: the frame completes empty.
            return Self::cascade_completion(frames, frame_id, observer);
        }

        {
            let frame = &mut frames[frame_id];
            frame.remaining = queries.len();
            frame.branch_results = vec![None; queries.len()];
            frame.planned = queries;
        }
        for (unit, planned) in frames[frame_id].planned.clone().into_iter().enumerate() {
            tasks.push(self.unit_future(frame_id, unit, planned, &frames[frame_id]));
        }
        None
    }

    /// Handle a settled unit. Returns the final result when the event
    /// completed the root frame.
    fn on_unit_settled(
        &self,
        frames: &mut Vec<Frame>,
        frame_id: FrameId,
        unit: usize,
        outcome: UnitOutcome,
        observer: &ResearchObserver,
        tasks: &mut FuturesUnordered<EventFuture>,
    ) -> Option<ResearchResult> {
        match outcome {
            UnitOutcome::Failed => {
                if Self::record_branch(&mut frames[frame_id], unit, ResearchResult::default(), observer)
                {
                    return Self::cascade_completion(frames, frame_id, observer);
                }
            }
            UnitOutcome::Terminal(result) => {
                if Self::record_branch(&mut frames[frame_id], unit, result, observer) {
                    return Self::cascade_completion(frames, frame_id, observer);
                }
            }
            UnitOutcome::Expand {
                follow_up,
                learnings,
                urls,
            } => {
                let child_breadth = next_breadth(frames[frame_id].breadth);
                let child_depth = frames[frame_id].depth - 1;
                let global_limiter = match self.config.concurrency_scope {
                    ConcurrencyScope::Global => Some(frames[frame_id].limiter.clone()),
                    ConcurrencyScope::PerFrame => None,
                };
                let child = self.new_frame(
                    frames,
                    child_breadth,
                    child_depth,
                    Some((frame_id, unit)),
                    learnings,
                    urls,
                    &global_limiter,
                );
                tasks.push(self.plan_future(child, follow_up, &frames[child]));
            }
        }
        None
    }

    /// Record a resolved branch on its frame and advance the frame's
    /// progress. Returns true when every branch of the frame has resolved.
    fn record_branch(
        frame: &mut Frame,
        unit: usize,
        result: ResearchResult,
        observer: &ResearchObserver,
    ) -> bool {
        frame.branch_results[unit] = Some(result);
        frame.remaining -= 1;
        frame.progress = frame.progress.apply(&ProgressUpdate {
            completed_queries: Some(frame.progress.completed_queries + 1),
            current_query: Some(frame.planned[unit].query.clone()),
            ..Default::default()
        });
        observer.emit(&frame.progress);
        observer.tree_completed();
        frame.remaining == 0
    }

    /// Walk completed frames upward: each completed frame's union resolves
    /// its parent's branch, which may complete the parent in turn. Returns
    /// the final result when the walk reaches a completed root.
    fn cascade_completion(
        frames: &mut [Frame],
        start: FrameId,
        observer: &ResearchObserver,
    ) -> Option<ResearchResult> {
        let mut frame_id = start;
        loop {
            let result = frames[frame_id].union();
            match frames[frame_id].parent {
                None => return Some(result),
                Some((parent, unit)) => {
                    if Self::record_branch(&mut frames[parent], unit, result, observer) {
                        frame_id = parent;
                    } else {
                        return None;
                    }
                }
            }
        }
    }
}

/// Execute one unit: retrieval, then distillation, then the
/// continue-or-terminate decision. Any retrieval error resolves the unit as
/// `Failed`; distillation failures are already recovered inside the
/// distiller and leave the branch with its accumulated state.
#[allow(clippy::too_many_arguments)]
async fn run_unit(
    search: &dyn SearchProvider,
    generator: &dyn ObjectGenerator,
    planned: &PlannedQuery,
    breadth: usize,
    depth: usize,
    seed_learnings: &[String],
    seed_urls: &[String],
    config: &ResearchConfig,
) -> UnitOutcome {
    let options = SearchOptions {
        timeout: Some(Duration::from_millis(config.search_timeout_ms)),
        limit: config.search_result_limit,
        format: ContentFormat::Markdown,
    };

    let response = match search.search(&planned.query, &options).await {
        Ok(response) => response,
        Err(e) => {
            warn!(query = %planned.query, error = %e, "Search failed; branch contributes nothing");
            return UnitOutcome::Failed;
        }
    };

    let new_urls: Vec<String> = response.data.iter().map(|doc| doc.url.clone()).collect();
    debug!(
        query = %planned.query,
        documents = response.data.len(),
        "Search complete"
    );

    let batch = distill_documents(
        generator,
        &planned.query,
        &response.data,
        config.max_learnings,
        next_breadth(breadth),
        config.content_budget_chars,
    )
    .await;

    let mut learnings = seed_learnings.to_vec();
    learnings.extend(batch.learnings);
    let mut urls = seed_urls.to_vec();
    urls.extend(new_urls);

    if depth > 1 {
        let directions: String = batch
            .follow_up_questions
            .iter()
            .map(|q| format!("\n{q}"))
            .collect();
        let follow_up = format!(
            "Previous research goal: {}\nFollow-up research directions: {}",
            planned.research_goal, directions
        );
        UnitOutcome::Expand {
            follow_up,
            learnings,
            urls,
        }
    } else {
        UnitOutcome::Terminal(ResearchResult {
            learnings,
            visited_urls: urls,
        })
    }
}

/// Top-level entry: resolve the configured backends (fatal on configuration
/// errors), then run the research tree.
pub async fn run_research(
    request: ResearchRequest,
    config: &DelverConfig,
    observer: ResearchObserver,
) -> Result<ResearchResult, DelverError> {
    let search = create_search_provider(&config.search)?;
    let generator: Arc<dyn ObjectGenerator> =
        Arc::new(OpenAiCompatibleGenerator::new(&config.generation)?);
    let engine = ResearchEngine::new(search, generator, config.research.clone());
    Ok(engine.run(request, observer).await)
}
