//! Run entry point: one walker (the calling thread), a fixed-width worker
//! pool, and the event stream back to the host.
//!
//! Per-file work is independent; the only shared mutable state is the
//! in-flight path set, the run counters and the cancel flag. The task queue
//! is bounded so the walker applies backpressure instead of buffering an
//! entire tree.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, unbounded, Sender};
use tracing::{info, warn};

use crate::config::SearchRequest;
use crate::errors::SearchResult;
use crate::events::{EventBus, SearchEvent};
use crate::filters::{DirExcluder, NameMatcher};
use crate::replace::InFlightSet;
use crate::results::{FileResult, RunSummary};
use crate::walk::{walk_root, FileTask, WalkItem};

use super::processor::{process_file, report, CompiledSearch, Counters, WorkerContext};

const TASK_QUEUE_DEPTH: usize = 256;

/// Executes one search (or replace) run to completion.
///
/// Blocks the calling thread, which doubles as the walker; hosts that
/// render events spawn this on its own thread and consume the receiver
/// elsewhere. `Start` and `End` bracket the stream even when the run is
/// cancelled or fails validation partway.
pub fn run(
    request: &SearchRequest,
    events: Sender<SearchEvent>,
    cancel: Arc<AtomicBool>,
) -> SearchResult<RunSummary> {
    request.validate()?;
    let compiled = CompiledSearch::new(request)?;
    let names = NameMatcher::compile(&request.names)?;
    let exclude = DirExcluder::compile(&request.exclude_dirs)?;

    let events = EventBus::new(events);
    let in_flight = InFlightSet::default();
    let counters = Counters::default();
    let cancel_flag: &AtomicBool = &cancel;

    info!(
        pattern = %request.pattern,
        roots = request.roots.len(),
        replacing = request.replacing(),
        "run started"
    );
    events.start();

    let (task_tx, task_rx) = bounded::<FileTask>(TASK_QUEUE_DEPTH);
    let workers = request.effective_threads();

    let ctx = WorkerContext {
        request,
        compiled: &compiled,
        cancel: cancel_flag,
        in_flight: &in_flight,
        events: &events,
        counters: &counters,
    };
    let ctx = &ctx;

    thread::scope(|scope| {
        for _ in 0..workers {
            let rx = task_rx.clone();
            scope.spawn(move || {
                for task in rx.iter() {
                    process_file(ctx, task);
                }
            });
        }
        drop(task_rx);

        for root in &request.roots {
            if cancel_flag.load(Ordering::Relaxed) {
                break;
            }
            walk_root(
                root,
                request,
                &names,
                &exclude,
                &in_flight,
                cancel_flag,
                &mut |item| match item {
                    WalkItem::Task(task) => {
                        // blocks when the pool is saturated (backpressure)
                        let _ = task_tx.send(task);
                    }
                    WalkItem::Inventory(task) => {
                        let result = FileResult::from_task(&task);
                        report(request, &events, &counters, result, Some(1));
                    }
                    WalkItem::Filtered => {
                        counters.progressed.fetch_add(1, Ordering::Relaxed);
                        events.progress(false);
                    }
                    WalkItem::Error(path, err) => {
                        warn!("cannot enumerate '{}': {err}", path.display());
                        let mut result = FileResult::new(path);
                        result.read_error = true;
                        report(request, &events, &counters, result, None);
                    }
                },
            );
        }
        drop(task_tx); // close the queue; workers drain and exit
    });

    events.end();
    let cancelled = cancel_flag.load(Ordering::Relaxed);
    let summary = RunSummary {
        files_searched: counters.progressed.load(Ordering::Relaxed),
        files_matched: counters.matched.load(Ordering::Relaxed),
        total_matches: counters.total_matches.load(Ordering::Relaxed),
        replace_failures: counters.replace_failures.load(Ordering::Relaxed),
        cancelled,
    };
    info!(
        searched = summary.files_searched,
        matched = summary.files_matched,
        matches = summary.total_matches,
        cancelled = summary.cancelled,
        "run finished"
    );
    Ok(summary)
}

/// Runs to completion and collects the `Found` results, for hosts and tests
/// that have no use for streaming.
pub fn run_collect(request: &SearchRequest) -> SearchResult<(RunSummary, Vec<FileResult>)> {
    let (tx, rx) = unbounded();
    let summary = run(request, tx, Arc::new(AtomicBool::new(false)))?;
    let results = rx
        .into_iter()
        .filter_map(|event| match event {
            SearchEvent::Found(result) => Some(result),
            _ => None,
        })
        .collect();
    Ok((summary, results))
}
