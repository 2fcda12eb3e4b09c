// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Worker-pool scheduler for one event invocation.
//!
//! # Concurrency Model
//!
//! Hooks are queued in priority order on a bounded channel and consumed by a
//! fixed set of worker tasks, so at most `workers` hooks execute at once.
//! The caller passes the event's `RwLock<()>`, shared by every invocation of
//! that event: parallel-safe hooks hold the shared side while running, other
//! hooks hold the exclusive side, so a non-parallel-safe hook never overlaps
//! any other hook of the same event, even one from a concurrent batch.
//!
//! When a batch deadline elapses the invocation's cancellation token fires:
//! workers stop dequeuing, in-flight hooks see the token, and every hook
//! without a result is reported as a timeout without being awaited further.

use crate::events::HookContext;
use crate::execution::HookExecutionResult;
use crate::registry::RegisteredHook;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Executes one hook end to end and always produces a result.
#[async_trait]
pub trait HookRunner: Send + Sync + 'static {
    async fn run_hook(
        &self,
        hook: &RegisteredHook,
        context: Arc<HookContext>,
        cancel: CancellationToken,
    ) -> HookExecutionResult;
}

/// Sort hooks into dispatch order: priority class descending, estimated time
/// ascending, success rate descending, then registration order.
pub fn prioritize(hooks: &mut [RegisteredHook]) {
    hooks.sort_by(|a, b| {
        b.metadata
            .priority
            .cmp(&a.metadata.priority)
            .then_with(|| {
                a.metadata
                    .estimated_time_ms
                    .total_cmp(&b.metadata.estimated_time_ms)
            })
            .then_with(|| b.metadata.success_rate.total_cmp(&a.metadata.success_rate))
            .then_with(|| a.sequence.cmp(&b.sequence))
    });
}

type ResultSlots = Arc<Mutex<Vec<Option<HookExecutionResult>>>>;

pub struct Scheduler {
    workers: usize,
}

impl Scheduler {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `hooks` (already in dispatch order) under the event's `exclusion`
    /// lock and return one result per hook, in the same order.
    pub async fn run<R: HookRunner>(
        &self,
        runner: Arc<R>,
        hooks: Vec<RegisteredHook>,
        context: Arc<HookContext>,
        exclusion: Arc<RwLock<()>>,
        deadline: Option<Duration>,
    ) -> Vec<HookExecutionResult> {
        if hooks.is_empty() {
            return Vec::new();
        }

        let started = Instant::now();
        let total = hooks.len();
        let ids: Vec<String> = hooks.iter().map(|hook| hook.id.clone()).collect();
        let cancel = CancellationToken::new();

        let (tx, rx) = mpsc::channel(total);
        for item in hooks.into_iter().enumerate() {
            // Capacity equals the batch size, so this never waits.
            if tx.send(item).await.is_err() {
                break;
            }
        }
        drop(tx);

        let queue = Arc::new(AsyncMutex::new(rx));
        let slots: ResultSlots = Arc::new(Mutex::new(vec![None; total]));

        let workers: Vec<_> = (0..self.workers.min(total))
            .map(|_| {
                let runner = Arc::clone(&runner);
                let queue = Arc::clone(&queue);
                let exclusion = Arc::clone(&exclusion);
                let slots = Arc::clone(&slots);
                let context = Arc::clone(&context);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let next = queue.lock().await.recv().await;
                        let Some((index, hook)) = next else {
                            break;
                        };
                        let result =
                            run_guarded(&*runner, &hook, &exclusion, Arc::clone(&context), &cancel)
                                .await;
                        if let Some(result) = result {
                            if let Some(slot) = slots.lock().get_mut(index) {
                                *slot = Some(result);
                            }
                        }
                    }
                })
            })
            .collect();

        let all_workers = futures::future::join_all(workers);
        let deadline_hit = match deadline {
            Some(limit) => match tokio::time::timeout(limit, all_workers).await {
                Ok(joined) => {
                    log_worker_failures(joined);
                    false
                }
                Err(_) => true,
            },
            None => {
                log_worker_failures(all_workers.await);
                false
            }
        };

        if deadline_hit {
            cancel.cancel();
            tracing::warn!(
                deadline = ?deadline,
                "Batch deadline exceeded, abandoning pending hooks"
            );
        }

        let snapshot = slots.lock().clone();
        let elapsed = started.elapsed();
        snapshot
            .into_iter()
            .zip(ids)
            .map(|(slot, id)| match slot {
                Some(result) => result,
                None if deadline_hit => {
                    HookExecutionResult::timed_out(id, "Batch deadline exceeded", elapsed)
                }
                None => HookExecutionResult::failed(id, "Hook was not executed", elapsed),
            })
            .collect()
    }
}

/// Run one hook under the event's exclusion lock. `None` when the
/// invocation was cancelled before the hook could start.
async fn run_guarded<R: HookRunner + ?Sized>(
    runner: &R,
    hook: &RegisteredHook,
    exclusion: &RwLock<()>,
    context: Arc<HookContext>,
    cancel: &CancellationToken,
) -> Option<HookExecutionResult> {
    let execution = AssertUnwindSafe(runner.run_hook(hook, context, cancel.clone())).catch_unwind();

    let outcome = if hook.metadata.parallel_safe {
        let _shared = tokio::select! {
            guard = exclusion.read() => guard,
            _ = cancel.cancelled() => return None,
        };
        execution.await
    } else {
        let _exclusive = tokio::select! {
            guard = exclusion.write() => guard,
            _ = cancel.cancelled() => return None,
        };
        execution.await
    };

    Some(outcome.unwrap_or_else(|_| {
        tracing::error!(hook_id = %hook.id, "Hook panicked");
        HookExecutionResult::failed(hook.id.clone(), "Hook panicked", Duration::ZERO)
    }))
}

fn log_worker_failures(joined: Vec<Result<(), tokio::task::JoinError>>) {
    for result in joined {
        if let Err(e) = result {
            tracing::error!(error = %e, "Scheduler worker failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::HookEvent;
    use crate::handlers::NoOpHandler;
    use crate::metadata::{HookMetadata, HookPriority};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct SleepRunner {
        active: AtomicUsize,
        max_active: AtomicUsize,
        windows: Mutex<Vec<(String, Instant, Instant)>>,
    }

    #[async_trait]
    impl HookRunner for SleepRunner {
        async fn run_hook(
            &self,
            hook: &RegisteredHook,
            _context: Arc<HookContext>,
            cancel: CancellationToken,
        ) -> HookExecutionResult {
            if hook.id == "panics" {
                panic!("boom");
            }
            let start = Instant::now();
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);

            let sleep = Duration::from_millis(hook.metadata.estimated_time_ms as u64);
            let finished = tokio::select! {
                _ = tokio::time::sleep(sleep) => true,
                _ = cancel.cancelled() => false,
            };

            self.active.fetch_sub(1, Ordering::SeqCst);
            self.windows
                .lock()
                .push((hook.id.clone(), start, Instant::now()));
            if finished {
                HookExecutionResult::succeeded(hook.id.clone(), None, start.elapsed())
            } else {
                HookExecutionResult::timed_out(hook.id.clone(), "cancelled", start.elapsed())
            }
        }
    }

    fn lock() -> Arc<RwLock<()>> {
        Arc::new(RwLock::new(()))
    }

    fn hook(id: &str, sequence: u64, sleep_ms: f64, parallel_safe: bool) -> RegisteredHook {
        RegisteredHook {
            id: id.to_string(),
            handler: Arc::new(NoOpHandler::new(id)),
            metadata: HookMetadata::new(HookEvent::PreToolUse)
                .with_estimated_time_ms(sleep_ms)
                .with_parallel_safe(parallel_safe),
            sequence,
        }
    }

    #[test]
    fn test_prioritize_order() {
        let mut hooks = vec![
            hook("low", 0, 10.0, true),
            hook("normal_slow", 1, 200.0, true),
            hook("normal_fast", 2, 5.0, true),
            hook("critical", 3, 500.0, true),
            hook("normal_fast_tie", 4, 5.0, true),
        ];
        hooks[0].metadata.priority = HookPriority::Low;
        hooks[3].metadata.priority = HookPriority::Critical;
        hooks[4].metadata.success_rate = 0.5;

        prioritize(&mut hooks);
        let ids: Vec<_> = hooks.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["critical", "normal_fast", "normal_fast_tie", "normal_slow", "low"]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_ceiling() {
        let runner = Arc::new(SleepRunner::default());
        let hooks: Vec<_> = (0..10)
            .map(|i| hook(&format!("h{i}"), i, 20.0, true))
            .collect();

        let results = Scheduler::new(3)
            .run(runner.clone(), hooks, Arc::new(HookContext::new()), lock(), None)
            .await;

        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| r.success));
        assert!(runner.max_active.load(Ordering::SeqCst) <= 3);
        assert!(runner.max_active.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unsafe_hooks_never_overlap() {
        let runner = Arc::new(SleepRunner::default());
        let hooks = vec![
            hook("read_a", 0, 15.0, true),
            hook("write_a", 1, 15.0, false),
            hook("read_b", 2, 15.0, true),
            hook("write_b", 3, 15.0, false),
            hook("read_c", 4, 15.0, true),
        ];

        Scheduler::new(4)
            .run(runner.clone(), hooks, Arc::new(HookContext::new()), lock(), None)
            .await;

        let windows = runner.windows.lock().clone();
        for (id, start, end) in windows.iter().filter(|(id, _, _)| id.starts_with("write")) {
            for (other, o_start, o_end) in windows.iter().filter(|(other, _, _)| other != id) {
                let overlaps = start < o_end && o_start < end;
                assert!(!overlaps, "{id} overlapped {other}");
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_exclusion_spans_concurrent_batches() {
        let runner = Arc::new(SleepRunner::default());
        let exclusion = lock();
        let batch = |id: &str| {
            let runner = Arc::clone(&runner);
            let exclusion = Arc::clone(&exclusion);
            let hooks = vec![hook(id, 0, 40.0, false)];
            tokio::spawn(async move {
                Scheduler::new(2)
                    .run(runner, hooks, Arc::new(HookContext::new()), exclusion, None)
                    .await
            })
        };

        let first = batch("write_first");
        let second = batch("write_second");
        assert!(first.await.unwrap()[0].success);
        assert!(second.await.unwrap()[0].success);
        assert_eq!(runner.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_results_in_dispatch_order() {
        let runner = Arc::new(SleepRunner::default());
        let hooks = vec![
            hook("slow", 0, 40.0, true),
            hook("fast", 1, 1.0, true),
        ];

        let results = Scheduler::new(2)
            .run(runner, hooks, Arc::new(HookContext::new()), lock(), None)
            .await;
        let ids: Vec<_> = results.iter().map(|r| r.hook_id.as_str()).collect();
        assert_eq!(ids, vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn test_deadline_marks_pending_as_timeout() {
        let runner = Arc::new(SleepRunner::default());
        let hooks = vec![
            hook("quick", 0, 1.0, true),
            hook("stuck", 1, 5_000.0, true),
            hook("queued", 2, 1.0, true),
        ];

        let started = Instant::now();
        let results = Scheduler::new(1)
            .run(
                runner,
                hooks,
                Arc::new(HookContext::new()),
                lock(),
                Some(Duration::from_millis(100)),
            )
            .await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(results[0].success);
        assert_eq!(results[1].outcome, crate::ExecutionOutcome::Timeout);
        assert_eq!(results[2].outcome, crate::ExecutionOutcome::Timeout);
    }

    #[tokio::test]
    async fn test_panicking_hook_is_isolated() {
        let runner = Arc::new(SleepRunner::default());
        let hooks = vec![hook("panics", 0, 1.0, true), hook("fine", 1, 1.0, true)];

        let results = Scheduler::new(1)
            .run(runner, hooks, Arc::new(HookContext::new()), lock(), None)
            .await;
        assert!(!results[0].success);
        assert_eq!(results[0].error.as_deref(), Some("Hook panicked"));
        assert!(results[1].success);
    }
}
