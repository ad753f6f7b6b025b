use crate::channel::{message_channel, CompletionSignal, MessageSender, MessageSource, PendingCounter, Poll};
use crate::config::AppConfig;
use crate::engine::{EngineStats, Session};
use crate::errors::LinebarsError;
use crate::interrupt::CancelFlag;
use crate::logging::append_run_log;
use crate::patterns::PatternTable;
use crate::registry::Registry;
use crate::terminal::Terminal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    pub concurrency: usize,
    /// `None` for an unbounded status channel.
    pub channel_capacity: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            channel_capacity: None,
        }
    }
}

/// One unit of work, displayed on the line keyed by `identity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolJob<J> {
    pub identity: String,
    pub input: J,
}

impl<J> PoolJob<J> {
    pub fn new(identity: impl Into<String>, input: J) -> Self {
        Self {
            identity: identity.into(),
            input,
        }
    }
}

#[derive(Debug)]
pub struct PoolSummary<R> {
    /// Results in job order.
    pub results: Vec<R>,
    pub stats: EngineStats,
}

struct DoneGuard<'a>(&'a PendingCounter);

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.0.done();
    }
}

/// Run `work` over `jobs` on `cfg.pool.concurrency` threads, one display line per job,
/// and drain their status messages to `terminal` until every job has returned.
///
/// Once `cancel` is set the display is closed, queued jobs are discarded and the
/// channel is dropped so further sends fail; the call then returns `Interrupted`
/// after the running jobs return.
pub fn run_pool<J, R, F>(
    cfg: &AppConfig,
    terminal: &dyn Terminal,
    jobs: Vec<PoolJob<J>>,
    cancel: &CancelFlag,
    work: F,
) -> Result<PoolSummary<R>, LinebarsError>
where
    J: Send,
    R: Send,
    F: Fn(&str, J, &MessageSender) -> R + Sync,
{
    if cfg.pool.concurrency == 0 {
        return Err(LinebarsError::Configuration(
            "pool.concurrency must be greater than zero".to_string(),
        ));
    }
    let identities = jobs.iter().map(|job| job.identity.clone()).collect::<Vec<_>>();
    let registry = Registry::with_style(
        &identities,
        Arc::new(PatternTable::compile(&cfg.patterns)?),
        Arc::new(cfg.bar.clone()),
    )?;
    let job_count = jobs.len();
    let (tx, source) = message_channel(cfg.pool.channel_capacity)?;
    let queue = Mutex::new(jobs.into_iter().enumerate().collect::<VecDeque<_>>());
    let results = Mutex::new((0..job_count).map(|_| None).collect::<Vec<Option<R>>>());
    let pending = PendingCounter::new(job_count);
    let threads = cfg.pool.concurrency.min(job_count);
    append_run_log(
        "info",
        "pool.start",
        json!({ "jobs": job_count, "threads": threads }),
    );

    let session =
        Session::open(registry, terminal, cfg.engine.clone())?.with_cancel(cancel.clone());
    let poll_timeout = cfg.engine.poll_timeout();
    let work = &work;

    let closed = std::thread::scope(|scope| {
        for _ in 0..threads {
            let tx = tx.clone();
            let queue = &queue;
            let results = &results;
            let pending = &pending;
            scope.spawn(move || loop {
                if cancel.is_cancelled() {
                    break;
                }
                let next = match queue.lock() {
                    Ok(mut queue) => queue.pop_front(),
                    Err(_) => None,
                };
                let Some((index, job)) = next else {
                    break;
                };
                let _done = DoneGuard(pending);
                let result = work(&job.identity, job.input, &tx);
                if let Ok(mut slots) = results.lock() {
                    slots[index] = Some(result);
                }
            });
        }
        drop(tx);
        let mut session = session;
        let mut source = source;

        loop {
            if cancel.is_cancelled() {
                if let Ok(mut queue) = queue.lock() {
                    queue.clear();
                }
                drop(source);
                append_run_log(
                    "warn",
                    "pool.cancelled",
                    json!({ "pending": pending.pending() }),
                );
                session.close()?;
                return Err(LinebarsError::Interrupted);
            }
            session.drain(&mut source, &pending);
            if cancel.is_cancelled() {
                continue;
            }
            if pending.is_finished() {
                break;
            }
            // Every line reported complete while jobs are still running.
            match source.poll(poll_timeout) {
                Poll::Message(line) => {
                    session.write(&line);
                }
                Poll::Empty => {}
                Poll::Disconnected => break,
            }
        }

        while let Poll::Message(line) = source.poll(Duration::ZERO) {
            session.write(&line);
        }
        session.complete_all();
        session.close()
    });
    let stats = closed?;

    let results = results
        .into_inner()
        .map_err(|_| LinebarsError::Worker("result slots poisoned".to_string()))?
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| LinebarsError::Worker(format!("job {index} produced no result")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    append_run_log(
        "info",
        "pool.complete",
        json!({ "jobs": job_count, "repaints": stats.repaints }),
    );
    Ok(PoolSummary { results, stats })
}

#[cfg(test)]
mod tests {
    use super::{run_pool, PoolConfig, PoolJob};
    use crate::config::AppConfig;
    use crate::engine::EngineConfig;
    use crate::errors::LinebarsError;
    use crate::interrupt::CancelFlag;
    use crate::terminal::{FakeTerminal, TerminalOp};
    use crate::tracker::BarStyle;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn cfg(concurrency: usize) -> AppConfig {
        AppConfig {
            bar: BarStyle {
                width: 4,
                fill_complete: '#',
                fill_remaining: '.',
                ..BarStyle::default()
            },
            engine: EngineConfig {
                poll_timeout_ms: 5,
                grace_period_ms: 5,
                log_messages: false,
                ..EngineConfig::default()
            },
            pool: PoolConfig {
                concurrency,
                channel_capacity: Some(8),
            },
            ..AppConfig::default()
        }
    }

    #[test]
    fn results_come_back_in_job_order() {
        let terminal = FakeTerminal::new(false);
        let jobs = (1..=5u64)
            .map(|n| PoolJob::new(format!("job-{n}"), n))
            .collect::<Vec<_>>();
        let cancel = CancelFlag::new();
        let summary = run_pool(&cfg(2), &terminal, jobs, &cancel, |identity, n, tx| {
            tx.send_to(identity, &format!("processing total of {n} items"))
                .expect("send");
            for i in 0..n {
                tx.send_to(identity, &format!("processed {i}")).expect("send");
            }
            n * 10
        })
        .expect("pool");
        assert_eq!(summary.results, vec![10, 20, 30, 40, 50]);

        let lines = terminal.written_lines();
        for n in 1..=5 {
            let last = lines
                .iter()
                .rev()
                .find(|line| line.contains(&format!("identity=job-{n} ")))
                .expect("final line");
            assert!(last.contains(&format!("100% {n}/{n}")), "{last}");
        }
    }

    #[test]
    fn multi_batch_workers_reset_their_line() {
        let terminal = FakeTerminal::new(true);
        let jobs = vec![PoolJob::new("w1", vec![2u64, 3])];
        let cancel = CancelFlag::new();
        let summary = run_pool(&cfg(1), &terminal, jobs, &cancel, |identity, batches, tx| {
            tx.send_to(identity, "worker is Ada").expect("send");
            for total in &batches {
                tx.send_to(identity, &format!("processing total of {total} items"))
                    .expect("send");
                for i in 0..*total {
                    tx.send_to(identity, &format!("processed {i}")).expect("send");
                }
                tx.send_to(identity, "reset").expect("send");
            }
            batches.iter().sum::<u64>()
        })
        .expect("pool");
        assert_eq!(summary.results, vec![5]);
        assert_eq!(summary.stats.resets, 2);
        assert!(terminal
            .repaints()
            .iter()
            .any(|(_, line)| line.contains("3/3 Ada")));
    }

    #[test]
    fn empty_job_list_is_a_configuration_error() {
        let terminal = FakeTerminal::new(false);
        let cancel = CancelFlag::new();
        let err = run_pool(&cfg(2), &terminal, Vec::<PoolJob<u8>>::new(), &cancel, |_, _, _| ())
            .expect_err("empty");
        assert!(format!("{err}").contains("at least one identity"));
    }

    #[test]
    fn cancel_closes_the_display_and_skips_queued_jobs() {
        let terminal = FakeTerminal::new(true);
        let cancel = CancelFlag::new();
        let started = AtomicUsize::new(0);
        let jobs = ["a", "b", "c"]
            .into_iter()
            .map(|id| PoolJob::new(id, ()))
            .collect::<Vec<_>>();
        let err = run_pool(&cfg(1), &terminal, jobs, &cancel, |identity, (), tx| {
            started.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send_to(identity, "processing total of 100 items");
            cancel.cancel();
            // Keeps reporting until the display hangs up.
            while tx.send_to(identity, "processed 1").is_ok() {
                std::thread::sleep(Duration::from_millis(1));
            }
        })
        .expect_err("interrupted");

        assert!(matches!(err, LinebarsError::Interrupted));
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(terminal.ops().first(), Some(&TerminalOp::HideCursor));
        assert_eq!(terminal.ops().last(), Some(&TerminalOp::ShowCursor));
    }
}
