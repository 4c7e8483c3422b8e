//! The parallel fan-out dispatcher: one worker per host, submitted all at
//! once, polled for completion over a FIFO queue.
//!
//! Results come back in observed-completion order, not host-list order. A
//! slow host causes already-queued entries to be re-polled; that is the
//! intended behavior, not a bug. There are no timeouts: a hung external
//! process blocks its entry forever.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use derive_getters::Getters;
use tokio::task::JoinHandle;

use crate::log::*;
use crate::report::{JobOutcome, JobResult};

/// How long the poll loop sleeps after finding the head of the queue still
/// in flight.
pub const POLL_DELAY: Duration = Duration::from_secs(5);

/// One host's finished job, paired with what it produced.
#[derive(Getters, Debug, Clone, PartialEq, Eq)]
pub struct CompletedJob {
    host: String,
    outcome: JobOutcome,
}

impl CompletedJob {
    pub fn new<S: Into<String>>(host: S, outcome: JobOutcome) -> Self {
        Self {
            host: host.into(),
            outcome,
        }
    }
}

/// Run the same job concurrently across every host and collect all of the
/// outcomes.
///
/// Every host's worker is spawned immediately; there is no batching or
/// backpressure, so the caller is on the hook for keeping host lists
/// reasonable. A worker returning `Err` is captured as a `Failed` record for
/// that host and never cancels its siblings. Once the queue drains, every
/// report is printed in completion order.
#[tracing::instrument(skip(hosts, job))]
pub async fn run_parallel<F, Fut>(hosts: &[String], job: F) -> Result<Vec<CompletedJob>>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<JobOutcome>> + Send + 'static,
{
    let mut pending: VecDeque<(String, JoinHandle<Result<JobOutcome>>)> =
        VecDeque::with_capacity(hosts.len());
    for host in hosts {
        pending.push_back((host.clone(), tokio::task::spawn(job(host.clone()))));
    }

    let mut completed: Vec<CompletedJob> = Vec::with_capacity(hosts.len());
    while let Some((host, handle)) = pending.pop_front() {
        if !handle.is_finished() {
            info!(
                "job assigned to node {:<8} is not finished yet! Wait for finishing.....",
                host
            );
            pending.push_back((host, handle));
            tokio::time::sleep(POLL_DELAY).await;
            continue;
        }

        let outcome = match handle.await.context("joining a job worker")? {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("job on node {} failed: {:#}", host, err);
                JobOutcome::Record(JobResult::failed(format!("{:#}", err)))
            }
        };
        completed.push(CompletedJob::new(host, outcome));
    }

    print_reports(&completed);
    Ok(completed)
}

/// Emit one report per completed job, in the order they completed.
pub fn print_reports(completed: &[CompletedJob]) {
    for entry in completed {
        match entry.outcome() {
            JobOutcome::Report(report) => println!("{}", report),
            JobOutcome::Record(result) => println!(
                "{}: {} / {}\n{}",
                entry.host(),
                result.status(),
                result.return_code(),
                result.output()
            ),
            JobOutcome::Done => {}
        }
    }
}
