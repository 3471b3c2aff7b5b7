use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::extract::extract;
use crate::fetcher::{FetchOutcome, PageSource};
use crate::model::{NormalizedRecord, RawInterestItem};

pub const DEFAULT_PAGE_SIZE: u64 = 100;
pub const MAX_PAGE_SIZE: u64 = 100;

/// What to do when a page fails for a reason other than throttling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Stop fetching and keep what was gathered.
    Abort,
    /// Step over the failed page and carry on.
    Skip,
}

#[derive(Debug, Clone)]
pub struct CollectConfig {
    pub page_size: u64,
    /// Cap on page requests, retries and skipped failures included.
    pub max_batches: Option<u64>,
    pub max_records: Option<u64>,
    pub delay: Duration,
    pub backoff: Duration,
    pub exponential_backoff: bool,
    /// Consecutive rate-limit retries allowed on one offset.
    pub max_retries: u32,
    /// Consecutive failed pages tolerated under `ErrorPolicy::Skip`.
    pub max_errors: u32,
    pub on_error: ErrorPolicy,
    pub probe: bool,
    pub require_total: bool,
    pub show_progress: bool,
}

impl Default for CollectConfig {
    fn default() -> Self {
        CollectConfig {
            page_size: DEFAULT_PAGE_SIZE,
            max_batches: None,
            max_records: None,
            delay: Duration::from_secs(3),
            backoff: Duration::from_secs(30),
            exponential_backoff: false,
            max_retries: 5,
            max_errors: 3,
            on_error: ErrorPolicy::Abort,
            probe: true,
            require_total: false,
            show_progress: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Complete,
    Partial(String),
    Aborted(String),
}

/// Records keyed by `interest_id`, first-seen order, newest `collected_at` wins.
#[derive(Debug, Default)]
pub struct Accumulator {
    index: HashMap<i64, usize>,
    records: Vec<NormalizedRecord>,
}

impl Accumulator {
    pub fn push(&mut self, record: NormalizedRecord) {
        match self.index.get(&record.interest_id()) {
            Some(&i) => {
                if record.collected_at >= self.records[i].collected_at {
                    self.records[i] = record;
                }
            }
            None => {
                self.index.insert(record.interest_id(), self.records.len());
                self.records.push(record);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }
}

#[derive(Debug)]
pub struct CollectionRun {
    pub page_size: u64,
    pub offset: u64,
    pub total: Option<u64>,
    /// Raw items received, before dedup.
    pub fetched: u64,
    /// Requests issued, whatever their outcome.
    pub requests: u64,
    /// Pages that returned items.
    pub batches: u64,
    pub skipped_pages: u64,
    pub errors: Vec<String>,
    pub records: Accumulator,
    pub status: RunStatus,
}

impl CollectionRun {
    fn new(page_size: u64) -> Self {
        CollectionRun {
            page_size,
            offset: 0,
            total: None,
            fetched: 0,
            requests: 0,
            batches: 0,
            skipped_pages: 0,
            errors: Vec::new(),
            records: Accumulator::default(),
            status: RunStatus::Complete,
        }
    }

    /// "success", "partial" or "empty", for the terminal summary.
    pub fn outcome(&self) -> &'static str {
        if self.records.is_empty() {
            "empty"
        } else if matches!(self.status, RunStatus::Complete) {
            "success"
        } else {
            "partial"
        }
    }
}

enum State {
    Probing,
    Fetching,
    Extracting(Vec<RawInterestItem>),
    Backoff,
    Done,
    Aborted(String),
}

/// Walk the whole offset space one page at a time.
///
/// Always returns the run, including everything accumulated before an abort.
pub async fn run<S: PageSource>(source: &S, config: &CollectConfig) -> CollectionRun {
    let page_size = config.page_size.clamp(1, MAX_PAGE_SIZE);
    let mut run = CollectionRun::new(page_size);
    let mut pb = progress_bar(config.show_progress, None);
    let mut rate_limited = 0u32;
    let mut failures = 0u32;

    let mut state = if config.probe {
        State::Probing
    } else {
        State::Fetching
    };

    loop {
        state = match state {
            State::Probing => match source.probe().await {
                Ok(n) => {
                    info!("Total records available: {}", n);
                    run.total = Some(n);
                    pb = progress_bar(config.show_progress, Some(n));
                    State::Fetching
                }
                Err(e) if config.require_total => {
                    State::Aborted(format!("could not determine total records: {}", e))
                }
                Err(e) => {
                    warn!("Probe failed ({}), continuing with unknown total", e);
                    State::Fetching
                }
            },

            State::Fetching => {
                if let Some(reason) = stop_reason(&run, config) {
                    info!("{}", reason);
                    State::Done
                } else {
                    let take = next_take(&run, config, page_size);
                    let last = match run.total {
                        Some(t) => (run.offset + take).min(t),
                        None => run.offset + take,
                    };
                    info!("Getting records {} to {}", run.offset + 1, last);

                    run.requests += 1;
                    match source.fetch(run.offset, take).await {
                        FetchOutcome::Page(items) if items.is_empty() => {
                            info!("No more records available");
                            State::Done
                        }
                        FetchOutcome::Page(items) => {
                            rate_limited = 0;
                            failures = 0;
                            State::Extracting(items)
                        }
                        FetchOutcome::RateLimited => State::Backoff,
                        FetchOutcome::Failed(e) => {
                            warn!("Page at offset {} failed: {}", run.offset, e);
                            run.errors.push(format!("offset {}: {}", run.offset, e));
                            failures += 1;
                            match config.on_error {
                                ErrorPolicy::Abort => State::Aborted(e.to_string()),
                                ErrorPolicy::Skip if failures > config.max_errors => State::Aborted(
                                    format!("{} consecutive page failures, last: {}", failures, e),
                                ),
                                ErrorPolicy::Skip => {
                                    rate_limited = 0;
                                    run.offset += take;
                                    if let Some(t) = run.total {
                                        run.offset = run.offset.min(t);
                                    }
                                    run.skipped_pages += 1;
                                    pause(config.delay).await;
                                    State::Fetching
                                }
                            }
                        }
                    }
                }
            }

            State::Extracting(items) => {
                let n = items.len() as u64;
                for item in items {
                    let facts = extract(&item.summary);
                    run.records.push(NormalizedRecord::new(item, facts, Utc::now()));
                }
                run.offset += n;
                if let Some(t) = run.total {
                    run.offset = run.offset.min(t);
                }
                run.fetched += n;
                run.batches += 1;
                pb.set_position(run.fetched);
                info!(
                    "Collected {} records (Total: {}, unique: {})",
                    n,
                    run.fetched,
                    run.records.len()
                );

                match run.total {
                    Some(t) if run.fetched > t => {
                        warn!("Received {} records but only {} were advertised", run.fetched, t);
                        State::Done
                    }
                    _ => {
                        pause(config.delay).await;
                        State::Fetching
                    }
                }
            }

            State::Backoff => {
                rate_limited += 1;
                if rate_limited > config.max_retries {
                    State::Aborted(format!(
                        "rate limited {} times in a row at offset {}",
                        rate_limited, run.offset
                    ))
                } else {
                    let wait = backoff_delay(config, rate_limited);
                    warn!(
                        "Rate limited! Waiting {:.1}s (attempt {}/{})",
                        wait.as_secs_f64(),
                        rate_limited,
                        config.max_retries
                    );
                    pause(wait).await;
                    State::Fetching
                }
            }

            State::Done => {
                if run.skipped_pages > 0 {
                    run.status =
                        RunStatus::Partial(format!("{} pages skipped after errors", run.skipped_pages));
                }
                break;
            }

            State::Aborted(reason) => {
                warn!("Collection stopped early: {}", reason);
                run.status = if run.records.is_empty() {
                    RunStatus::Aborted(reason)
                } else {
                    RunStatus::Partial(reason)
                };
                break;
            }
        };
    }

    pb.finish_and_clear();
    run
}

fn stop_reason(run: &CollectionRun, config: &CollectConfig) -> Option<String> {
    if let Some(k) = config.max_batches {
        if run.requests >= k {
            return Some(format!("Batch cap of {} reached", k));
        }
    }
    if let Some(cap) = config.max_records {
        if run.fetched >= cap {
            return Some(format!("Record cap of {} reached", cap));
        }
    }
    match run.total {
        Some(t) if run.offset >= t => Some(format!("Reached advertised total of {}", t)),
        _ => None,
    }
}

fn next_take(run: &CollectionRun, config: &CollectConfig, page_size: u64) -> u64 {
    match config.max_records {
        Some(cap) => page_size.min(cap.saturating_sub(run.fetched)),
        None => page_size,
    }
}

fn backoff_delay(config: &CollectConfig, attempt: u32) -> Duration {
    if config.exponential_backoff {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        config.backoff.saturating_mul(factor)
    } else {
        config.backoff
    }
}

async fn pause(d: Duration) {
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}

fn progress_bar(visible: bool, total: Option<u64>) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    match total {
        Some(n) => {
            let pb = ProgressBar::new(n);
            let style = ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> ");
            pb.set_style(style);
            pb
        }
        None => ProgressBar::new_spinner(),
    }
}
