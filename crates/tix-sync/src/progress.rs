use std::io::Write;
use std::time::Duration;

use crate::orchestrator::{AttemptOutcome, StrategyAttempt, SyncRun};
use crate::strategy::StrategyKind;

/// Receives sync progress. Owned by the caller and passed into each run.
pub trait SyncProgress {
    fn strategy_started(&mut self, _kind: StrategyKind, _timeout: Duration) {}
    fn tick(&mut self, _kind: StrategyKind, _elapsed: Duration) {}
    fn strategy_finished(&mut self, _attempt: &StrategyAttempt) {}
    fn completed(&mut self, _run: &SyncRun) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoopProgress;

impl SyncProgress for NoopProgress {}

/// Writes one line per strategy event, plus a "still waiting" line every
/// `report_every` while an assistant call is running.
#[derive(Debug)]
pub struct TerminalProgress<W: Write> {
    out: W,
    report_every: Duration,
    next_report: Duration,
}

impl<W: Write> TerminalProgress<W> {
    pub fn new(out: W) -> Self {
        Self::with_interval(out, Duration::from_secs(10))
    }

    pub fn with_interval(out: W, report_every: Duration) -> Self {
        Self {
            out,
            report_every,
            next_report: report_every,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> SyncProgress for TerminalProgress<W> {
    fn strategy_started(&mut self, kind: StrategyKind, timeout: Duration) {
        self.next_report = self.report_every;
        let _ = writeln!(
            self.out,
            "{kind}: asking assistant (timeout {}s)",
            timeout.as_secs()
        );
    }

    fn tick(&mut self, kind: StrategyKind, elapsed: Duration) {
        if self.report_every.is_zero() || elapsed < self.next_report {
            return;
        }
        let _ = writeln!(self.out, "{kind}: still waiting ({}s)", elapsed.as_secs());
        while self.next_report <= elapsed {
            self.next_report += self.report_every;
        }
    }

    fn strategy_finished(&mut self, attempt: &StrategyAttempt) {
        let secs = attempt.elapsed.as_secs_f64();
        let _ = match &attempt.outcome {
            AttemptOutcome::Accepted => writeln!(self.out, "{}: ok ({secs:.1}s)", attempt.kind),
            AttemptOutcome::SoftFailure { reason } => writeln!(
                self.out,
                "{}: unusable answer ({reason}); trying next strategy",
                attempt.kind
            ),
            AttemptOutcome::Failed { reason } => writeln!(
                self.out,
                "{}: failed ({reason}); trying next strategy",
                attempt.kind
            ),
        };
    }

    fn completed(&mut self, run: &SyncRun) {
        let _ = writeln!(
            self.out,
            "synced {} ticket(s) via {} -> {}",
            run.records.len(),
            run.strategy,
            run.cache_path.display()
        );
    }
}
