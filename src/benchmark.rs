// PlanBenchmark - scoped before/after plan comparison
//
// Entering the scope explains every candidate's sample statement; the
// caller then performs the structural change under test (creating the
// candidate index is the caller's job, not the benchmark's); exiting the
// scope explains everything again under identical conditions. Captures are
// strictly sequential: plan cost is only meaningful relative to the
// database state at the time of each call.

use futures::Future;

use crate::advisor::candidate::IndexCandidate;
use crate::store::{PlanExecutor, PlanRow};
use crate::AdvisorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BenchmarkState {
    Idle,
    BeforeCaptured,
    AfterCaptured,
}

/// One candidate's captured plans from both sides of the scope.
#[derive(Debug)]
pub struct PlanComparison<'b, 's> {
    pub candidate: &'b IndexCandidate<'s>,
    pub before: &'b [PlanRow],
    pub after: &'b [PlanRow],
}

/// Two-phase plan measurement over a set of candidates.
pub struct PlanBenchmark<'c, 's> {
    candidates: &'c [IndexCandidate<'s>],
    state: BenchmarkState,
    before: Vec<Option<Vec<PlanRow>>>,
    after: Vec<Option<Vec<PlanRow>>>,
}

impl<'c, 's> PlanBenchmark<'c, 's> {
    pub fn new(candidates: &'c [IndexCandidate<'s>]) -> Self {
        Self {
            candidates,
            state: BenchmarkState::Idle,
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    /// Capture the "before" sample set. Valid once, from `Idle`.
    pub async fn capture_before(
        &mut self,
        planner: &impl PlanExecutor,
    ) -> Result<(), AdvisorError> {
        if self.state != BenchmarkState::Idle {
            return Err(AdvisorError::InvalidState(
                "before-capture is only valid on an idle benchmark".to_string(),
            ));
        }
        self.before = self.capture(planner).await?;
        self.state = BenchmarkState::BeforeCaptured;
        Ok(())
    }

    /// Capture the "after" sample set. Valid once, after the before pass.
    pub async fn capture_after(
        &mut self,
        planner: &impl PlanExecutor,
    ) -> Result<(), AdvisorError> {
        if self.state != BenchmarkState::BeforeCaptured {
            return Err(AdvisorError::InvalidState(
                "after-capture requires a completed before-capture".to_string(),
            ));
        }
        self.after = self.capture(planner).await?;
        self.state = BenchmarkState::AfterCaptured;
        Ok(())
    }

    /// Run the full scope around a caller-supplied mutation.
    ///
    /// The after-capture runs even when the mutation fails; a mutation
    /// error takes precedence over a capture error in the result.
    pub async fn run<P, F, Fut, R, E>(&mut self, planner: &P, mutation: F) -> Result<R, E>
    where
        P: PlanExecutor,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<AdvisorError>,
    {
        self.capture_before(planner).await.map_err(E::from)?;
        let outcome = mutation().await;
        let captured = self.capture_after(planner).await;
        match outcome {
            Ok(value) => {
                captured.map_err(E::from)?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }

    /// One pass: explain every candidate's sample. A sample the planner
    /// returns no rows for is skipped for this pass and logged; a
    /// statement-level rejection is treated the same way.
    async fn capture(
        &self,
        planner: &impl PlanExecutor,
    ) -> Result<Vec<Option<Vec<PlanRow>>>, AdvisorError> {
        let mut samples = Vec::with_capacity(self.candidates.len());
        for candidate in self.candidates {
            let sql = candidate.source().sample();
            match planner.explain(&sql).await {
                Ok(rows) if rows.is_empty() => {
                    println!("Cannot explain query: {}", sql);
                    samples.push(None);
                }
                Ok(rows) => samples.push(Some(rows)),
                Err(AdvisorError::Database(msg)) => {
                    println!("Cannot explain query: {} ({})", sql, msg);
                    samples.push(None);
                }
                Err(other) => return Err(other),
            }
        }
        Ok(samples)
    }

    /// Candidates whose plans show no measurable change across the scope.
    ///
    /// A candidate is unchanged only when every row-source entry is
    /// unchanged; one improving entry marks the whole candidate changed.
    /// Candidates skipped in either pass are not reported.
    pub fn unchanged_results(&self) -> Result<Vec<PlanComparison<'_, 's>>, AdvisorError> {
        self.classified(false)
    }

    /// Candidates whose plans changed for the better somewhere, i.e. the
    /// plausibly useful ones.
    pub fn changed_results(&self) -> Result<Vec<PlanComparison<'_, 's>>, AdvisorError> {
        self.classified(true)
    }

    fn classified(&self, changed: bool) -> Result<Vec<PlanComparison<'_, 's>>, AdvisorError> {
        if self.state != BenchmarkState::AfterCaptured {
            return Err(AdvisorError::InvalidState(
                "comparison requires a completed after-capture".to_string(),
            ));
        }
        let mut results = Vec::new();
        for (i, candidate) in self.candidates.iter().enumerate() {
            let (before, after) = match (&self.before[i], &self.after[i]) {
                (Some(before), Some(after)) => (before, after),
                _ => continue,
            };
            if candidate_changed(before, after) == changed {
                results.push(PlanComparison {
                    candidate,
                    before,
                    after,
                });
            }
        }
        Ok(results)
    }
}

fn candidate_changed(before: &[PlanRow], after: &[PlanRow]) -> bool {
    if before.len() != after.len() {
        // the plan gained or lost row sources; structurally changed
        return true;
    }
    before
        .iter()
        .zip(after.iter())
        .any(|(b, a)| row_changed(b, a))
}

/// Per-row-source change rule. Selectivity runs 0..=100 with 100 best, so
/// a drop in `rows_filtered` is a regression and reads as "did not help".
fn row_changed(before: &PlanRow, after: &PlanRow) -> bool {
    if before.rows_examined == after.rows_examined
        && before.rows_filtered == after.rows_filtered
    {
        return false;
    }
    if before.rows_filtered > after.rows_filtered {
        return false;
    }
    true
}
