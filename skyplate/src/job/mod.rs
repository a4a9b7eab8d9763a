//! Bounded state machine driving one remote solve.
//!
//! ```text
//! Authenticating → Uploading → AwaitingAssignment → AwaitingCompletion → Solved
//!                                      │                    ├──────────→ Failed
//!                                      └────────────────────┴──────────→ TimedOut
//! ```
//!
//! Each polling phase has its own interval and attempt budget. A transient
//! error during a poll consumes one attempt and polling continues. No sleep
//! follows the final attempt or a terminal transition.


use std::fmt;
use std::time::Duration;

use crate::config::{ApiKey, PollConfig, UploadOptions};
use crate::error::{Error, PollPhase, Result};
use crate::nova::{ImageUpload, JobId, JobStatus, Session, SolverApi, SubmissionId};

#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Authenticating,
    Uploading {
        session: Session,
    },
    AwaitingAssignment {
        session: Session,
        submission: SubmissionId,
        attempts: u32,
    },
    AwaitingCompletion {
        session: Session,
        submission: SubmissionId,
        job: JobId,
        attempts: u32,
    },
    Solved {
        session: Session,
        submission: SubmissionId,
        job: JobId,
    },
    Failed {
        submission: SubmissionId,
        job: JobId,
    },
    TimedOut {
        phase: PollPhase,
        submission: SubmissionId,
        attempts: u32,
    },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Solved { .. } | JobState::Failed { .. } | JobState::TimedOut { .. }
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Authenticating => f.write_str("authenticating"),
            JobState::Uploading { .. } => f.write_str("uploading"),
            JobState::AwaitingAssignment {
                submission,
                attempts,
                ..
            } => write!(f, "awaiting job for submission {submission} ({attempts} polls)"),
            JobState::AwaitingCompletion { job, attempts, .. } => {
                write!(f, "awaiting completion of job {job} ({attempts} polls)")
            }
            JobState::Solved { job, .. } => write!(f, "job {job} solved"),
            JobState::Failed { job, .. } => write!(f, "job {job} failed"),
            JobState::TimedOut { phase, attempts, .. } => {
                write!(f, "timed out waiting for {phase} after {attempts} polls")
            }
        }
    }
}

/// A successfully solved job and the session to fetch its results with.
#[derive(Debug, Clone, PartialEq)]
pub struct SolvedJob {
    pub session: Session,
    pub submission: SubmissionId,
    pub job: JobId,
}

/// Terminal result of [`JobRunner::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Solved(SolvedJob),
    Failed {
        submission: SubmissionId,
        job: JobId,
    },
    TimedOut {
        phase: PollPhase,
        submission: SubmissionId,
        attempts: u32,
    },
}

impl JobOutcome {
    /// `Failed` and `TimedOut` become distinct fatal errors.
    pub fn into_result(self) -> Result<SolvedJob> {
        match self {
            JobOutcome::Solved(solved) => Ok(solved),
            JobOutcome::Failed { job, .. } => Err(Error::JobFailure { job }),
            JobOutcome::TimedOut {
                phase,
                submission,
                attempts,
            } => Err(Error::PollingTimeout {
                phase,
                attempts,
                submission,
            }),
        }
    }
}

/// What to submit and how.
#[derive(Debug, Clone, Copy)]
pub struct JobRequest<'a> {
    pub api_key: &'a ApiKey,
    pub image: &'a ImageUpload,
    pub options: &'a UploadOptions,
}

pub struct JobRunner<'a, S: SolverApi> {
    api: &'a S,
    request: JobRequest<'a>,
    poll: PollConfig,
    state: JobState,
    sleep: Box<dyn FnMut(Duration) + 'a>,
}

impl<'a, S: SolverApi> JobRunner<'a, S> {
    pub fn new(api: &'a S, request: JobRequest<'a>, poll: PollConfig) -> Self {
        Self {
            api,
            request,
            poll,
            state: JobState::Authenticating,
            sleep: Box::new(std::thread::sleep),
        }
    }

    /// Replaces the wait between polls.
    pub fn with_sleeper(mut self, sleep: impl FnMut(Duration) + 'a) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// Advances by one transition or one poll. A terminal state is left as is
    /// and makes no remote call.
    pub fn step(&mut self) -> Result<&JobState> {
        let next = match self.state.clone() {
            JobState::Authenticating => {
                let session = self.api.authenticate(self.request.api_key)?;
                JobState::Uploading { session }
            }
            JobState::Uploading { session } => {
                let submission =
                    self.api
                        .submit(&session, self.request.image, self.request.options)?;
                tracing::info!("Submission {} accepted, waiting for job assignment", submission);
                JobState::AwaitingAssignment {
                    session,
                    submission,
                    attempts: 0,
                }
            }
            JobState::AwaitingAssignment {
                session,
                submission,
                attempts,
            } => self.poll_assignment(session, submission, attempts)?,
            JobState::AwaitingCompletion {
                session,
                submission,
                job,
                attempts,
            } => self.poll_completion(session, submission, job, attempts)?,
            terminal => terminal,
        };
        self.state = next;
        Ok(&self.state)
    }

    /// Steps until a terminal state.
    pub fn run(mut self) -> Result<JobOutcome> {
        loop {
            match &self.state {
                JobState::Solved {
                    session,
                    submission,
                    job,
                } => {
                    return Ok(JobOutcome::Solved(SolvedJob {
                        session: session.clone(),
                        submission: *submission,
                        job: *job,
                    }));
                }
                JobState::Failed { submission, job } => {
                    return Ok(JobOutcome::Failed {
                        submission: *submission,
                        job: *job,
                    });
                }
                JobState::TimedOut {
                    phase,
                    submission,
                    attempts,
                } => {
                    return Ok(JobOutcome::TimedOut {
                        phase: *phase,
                        submission: *submission,
                        attempts: *attempts,
                    });
                }
                _ => {
                    self.step()?;
                }
            }
        }
    }

    fn poll_assignment(
        &mut self,
        session: Session,
        submission: SubmissionId,
        attempts: u32,
    ) -> Result<JobState> {
        let attempts = attempts + 1;
        let budget = self.poll.assignment_attempts;

        match self.api.poll_submission(&session, submission) {
            Ok(jobs) => {
                if let Some(job) = jobs.into_iter().flatten().next() {
                    tracing::info!("Submission {} assigned job {}", submission, job);
                    return Ok(JobState::AwaitingCompletion {
                        session,
                        submission,
                        job,
                        attempts: 0,
                    });
                }
                tracing::debug!(
                    "Submission {}: no job yet (poll {}/{})",
                    submission,
                    attempts,
                    budget
                );
            }
            Err(err) if err.is_transient() => {
                tracing::warn!("Submission poll {}/{} failed: {}", attempts, budget, err);
            }
            Err(err) => return Err(err),
        }

        if attempts >= budget {
            tracing::warn!(
                "No job assigned to submission {} after {} polls",
                submission,
                attempts
            );
            return Ok(JobState::TimedOut {
                phase: PollPhase::Assignment,
                submission,
                attempts,
            });
        }
        (self.sleep)(self.poll.assignment_interval);
        Ok(JobState::AwaitingAssignment {
            session,
            submission,
            attempts,
        })
    }

    fn poll_completion(
        &mut self,
        session: Session,
        submission: SubmissionId,
        job: JobId,
        attempts: u32,
    ) -> Result<JobState> {
        let attempts = attempts + 1;
        let budget = self.poll.completion_attempts;

        match self.api.poll_job(&session, job) {
            Ok(JobStatus::Success) => {
                tracing::info!("Job {} solved", job);
                return Ok(JobState::Solved {
                    session,
                    submission,
                    job,
                });
            }
            Ok(JobStatus::Failure) => {
                tracing::error!("Job {} failed on the remote solver", job);
                return Ok(JobState::Failed { submission, job });
            }
            Ok(status) => {
                tracing::info!("Job {} status: {} (poll {}/{})", job, status, attempts, budget);
            }
            Err(err) if err.is_transient() => {
                tracing::warn!("Job poll {}/{} failed: {}", attempts, budget, err);
            }
            Err(err) => return Err(err),
        }

        if attempts >= budget {
            tracing::warn!("Job {} still pending after {} polls", job, attempts);
            return Ok(JobState::TimedOut {
                phase: PollPhase::Completion,
                submission,
                attempts,
            });
        }
        (self.sleep)(self.poll.completion_interval);
        Ok(JobState::AwaitingCompletion {
            session,
            submission,
            job,
            attempts,
        })
    }
}
