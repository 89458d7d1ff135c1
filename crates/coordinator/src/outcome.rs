//! Completion outcomes
//!
//! The commit routine returns an [`Outcome`]; the caller-facing
//! [`Error`] is derived from it exactly once, in
//! [`Outcome::into_result`].
//!
//! ## Failure classification during the commit phase
//!
//! | XA code of the failing participant | Resulting outcome |
//! |------------------------------------|-------------------|
//! | `XA_HEURHAZ`, `XA_HEURCOM` | unchanged (the branch may have committed) |
//! | `XA_HEURMIX` | HeuristicMixed |
//! | `XA_HEURRB`, `XA_RB*` | HeuristicRollback, or HeuristicMixed once another branch committed |
//! | anything else | SystemFailure |

use xapool_core::{Error, Result, TransactionStatus, XaError, XaErrorCode};

/// Final result of a completion attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every participant committed
    Committed,
    /// Rolled back before any participant committed
    RolledBack {
        /// Why the transaction rolled back
        reason: String,
        /// Last resource-manager code involved
        code: Option<XaErrorCode>,
    },
    /// Participants rolled back after the commit decision
    HeuristicRollback {
        /// Diagnostic message
        message: String,
        /// Code that triggered the classification
        code: XaErrorCode,
    },
    /// Some participants committed while others rolled back
    HeuristicMixed {
        /// Diagnostic message
        message: String,
        /// Code that triggered the classification
        code: XaErrorCode,
    },
    /// Participants committed although the decision was to roll back
    HeuristicCommit {
        /// Diagnostic message
        message: String,
        /// Code that triggered the classification
        code: XaErrorCode,
    },
    /// A resource manager failed unexpectedly during the commit phase
    SystemFailure {
        /// Diagnostic message
        message: String,
        /// Underlying failure
        source: Option<XaError>,
    },
}

impl Outcome {
    /// True for [`Outcome::Committed`]
    pub fn is_committed(&self) -> bool {
        matches!(self, Outcome::Committed)
    }

    /// Status the coordinator ends in
    pub fn status(&self) -> TransactionStatus {
        match self {
            Outcome::Committed => TransactionStatus::Committed,
            _ => TransactionStatus::RolledBack,
        }
    }

    /// Fold a commit-phase failure into the outcome so far
    ///
    /// `self` is `Committed` while no failure has been recorded.
    /// `committed_any` tells whether some participant already committed.
    pub fn classify(self, err: &XaError, committed_any: bool) -> Outcome {
        let message = err.to_string();
        match err.code {
            XaErrorCode::HeurHazard | XaErrorCode::HeurCommit => self,
            XaErrorCode::HeurMixed => Outcome::HeuristicMixed {
                message,
                code: err.code,
            },
            code if code == XaErrorCode::HeurRollback || code.is_rollback() => match self {
                Outcome::HeuristicMixed { .. }
                | Outcome::HeuristicRollback { .. }
                | Outcome::RolledBack { .. } => self,
                _ if committed_any => Outcome::HeuristicMixed { message, code },
                _ => Outcome::HeuristicRollback { message, code },
            },
            _ => match self {
                Outcome::SystemFailure { .. } => self,
                _ => Outcome::SystemFailure {
                    message,
                    source: Some(err.clone()),
                },
            },
        }
    }

    /// A participant that was rolled back after the commit decision reported
    /// that it had committed anyway
    pub fn escalate_to_mixed(self, code: XaErrorCode) -> Outcome {
        match self {
            Outcome::HeuristicRollback { message, .. } => Outcome::HeuristicMixed { message, code },
            other => other,
        }
    }

    /// Derive the caller-facing result
    pub fn into_result(self, participants: usize) -> Result<()> {
        match self {
            Outcome::Committed => Ok(()),
            Outcome::RolledBack { reason, code } => Err(Error::Rollback { reason, code }),
            Outcome::HeuristicRollback { message, code } => Err(Error::HeuristicRollback {
                message,
                participants,
                code: Some(code),
            }),
            Outcome::HeuristicMixed { message, code } => Err(Error::HeuristicMixed {
                message,
                participants,
                code: Some(code),
            }),
            Outcome::HeuristicCommit { message, code } => Err(Error::HeuristicCommit {
                message,
                participants,
                code: Some(code),
            }),
            Outcome::SystemFailure { message, source } => Err(Error::System { message, source }),
        }
    }
}

/// Tally of a rollback pass over the participants
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackSummary {
    /// Participants that rolled back (including heuristically)
    pub rolled_back: usize,
    /// Participants that reported `XA_HEURCOM`
    pub heuristic_commits: usize,
    /// Participants whose rollback failed otherwise
    pub failures: usize,
    /// Last code reported by any participant
    pub last_code: Option<XaErrorCode>,
}

impl RollbackSummary {
    /// Record the result of one participant's rollback
    pub fn record(&mut self, result: &std::result::Result<(), XaError>) {
        match result {
            Ok(()) => self.rolled_back += 1,
            Err(e) => {
                self.last_code = Some(e.code);
                match e.code {
                    XaErrorCode::HeurCommit => self.heuristic_commits += 1,
                    XaErrorCode::HeurMixed => {
                        self.rolled_back += 1;
                        self.heuristic_commits += 1;
                    }
                    code if code == XaErrorCode::HeurRollback || code.is_rollback() => {
                        self.rolled_back += 1
                    }
                    _ => self.failures += 1,
                }
            }
        }
    }

    /// Outcome of a rollback the coordinator decided on
    pub fn into_outcome(self, reason: String, code: Option<XaErrorCode>) -> Outcome {
        match (self.heuristic_commits, self.rolled_back) {
            (0, _) => Outcome::RolledBack {
                reason,
                code: code.or(self.last_code),
            },
            (_, 0) => Outcome::HeuristicCommit {
                message: reason,
                code: XaErrorCode::HeurCommit,
            },
            _ => Outcome::HeuristicMixed {
                message: reason,
                code: XaErrorCode::HeurMixed,
            },
        }
    }
}
