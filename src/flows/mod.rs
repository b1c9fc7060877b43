//! Batch flows driving jobs through their lifecycle.
//!
//! Both flows run strictly sequentially on the calling task: one request
//! in flight at a time, every backoff awaited before the next call.

pub mod create;
pub mod poll;

pub use create::{CreationFlow, CreationReport};
pub use poll::{PollReport, PollStop, PollingFlow};

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::BatchError;

/// Wall-clock instant `wait` from now, for `next_retry_at`.
pub(crate) fn retry_at(wait: Duration) -> DateTime<Utc> {
    Utc::now() + TimeDelta::from_std(wait).unwrap_or_else(|_| TimeDelta::zero())
}

/// A condition that ends the whole batch, not just one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStop {
    CreditsExhausted {
        index: u32,
        variant: u32,
        reason: String,
    },
    Unauthorized {
        reason: String,
    },
}

impl From<BatchStop> for BatchError {
    fn from(stop: BatchStop) -> Self {
        match stop {
            BatchStop::CreditsExhausted {
                index,
                variant,
                reason,
            } => BatchError::CreditsExhausted {
                index,
                variant,
                reason,
            },
            BatchStop::Unauthorized { reason } => BatchError::Unauthorized { reason },
        }
    }
}
