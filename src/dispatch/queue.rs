//! Priority tiers and the three FIFO queues behind the dispatcher.
//!
//! Pop order is strict: HIGH before NORMAL before LOW, FIFO within a tier.
//! There is no aging, so LOW work waits as long as higher tiers keep arriving.

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use super::DispatchError;
use crate::remote::{ApiRequest, RawResponse};

/// Dispatch priority (lower number = served first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    High = 0,
    Normal = 1,
    Low = 2,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "HIGH"),
            Priority::Normal => write!(f, "NORMAL"),
            Priority::Low => write!(f, "LOW"),
        }
    }
}

/// A submitted call waiting for its turn. Dropped once `reply` is used.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub id: Uuid,
    pub request: ApiRequest,
    pub priority: Priority,
    pub submitted_at: Instant,
    pub reply: oneshot::Sender<Result<RawResponse, DispatchError>>,
}

/// HIGH / NORMAL / LOW queues. Unbounded.
#[derive(Debug, Default)]
pub(crate) struct PriorityQueues {
    high: VecDeque<PendingRequest>,
    normal: VecDeque<PendingRequest>,
    low: VecDeque<PendingRequest>,
}

impl PriorityQueues {
    pub fn push(&mut self, pending: PendingRequest) {
        match pending.priority {
            Priority::High => self.high.push_back(pending),
            Priority::Normal => self.normal.push_back(pending),
            Priority::Low => self.low.push_back(pending),
        }
    }

    pub fn pop(&mut self) -> Option<PendingRequest> {
        self.high
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front())
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }
}
