//! Per-job event fan-out.
//!
//! Every subscriber owns an unbounded channel, so a slow reader never causes
//! a gap. The publisher is always driven from inside the job's critical
//! section, which makes `seq` order identical to the order in which state
//! changes were applied.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::{JobId, JobStatus, SimulationJob};

/// What triggered an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventKind {
    /// First event on every subscription: the state at subscribe time.
    Snapshot,
    StatusChanged,
    /// `cancel_requested` was set; status is unchanged.
    CancelRequested,
    CandidateStarted { candidate_id: String },
    CandidateSettled { candidate_id: String },
    /// Last event; the channel closes after it.
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    /// Per-job sequence number, strictly increasing across publishes.
    pub seq: u64,
    #[serde(flatten)]
    pub kind: JobEventKind,
    pub status: JobStatus,
    pub snapshot: SimulationJob,
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        self.kind == JobEventKind::Terminal
    }
}

/// Receiving half handed to one subscriber.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<JobEvent>,
}

impl Subscription {
    /// Next event, or `None` once the terminal event has been delivered.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        self.rx.recv().await
    }
}

/// Broadcast point owned by one job.
#[derive(Debug, Default)]
pub struct StreamPublisher {
    subscribers: Vec<mpsc::UnboundedSender<JobEvent>>,
    seq: u64,
    closed: bool,
}

impl StreamPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn event(&mut self, kind: JobEventKind, job: &SimulationJob) -> JobEvent {
        self.seq += 1;
        JobEvent {
            job_id: job.job_id.clone(),
            seq: self.seq,
            kind,
            status: job.status,
            snapshot: job.clone(),
        }
    }

    /// Register a subscriber. It immediately receives a `Snapshot` of `job`;
    /// if the job is already terminal it gets a `Terminal` event instead and
    /// the channel is closed at once.
    pub fn subscribe(&mut self, job: &SimulationJob) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.closed || job.status.is_terminal() {
            let _ = tx.send(self.event(JobEventKind::Terminal, job));
        } else {
            let _ = tx.send(self.event(JobEventKind::Snapshot, job));
            self.subscribers.push(tx);
        }
        Subscription { rx }
    }

    /// Push an event to every live subscriber. Dropped receivers are pruned.
    pub fn publish(&mut self, kind: JobEventKind, job: &SimulationJob) {
        if self.closed {
            return;
        }
        let event = self.event(kind, job);
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Emit the terminal event and close every subscriber channel.
    pub fn close(&mut self, job: &SimulationJob) {
        if self.closed {
            return;
        }
        self.publish(JobEventKind::Terminal, job);
        self.subscribers.clear();
        self.closed = true;
    }
}
