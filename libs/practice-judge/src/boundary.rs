/// Isolation Boundary - Contract Between Orchestrator and Sandbox
///
/// A boundary is a disposable execution host. It receives exactly one
/// `RunCommand` and answers with exactly one `BoundaryEvent` on the channel it
/// was created with. It shares no state with the orchestrator; once the
/// orchestrator stops listening (timeout, newer run) the boundary is
/// terminated and anything it still sends is discarded by run id.
use anyhow::Result;
use practice_common::types::{RunCommand, RunReply};
use tokio::sync::mpsc;

/// The single message a boundary sends back for a run
#[derive(Debug, Clone, PartialEq)]
pub enum BoundaryEvent {
    Reply(RunReply),
    /// The host died or could not be driven before producing a reply
    Crashed { run_id: u64, reason: String },
}

impl BoundaryEvent {
    pub fn run_id(&self) -> u64 {
        match self {
            BoundaryEvent::Reply(reply) => reply.run_id,
            BoundaryEvent::Crashed { run_id, .. } => *run_id,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<BoundaryEvent>;

/// One live boundary instance. Never reused across runs.
pub trait Boundary: Send {
    /// Hand the run command over. Must not block; the reply arrives on the
    /// event channel.
    fn post(&mut self, command: RunCommand);

    /// Release the instance and everything it allocated. A terminated
    /// boundary may still deliver a late event.
    fn terminate(self: Box<Self>);
}

/// Creates fresh boundary instances wired to the orchestrator's channel
pub trait BoundaryFactory: Send + Sync {
    fn create(&self, events: EventSender) -> Result<Box<dyn Boundary>>;
}
