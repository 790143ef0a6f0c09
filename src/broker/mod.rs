/// Lease Queue Broker
///
/// Pure messaging primitive with no knowledge of workflows:
/// - Per-topic FIFO queue with lease-based dequeue and ack
/// - Periodic reclamation of expired leases

pub mod queue;

pub mod reclaimer;

pub use queue::{LeaseQueue, QueueDepth, QueueMessage};
pub use reclaimer::spawn_reclaimer;
