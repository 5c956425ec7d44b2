// Ingestion: keeps the local cache filled from the feed.
//
// `state` is the pure cursor/back-off state machine, `ingestor` wraps it with
// the feed client and the database and runs it as a long-lived task.

pub mod ingestor;
pub mod state;

pub use ingestor::Ingestor;
pub use state::{BackoffPolicy, CursorMachine, FetchOutcome, IngestState, Transition};
