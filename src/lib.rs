// Feedwatch: keyword monitoring over a public social feed.
//
// This is the library root. Ingestion keeps a local cache filled from the
// feed; the scheduler runs one matching job per due campaign against that
// cache.

pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod ingest;
pub mod matching;
pub mod output;
pub mod scheduler;
pub mod status;
