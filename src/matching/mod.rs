// Matching: decides which cached items belong to a campaign.
//
// The filter step is a trait so the plain keyword matcher and a relevance
// scorer are interchangeable. `job` runs one campaign's scan over the cache.

pub mod job;
pub mod keyword;
pub mod scored;
pub mod traits;

pub use job::{run_matching_job, JobReport, JobSettings};
pub use keyword::KeywordFilter;
pub use scored::ScoredFilter;
pub use traits::{FilterDecision, MatchFilter, RelevanceScorer};
