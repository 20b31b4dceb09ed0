mod account;
mod assemble;
mod extract;
mod handle;
mod orchestrator;
mod post;
mod selectors;
mod sink;
mod stats;

pub use account::{
    within_cutoff, AccountOutcome, AccountScraper, ScrapeRunState, TerminalReason,
    MAX_EMPTY_PASSES,
};
pub use assemble::PostAssembler;
pub use extract::{parse_count, parse_timestamp, FieldExtractor};
pub use handle::{canonical_post_url, normalize_handle, sanitize_handle};
pub use orchestrator::{
    Orchestrator, RunReport, EXIT_INTERRUPTED, EXIT_PARTIAL_FAILURE, EXIT_SUCCESS,
    EXIT_TOTAL_FAILURE,
};
pub use post::PostRecord;
pub use selectors::{Field, SelectorTable};
pub use sink::{
    FileResultSink, ResultSink, SinkError, SinkKey, SinkResult, StoredLocation, COMBINED_STEM,
};
pub use stats::{AccountCount, AccountFailure, RunStats, StatsCollector, StatsRecorder};
