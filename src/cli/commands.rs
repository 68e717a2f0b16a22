use clap::Subcommand;

use super::config::ConfigArgs;
use super::decide::{DecideArgs, FeedbackArgs, RecommendArgs};
use super::inspect::{CandidatesArgs, FingerprintArgs};
use super::learning::{CleanupArgs, SessionsArgs};
use super::parse::ParseArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Rank selector candidates for an element
    Candidates(CandidatesArgs),

    /// Print the stable fingerprint of an element
    Fingerprint(FingerprintArgs),

    /// Decide which selector to use for an element against learned data
    Decide(DecideArgs),

    /// List generated and learned selector recommendations
    Recommend(RecommendArgs),

    /// Record a selector outcome outside a live run
    Feedback(FeedbackArgs),

    /// Parse a natural-language step into an action
    Parse(ParseArgs),

    /// Show learning statistics
    Stats,

    /// Delete learning data older than the retention window
    Cleanup(CleanupArgs),

    /// List recent sessions
    Sessions(SessionsArgs),

    /// Inspect Mender configuration
    Config(ConfigArgs),
}
