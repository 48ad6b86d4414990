//! Verdict classification and result reports

pub mod report;
pub mod verdict;

pub use verdict::{crossed_limit, finalize_verdicts, Verdict};
