pub mod tracker;

pub use tracker::IssueTracker;
