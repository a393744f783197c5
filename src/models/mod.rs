pub mod identity;
pub mod job;
pub mod submission;
