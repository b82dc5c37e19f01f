pub mod queue_entry;
pub mod submission;

pub use queue_entry::{EnqueueOptions, EntryState, Priority, QueueEntry, QueueListing, QueueStatus};
pub use submission::{Submission, SubmissionStatus};
