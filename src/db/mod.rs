pub mod retry_queue;
pub mod submissions;
