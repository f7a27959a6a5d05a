pub mod outbox;
pub mod publisher;
pub mod types;

pub use outbox::{enqueue_tx, publish_after_commit};
pub use publisher::run_publisher_task;
