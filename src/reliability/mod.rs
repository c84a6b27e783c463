pub mod retry;

pub use retry::{RetryConfig, RetryError, RetryManager, RetryStrategy};
