pub mod resilient_client;
pub mod retry;

pub use resilient_client::{ResilientRpcClient, SEND_RETRY};
pub use retry::{refresh, retry, retry_with, timeout, RefreshOptions, Refresher, RetryOptions};
