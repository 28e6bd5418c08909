//! Upstream HTTP access: the browser-like transport, its error taxonomy and
//! the retry policy wrapped around it.

mod error;
mod retry;
mod transport;

pub use error::{FetchError, FetchErrorKind, FetchResult};
pub use retry::{RetryOutcome, RetryPolicy, Retryable};
pub use transport::{FetchedPage, HttpTransport, SESSION_COOKIE_NAME};

pub(crate) use transport::ensure_success;
