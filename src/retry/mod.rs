pub mod backoff;
pub mod client;
pub mod error_kind;

pub use backoff::RetryOptions;
pub use client::{OutboundRequest, RequestClass, RetryClient, IDEMPOTENCY_KEY_HEADER};
pub use error_kind::{is_transient_error, ErrorCode, ErrorPayload, FetchError, RetryError};
