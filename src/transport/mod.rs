//! Concrete collaborators for the stream coordinator.
//!
//! - [`HttpPageSource`]: historical pages from the sensor API, cursor paginated
//! - [`PushSource`]: live readings pushed to us over HTTP, fanned into a subscription
//!
//! Callers only see this gateway; the sibling modules stay private.

mod http;
mod push;

pub use http::HttpPageSource;
pub use push::PushSource;
