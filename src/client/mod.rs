//! Client-side helpers for following a generation job to completion.

pub mod http;
pub mod poller;

pub use http::HttpStatusSource;
pub use poller::{PollConfig, PollError, PollHandle, PollerState, StatusPoller, StatusSource};
