//! Configuration for ephemeral service sessions.
//!
//! Defaults live in code; `EPHEMERAL_PG_*` environment variables override
//! them. The CLI loads a `.env` file via dotenvy before resolving.

mod harness;
pub(crate) mod helpers;

pub use harness::{HarnessConfig, LOCALHOST};
