//! Approval subsystem: converts a CHALLENGE verdict into allow, deny, or
//! alert by asking a human through an external channel.
//!
//! Only the `sync_wait` mode is implemented: the caller blocks until the
//! human answers, the challenge times out, or the connector fails. Lease
//! installation on temporary approvals happens in the runtime, which owns
//! the state store.

pub mod http;
pub mod resolver;
pub mod telegram;

pub use http::HttpConnector;
pub use resolver::{ApprovalOutcome, ApprovalRequest, ApprovalResolver, Resolution};
pub use telegram::TelegramConnector;
