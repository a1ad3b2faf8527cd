//! Audit recorder for the Radius policy kernel.
//!
//! One JSON line per event and one per completed pipeline result, written
//! to any combination of sinks: file (synchronous append with an in-memory
//! fallback buffer), stdout, webhook, and OTLP-JSON. Remote sinks are
//! dispatched without awaiting completion so the recorder never sits in the
//! pipeline's latency path, and sink failures never propagate — they go to
//! stderr and the fallback buffer instead.

pub mod entry;
pub mod recorder;

pub use entry::AuditEntry;
pub use recorder::AuditRecorder;
