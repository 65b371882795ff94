//! NAT and private-path connectivity probe harness
//!
//! This crate checks what a network boundary (Private NAT, firewall, VPC
//! peering) does to traffic by sending probes from a **caller** service to
//! one or more **target** servers and, optionally, having each target call
//! the caller back on a separate path:
//!
//! - **Forward path**: the target reports the source address it observed
//! - **Reverse path**: the caller records the source address of the callback
//! - **Correlation**: a UUID carried by both exchanges joins them into one
//!   round trip with a bounded wait
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── caller ─────────────────────────────┐
//! │                                                                  │
//! │  RoundTripCoordinator ──► ProbeClient ──────── POST /ping ───────┼──┐
//! │         │                                                        │  │
//! │         │ await_record(id, deadline)                             │  ▼
//! │         ▼                                                        │ ┌────────┐
//! │  CorrelationRegistry ◄── CallbackHandler ◄─ POST /callback ──────┼─┤ target │
//! │                                                                  │ └────────┘
//! │  BulkRunner ──► ProbeClient (sequential, no callbacks)           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The registry is the only shared mutable state. It is built once by the
//! caller's composition root ([`server::CallerState::new`]) and handed to
//! both the coordinator and the callback handler.
//!
//! # Usage
//!
//! ## Caller
//!
//! ```bash
//! VM_A_URL=http://10.1.0.10:8080 CALLBACK_BASE_URL=https://caller.example \
//!     nat-probe-caller
//! curl -XPOST localhost:8080/test-roundtrip -d '{"target":"a"}'
//! ```
//!
//! ## Target
//!
//! ```bash
//! VM_ID=vm-a nat-probe-target --port 8080
//! ```

pub mod bulk;
pub mod callback;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod probe;
pub mod registry;
pub mod responder;
pub mod server;
pub mod targets;
pub mod token;
pub mod transport;
pub mod types;

// Re-export key types for convenience
pub use bulk::{BulkProbeResult, BulkRunner, BulkSummary};
pub use callback::CallbackHandler;
pub use config::{CallerConfig, TargetConfig};
pub use coordinator::{
    CallbackPhase, CoordinatorConfig, Phases, PingResult, ProbePhase, RoundTripCoordinator,
    RoundTripResult,
};
pub use error::{HarnessError, TransportError};
pub use probe::{ProbeClient, ProbeOutcome};
pub use registry::{AwaitOutcome, CallbackRecord, CorrelationRegistry};
pub use responder::ProbeResponder;
pub use targets::{Target, TargetSet};
pub use token::{MetadataTokenProvider, NoTokenProvider, TokenProvider};
pub use transport::{HttpTransport, ProbeTransport, TransportResponse};
pub use types::{CallbackAck, CallbackPayload, CorrelationId, ProbeRequest, ProbeResponse};
