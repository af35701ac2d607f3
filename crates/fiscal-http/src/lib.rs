//! HTTP layer for the fiscal document API client
//!
//! Provides:
//! - The HTTP execution collaborator and its `reqwest` implementation
//! - A queue processor that replays operations over HTTP
//! - A resilient client with retry, circuit breaking and offline queueing
//! - A reachability monitor that probes a health endpoint

pub mod client;
pub mod probe;
pub mod processor;
pub mod transport;

pub use client::{ApiRequest, RequestOutcome, ResilientClient, ResilientClientBuilder};
pub use probe::HttpProbeMonitor;
pub use processor::HttpProcessor;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
