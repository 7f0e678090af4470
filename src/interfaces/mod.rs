//! Abstract interfaces for external collaborators.
//!
//! These traits define the contracts for:
//! - Flow source (upstream settlement platform)
//! - Event sink (call outcome notifications)
//!
//! Persistence contracts live in [`crate::storage`].

pub mod event_sink;
pub mod flow_source;

pub use event_sink::{ApiCallEvent, EventSink, SinkError};
pub use flow_source::{
    operation, FlowHeader, FlowMetadata, FlowReceiver, FlowSender, FlowSource, FlowSourceError, Page,
    PaymentItem,
};
