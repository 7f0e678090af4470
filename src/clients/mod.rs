//! Flow source clients.

pub mod http_source;
pub mod instrumented;
pub mod mock;

pub use http_source::{HttpFlowSource, HttpFlowSourceConfig};
pub use instrumented::InstrumentedFlowSource;
pub use mock::MockFlowSource;
