pub mod engine;
pub mod error;
pub mod metrics;

pub use engine::collector::{LatencyCollector, Summary};
pub use engine::driver::{DriverConfig, DriverState, LoadDriver, RoundObserver, RunReport, StopReason};
pub use engine::pool::{ConnectionPool, OpenReport};
pub use engine::transport::{Connector, Transport, WsConnector};
pub use error::{LoadError, ReceiveFailure, TransportError};
