pub mod client;
pub mod error;
pub mod gateway;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use chatsync_api;
pub use client::{ApiClient, Throttle};
pub use error::GatewayError;
pub use gateway::RequestGateway;
pub use transport::{ApiRequest, FilePart, HttpTransport, Method, RawResponse, Transport};
