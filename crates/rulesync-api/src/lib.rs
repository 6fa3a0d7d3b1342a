// rulesync-api: remote management boundary for rule-hosting appliances.

pub mod client;
pub mod error;
pub mod http;
pub mod transport;

pub use client::{Connector, Endpoint, RemoteClient, SyntaxReport};
pub use error::Error;
pub use http::{HttpClient, HttpConnector};
pub use transport::{TlsMode, TransportConfig};
