// Remote management boundary
//
// The sync engine talks to a device only through `RemoteClient`. Every
// call is one request/response round trip and may fail with a raw
// `Error`; the engine never looks past this trait.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Result of a remote syntax check for one rule text.
///
/// Both fields are line-prefixed text blocks of the form
/// `Error: line N: <message>` / `Warning: line N: <message>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxReport {
    #[serde(default)]
    pub errors: String,
    #[serde(default)]
    pub warnings: String,
}

/// Operations a device's management endpoint supports.
///
/// Array-shaped arguments mirror the batch form of the management protocol:
/// `names[i]` pairs with `texts[i]`.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn list_rule_names(&self) -> Result<Vec<String>, Error>;

    async fn get_rule_text(&self, names: &[String]) -> Result<Vec<String>, Error>;

    async fn set_rule_text(&self, names: &[String], texts: &[String]) -> Result<(), Error>;

    async fn add_rule(&self, names: &[String], texts: &[String]) -> Result<(), Error>;

    async fn delete_rule(&self, names: &[String]) -> Result<(), Error>;

    async fn rename_rule(&self, old_names: &[String], new_names: &[String]) -> Result<(), Error>;

    async fn check_syntax(&self, texts: &[String]) -> Result<Vec<SyntaxReport>, Error>;

    async fn get_capabilities(&self) -> Result<Vec<String>, Error>;

    async fn get_product_version(&self) -> Result<String, Error>;
}

/// Where and as whom to reach a device's management endpoint.
#[derive(Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Builds a `RemoteClient` for an endpoint.
///
/// Building is local (no network traffic); connection failures surface on
/// the first remote call.
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn RemoteClient>, Error>;
}
