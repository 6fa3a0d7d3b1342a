// HTTP adapter
//
// JSON-over-HTTPS implementation of the remote boundary with basic auth
// and the `{ meta: { rc, msg, code }, data: [...] }` envelope.

pub mod client;
pub mod models;
pub mod rules;
pub mod system;

use std::sync::Arc;

use async_trait::async_trait;

use crate::client::{Connector, Endpoint, RemoteClient, SyntaxReport};
use crate::error::Error;
use crate::transport::TransportConfig;

pub use client::HttpClient;

#[async_trait]
impl RemoteClient for HttpClient {
    async fn list_rule_names(&self) -> Result<Vec<String>, Error> {
        HttpClient::list_rule_names(self).await
    }

    async fn get_rule_text(&self, names: &[String]) -> Result<Vec<String>, Error> {
        HttpClient::get_rule_text(self, names).await
    }

    async fn set_rule_text(&self, names: &[String], texts: &[String]) -> Result<(), Error> {
        HttpClient::set_rule_text(self, names, texts).await
    }

    async fn add_rule(&self, names: &[String], texts: &[String]) -> Result<(), Error> {
        HttpClient::add_rule(self, names, texts).await
    }

    async fn delete_rule(&self, names: &[String]) -> Result<(), Error> {
        HttpClient::delete_rule(self, names).await
    }

    async fn rename_rule(&self, old_names: &[String], new_names: &[String]) -> Result<(), Error> {
        HttpClient::rename_rule(self, old_names, new_names).await
    }

    async fn check_syntax(&self, texts: &[String]) -> Result<Vec<SyntaxReport>, Error> {
        HttpClient::check_syntax(self, texts).await
    }

    async fn get_capabilities(&self) -> Result<Vec<String>, Error> {
        HttpClient::get_capabilities(self).await
    }

    async fn get_product_version(&self) -> Result<String, Error> {
        HttpClient::get_product_version(self).await
    }
}

/// Builds an [`HttpClient`] per endpoint from one shared transport config.
#[derive(Debug, Clone, Default)]
pub struct HttpConnector {
    transport: TransportConfig,
}

impl HttpConnector {
    pub fn new(transport: TransportConfig) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &TransportConfig {
        &self.transport
    }
}

impl Connector for HttpConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn RemoteClient>, Error> {
        let client = HttpClient::new(endpoint, &self.transport)?;
        Ok(Arc::new(client))
    }
}
