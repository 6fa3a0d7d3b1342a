// System endpoints
//
// Device-level metadata: licensed capabilities and product version.

use tracing::debug;

use crate::error::Error;
use crate::http::client::HttpClient;

impl HttpClient {
    /// List the capabilities the device is licensed for.
    ///
    /// `GET /api/system/capabilities`
    pub async fn get_capabilities(&self) -> Result<Vec<String>, Error> {
        let url = self.api_url("system/capabilities")?;
        debug!("fetching capabilities");
        self.get(url).await
    }

    /// Get the product version string (e.g. `"4.2r1"`).
    ///
    /// `GET /api/system/version`
    pub async fn get_product_version(&self) -> Result<String, Error> {
        let url = self.api_url("system/version")?;
        debug!("fetching product version");
        let mut data: Vec<String> = self.get(url).await?;
        data.pop().ok_or_else(|| Error::Deserialization {
            message: "empty version response".into(),
            body: String::new(),
        })
    }
}
