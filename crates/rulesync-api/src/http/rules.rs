// Rule endpoints
//
// Listing, fetching, writing, creating, deleting, renaming and
// syntax-checking rules. All batch operations pair `names[i]` with
// `texts[i]`.

use tracing::debug;

use crate::client::SyntaxReport;
use crate::error::Error;
use crate::http::client::{HttpClient, expect_len};
use crate::http::models::{NamesRequest, NamesTextsRequest, RenameRequest, TextsRequest};

impl HttpClient {
    /// List the names of all rules on the device.
    ///
    /// `GET /api/rules`
    pub async fn list_rule_names(&self) -> Result<Vec<String>, Error> {
        let url = self.api_url("rules")?;
        debug!("listing rule names");
        self.get(url).await
    }

    /// Fetch the text of each named rule.
    ///
    /// `POST /api/rules/text` with `{"names": [...]}`
    pub async fn get_rule_text(&self, names: &[String]) -> Result<Vec<String>, Error> {
        let url = self.api_url("rules/text")?;
        debug!(count = names.len(), "fetching rule text");
        let texts: Vec<String> = self.post(url, &NamesRequest { names }).await?;
        expect_len("rule texts", texts, names.len())
    }

    /// Replace the text of existing rules.
    ///
    /// `PUT /api/rules/text` with `{"names": [...], "texts": [...]}`
    pub async fn set_rule_text(&self, names: &[String], texts: &[String]) -> Result<(), Error> {
        let url = self.api_url("rules/text")?;
        debug!(count = names.len(), "writing rule text");
        let _: Vec<serde_json::Value> = self.put(url, &NamesTextsRequest { names, texts }).await?;
        Ok(())
    }

    /// Create new rules.
    ///
    /// `POST /api/rules` with `{"names": [...], "texts": [...]}`
    pub async fn add_rule(&self, names: &[String], texts: &[String]) -> Result<(), Error> {
        let url = self.api_url("rules")?;
        debug!(count = names.len(), "adding rules");
        let _: Vec<serde_json::Value> = self.post(url, &NamesTextsRequest { names, texts }).await?;
        Ok(())
    }

    /// Delete rules.
    ///
    /// `POST /api/rules/delete` with `{"names": [...]}`
    pub async fn delete_rule(&self, names: &[String]) -> Result<(), Error> {
        let url = self.api_url("rules/delete")?;
        debug!(count = names.len(), "deleting rules");
        let _: Vec<serde_json::Value> = self.post(url, &NamesRequest { names }).await?;
        Ok(())
    }

    /// Rename rules.
    ///
    /// `POST /api/rules/rename` with `{"old_names": [...], "new_names": [...]}`
    pub async fn rename_rule(
        &self,
        old_names: &[String],
        new_names: &[String],
    ) -> Result<(), Error> {
        let url = self.api_url("rules/rename")?;
        debug!(count = old_names.len(), "renaming rules");
        let _: Vec<serde_json::Value> = self
            .post(
                url,
                &RenameRequest {
                    old_names,
                    new_names,
                },
            )
            .await?;
        Ok(())
    }

    /// Run the device's syntax checker over each text.
    ///
    /// `POST /api/rules/check` with `{"texts": [...]}`
    pub async fn check_syntax(&self, texts: &[String]) -> Result<Vec<SyntaxReport>, Error> {
        let url = self.api_url("rules/check")?;
        debug!(count = texts.len(), "checking rule syntax");
        let reports: Vec<SyntaxReport> = self.post(url, &TextsRequest { texts }).await?;
        expect_len("syntax reports", reports, texts.len())
    }
}
