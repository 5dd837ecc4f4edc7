//! Optional search-index sink for extracted text.

use std::time::Duration;

use serde::Serialize;

use crate::config::SearchSettings;
use crate::db::node_repo::NodeId;
use crate::error::SinkError;

/// Receives the text of finished documents. Failures are reported to the
/// caller, which treats them as non-fatal.
pub trait SearchSink: Send + Sync {
    fn index(&self, doc: &IndexedDocument<'_>) -> Result<(), SinkError>;
}

/// Body sent to the search index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexedDocument<'a> {
    pub id: NodeId,
    pub path: &'a str,
    pub text: &'a str,
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Indexes documents into OpenSearch with one `PUT /<index>/_doc/<id>`
/// per document, so re-indexing a document replaces it.
pub struct OpenSearchSink {
    client: reqwest::blocking::Client,
    base_url: String,
    index: String,
}

impl OpenSearchSink {
    pub fn new(settings: &SearchSettings) -> Result<Self, SinkError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            index: settings.index.clone(),
        })
    }

    fn document_url(&self, id: NodeId) -> String {
        format!("{}/{}/_doc/{}", self.base_url, self.index, id)
    }
}

impl SearchSink for OpenSearchSink {
    fn index(&self, doc: &IndexedDocument<'_>) -> Result<(), SinkError> {
        let response = self.client.put(self.document_url(doc.id)).json(doc).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected {
                id: doc.id,
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Builds the configured sink. No search settings means indexing is off,
/// which is not an error.
pub fn sink_from_settings(
    settings: Option<&SearchSettings>,
) -> Result<Option<Box<dyn SearchSink>>, SinkError> {
    match settings {
        Some(s) => {
            log::info!("Search indexing enabled (index '{}')", s.index);
            Ok(Some(Box::new(OpenSearchSink::new(s)?)))
        }
        None => Ok(None),
    }
}
