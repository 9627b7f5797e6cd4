//! Elasticsearch / OpenSearch sink.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use elasticsearch::auth::Credentials;
use elasticsearch::cert::CertificateValidation;
use elasticsearch::http::request::JsonBody;
use elasticsearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use elasticsearch::indices::{IndicesCreateParts, IndicesDeleteParts, IndicesExistsParts};
use elasticsearch::params::Refresh as RefreshParam;
use elasticsearch::{BulkParts, Elasticsearch};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json, json};
use tracing::{debug, warn};

use super::{BulkAction, BulkItemFailure, BulkOperation, BulkOptions, BulkReport, IndexSink, Refresh};
use crate::error::SinkError;

/// Connection settings for [`ElasticsearchSink`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchSinkConfig {
    /// Node URL (default: `http://localhost:9200`).
    #[serde(default = "default_url")]
    pub url: String,

    /// Request timeout in milliseconds (default: 30000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Basic authentication as `(username, password)`.
    #[serde(default)]
    pub basic_auth: Option<(String, String)>,

    /// Whether to disable certificate validation (default: false).
    /// Only use for development/testing.
    #[serde(default)]
    pub disable_certificate_validation: bool,
}

fn default_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for ElasticsearchSinkConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            request_timeout_ms: default_request_timeout_ms(),
            basic_auth: None,
            disable_certificate_validation: false,
        }
    }
}

/// A sink backed by the Elasticsearch client.
pub struct ElasticsearchSink {
    client: Elasticsearch,
    config: ElasticsearchSinkConfig,
}

impl Debug for ElasticsearchSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchSink")
            .field("url", &self.config.url)
            .finish_non_exhaustive()
    }
}

fn transport_error(context: &str, e: impl std::fmt::Display) -> SinkError {
    SinkError::Transport {
        message: format!("{}: {}", context, e),
    }
}

impl ElasticsearchSink {
    /// Builds a client for `config.url`.
    pub fn new(config: ElasticsearchSinkConfig) -> Result<Self, SinkError> {
        let url: elasticsearch::http::Url = config
            .url
            .parse()
            .map_err(|e| transport_error("Invalid URL", e))?;

        let mut builder = TransportBuilder::new(SingleNodeConnectionPool::new(url))
            .timeout(Duration::from_millis(config.request_timeout_ms));

        if config.disable_certificate_validation {
            builder = builder.cert_validation(CertificateValidation::None);
        }

        if let Some((username, password)) = &config.basic_auth {
            builder = builder.auth(Credentials::Basic(username.clone(), password.clone()));
        }

        let transport = builder
            .build()
            .map_err(|e| transport_error("Failed to build transport", e))?;

        Ok(Self {
            client: Elasticsearch::new(transport),
            config,
        })
    }

    /// Wraps an already configured client.
    pub fn with_client(client: Elasticsearch) -> Self {
        Self {
            client,
            config: ElasticsearchSinkConfig::default(),
        }
    }

    fn request_body(operations: &[BulkOperation]) -> Vec<JsonBody<Json>> {
        let mut body = Vec::with_capacity(operations.len() * 2);
        for operation in operations {
            let mut action = Map::new();
            action.insert(
                operation.op_type.as_str().to_string(),
                json!({ "_index": operation.index, "_id": operation.id }),
            );
            body.push(Json::Object(action).into());

            let source = operation.source.clone().unwrap_or_default();
            match operation.op_type {
                BulkAction::Index => body.push(Json::Object(source).into()),
                BulkAction::Update => body.push(json!({ "doc": source }).into()),
                BulkAction::Delete => {}
            }
        }
        body
    }
}

/// Extracts per-item failures from a bulk response.
fn parse_bulk_response(payload: &Json) -> BulkReport {
    let mut report = BulkReport::default();
    let items = payload
        .get("items")
        .and_then(Json::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for item in items {
        let Some((action, result)) = item.as_object().and_then(|obj| obj.iter().next()) else {
            continue;
        };
        let status = result
            .get("status")
            .and_then(Json::as_u64)
            .and_then(|status| u16::try_from(status).ok())
            .unwrap_or(500);
        if (200..300).contains(&status) {
            report.succeeded += 1;
            continue;
        }
        let op_type = match action.as_str() {
            "update" => BulkAction::Update,
            "delete" => BulkAction::Delete,
            _ => BulkAction::Index,
        };
        let reason = result
            .get("error")
            .map(|error| match error.get("reason").and_then(Json::as_str) {
                Some(reason) => reason.to_string(),
                None => error.to_string(),
            })
            .unwrap_or_else(|| "unknown error".to_string());
        report.failures.push(BulkItemFailure {
            id: result.get("_id").cloned().unwrap_or(Json::Null),
            op_type,
            index: result
                .get("_index")
                .and_then(Json::as_str)
                .unwrap_or_default()
                .to_string(),
            status,
            reason,
        });
    }
    report
}

#[async_trait]
impl IndexSink for ElasticsearchSink {
    async fn bulk(
        &self,
        operations: Vec<BulkOperation>,
        options: &BulkOptions,
    ) -> Result<BulkReport, SinkError> {
        if operations.is_empty() {
            return Ok(BulkReport::default());
        }

        let mut request = self
            .client
            .bulk(BulkParts::None)
            .body(Self::request_body(&operations));
        if let Some(refresh) = options.refresh {
            request = request.refresh(match refresh {
                Refresh::True => RefreshParam::True,
                Refresh::False => RefreshParam::False,
                Refresh::WaitFor => RefreshParam::WaitFor,
            });
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error("Failed to send bulk request", e))?;

        let status = response.status_code();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }

        let payload = response
            .json::<Json>()
            .await
            .map_err(|e| SinkError::Serialization {
                message: format!("Failed to parse bulk response: {}", e),
            })?;

        let report = parse_bulk_response(&payload);
        if !report.is_success() {
            warn!(
                failures = report.failures.len(),
                operations = operations.len(),
                "Bulk request partially failed"
            );
        }
        Ok(report)
    }

    async fn create_index(&self, name: &str, body: Json) -> Result<(), SinkError> {
        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(name))
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error("Failed to create index", e))?;

        let status = response.status_code();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                message: format!("Failed to create index {}: {}", name, body),
            });
        }

        debug!(index = %name, "Created index");
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<(), SinkError> {
        let response = self
            .client
            .indices()
            .delete(IndicesDeleteParts::Index(&[name]))
            .send()
            .await
            .map_err(|e| transport_error("Failed to delete index", e))?;

        let status = response.status_code();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // 404 is OK (index doesn't exist)
            if !body.contains("index_not_found_exception") {
                return Err(SinkError::Rejected {
                    status: status.as_u16(),
                    message: format!("Failed to delete index {}: {}", name, body),
                });
            }
        }

        debug!(index = %name, "Deleted index");
        Ok(())
    }

    async fn index_exists(&self, name: &str) -> Result<bool, SinkError> {
        let response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[name]))
            .send()
            .await
            .map_err(|e| transport_error("Failed to check index existence", e))?;

        Ok(response.status_code().is_success())
    }
}
