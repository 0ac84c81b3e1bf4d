//! Fetches resolved variants for a user context from the server.
use std::{collections::HashMap, sync::Arc};

use reqwest::Url;

use crate::{
    context::UserContext,
    http::{HttpClient, HttpRequest},
    variant::VariantsResponse,
    Error, Result, Variant,
};

const VARIANTS_ENDPOINT: &str = "/sdk/vardata/";

/// A client that fetches variants from the Skylab server.
pub struct VariantFetcher {
    http_client: Arc<dyn HttpClient>,
    server_url: String,
    api_key: String,
}

impl VariantFetcher {
    /// Create a fetcher for `server_url`, authenticating with `api_key`.
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        server_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> VariantFetcher {
        VariantFetcher {
            http_client,
            server_url: server_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Build the request for `context`: the encoded context travels as the last path segment.
    pub fn request(&self, context: &UserContext) -> Result<HttpRequest> {
        let url = Url::parse(&format!(
            "{}{}{}",
            self.server_url.trim_end_matches('/'),
            VARIANTS_ENDPOINT,
            context.encode()?
        ))
        .map_err(Error::InvalidServerUrl)?;

        Ok(HttpRequest {
            url,
            headers: vec![(
                "Authorization".to_owned(),
                format!("Api-Key {}", self.api_key),
            )],
        })
    }

    /// Fetch all variants for `context`.
    ///
    /// Entries that fail to parse are skipped. Transport errors, non-success statuses and bodies
    /// that are not a JSON object fail the whole fetch.
    pub async fn fetch_variants(&self, context: &UserContext) -> Result<HashMap<String, Variant>> {
        let request = self.request(context)?;

        log::debug!(target: "skylab", "fetching variants");
        let response = self.http_client.get(request).await.inspect_err(|err| {
            log::warn!(target: "skylab", "error while fetching variants: {:?}", err);
        })?;

        match response.status {
            200 => {}
            401 => {
                log::warn!(target: "skylab", "client is not authorized. Check your API key");
                return Err(Error::Unauthorized);
            }
            status => {
                log::warn!(target: "skylab", status; "received non-success response while fetching variants");
                return Err(Error::UnexpectedStatus(status));
            }
        }

        let variants = serde_json::from_slice::<VariantsResponse>(&response.body)
            .map_err(|err| {
                log::warn!(target: "skylab", "failed to parse variants response body: {:?}", err);
                Error::ResponseParse(Arc::new(err))
            })?
            .into_variants();

        log::debug!(target: "skylab", count = variants.len(); "successfully fetched variants");

        Ok(variants)
    }
}
