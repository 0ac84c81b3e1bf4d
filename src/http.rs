//! HTTP transport used by the fetcher.
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;

use crate::Result;

/// A GET request with headers.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Full request URL.
    pub url: Url,
    /// Header name and value pairs.
    pub headers: Vec<(String, String)>,
}

/// Status and raw body of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body bytes, expected to be UTF-8 JSON.
    pub body: Vec<u8>,
}

/// Asynchronous HTTP GET capability.
///
/// Implementations return `Err` only when no response was received. Any status code, including
/// errors, is returned as `Ok` for the caller to interpret.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Perform `request`.
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[async_trait]
impl<T: HttpClient + ?Sized> HttpClient for Arc<T> {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse> {
        (**self).get(request).await
    }
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestHttpClient {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Create a client with default `reqwest` settings.
    pub fn new() -> Self {
        ReqwestHttpClient::default()
    }

    /// Reuse an existing `reqwest` client.
    pub fn with_client(client: reqwest::Client) -> Self {
        ReqwestHttpClient { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self.client.get(request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse { status, body })
    }
}
