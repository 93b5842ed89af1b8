use std::future::Future;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt, stream};

use crate::error::FetchError;

/// A boxed stream type for HTTP response bodies.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Status line, declared length and streaming body of a GET response.
pub struct HttpResponse {
    pub status:         u16,
    pub content_length: Option<u64>,
    pub body:           BoxStream<'static, Result<Bytes, FetchError>>,
}

impl HttpResponse {
    /// Builds a response from an in-memory body; `Content-Length` is set to
    /// the body length.
    pub fn from_bytes(status: u16, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self {
            status,
            content_length: Some(body.len() as u64),
            body: Box::pin(stream::once(async move { Ok::<_, FetchError>(body) })),
        }
    }

    /// Collects the body into a UTF-8 string.
    pub async fn text(mut self) -> Result<String, FetchError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        String::from_utf8(buf.to_vec())
            .map_err(|e| FetchError::Malformed(format!("body is not UTF-8: {e}")))
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Asynchronous HTTP client abstraction.
///
/// Implementations follow redirects and map transport failures onto
/// [`FetchError`]. A non-2xx status is returned as a response, not an error;
/// callers classify it.
///
/// # Implementations
///
/// - [`ReqwestClient`]: production implementation using `reqwest`
/// - request-counting stubs in tests
pub trait HttpClient: Send + Sync {
    fn get(&self, url: &str) -> impl Future<Output = Result<HttpResponse, FetchError>> + Send;
}

#[cfg(feature = "reqwest")]
mod reqwest_impl {
    use std::time::Duration;

    use super::*;

    /// Production HTTP client using reqwest.
    ///
    /// Only the connect phase is bounded here; callers bound the wait for
    /// headers and for each body chunk.
    #[derive(Clone)]
    pub struct ReqwestClient {
        client: reqwest::Client,
    }

    impl ReqwestClient {
        pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
            let client = reqwest::Client::builder()
                .user_agent(user_agent)
                .connect_timeout(timeout)
                .build()
                .map_err(|e| FetchError::Network(e.to_string()))?;
            Ok(Self { client })
        }
    }

    impl HttpClient for ReqwestClient {
        async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
            let response = self.client.get(url).send().await.map_err(map_error)?;
            let status = response.status().as_u16();
            let content_length = response.content_length();
            let body = response.bytes_stream().map(|chunk| chunk.map_err(map_error));

            Ok(HttpResponse {
                status,
                content_length,
                body: Box::pin(body),
            })
        }
    }

    fn map_error(e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_connect() {
            FetchError::Connect(e.to_string())
        } else if e.is_builder() {
            FetchError::InvalidUrl(e.to_string())
        } else if e.is_body() || e.is_decode() {
            FetchError::Body(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_impl::ReqwestClient;
