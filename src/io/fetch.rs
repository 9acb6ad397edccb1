//! HTTP loader over `reqwest`.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tsforged_common::TransmuxConfig;

use super::loader::{DataSource, Loader, LoaderError, LoaderRange, LoaderResponse};
use super::seek::SeekHandler;

/// Streams byte ranges over HTTP(S).
pub struct FetchLoader {
    client: reqwest::Client,
    seek_handler: Box<dyn SeekHandler>,
    headers: Vec<(String, String)>,
    referrer_policy: Option<String>,
    reuse_redirected_url: bool,
}

impl FetchLoader {
    pub fn new(
        config: &TransmuxConfig,
        seek_handler: Box<dyn SeekHandler>,
    ) -> Result<Self, LoaderError> {
        let mut builder = reqwest::Client::builder();
        if let Some(ms) = config.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        let client = builder
            .build()
            .map_err(|e| LoaderError::exception(-1, e.to_string()))?;

        Ok(Self {
            client,
            seek_handler,
            headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            referrer_policy: config.referrer_policy.clone(),
            reuse_redirected_url: config.reuse_redirected_url,
        })
    }
}

fn send_error(error: reqwest::Error) -> LoaderError {
    if error.is_timeout() {
        LoaderError::ConnectingTimeout {
            code: -1,
            msg: error.to_string(),
        }
    } else {
        LoaderError::exception(-1, error.to_string())
    }
}

#[async_trait]
impl Loader for FetchLoader {
    fn loader_type(&self) -> &'static str {
        "fetch-stream-loader"
    }

    async fn open(
        &self,
        source: &DataSource,
        range: LoaderRange,
    ) -> Result<Box<dyn LoaderResponse>, LoaderError> {
        let url = match (&source.redirected_url, self.reuse_redirected_url) {
            (Some(redirected), true) => redirected.as_str(),
            _ => source.url.as_str(),
        };
        let seek_config = self.seek_handler.get_config(url, range);
        let request_url = reqwest::Url::parse(&seek_config.url)
            .map_err(|e| LoaderError::exception(-1, format!("{}: {}", seek_config.url, e)))?;

        let mut request = self.client.get(request_url.clone());
        for (name, value) in seek_config.headers.iter().chain(self.headers.iter()) {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(ref policy) = self.referrer_policy {
            request = request.header("Referrer-Policy", policy.as_str());
        }

        tracing::debug!(url = %request_url, from = range.from, to = ?range.to, "Opening range request");
        let response = request.send().await.map_err(send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoaderError::HttpStatusCodeInvalid {
                code: i32::from(status.as_u16()),
                msg: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        let redirected_url = (response.url() != &request_url)
            .then(|| self.seek_handler.remove_url_parameters(response.url().as_str()));
        let content_length = response.content_length().filter(|&len| len != 0);

        Ok(Box::new(FetchResponse {
            response,
            content_length,
            redirected_url,
            received: 0,
        }))
    }
}

struct FetchResponse {
    response: reqwest::Response,
    content_length: Option<u64>,
    redirected_url: Option<String>,
    received: u64,
}

impl FetchResponse {
    fn is_short(&self) -> bool {
        self.content_length
            .map_or(true, |length| self.received < length)
    }
}

#[async_trait]
impl LoaderResponse for FetchResponse {
    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    fn redirected_url(&self) -> Option<&str> {
        self.redirected_url.as_deref()
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, LoaderError> {
        match self.response.chunk().await {
            Ok(Some(chunk)) => {
                self.received += chunk.len() as u64;
                Ok(Some(chunk))
            }
            Ok(None) => {
                if self.content_length.is_some() && self.is_short() {
                    return Err(LoaderError::early_eof("Fetch stream meet Early-EOF"));
                }
                Ok(None)
            }
            Err(error) if self.is_short() => {
                tracing::debug!(received = self.received, "Body read failed: {}", error);
                Err(LoaderError::early_eof("Fetch stream meet Early-EOF"))
            }
            Err(error) => Err(LoaderError::exception(-1, error.to_string())),
        }
    }
}
