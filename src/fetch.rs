use std::{
    io::{self, Cursor, Read},
    time::Duration,
};

use brotli::Decompressor;
use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};
use http::{HeaderMap, Method, Request, StatusCode, Uri, header};
use hyper::{Body, Client, body, client::HttpConnector};
use hyper_rustls::HttpsConnectorBuilder;
use url::Url;
use zstd::stream::read::Decoder as ZstdDecoder;

use crate::error::FetchError;

pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Body>;

const MAX_REDIRECTS: usize = 10;

pub fn build_client() -> HttpClient {
    let https = HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();
    Client::builder().build(https)
}

/// Normalized upstream outcome. `final_url` is the post-redirect URL and
/// is what relative links must resolve against; `body` is still in its
/// upstream content encoding.
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub final_url: Url,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
    }
}

/// Executes one GET/HEAD with the given header set, following redirects
/// and reading the body, all inside a single cancellable budget. Timeout
/// expiry drops the in-flight request, which aborts the connection rather
/// than leaking it.
pub async fn fetch_upstream(
    client: &HttpClient,
    method: Method,
    url: Url,
    headers: HeaderMap,
    budget: Duration,
) -> Result<UpstreamResponse, FetchError> {
    match tokio::time::timeout(budget, follow_redirects(client, method, url, headers)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout),
    }
}

async fn follow_redirects(
    client: &HttpClient,
    method: Method,
    url: Url,
    headers: HeaderMap,
) -> Result<UpstreamResponse, FetchError> {
    let mut current = url;

    for _ in 0..=MAX_REDIRECTS {
        let uri: Uri = current
            .as_str()
            .parse()
            .map_err(|err| FetchError::InvalidUrl(format!("{current}: {err}")))?;

        let mut request = Request::builder()
            .method(method.clone())
            .uri(uri)
            .body(Body::empty())
            .map_err(|err| FetchError::InvalidUrl(err.to_string()))?;
        *request.headers_mut() = headers.clone();

        let response = client
            .request(request)
            .await
            .map_err(|err| FetchError::Network(err.to_string()))?;

        if response.status().is_redirection()
            && let Some(location) = response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
        {
            current = current
                .join(location)
                .map_err(|err| FetchError::InvalidUrl(format!("redirect to {location}: {err}")))?;
            continue;
        }

        let status = response.status();
        let response_headers = response.headers().clone();
        let body = if method == Method::HEAD || !status.is_success() {
            Bytes::new()
        } else {
            body::to_bytes(response.into_body())
                .await
                .map_err(|err| FetchError::Network(err.to_string()))?
        };

        return Ok(UpstreamResponse {
            status,
            headers: response_headers,
            final_url: current,
            body,
        });
    }

    Err(FetchError::Network("too many redirects".to_string()))
}

/// Decodes an upstream body for rewriting. Passthrough responses skip
/// this and keep their original encoding on the wire.
pub fn decode_body_with_encoding(bytes: &[u8], encoding: Option<&str>) -> io::Result<Vec<u8>> {
    match encoding.map(|enc| enc.trim().to_ascii_lowercase()) {
        None => Ok(bytes.to_vec()),
        Some(enc) => match enc.as_str() {
            "" | "identity" => Ok(bytes.to_vec()),
            "gzip" => {
                let mut decoder = GzDecoder::new(Cursor::new(bytes));
                let mut out = Vec::new();
                decoder.read_to_end(&mut out)?;
                Ok(out)
            }
            "deflate" => {
                let mut decoder = ZlibDecoder::new(Cursor::new(bytes));
                let mut out = Vec::new();
                decoder.read_to_end(&mut out)?;
                Ok(out)
            }
            "br" => {
                let mut decoder = Decompressor::new(Cursor::new(bytes), 4096);
                let mut out = Vec::new();
                decoder.read_to_end(&mut out)?;
                Ok(out)
            }
            "zstd" => {
                let mut decoder = ZstdDecoder::new(Cursor::new(bytes))?;
                let mut out = Vec::new();
                decoder.read_to_end(&mut out)?;
                Ok(out)
            }
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported content-encoding: {}", other),
            )),
        },
    }
}
