/// Failure of the proxy server itself (startup, accept loop).
#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("hyper error: {0}")]
    Hyper(#[from] hyper::Error),
}

/// Normalized outcome of an outbound fetch. Everything here renders as an
/// in-frame error page with HTTP 200, never as a raw failure to the host
/// application.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("upstream timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}
