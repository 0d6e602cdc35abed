//! HTTP client construction shared by every endpoint call.

use reqwest::{Client, RequestBuilder};
use std::collections::HashMap;

use crate::options::TransportOptions;

/// Build a configured HTTP client from transport options.
///
/// This applies common configuration like timeouts and proxies.
pub fn build_http_client(options: &TransportOptions) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder();

    if let Some(timeout) = options.timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy_url) = &options.proxy {
        if let Ok(proxy) = reqwest::Proxy::all(proxy_url) {
            builder = builder.proxy(proxy);
        }
    }

    builder.build()
}

/// Add extra headers to a request if specified in transport options.
pub fn add_extra_headers(
    mut request: RequestBuilder,
    extra_headers: &Option<HashMap<String, String>>,
) -> RequestBuilder {
    if let Some(headers) = extra_headers {
        for (key, value) in headers {
            request = request.header(key, value);
        }
    }
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn builds_client_with_timeout() {
        let options = TransportOptions::new("http://localhost:8000")
            .with_timeout(Duration::from_secs(30));

        assert!(build_http_client(&options).is_ok());
    }

    #[test]
    fn builds_client_with_proxy() {
        let options = TransportOptions::new("http://localhost:8000")
            .with_proxy("http://proxy.example.com:8080".to_string());

        assert!(build_http_client(&options).is_ok());
    }
}
