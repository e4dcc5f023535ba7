use reqwest::{Client, Proxy};
use std::time::Duration;
use tracing::{info, warn};

enum ProxyResolution {
    UseProxy(String),
    /// `proxy = ""` disables every proxy, environment included.
    ForceDirectConnect,
    /// Follow HTTPS_PROXY / HTTP_PROXY.
    FromEnv,
}

fn resolve_proxy(proxy: Option<&str>) -> ProxyResolution {
    match proxy.map(str::trim) {
        Some("") => ProxyResolution::ForceDirectConnect,
        Some(p) => ProxyResolution::UseProxy(p.to_string()),
        None => ProxyResolution::FromEnv,
    }
}

/// Build the HTTP client used for LLM calls.
pub fn build_http_client(proxy: Option<&str>, timeout: Duration) -> Client {
    let mut builder = Client::builder().timeout(timeout);

    match resolve_proxy(proxy) {
        ProxyResolution::UseProxy(url) => match Proxy::all(&url) {
            Ok(p) => {
                info!(proxy = %url, "LLM provider using proxy");
                builder = builder.proxy(p);
            }
            Err(e) => {
                warn!(error = %e, proxy = %url, "Invalid proxy URL, falling back to environment");
            }
        },
        ProxyResolution::ForceDirectConnect => {
            info!("LLM provider forced to direct connect");
            builder = builder.no_proxy();
        }
        ProxyResolution::FromEnv => {}
    }

    builder.build().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to build HTTP client, using default");
        Client::new()
    })
}
