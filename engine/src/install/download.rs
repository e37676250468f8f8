//! Release download over HTTP(S).
//!
//! Redirects are followed manually so the hop count is bounded and each hop
//! is logged. The body is streamed to disk.

use std::path::Path;

use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::InstallError;

pub const MAX_REDIRECTS: u32 = 10;

#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Proxy URL applied to every scheme.
    pub proxy: Option<String>,
    /// When false, certificate validation is disabled.
    pub strict_ssl: bool,
}

fn build_client(options: &DownloadOptions) -> Result<reqwest::Client, InstallError> {
    let mut builder = reqwest::Client::builder()
        .redirect(Policy::none())
        .user_agent(concat!("linterhub/", env!("CARGO_PKG_VERSION")));

    match options.proxy.as_deref() {
        Some(proxy) => {
            let proxy = reqwest::Proxy::all(proxy).map_err(InstallError::Client)?;
            builder = builder.proxy(proxy);
        }
        None => builder = builder.no_proxy(),
    }

    if !options.strict_ssl {
        tracing::warn!("strict_ssl is disabled: TLS certificate validation is off for downloads");
        builder = builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }

    builder.build().map_err(InstallError::Client)
}

/// Download `url` into `dest`, following redirects. Returns the byte count.
pub async fn download_file(
    url: &Url,
    dest: &Path,
    options: &DownloadOptions,
    cancel: &CancellationToken,
) -> Result<u64, InstallError> {
    tokio::select! {
        () = cancel.cancelled() => Err(InstallError::Cancelled),
        res = fetch_to_file(url, dest, options) => res,
    }
}

async fn fetch_to_file(
    url: &Url,
    dest: &Path,
    options: &DownloadOptions,
) -> Result<u64, InstallError> {
    let client = build_client(options)?;
    let mut current = url.clone();
    let mut redirects = 0u32;

    let response = loop {
        tracing::info!(url = %current, "Downloading engine runtime");
        let response = client
            .get(current.clone())
            .send()
            .await
            .map_err(|source| InstallError::Network {
                url: current.to_string(),
                source,
            })?;
        let status = response.status();

        if matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308) {
            redirects += 1;
            if redirects > MAX_REDIRECTS {
                return Err(InstallError::RedirectLimit {
                    url: url.to_string(),
                    max: MAX_REDIRECTS,
                });
            }
            let next = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .and_then(|location| current.join(location).ok())
                .ok_or_else(|| InstallError::MissingLocation {
                    url: current.to_string(),
                })?;
            tracing::debug!(from = %current, to = %next, "Following redirect");
            current = next;
            continue;
        }

        if status != StatusCode::OK {
            return Err(InstallError::HttpStatus {
                url: current.to_string(),
                status: status.as_u16(),
            });
        }
        break response;
    };

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| InstallError::io(format!("creating {}", parent.display()), source))?;
    }
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|source| InstallError::io(format!("creating {}", dest.display()), source))?;

    let total = response.content_length();
    let mut written = 0u64;
    let mut last_percent = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| InstallError::Network {
            url: current.to_string(),
            source,
        })?;
        file.write_all(&chunk)
            .await
            .map_err(|source| InstallError::io(format!("writing {}", dest.display()), source))?;
        written += chunk.len() as u64;

        if let Some(total) = total.filter(|t| *t > 0) {
            let percent = (written * 100).div_ceil(total);
            if percent >= last_percent + 10 {
                last_percent = percent;
                tracing::debug!(percent, "Download progress");
            }
        }
    }

    file.flush()
        .await
        .map_err(|source| InstallError::io(format!("flushing {}", dest.display()), source))?;

    tracing::info!(bytes = written, path = %dest.display(), "Download complete");
    Ok(written)
}
