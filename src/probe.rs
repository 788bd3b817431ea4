//! Remote Resource Probing
//!
//! Discovers size, media type, suggested filename, and resumability of a
//! remote resource before any transfer starts. The metadata fetch is a
//! plain GET whose body is never read; resumability uses a separate
//! 1-byte range request.

use crate::error::{EngineError, Result};
use crate::types::RemoteResource;

use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, RANGE};
use reqwest::{Client, StatusCode};

/// Probe a remote resource.
///
/// Fails with [`EngineError::InvalidUrl`] for empty or non-http(s) URLs
/// and with [`EngineError::Remote`] when the server does not answer the
/// metadata fetch with a success status.
pub async fn probe(client: &Client, url: &str) -> Result<RemoteResource> {
    validate_url(url)?;

    let response = client.get(url).send().await.map_err(|e| EngineError::Remote {
        status: None,
        reason: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(EngineError::remote_status(
            status.as_u16(),
            status
                .canonical_reason()
                .unwrap_or("unrecognized status")
                .to_string(),
        ));
    }

    let headers = response.headers();

    let size_bytes = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok());

    // Media type without its parameters ("text/html; charset=..." -> "text/html").
    let media_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_string());

    let suggested_name = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_disposition)
        .or_else(|| filename_from_url(url))
        .unwrap_or_else(|| "download".to_string());

    // The body is dropped unread; only the headers matter here.
    drop(response);

    let resumable = is_resumable(client, url).await;

    tracing::debug!(
        url,
        size = ?size_bytes,
        resumable,
        name = %suggested_name,
        "probed remote resource"
    );

    Ok(RemoteResource {
        url: url.to_string(),
        suggested_name,
        media_type,
        size_bytes,
        resumable,
    })
}

/// Check whether the server honors range requests.
///
/// Sends a GET restricted to bytes `[1,1]`; only a 206 answer counts.
/// Transport errors degrade to `false` rather than propagating, so an
/// unreliable probe never sinks the whole download.
pub async fn is_resumable(client: &Client, url: &str) -> bool {
    match client.get(url).header(RANGE, "bytes=1-1").send().await {
        Ok(response) => response.status() == StatusCode::PARTIAL_CONTENT,
        Err(e) => {
            tracing::debug!(url, error = %e, "resumability probe failed, assuming not resumable");
            false
        }
    }
}

fn validate_url(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(EngineError::InvalidUrl("url must not be empty".to_string()));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(EngineError::InvalidUrl(format!(
            "only http and https are supported, got '{}'",
            url
        )));
    }
    Ok(())
}

/// Filename advertised by a Content-Disposition header. Accepts the
/// plain `filename=` parameter, quoted or bare, and the RFC 5987
/// `filename*=<charset>''<percent-encoded>` form.
fn parse_content_disposition(header: &str) -> Option<String> {
    if let Some((_, rest)) = header.split_once("filename=") {
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted.find('"')?;
            return Some(quoted[..end].to_string());
        }
        let bare = rest.split(';').next().unwrap_or(rest).trim();
        return Some(bare.to_string());
    }

    let (_, rest) = header.split_once("filename*=")?;
    let (_, encoded) = rest.split_once("''")?;
    let encoded = encoded.split(';').next().unwrap_or(encoded);
    urlencoding::decode(encoded).ok().map(|name| name.into_owned())
}

/// Last path segment of the URL, percent-decoded when possible.
fn filename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    match urlencoding::decode(last) {
        Ok(decoded) => Some(decoded.into_owned()),
        Err(_) => Some(last.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_http_and_https_urls_are_accepted() {
        assert!(validate_url("https://example.com/file.zip").is_ok());
        assert!(validate_url("http://example.com").is_ok());

        assert!(matches!(
            validate_url(""),
            Err(EngineError::InvalidUrl(_))
        ));
        assert!(matches!(
            validate_url("   "),
            Err(EngineError::InvalidUrl(_))
        ));
        assert!(matches!(
            validate_url("ftp://example.com/file.zip"),
            Err(EngineError::InvalidUrl(_))
        ));
        assert!(matches!(
            validate_url("example.com/file.zip"),
            Err(EngineError::InvalidUrl(_))
        ));
    }

    #[test]
    fn content_disposition_yields_the_advertised_filename() {
        assert_eq!(
            parse_content_disposition("attachment; filename=\"test.zip\""),
            Some("test.zip".to_string())
        );
        assert_eq!(
            parse_content_disposition("attachment; filename=test.zip"),
            Some("test.zip".to_string())
        );
        assert_eq!(
            parse_content_disposition("attachment; filename*=UTF-8''test%20file.zip"),
            Some("test file.zip".to_string())
        );

        assert_eq!(parse_content_disposition("inline"), None);
        // A quoted filename with no closing quote is malformed.
        assert_eq!(parse_content_disposition("attachment; filename=\"test.zip"), None);
    }

    #[test]
    fn url_path_falls_back_as_the_filename() {
        assert_eq!(
            filename_from_url("https://example.com/path/to/file.zip"),
            Some("file.zip".to_string())
        );
        assert_eq!(
            filename_from_url("https://example.com/path/to/file%20name.zip"),
            Some("file name.zip".to_string())
        );
        assert_eq!(filename_from_url("https://example.com/"), None);
    }
}
