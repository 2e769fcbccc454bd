//! HTTP range-request [`ByteSource`] (spec.md §4.A(ii–v), §6).

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, ETAG, RANGE};
use reqwest::{Client, IntoUrl, Method, StatusCode, Url};
use tokio::sync::RwLock;

use crate::byte_source::{ByteSource, RangeRead};
use crate::error::{TpkError, TpkResult};

/// A [`ByteSource`] that reads an archive over HTTP range requests.
///
/// Discovers the archive's total size with a small range probe (falling back
/// to `HEAD` when the server doesn't echo `Content-Range`), and treats a
/// changed `ETag` between reads as archive mutation: the next read after a
/// change fails with `EtagMismatch` so the cache layer can invalidate and
/// retry. After one such mismatch, `must_reload` is set so subsequent
/// requests ask intermediate caches not to serve stale bytes.
pub struct HttpByteSource {
    client: Client,
    url: Url,
    size: RwLock<Option<u64>>,
    etag: RwLock<Option<String>>,
    must_reload: AtomicBool,
}

fn strip_weak_prefix(etag: &str) -> String {
    etag.strip_prefix("W/").unwrap_or(etag).to_string()
}

fn parse_content_range_total(value: &str) -> Option<u64> {
    // "bytes 0-4/12345" or "bytes */12345"
    let total = value.rsplit('/').next()?;
    if total == "*" {
        return None;
    }
    total.parse().ok()
}

impl HttpByteSource {
    /// Builds a new HTTP byte source. Does not perform any network I/O yet.
    pub fn new<U: IntoUrl>(client: Client, url: U) -> TpkResult<Self> {
        let url = url
            .into_url()
            .map_err(|e| TpkError::InvalidUrl(e.to_string()))?;
        Ok(Self {
            client,
            url,
            size: RwLock::new(None),
            etag: RwLock::new(None),
            must_reload: AtomicBool::new(false),
        })
    }

    async fn observe_etag(&self, response_etag: Option<String>) -> TpkResult<()> {
        let response_etag = response_etag.map(|e| strip_weak_prefix(&e));
        let mut cached = self.etag.write().await;
        match (&*cached, &response_etag) {
            (Some(prev), Some(seen)) if prev != seen => {
                let previous = cached.clone();
                *cached = response_etag.clone();
                self.must_reload.store(true, Ordering::SeqCst);
                return Err(TpkError::EtagMismatch {
                    previous,
                    observed: response_etag,
                });
            }
            (None, Some(_)) => *cached = response_etag,
            _ => {}
        }
        Ok(())
    }

    fn cache_control_header(&self) -> Option<&'static str> {
        self.must_reload
            .load(Ordering::SeqCst)
            .then_some("no-cache")
    }

    async fn discover_size(&self) -> TpkResult<u64> {
        let req = self
            .client
            .request(Method::GET, self.url.clone())
            .header(RANGE, "bytes=0-4");
        let response = req.send().await.map_err(TpkError::Http)?;

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(total) = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
        {
            self.observe_etag(etag).await?;
            return Ok(total);
        }

        // Server didn't answer with Content-Range: fall back to HEAD.
        let head = self
            .client
            .request(Method::HEAD, self.url.clone())
            .send()
            .await
            .map_err(TpkError::Http)?;
        let etag = head
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.observe_etag(etag).await?;
        head.headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                TpkError::Transport(
                    "server did not report a usable size (Content-Range or HEAD Content-Length)"
                        .into(),
                )
            })
    }

    /// Attempts a single range read. On `416 Range Not Satisfiable` with an
    /// authoritative `Content-Range: bytes */N`, adopts `N` as the archive's
    /// new size and returns `Ok(None)` rather than erroring, so the caller can
    /// retry once against the corrected size (spec.md §4.A(iii)).
    async fn try_read(&self, offset: u64, length: u64) -> TpkResult<Option<RangeRead>> {
        let end = offset
            .checked_add(length)
            .and_then(|v| v.checked_sub(1))
            .ok_or_else(|| TpkError::Transport("read range overflow".into()))?;

        let mut req = self
            .client
            .request(Method::GET, self.url.clone())
            .header(RANGE, format!("bytes={offset}-{end}"));
        if let Some(cc) = self.cache_control_header() {
            req = req.header(CACHE_CONTROL, cc);
        }
        let response = req.send().await.map_err(TpkError::Http)?;
        let status = response.status();

        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return if let Some(total) = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range_total)
            {
                // Authoritative size; the directory built against the old length is stale.
                *self.size.write().await = Some(total);
                Ok(None)
            } else {
                Err(TpkError::Transport(format!(
                    "range {offset}-{end} not satisfiable"
                )))
            };
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let cache_control = response
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let expires = response
            .headers()
            .get(reqwest::header::EXPIRES)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let is_full_body = status == StatusCode::OK;
        if is_full_body {
            // Server ignored our Range header and is returning the whole body.
            let content_length = response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            match content_length {
                Some(n) if n >= offset.saturating_add(length) => {}
                _ => {
                    return Err(TpkError::Transport(
                        "200 response with missing or undersized Content-Length for the requested range"
                            .into(),
                    ));
                }
            }
        } else if status != StatusCode::PARTIAL_CONTENT {
            return Err(TpkError::Transport(format!(
                "unexpected HTTP status {status} for range read"
            )));
        }

        self.observe_etag(etag.clone()).await?;

        let body: Bytes = response.bytes().await.map_err(TpkError::Http)?;
        let body = if is_full_body {
            let start = usize::try_from(offset)
                .map_err(|_| TpkError::Transport("read offset overflows usize".into()))?;
            let want = usize::try_from(length)
                .map_err(|_| TpkError::Transport("read length overflows usize".into()))?;
            let stop = start.checked_add(want).ok_or_else(|| {
                TpkError::Transport("read range overflows usize".into())
            })?;
            if stop > body.len() {
                return Err(TpkError::Transport(
                    "200 response body shorter than the requested range".into(),
                ));
            }
            body.slice(start..stop)
        } else {
            body
        };

        Ok(Some(RangeRead {
            bytes: body,
            etag,
            cache_control,
            expires,
        }))
    }

    async fn do_read(&self, offset: u64, length: u64) -> TpkResult<RangeRead> {
        if let Some(read) = self.try_read(offset, length).await? {
            return Ok(read);
        }
        // The first attempt hit a stale cached size; retry once against the
        // corrected size we just stored.
        self.try_read(offset, length).await?.ok_or_else(|| {
            TpkError::Transport(format!(
                "range {offset}-{} still not satisfiable after adopting the archive's reported size",
                offset.saturating_add(length).saturating_sub(1)
            ))
        })
    }
}

#[async_trait]
impl ByteSource for HttpByteSource {
    async fn size(&self) -> TpkResult<u64> {
        if let Some(size) = *self.size.read().await {
            return Ok(size);
        }
        let mut guard = self.size.write().await;
        if let Some(size) = *guard {
            return Ok(size);
        }
        let discovered = self.discover_size().await?;
        *guard = Some(discovered);
        Ok(discovered)
    }

    async fn read(&self, offset: u64, length: u64) -> TpkResult<RangeRead> {
        self.do_read(offset, length).await
    }

    fn known_etag(&self) -> Option<String> {
        self.etag.try_read().ok().and_then(|g| g.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_weak_etag_prefix() {
        assert_eq!(strip_weak_prefix("W/\"abc\""), "\"abc\"");
        assert_eq!(strip_weak_prefix("\"abc\""), "\"abc\"");
    }

    #[test]
    fn parses_content_range_total() {
        assert_eq!(parse_content_range_total("bytes 0-4/12345"), Some(12345));
        assert_eq!(parse_content_range_total("bytes */12345"), Some(12345));
        assert_eq!(parse_content_range_total("bytes */*"), None);
    }
}
