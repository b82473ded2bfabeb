//! URL fetching on behalf of the engine.
//!
//! [`UrlFetcher`] is the network seam; [`FetchCorrelator`] tracks in-flight
//! requests by handle and resolves each engine reply at most once.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::types::{UrlMethod, UrlRequest, UrlResponse};

/// Network backend. Implementations never fail: transport errors become a
/// response with status -1.
pub trait UrlFetcher: Send + Sync {
    fn fetch(&self, request: UrlRequest) -> BoxFuture<'static, UrlResponse>;
}

/// `reqwest`-backed fetcher.
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new() -> rewards_core::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| rewards_core::Error::Http(e.to_string()))?;
        Ok(Self { client })
    }

    async fn execute(client: reqwest::Client, request: UrlRequest) -> UrlResponse {
        let method = match request.method {
            UrlMethod::Get => reqwest::Method::GET,
            UrlMethod::Put => reqwest::Method::PUT,
            UrlMethod::Post => reqwest::Method::POST,
        };
        let mut builder = client.request(method, &request.url);
        for line in &request.headers {
            match line.split_once(':') {
                Some((name, value)) => builder = builder.header(name.trim(), value.trim()),
                None => warn!("Skipping malformed header line: {}", line),
            }
        }
        if !request.body.is_empty() {
            if !request.content_type.is_empty() {
                builder = builder.header(reqwest::header::CONTENT_TYPE, &request.content_type);
            }
            builder = builder.body(request.body.clone());
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("{} {} failed: {}", request.method, request.url, e);
                return UrlResponse::transport_error();
            }
        };

        let status = response.status().as_u16() as i32;
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_lowercase(),
                    String::from_utf8_lossy(value.as_bytes()).to_string(),
                )
            })
            .collect();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to read body from {}: {}", request.url, e);
                return UrlResponse::transport_error();
            }
        };

        UrlResponse {
            status,
            body,
            headers,
        }
    }
}

impl UrlFetcher for ReqwestFetcher {
    fn fetch(&self, request: UrlRequest) -> BoxFuture<'static, UrlResponse> {
        Self::execute(self.client.clone(), request).boxed()
    }
}

/// Fetcher used when no HTTP client can be built: every request fails.
struct OfflineFetcher;

impl UrlFetcher for OfflineFetcher {
    fn fetch(&self, _request: UrlRequest) -> BoxFuture<'static, UrlResponse> {
        futures::future::ready(UrlResponse::transport_error()).boxed()
    }
}

/// Create the default fetcher, falling back to an offline one.
pub fn create_fetcher() -> Arc<dyn UrlFetcher> {
    match ReqwestFetcher::new() {
        Ok(fetcher) => Arc::new(fetcher),
        Err(e) => {
            warn!("HTTP client unavailable: {}. Engine fetches will fail.", e);
            Arc::new(OfflineFetcher)
        }
    }
}

// ---------------------------------------------------------------
// Correlator
// ---------------------------------------------------------------

/// A finished fetch, posted back to the owning loop.
#[derive(Debug)]
pub struct FetchDone {
    pub handle: u64,
    pub response: UrlResponse,
}

struct PendingFetch {
    url: String,
    reply: oneshot::Sender<UrlResponse>,
    task: JoinHandle<()>,
}

pub struct FetchCorrelator {
    fetcher: Arc<dyn UrlFetcher>,
    last_handle: u64,
    pending: HashMap<u64, PendingFetch>,
    done_tx: mpsc::UnboundedSender<FetchDone>,
}

impl FetchCorrelator {
    pub fn new(fetcher: Arc<dyn UrlFetcher>, done_tx: mpsc::UnboundedSender<FetchDone>) -> Self {
        Self {
            fetcher,
            last_handle: 0,
            pending: HashMap::new(),
            done_tx,
        }
    }

    /// Start a fetch. `reply` is resolved by [`resolve`](Self::resolve) once
    /// the response comes back.
    pub fn load_url(&mut self, request: UrlRequest, reply: oneshot::Sender<UrlResponse>) -> u64 {
        self.last_handle += 1;
        let handle = self.last_handle;
        debug!("Fetch {}: {} {}", handle, request.method, request.url);

        let url = request.url.clone();
        let future = self.fetcher.fetch(request);
        let tx = self.done_tx.clone();
        let task = tokio::spawn(async move {
            let response = future.await;
            let _ = tx.send(FetchDone { handle, response });
        });
        self.pending.insert(handle, PendingFetch { url, reply, task });
        handle
    }

    /// Deliver a finished fetch. Returns false for handles that were already
    /// resolved or abandoned.
    pub fn resolve(&mut self, done: FetchDone) -> bool {
        let Some(pending) = self.pending.remove(&done.handle) else {
            debug!("Dropping result for unknown fetch {}", done.handle);
            return false;
        };
        debug!(
            "Fetch {} done: {} -> {}",
            done.handle, pending.url, done.response.status
        );
        let _ = pending.reply.send(done.response);
        true
    }

    /// Drop every outstanding fetch without resolving it.
    pub fn abandon_all(&mut self) -> usize {
        let count = self.pending.len();
        for (_, pending) in self.pending.drain() {
            pending.task.abort();
        }
        if count > 0 {
            info!("Abandoned {} in-flight fetches", count);
        }
        count
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct EchoFetcher {
        seen: Mutex<Vec<String>>,
    }

    impl UrlFetcher for EchoFetcher {
        fn fetch(&self, request: UrlRequest) -> BoxFuture<'static, UrlResponse> {
            self.seen.lock().push(request.url.clone());
            let body = request.url;
            async move {
                UrlResponse {
                    status: 200,
                    body,
                    headers: BTreeMap::new(),
                }
            }
            .boxed()
        }
    }

    struct NeverFetcher;

    impl UrlFetcher for NeverFetcher {
        fn fetch(&self, _request: UrlRequest) -> BoxFuture<'static, UrlResponse> {
            futures::future::pending().boxed()
        }
    }

    fn request(url: &str) -> UrlRequest {
        UrlRequest {
            url: url.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_resolves_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fetcher = Arc::new(EchoFetcher {
            seen: Mutex::new(Vec::new()),
        });
        let mut fetches = FetchCorrelator::new(fetcher.clone(), tx);

        let (reply_tx, reply_rx) = oneshot::channel();
        let handle = fetches.load_url(request("https://a.test/1"), reply_tx);
        assert_eq!(fetches.in_flight(), 1);

        let done = rx.recv().await.unwrap();
        assert_eq!(done.handle, handle);
        let duplicate = FetchDone {
            handle,
            response: UrlResponse::default(),
        };
        assert!(fetches.resolve(done));
        assert!(!fetches.resolve(duplicate));
        assert_eq!(fetches.in_flight(), 0);

        let response = reply_rx.await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "https://a.test/1");
        assert_eq!(fetcher.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_handles_are_distinct() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut fetches = FetchCorrelator::new(Arc::new(NeverFetcher), tx);
        let (a, _ra) = oneshot::channel();
        let (b, _rb) = oneshot::channel();
        let h1 = fetches.load_url(request("https://a.test"), a);
        let h2 = fetches.load_url(request("https://b.test"), b);
        assert_ne!(h1, h2);
        assert_eq!(fetches.in_flight(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_fetch_never_resolves() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut fetches = FetchCorrelator::new(Arc::new(NeverFetcher), tx);
        let (reply_tx, reply_rx) = oneshot::channel();
        let handle = fetches.load_url(request("https://slow.test"), reply_tx);

        assert_eq!(fetches.abandon_all(), 1);
        assert!(reply_rx.await.is_err());
        assert!(!fetches.resolve(FetchDone {
            handle,
            response: UrlResponse::default(),
        }));
    }

    #[tokio::test]
    async fn test_offline_fetcher_reports_transport_error() {
        let response = OfflineFetcher.fetch(request("https://x.test")).await;
        assert_eq!(response.status, -1);
    }
}
