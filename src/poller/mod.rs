pub mod parsers;

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::{SourceConfig, FETCH_TIMEOUT_SECS};
use crate::error::Result;
use crate::types::RawDraw;

/// One poller per configured source: an immediate fetch, then a fixed-interval
/// timer. Every failed tick is simply dropped (the next tick is the retry),
/// so a flaky upstream degrades to a slower copy of the stream, never an
/// error storm.
pub struct SourcePoller {
    cfg: SourceConfig,
    client: reqwest::Client,
    raw_tx: mpsc::Sender<RawDraw>,
    shutdown: watch::Receiver<bool>,
}

impl SourcePoller {
    pub fn new(
        cfg: SourceConfig,
        raw_tx: mpsc::Sender<RawDraw>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .pool_max_idle_per_host(1);
        if cfg.skip_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if !cfg.headers.is_empty() {
            let mut headers = HeaderMap::new();
            for (name, value) in &cfg.headers {
                if let (Ok(n), Ok(v)) = (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    headers.insert(n, v);
                }
            }
            builder = builder.default_headers(headers);
        }

        Ok(Self {
            client: builder.build()?,
            cfg,
            raw_tx,
            shutdown,
        })
    }

    pub async fn run(mut self) {
        info!(source = %self.cfg.name, interval_ms = self.cfg.interval_ms, "poller started");
        self.poll_once().await;

        let mut ticker = interval(Duration::from_millis(self.cfg.interval_ms));
        ticker.tick().await; // consume the immediate tick; the first fetch already ran

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(source = %self.cfg.name, "poller stopped");
    }

    async fn poll_once(&self) {
        let resp = match self.client.get(&self.cfg.url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(source = %self.cfg.name, "poll transport error: {e}");
                return;
            }
        };
        if resp.status() != reqwest::StatusCode::OK {
            debug!(source = %self.cfg.name, status = %resp.status(), "poll dropped on non-200");
            return;
        }
        let body = match resp.bytes().await {
            Ok(b) => b,
            Err(e) => {
                debug!(source = %self.cfg.name, "poll body read error: {e}");
                return;
            }
        };

        let Some(raw) = self.cfg.parser.parse(&body, &self.cfg.name) else {
            debug!(source = %self.cfg.name, "poll yielded no record");
            return;
        };

        if let Err(e) = self.raw_tx.send(raw).await {
            warn!(source = %self.cfg.name, "ingest channel closed: {e}");
        }
    }
}
