//! Deciding what to fetch and applying what comes back.

use super::cancel::CancelToken;
use super::transport::FetchRequest;
use crate::engine::Engine;
use crate::error::{CacheError, Result};
use crate::query::Query;
use crate::timeline::Coverage;
use crate::types::{Entry, IntervalKey, Timestamp};
use futures::future::{join_all, BoxFuture};
use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Normalized result of one request.
#[derive(Clone, Debug)]
pub(crate) struct FetchedPage {
    pub entries: Vec<Entry>,
    /// The response reached the request's page cap.
    pub truncated: bool,
}

impl Engine {
    /// Request for a range of the timeline, carrying the filters of `query`.
    pub(crate) fn timeline_request(&self, range: IntervalKey, query: Option<&Query>) -> FetchRequest {
        let mut params = Query {
            filters: query.map(|q| q.filters.clone()).unwrap_or_default(),
            ..Query::default()
        };
        params.from_date = Some(range.low).filter(|t| t.is_bounded());
        params.to_date = Some(range.high).filter(|t| t.is_bounded());
        params.limit = Some(self.config.fetch_limit);

        FetchRequest {
            from: params.from_date,
            to: params.to_date,
            limit: self.config.fetch_limit,
            params: self.registry.encode(&params),
        }
    }

    /// Request for a limited query, sent as is.
    pub(crate) fn query_request(&self, query: &Query) -> FetchRequest {
        FetchRequest {
            from: query.from_date,
            to: query.to_date,
            limit: query.limit.unwrap_or(self.config.fetch_limit),
            params: self.registry.encode(query),
        }
    }

    pub(crate) async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage> {
        let raw = self.transport.fetch_range(request).await?;
        Ok(FetchedPage {
            truncated: raw.len() >= request.limit,
            entries: self.normalizer.normalize(&raw),
        })
    }

    /// Identity of a backfill: the query without its cap.
    pub(crate) fn backfill_key(&self, query: &Query) -> String {
        let mut query = query.clone();
        query.limit = None;
        self.registry.encode(&query)
    }

    /// Range a backfill for `query` should close: from its lower bound up to
    /// the Last Segment, which live ingestion keeps fresh.
    pub(crate) fn backfill_range(&self, query: &Query) -> Option<IntervalKey> {
        let from = query.from_date?;
        let to = query.to_date.unwrap_or(Timestamp::MAX);
        let to = match self.state.lock().timeline.last_key() {
            Some(last) => to.min(last.low),
            None => to,
        };
        Some(IntervalKey::new(from, to))
    }

    /// Backfill everything `query` needs below the Last Segment.
    pub(crate) async fn fill_gaps(self: &Arc<Self>, query: &Query) {
        let Some(range) = self.backfill_range(query) else {
            return;
        };
        let key = self.backfill_key(query);
        Arc::clone(self)
            .backfill(range, 0, key, query.clone(), None)
            .await;
    }

    /// Close the absent ranges of `range`, recursing into whatever a capped
    /// response leaves open.
    ///
    /// The top-level call installs a fresh token for `key`, cancelling any
    /// backfill already running for it. Results that come back after the
    /// token was cancelled are dropped.
    pub(crate) fn backfill(
        self: Arc<Self>,
        range: IntervalKey,
        level: usize,
        key: String,
        query: Query,
        token: Option<CancelToken>,
    ) -> BoxFuture<'static, ()> {
        async move {
            let (absent, token) = {
                let mut state = self.state.lock();
                let absent = state.timeline.absent_ranges(Some(range.low), range.high);
                if absent.is_empty() {
                    if level == 0 {
                        state.backfills.remove(&key);
                    }
                    return;
                }
                let token = match token {
                    Some(token) => token,
                    None => {
                        let token = CancelToken::new();
                        if let Some(previous) = state.backfills.insert(key.clone(), token.clone()) {
                            previous.cancel();
                        }
                        token
                    }
                };
                (absent, token)
            };

            debug!(%key, level, gaps = absent.len(), "backfilling");

            let fetches = absent.into_iter().map(|gap| {
                let request = self.timeline_request(gap, Some(&query));
                let engine = Arc::clone(&self);
                async move { (gap, engine.fetch(&request).await) }
            });
            let results = join_all(fetches).await;

            let mut remainders = Vec::new();
            let mut changed = false;
            {
                // Superseding tokens are cancelled under this lock, so the
                // check and the merge below cannot interleave with one.
                let mut state = self.state.lock();
                if token.is_cancelled() {
                    debug!(%key, level, "discarding superseded backfill");
                    return;
                }
                for (gap, result) in results {
                    let page = match result {
                        Ok(page) => page,
                        Err(err) => {
                            warn!(%key, ?gap, ?err, "backfill fetch failed");
                            continue;
                        }
                    };
                    let Some(coverage) = Coverage::resolve(gap, page.entries, page.truncated) else {
                        continue;
                    };
                    let reached = coverage.remainder.map_or(gap.low, |rest| rest.high);
                    if reached < coverage.key.low {
                        warn!(
                            %key,
                            lost = ?IntervalKey::new(reached, coverage.key.low),
                            "second holds more entries than one page; leaving it absent"
                        );
                    }
                    remainders.extend(coverage.remainder);
                    if !coverage.key.is_empty() {
                        state.apply(coverage.key, coverage.entries);
                        changed = true;
                    }
                }
            }

            if changed {
                self.update();
            }

            let children = remainders.into_iter().map(|gap| {
                Arc::clone(&self).backfill(gap, level + 1, key.clone(), query.clone(), Some(token.clone()))
            });
            join_all(children).await;

            if level == 0 {
                let mut state = self.state.lock();
                if state.backfills.get(&key).is_some_and(|t| t.same_as(&token)) {
                    state.backfills.remove(&key);
                }
            }
        }
        .boxed()
    }

    /// Fetch everything newer than the Last Segment.
    pub(crate) async fn poll_once(&self) -> Result<bool> {
        if self.shutdown.is_cancelled() {
            return Err(CacheError::Shutdown);
        }

        let from = {
            let state = self.state.lock();
            state
                .timeline
                .last_key()
                .map(|last| last.high)
                .unwrap_or(Timestamp::MIN)
        };
        let range = IntervalKey::new(from, Timestamp::MAX);
        let page = self.fetch(&self.timeline_request(range, None)).await?;

        let Some(coverage) = Coverage::resolve(range, page.entries, page.truncated) else {
            return Ok(false);
        };
        if let Some(gap) = coverage.remainder {
            debug!(?gap, "poll response capped; leaving gap");
        }
        self.state.lock().apply(coverage.key, coverage.entries);
        self.update();
        Ok(true)
    }

    /// Poll until shutdown. A cycle starts only after the previous one
    /// finished; failures are logged and retried after `interval`.
    pub(crate) async fn run_polling(self: Arc<Self>, interval: Duration) {
        while !self.shutdown.is_cancelled() {
            if let Err(err) = self.poll_once().await {
                warn!(?err, "failed getting logs");
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        debug!("polling stopped");
    }

    /// Consume the push stream until it closes or the cache shuts down.
    ///
    /// After connecting, one poll closes whatever arrived before the stream
    /// was open.
    pub(crate) async fn run_push(self: Arc<Self>) {
        let mut stream = match self.transport.open_stream().await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(?err, "push stream unavailable");
                return;
            }
        };

        if let Err(err) = self.poll_once().await {
            warn!(?err, "catch-up fetch failed");
        }

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                message = stream.next() => match message {
                    Some(raw) => {
                        self.ingest_message(&raw);
                    }
                    None => {
                        info!("push stream closed");
                        break;
                    }
                },
            }
        }
    }

    /// Fold one push message into the timeline.
    pub(crate) fn ingest_message(&self, raw: &str) -> bool {
        let entry = match self.normalizer.normalize_message(raw) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(?err, "skipping malformed push message");
                return false;
            }
        };

        let changed = self.state.lock().push(entry);
        if changed {
            self.update();
        }
        changed
    }

    /// Fetch a limited query once and store its result as orphans.
    pub(crate) async fn fetch_orphans(self: Arc<Self>, key: String, query: Query) {
        let request = self.query_request(&query);
        match self.fetch(&request).await {
            Ok(page) => {
                let merged = self.state.lock().merge_orphan_result(&key, page.entries);
                if merged {
                    self.update();
                } else {
                    debug!(%key, "orphan result no longer wanted");
                }
            }
            Err(err) => warn!(%key, ?err, "orphan fetch failed"),
        }
    }
}
