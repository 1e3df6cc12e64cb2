//! Query stream consumption.
//!
//! ```text
//! Idle ──submit──▶ Streaming ──end of stream──▶ Done
//!                     │
//!                     └──transport error / non-success status──▶ Failed
//! ```
//!
//! Each chunk is decoded incrementally, appended to the accumulator, and the
//! whole accumulator is re-normalized and republished before the next chunk
//! is awaited. A new submission supersedes the running one: the old stream is
//! dropped and nothing it produces reaches the new accumulator.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::config::Config;
use crate::decode::Accumulator;
use crate::epoch::{Publisher, Ticket};
use crate::error::Failure;
use crate::models::{Fingerprint, SearchMode, SearchOutcome, SearchRequest};
use crate::state::{SearchEvent, SearchSnapshot};

pub struct QueryStreamConsumer {
    backend: Arc<dyn Backend>,
    publisher: Publisher<SearchSnapshot>,
    timeout: Duration,
    preserve_partial: bool,
}

impl QueryStreamConsumer {
    pub fn new(backend: Arc<dyn Backend>, config: &Config) -> Self {
        Self {
            backend,
            publisher: Publisher::new(SearchSnapshot::default()),
            timeout: config.timeouts.search(),
            preserve_partial: config.search.preserve_partial,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchSnapshot> {
        self.publisher.subscribe()
    }

    pub fn snapshot(&self) -> SearchSnapshot {
        self.publisher.snapshot()
    }

    /// Run one search to completion.
    ///
    /// An empty or whitespace-only query is rejected without any transition
    /// or request. All other failures end in a published `Failed` state.
    pub async fn submit(
        &self,
        query: &str,
        mode: SearchMode,
        fingerprint: Option<Fingerprint>,
    ) -> SearchOutcome {
        if query.trim().is_empty() {
            debug!("{}", Failure::Validation("query must not be empty".into()));
            return SearchOutcome::Rejected;
        }

        let ticket = self
            .publisher
            .begin(|epoch| SearchSnapshot::started(epoch, query, mode));
        info!(epoch = ticket.epoch, %mode, query, "search started");

        let request = SearchRequest {
            query: query.to_string(),
            mode,
            fingerprint,
        };
        let deadline = Instant::now().checked_add(self.timeout);
        let mut acc = Accumulator::new();

        let attempt = async {
            let consume = self.consume(&ticket, &request, &mut acc);
            let timed = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, consume).await,
                // past the clock's range; `timeout` saturates instead
                None => tokio::time::timeout(self.timeout, consume).await,
            };
            match timed {
                Ok(result) => result,
                Err(_) => Some(Err(Failure::Timeout {
                    after: self.timeout,
                })),
            }
        };

        let result = tokio::select! {
            biased;
            _ = ticket.token.cancelled() => None,
            result = attempt => result,
        };

        let Some(result) = result else {
            debug!(epoch = ticket.epoch, "search superseded");
            return SearchOutcome::Superseded;
        };

        match result {
            Ok(text) => self.finish_done(&ticket, text),
            Err(failure) => {
                let partial = self.preserve_partial.then(|| acc.text());
                self.finish_failed(&ticket, failure, partial)
            }
        }
    }

    /// Read the stream into `acc`. `None` means superseded.
    async fn consume(
        &self,
        ticket: &Ticket,
        request: &SearchRequest,
        acc: &mut Accumulator,
    ) -> Option<Result<String, Failure>> {
        let mut stream = match self.backend.search(request).await {
            Ok(stream) => stream,
            Err(failure) => return Some(Err(failure)),
        };

        let mut chunks = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(failure) => return Some(Err(failure)),
            };
            chunks += 1;
            let text = acc.push(&chunk);
            if !self
                .publisher
                .update(ticket, |s| s.transition(SearchEvent::Progress { text }))
            {
                // dropping the stream here releases the connection
                return None;
            }
            debug!(epoch = ticket.epoch, chunk = chunks, bytes = chunk.len(), "chunk applied");
        }

        Some(Ok(acc.finish()))
    }

    fn finish_done(&self, ticket: &Ticket, text: String) -> SearchOutcome {
        let published = self.publisher.update(ticket, |s| {
            s.transition(SearchEvent::Finished { text: text.clone() })
        });
        if !published {
            return SearchOutcome::Superseded;
        }
        info!(epoch = ticket.epoch, chars = text.chars().count(), "search done");
        SearchOutcome::Done { text }
    }

    fn finish_failed(
        &self,
        ticket: &Ticket,
        failure: Failure,
        partial: Option<String>,
    ) -> SearchOutcome {
        let reason = failure.to_string();
        let published = self.publisher.update(ticket, |s| {
            s.transition(SearchEvent::Failed {
                reason: reason.clone(),
                partial,
            })
        });
        if !published {
            return SearchOutcome::Superseded;
        }
        warn!(epoch = ticket.epoch, kind = failure.kind(), "search failed: {}", reason);
        SearchOutcome::Failed { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ChunkStream;
    use crate::models::{FileBuffer, ServerAck};
    use crate::state::SearchState;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Search backend that hands out pre-registered chunk streams in order.
    struct StreamBackend {
        streams: Mutex<Vec<Result<ChunkStream, Failure>>>,
        requests: Mutex<Vec<SearchRequest>>,
    }

    impl StreamBackend {
        fn new(streams: Vec<Result<ChunkStream, Failure>>) -> Self {
            Self {
                streams: Mutex::new(streams),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Backend for StreamBackend {
        async fn upload(
            &self,
            _file: &FileBuffer,
            _fingerprint: &Fingerprint,
        ) -> Result<ServerAck, Failure> {
            unreachable!("search tests never upload")
        }

        async fn search(&self, request: &SearchRequest) -> Result<ChunkStream, Failure> {
            self.requests.lock().unwrap().push(request.clone());
            self.streams.lock().unwrap().remove(0)
        }
    }

    fn chunks(parts: &[&'static str]) -> ChunkStream {
        let items: Vec<Result<Bytes, Failure>> = parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        futures::stream::iter(items).boxed()
    }

    /// A stream fed by the test through a channel.
    fn channel_stream() -> (mpsc::UnboundedSender<Result<Bytes, Failure>>, ChunkStream) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stream = futures::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed();
        (tx, stream)
    }

    fn setup(
        streams: Vec<Result<ChunkStream, Failure>>,
    ) -> (Arc<StreamBackend>, QueryStreamConsumer) {
        let backend = Arc::new(StreamBackend::new(streams));
        let consumer = QueryStreamConsumer::new(backend.clone(), &Config::default());
        (backend, consumer)
    }

    #[tokio::test]
    async fn test_stream_accumulates() {
        let (_, consumer) = setup(vec![Ok(chunks(&["Cats are", " mammals."]))]);
        let outcome = consumer.submit("cats", SearchMode::Semantic, None).await;
        assert_eq!(
            outcome,
            SearchOutcome::Done {
                text: "Cats are mammals.".into()
            }
        );
        let snap = consumer.snapshot();
        assert_eq!(snap.state, SearchState::Done);
        assert_eq!(snap.results, vec!["Cats are mammals."]);
    }

    #[tokio::test]
    async fn test_unrepresentable_deadline_still_completes() {
        let backend = Arc::new(StreamBackend::new(vec![Ok(chunks(&["Cats are", " mammals."]))]));
        let mut config = Config::default();
        config.timeouts.search_secs = u64::MAX;
        let consumer = QueryStreamConsumer::new(backend, &config);

        let outcome = consumer.submit("cats", SearchMode::Semantic, None).await;
        assert_eq!(
            outcome,
            SearchOutcome::Done {
                text: "Cats are mammals.".into()
            }
        );
    }

    #[tokio::test]
    async fn test_split_multibyte_chunk() {
        let bytes = "h\u{e9}ll".as_bytes();
        let (a, b) = bytes.split_at(2);
        let parts: Vec<Result<Bytes, Failure>> = vec![
            Ok(Bytes::copy_from_slice(a)),
            Ok(Bytes::copy_from_slice(b)),
            Ok(Bytes::from_static(b"o")),
        ];
        let (_, consumer) = setup(vec![Ok(futures::stream::iter(parts).boxed())]);
        let outcome = consumer.submit("hello", SearchMode::Semantic, None).await;
        assert_eq!(
            outcome,
            SearchOutcome::Done {
                text: "h\u{e9}llo".into()
            }
        );
    }

    #[tokio::test]
    async fn test_blank_query_is_rejected() {
        let (backend, consumer) = setup(vec![]);
        assert_eq!(
            consumer.submit("   \t", SearchMode::Keyword, None).await,
            SearchOutcome::Rejected
        );
        assert_eq!(consumer.snapshot().state, SearchState::Idle);
        assert_eq!(backend.request_count(), 0);
    }

    #[tokio::test]
    async fn test_server_failure_shows_single_error_entry() {
        let (_, consumer) = setup(vec![Err(Failure::server(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
        ))]);
        let outcome = consumer.submit("cats", SearchMode::Semantic, None).await;
        assert_eq!(
            outcome,
            SearchOutcome::Failed {
                reason: "Internal Server Error".into()
            }
        );
        let snap = consumer.snapshot();
        assert_eq!(snap.results, vec!["Error: Internal Server Error"]);
    }

    #[tokio::test]
    async fn test_mid_stream_error_discards_partial_by_default() {
        let items: Vec<Result<Bytes, Failure>> = vec![
            Ok(Bytes::from_static(b"Cats are")),
            Err(Failure::Transport("connection reset".into())),
        ];
        let (_, consumer) = setup(vec![Ok(futures::stream::iter(items).boxed())]);
        consumer.submit("cats", SearchMode::Semantic, None).await;
        assert_eq!(consumer.snapshot().results, vec!["Error: connection reset"]);
    }

    #[tokio::test]
    async fn test_mid_stream_error_preserves_partial_when_configured() {
        let items: Vec<Result<Bytes, Failure>> = vec![
            Ok(Bytes::from_static(b"Cats are")),
            Err(Failure::Transport("connection reset".into())),
        ];
        let backend = Arc::new(StreamBackend::new(vec![Ok(futures::stream::iter(items).boxed())]));
        let mut config = Config::default();
        config.search.preserve_partial = true;
        let consumer = QueryStreamConsumer::new(backend, &config);
        consumer.submit("cats", SearchMode::Semantic, None).await;
        assert_eq!(
            consumer.snapshot().results,
            vec!["Cats are", "Error: connection reset"]
        );
    }

    #[tokio::test]
    async fn test_fingerprint_is_forwarded() {
        let (backend, consumer) = setup(vec![Ok(chunks(&["ok"]))]);
        let fp = crate::fingerprint::compute_fingerprint(b"doc");
        consumer
            .submit("cats", SearchMode::Keyword, Some(fp.clone()))
            .await;
        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[0].fingerprint, Some(fp));
        assert_eq!(requests[0].mode, SearchMode::Keyword);
    }

    #[tokio::test]
    async fn test_new_search_supersedes_old_stream() {
        let (old_tx, old_stream) = channel_stream();
        let (backend, consumer) =
            setup(vec![Ok(old_stream), Ok(chunks(&["Dogs bark."]))]);
        let consumer = Arc::new(consumer);

        let first = tokio::spawn({
            let consumer = consumer.clone();
            async move { consumer.submit("cats", SearchMode::Semantic, None).await }
        });

        old_tx.send(Ok(Bytes::from_static(b"Cats"))).unwrap();
        let mut rx = consumer.subscribe();
        rx.wait_for(|s| s.text() == "Cats").await.unwrap();

        let second = consumer.submit("dogs", SearchMode::Semantic, None).await;
        assert_eq!(
            second,
            SearchOutcome::Done {
                text: "Dogs bark.".into()
            }
        );
        assert_eq!(first.await.unwrap(), SearchOutcome::Superseded);

        // The old stream was dropped, so late chunks have nowhere to go
        assert!(old_tx.send(Ok(Bytes::from_static(b" purr"))).is_err());
        let snap = consumer.snapshot();
        assert_eq!(snap.query.as_deref(), Some("dogs"));
        assert_eq!(snap.results, vec!["Dogs bark."]);
        assert_eq!(backend.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stream_times_out() {
        let (_tx, stalled) = channel_stream();
        let backend = Arc::new(StreamBackend::new(vec![Ok(stalled)]));
        let mut config = Config::default();
        config.timeouts.search_secs = 5;
        let consumer = QueryStreamConsumer::new(backend, &config);
        let outcome = consumer.submit("cats", SearchMode::Semantic, None).await;
        assert_eq!(
            outcome,
            SearchOutcome::Failed {
                reason: "timed out after 5s".into()
            }
        );
        assert_eq!(consumer.snapshot().results, vec!["Error: timed out after 5s"]);
    }
}
