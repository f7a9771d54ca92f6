//! Client for a remote n-gram scoring service.
//!
//! # Lifecycle
//!
//! `connect` → `score`/`score_batch` → `shutdown`. Connecting retries a fixed
//! number of times with a fixed delay. Once any exchange fails for good
//! (retries exhausted, connection closed mid-reply) the client is latched in
//! its failed state and every later call returns [`OracleError::Failed`]:
//! a worker that lost its language model must not keep decoding.
//!
//! # Caching
//!
//! Every resolved context is kept in an [`NGramCache`] for the lifetime of the
//! client, so a context is sent over the wire at most once.

use super::protocol::{self, REPLY_WIDTH};
use super::{ContextSequence, ContextToken, NGramCache, NGramOracle, NGramScore};
use crate::error::OracleError;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::thread;
use std::time::Duration;

/// How `score_batch` talks to the server for uncached contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchMode {
    /// Group uncached contexts into `batch` requests of up to `batch_size`.
    Batched,
    /// One `prob` request per uncached context.
    #[default]
    Sequential,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OracleSettings {
    /// N-gram order of the served model.
    pub order: usize,
    pub batch_size: usize,
    pub batch_mode: BatchMode,
    /// Attempts for connecting and for each failing read.
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            order: 3,
            batch_size: 100,
            batch_mode: BatchMode::Sequential,
            max_attempts: 5,
            retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Connected,
    Failed,
}

/// Stateful scoring client over any duplex byte stream.
pub struct ScoringClient<S: Read + Write> {
    stream: S,
    settings: OracleSettings,
    cache: NGramCache,
    state: ClientState,
    requests_sent: u64,
}

impl ScoringClient<TcpStream> {
    /// Open a connection to `host:port`.
    ///
    /// # Errors
    /// `OracleError::Connect` once `max_attempts` connection attempts failed.
    /// Callers must treat this as fatal for the worker.
    pub fn connect(host: &str, port: u16, settings: OracleSettings) -> Result<Self, OracleError> {
        let addr = format!("{host}:{port}");
        let max_attempts = settings.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match TcpStream::connect(&addr) {
                Ok(stream) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        tracing::debug!(target: "phrasecore::oracle", error = %err, "could not set TCP_NODELAY");
                    }
                    tracing::info!(target: "phrasecore::oracle", %addr, attempt, "connected to scoring oracle");
                    return Ok(Self::with_stream(stream, settings));
                }
                Err(source) if attempt >= max_attempts => {
                    tracing::warn!(target: "phrasecore::oracle", %addr, attempt, error = %source, "giving up on scoring oracle");
                    return Err(OracleError::Connect {
                        addr,
                        attempts: attempt,
                        source,
                    });
                }
                Err(err) => {
                    tracing::warn!(target: "phrasecore::oracle", %addr, attempt, error = %err, "connect failed, retrying");
                    thread::sleep(settings.retry_delay);
                }
            }
        }
    }

    /// Close the connection. The client cannot be used afterwards.
    pub fn shutdown(self) -> Result<(), OracleError> {
        tracing::debug!(
            target: "phrasecore::oracle",
            requests = self.requests_sent,
            cached = self.cache.len(),
            "closing scoring oracle connection"
        );
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // The peer may already be gone; there is nothing left to flush.
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(source) => Err(OracleError::Io {
                attempts: 1,
                source,
            }),
        }
    }
}

impl<S: Read + Write> ScoringClient<S> {
    /// Wrap an already-connected stream.
    pub fn with_stream(stream: S, settings: OracleSettings) -> Self {
        Self {
            stream,
            settings,
            cache: NGramCache::new(),
            state: ClientState::Connected,
            requests_sent: 0,
        }
    }

    pub fn settings(&self) -> &OracleSettings {
        &self.settings
    }

    pub fn cache(&self) -> &NGramCache {
        &self.cache
    }

    /// Round trips made so far.
    pub fn requests_sent(&self) -> u64 {
        self.requests_sent
    }

    pub fn is_failed(&self) -> bool {
        self.state == ClientState::Failed
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    fn ensure_usable(&self) -> Result<(), OracleError> {
        match self.state {
            ClientState::Connected => Ok(()),
            ClientState::Failed => Err(OracleError::Failed),
        }
    }

    fn score_tokens(&mut self, tokens: &[ContextToken]) -> Result<NGramScore, OracleError> {
        if tokens.is_empty() {
            return Ok(NGramScore::EMPTY);
        }
        if let Some(hit) = self.cache.get(tokens) {
            return Ok(hit);
        }

        let request = protocol::encode_prob_request(tokens);
        let raw = self.round_trip(&request, 1)?;
        let prob = protocol::floor_score(protocol::transform_log10(raw[0]));
        Ok(self.cache.insert(tokens, prob))
    }

    /// Send one request line and read `count` floats back. Any failure latches
    /// the client into its failed state.
    fn round_trip(&mut self, request: &str, count: usize) -> Result<Vec<f32>, OracleError> {
        let result = self.exchange(request, count);
        if result.is_err() {
            self.state = ClientState::Failed;
        }
        result
    }

    fn exchange(&mut self, request: &str, count: usize) -> Result<Vec<f32>, OracleError> {
        self.requests_sent += 1;
        self.stream
            .write_all(request.as_bytes())
            .and_then(|()| self.stream.flush())
            .map_err(|source| OracleError::Io {
                attempts: 1,
                source,
            })?;

        let mut reply = vec![0u8; count * REPLY_WIDTH];
        self.read_reply(&mut reply)?;
        Ok(protocol::decode_reply(&reply))
    }

    /// Fill `buf` completely, tolerating partial reads and transient errors.
    fn read_reply(&mut self, buf: &mut [u8]) -> Result<(), OracleError> {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut filled = 0;
        let mut errors = 0;

        while filled < buf.len() {
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(OracleError::ShortReply {
                        expected: buf.len(),
                        received: filled,
                    })
                }
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => {
                    errors += 1;
                    if errors >= max_attempts {
                        return Err(OracleError::Io {
                            attempts: errors,
                            source,
                        });
                    }
                    tracing::warn!(target: "phrasecore::oracle", attempt = errors, error = %source, "read from scoring oracle failed, retrying");
                    thread::sleep(self.settings.retry_delay);
                }
            }
        }
        Ok(())
    }

    fn dispatch_batched(
        &mut self,
        pending: &[&[ContextToken]],
        probs: &mut Vec<f32>,
    ) -> Result<(), OracleError> {
        for chunk in pending.chunks(self.settings.batch_size.max(1)) {
            tracing::debug!(target: "phrasecore::oracle", contexts = chunk.len(), "sending batch request");
            let request = protocol::encode_batch_request(chunk);
            let raw = self.round_trip(&request, chunk.len())?;
            for (tokens, value) in chunk.iter().zip(raw) {
                let prob = protocol::floor_score(protocol::transform_log10(value));
                probs.push(self.cache.insert(tokens, prob).prob);
            }
        }
        Ok(())
    }
}

impl<S: Read + Write> NGramOracle for ScoringClient<S> {
    fn order(&self) -> usize {
        self.settings.order
    }

    /// Score one context, from the cache when possible.
    fn score(&mut self, context: &ContextSequence) -> Result<NGramScore, OracleError> {
        self.ensure_usable()?;
        let order = self.settings.order;
        self.score_tokens(context.truncated(order))
    }

    /// Score many contexts, sending each distinct uncached context once.
    /// Results come back in input order.
    fn score_batch(&mut self, contexts: &[ContextSequence]) -> Result<Vec<f32>, OracleError> {
        self.ensure_usable()?;
        let order = self.settings.order;

        let mut results = vec![0.0f32; contexts.len()];
        let mut pending: Vec<&[ContextToken]> = Vec::new();
        let mut pending_slot: AHashMap<&[ContextToken], usize> = AHashMap::new();
        let mut waiting: Vec<(usize, usize)> = Vec::new();

        for (i, context) in contexts.iter().enumerate() {
            let tokens = context.truncated(order);
            if tokens.is_empty() {
                continue;
            }
            if let Some(hit) = self.cache.get(tokens) {
                results[i] = hit.prob;
                continue;
            }
            let slot = *pending_slot.entry(tokens).or_insert_with(|| {
                pending.push(tokens);
                pending.len() - 1
            });
            waiting.push((i, slot));
        }

        tracing::debug!(
            target: "phrasecore::oracle",
            total = contexts.len(),
            uncached = pending.len(),
            mode = ?self.settings.batch_mode,
            "scoring context batch"
        );

        let mut probs = Vec::with_capacity(pending.len());
        match self.settings.batch_mode {
            BatchMode::Batched => self.dispatch_batched(&pending, &mut probs)?,
            BatchMode::Sequential => {
                for tokens in &pending {
                    probs.push(self.score_tokens(tokens)?.prob);
                }
            }
        }

        for (i, slot) in waiting {
            results[i] = probs[slot];
        }
        Ok(results)
    }
}
