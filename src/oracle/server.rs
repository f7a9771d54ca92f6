//! Reference scoring server speaking the oracle protocol.
//!
//! Serves a [`TrigramModel`] over TCP, one thread per connection. Used by the
//! `serve` subcommand and by the integration tests.

use super::local::TrigramModel;
use super::protocol::{self, Request, WireNGram};
use crate::error::OracleError;
use parking_lot::{Mutex, RwLock};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Counters shared by all connection handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub connections: u64,
    pub prob_requests: u64,
    pub batch_requests: u64,
    pub ngrams_scored: u64,
}

pub struct OracleServer {
    listener: TcpListener,
    model: Arc<RwLock<TrigramModel>>,
    stats: Arc<Mutex<ServerStats>>,
}

/// Cloneable view of a running server.
#[derive(Clone)]
pub struct ServerHandle {
    addr: SocketAddr,
    model: Arc<RwLock<TrigramModel>>,
    stats: Arc<Mutex<ServerStats>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stats(&self) -> ServerStats {
        *self.stats.lock()
    }

    /// Swap the served model. Connections see it from their next request.
    pub fn replace_model(&self, model: TrigramModel) {
        *self.model.write() = model;
    }
}

impl OracleServer {
    pub fn bind<A: ToSocketAddrs>(addr: A, model: TrigramModel) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            model: Arc::new(RwLock::new(model)),
            stats: Arc::new(Mutex::new(ServerStats::default())),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> io::Result<ServerHandle> {
        Ok(ServerHandle {
            addr: self.local_addr()?,
            model: Arc::clone(&self.model),
            stats: Arc::clone(&self.stats),
        })
    }

    /// Accept connections until the listener fails.
    pub fn serve(self) -> io::Result<()> {
        tracing::info!(target: "phrasecore::server", addr = ?self.listener.local_addr().ok(), "scoring oracle listening");
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(target: "phrasecore::server", error = %err, "accept failed");
                    continue;
                }
            };
            self.stats.lock().connections += 1;

            let model = Arc::clone(&self.model);
            let stats = Arc::clone(&self.stats);
            thread::spawn(move || {
                let peer = stream.peer_addr().ok();
                if let Err(err) = handle_connection(stream, &model, &stats) {
                    tracing::warn!(target: "phrasecore::server", ?peer, error = %err, "connection dropped");
                } else {
                    tracing::debug!(target: "phrasecore::server", ?peer, "connection closed");
                }
            });
        }
        Ok(())
    }

    /// Run [`Self::serve`] on a background thread.
    pub fn spawn(self) -> io::Result<(ServerHandle, JoinHandle<io::Result<()>>)> {
        let handle = self.handle()?;
        let join = thread::spawn(move || self.serve());
        Ok((handle, join))
    }
}

fn handle_connection(
    stream: TcpStream,
    model: &RwLock<TrigramModel>,
    stats: &Mutex<ServerStats>,
) -> Result<(), OracleError> {
    let io_err = |source: io::Error| OracleError::Io {
        attempts: 1,
        source,
    };
    let reader = BufReader::new(stream.try_clone().map_err(io_err)?);
    let mut writer = BufWriter::new(stream);

    for line in reader.lines() {
        let line = line.map_err(io_err)?;
        let request = protocol::parse_request(&line)?;

        let values = {
            let model = model.read();
            match &request {
                Request::Prob(ngram) => vec![score_ngram(&model, ngram)],
                Request::Batch(ngrams) => ngrams.iter().map(|n| score_ngram(&model, n)).collect(),
            }
        };

        {
            let mut stats = stats.lock();
            match request {
                Request::Prob(_) => stats.prob_requests += 1,
                Request::Batch(_) => stats.batch_requests += 1,
            }
            stats.ngrams_scored += values.len() as u64;
        }

        writer
            .write_all(&protocol::encode_reply(&values))
            .and_then(|()| writer.flush())
            .map_err(io_err)?;
    }
    Ok(())
}

fn score_ngram(model: &TrigramModel, ngram: &WireNGram) -> f32 {
    let history: Vec<&str> = ngram.history.iter().map(String::as_str).collect();
    model.log10_prob(&ngram.event, &history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn model() -> TrigramModel {
        let mut model = TrigramModel::new();
        model.train(&["a b c", "a b d"]);
        model
    }

    fn read_floats(stream: &mut TcpStream, count: usize) -> Vec<f32> {
        let mut buf = vec![0u8; count * protocol::REPLY_WIDTH];
        stream.read_exact(&mut buf).unwrap();
        protocol::decode_reply(&buf)
    }

    #[test]
    fn test_prob_and_batch_replies() {
        let server = OracleServer::bind("127.0.0.1:0", model()).unwrap();
        let (handle, _join) = server.spawn().unwrap();
        let mut stream = TcpStream::connect(handle.local_addr()).unwrap();

        stream.write_all(b"prob c a b\n").unwrap();
        let p = read_floats(&mut stream, 1);
        assert!((p[0] - 0.5f32.log10()).abs() < 1e-6);

        stream.write_all(b"batch 3 c b a 1 a\n").unwrap();
        let batch = read_floats(&mut stream, 2);
        assert_eq!(batch[0], p[0]);

        let stats = handle.stats();
        assert_eq!(stats.prob_requests, 1);
        assert_eq!(stats.batch_requests, 1);
        assert_eq!(stats.ngrams_scored, 3);
        assert_eq!(stats.connections, 1);
    }

    #[test]
    fn test_protocol_error_drops_connection() {
        let server = OracleServer::bind("127.0.0.1:0", model()).unwrap();
        let (handle, _join) = server.spawn().unwrap();
        let mut stream = TcpStream::connect(handle.local_addr()).unwrap();

        stream.write_all(b"hello\n").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).unwrap_or(0), 0);
    }

    #[test]
    fn test_replace_model() {
        let server = OracleServer::bind("127.0.0.1:0", TrigramModel::new()).unwrap();
        let (handle, _join) = server.spawn().unwrap();
        let mut stream = TcpStream::connect(handle.local_addr()).unwrap();

        stream.write_all(b"prob c a b\n").unwrap();
        assert_eq!(read_floats(&mut stream, 1)[0], -9.0);

        handle.replace_model(model());
        stream.write_all(b"prob c a b\n").unwrap();
        assert!(read_floats(&mut stream, 1)[0] > -1.0);
    }
}
