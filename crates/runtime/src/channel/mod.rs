//! Command channel to the helper's socket server
//!
//! # Protocol
//!
//! Each request is one JSON object followed by `\n`. The reply is a single JSON
//! document `{"status": <int>, "value": <any>}` that may arrive in any number
//! of chunks. After every chunk the channel parses the smallest prefix that
//! forms a complete document; running out of input means "not complete yet".
//! Bytes after that document are logged and discarded.
//!
//! Replies carry no correlation id, so at most one request may be in flight.
//! The I/O half sits behind an async mutex: a second caller waits until the
//! first reply has been consumed. The helper is assumed never to emit two
//! complete documents back to back for one request.
//!
//! # Failure modes
//!
//! - No bytes for `idle_timeout` → [`Error::TransportTimeout`] with the partial text
//! - Socket closed or read error → [`Error::TransportCrashed`]; every later call fails the same way.
//!   Unless the channel is closing, the reason is also published on [`CommandChannel::subscribe_crash`].
//! - Nonzero status → [`Error::Remote`]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uia_protocol::{CommandKind, HelperRequest, HelperResponse};

use crate::error::{Error, Result};


/// Default idle window between response chunks.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

struct ChannelIo {
	writer: Box<dyn AsyncWrite + Send + Unpin>,
	chunks: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Request/response client for the helper socket.
pub struct CommandChannel {
	io: Mutex<ChannelIo>,
	closing: Arc<AtomicBool>,
	crashed: Arc<AtomicBool>,
	crash: Arc<watch::Sender<Option<String>>>,
	idle_timeout: Duration,
	reader: JoinHandle<()>,
}

impl std::fmt::Debug for CommandChannel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CommandChannel")
			.field("idle_timeout", &self.idle_timeout)
			.field("closing", &self.closing.load(Ordering::SeqCst))
			.field("crashed", &self.crashed.load(Ordering::SeqCst))
			.finish()
	}
}

impl CommandChannel {
	/// Connects to the forwarded helper socket on localhost.
	///
	/// # Errors
	///
	/// Returns `Error::ConnectionFailed` if the socket cannot be opened.
	pub async fn connect(port: u16) -> Result<Self> {
		debug!(target = "uia.channel", port, "connecting to helper socket");
		let stream = TcpStream::connect(("127.0.0.1", port))
			.await
			.map_err(|e| Error::ConnectionFailed(format!("127.0.0.1:{port}: {e}")))?;
		let _ = stream.set_nodelay(true);
		let (read, write) = stream.into_split();
		Ok(Self::from_parts(read, write))
	}

	/// Wraps an already connected bidirectional stream.
	pub fn from_stream<S>(stream: S) -> Self
	where
		S: AsyncRead + AsyncWrite + Send + 'static,
	{
		let (read, write) = tokio::io::split(stream);
		Self::from_parts(read, write)
	}

	pub fn from_parts<R, W>(read: R, write: W) -> Self
	where
		R: AsyncRead + Send + Unpin + 'static,
		W: AsyncWrite + Send + Unpin + 'static,
	{
		let (tx, rx) = mpsc::unbounded_channel();
		let closing = Arc::new(AtomicBool::new(false));
		let crashed = Arc::new(AtomicBool::new(false));
		let crash = Arc::new(watch::channel(None).0);
		let reader = tokio::spawn(read_chunks(
			read,
			tx,
			Lifeline {
				closing: closing.clone(),
				crashed: crashed.clone(),
				crash: crash.clone(),
			},
		));

		Self {
			io: Mutex::new(ChannelIo {
				writer: Box::new(write),
				chunks: rx,
			}),
			closing,
			crashed,
			crash,
			idle_timeout: DEFAULT_COMMAND_TIMEOUT,
			reader,
		}
	}

	pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
		self.idle_timeout = idle_timeout;
		self
	}

	/// Marks the channel as closing so a later disconnect is not reported as a crash.
	pub fn set_closing(&self, closing: bool) {
		self.closing.store(closing, Ordering::SeqCst);
	}

	pub fn is_crashed(&self) -> bool {
		self.crashed.load(Ordering::SeqCst)
	}

	/// Holds the failure reason once the socket dies while not closing.
	///
	/// Fires even when no command is in flight.
	pub fn subscribe_crash(&self) -> watch::Receiver<Option<String>> {
		self.crash.subscribe()
	}

	/// Sends one command and waits for its reply.
	pub async fn send_command(&self, kind: CommandKind, extra: Map<String, Value>) -> Result<Value> {
		self.send(HelperRequest { cmd: kind, extra }).await
	}

	/// Sends `{"cmd":"action","action":..,"params":..}`.
	pub async fn send_action(&self, action: &str, params: Value) -> Result<Value> {
		self.send(HelperRequest::action(action, params)).await
	}

	/// Asks the helper to leave its socket loop.
	pub async fn shutdown(&self) -> Result<Value> {
		self.send(HelperRequest::shutdown()).await
	}

	async fn send(&self, request: HelperRequest) -> Result<Value> {
		let line = request.to_line()?;
		let mut io = self.io.lock().await;
		if self.is_crashed() {
			return Err(Error::TransportCrashed("helper socket is closed".into()));
		}

		let mut stale = 0usize;
		while io.chunks.try_recv().is_ok() {
			stale += 1;
		}
		if stale > 0 {
			debug!(target = "uia.channel", stale, "dropped unsolicited response chunks");
		}

		debug!(
			target = "uia.channel",
			"Sending command to helper: {}",
			String::from_utf8_lossy(&line).trim_end()
		);
		io.writer
			.write_all(&line)
			.await
			.map_err(|e| Error::TransportCrashed(format!("write failed: {e}")))?;
		io.writer
			.flush()
			.await
			.map_err(|e| Error::TransportCrashed(format!("flush failed: {e}")))?;

		let mut received: Vec<u8> = Vec::new();
		let document = loop {
			match tokio::time::timeout(self.idle_timeout, io.chunks.recv()).await {
				Err(_) => {
					return Err(Error::TransportTimeout {
						idle: self.idle_timeout,
						partial: String::from_utf8_lossy(&received).into_owned(),
					});
				}
				Ok(None) => {
					return Err(Error::TransportCrashed("socket closed while waiting for a reply".into()));
				}
				Ok(Some(chunk)) => {
					received.extend_from_slice(&chunk);
					if let Some(doc) = first_document(&received) {
						break doc;
					}
				}
			}
		};
		drop(io);

		debug!(target = "uia.channel", "Received command result from helper: {document}");
		let response = HelperResponse::from_document(document);
		if response.is_success() {
			Ok(response.value)
		} else {
			Err(Error::Remote {
				kind: response.kind(),
				message: response.message(),
			})
		}
	}
}

/// Parses the first complete JSON document in `received`, if there is one yet.
fn first_document(received: &[u8]) -> Option<Value> {
	let mut stream = serde_json::Deserializer::from_slice(received).into_iter::<Value>();
	match stream.next()? {
		Ok(doc) => {
			let rest = &received[stream.byte_offset()..];
			if !rest.trim_ascii().is_empty() {
				warn!(
					target = "uia.channel",
					discarded = %String::from_utf8_lossy(rest),
					"dropping bytes after the reply document"
				);
			}
			Some(doc)
		}
		// A malformed prefix stays pending; the idle timeout reports it.
		Err(_) => None,
	}
}

impl Drop for CommandChannel {
	fn drop(&mut self) {
		self.reader.abort();
	}
}

/// Flags the reader task updates when the socket goes away.
struct Lifeline {
	closing: Arc<AtomicBool>,
	crashed: Arc<AtomicBool>,
	crash: Arc<watch::Sender<Option<String>>>,
}

async fn read_chunks<R>(mut read: R, tx: mpsc::UnboundedSender<Vec<u8>>, lifeline: Lifeline)
where
	R: AsyncRead + Unpin,
{
	let mut buf = vec![0u8; 16 * 1024];
	let reason = loop {
		match read.read(&mut buf).await {
			Ok(0) => break "connection closed".to_string(),
			Ok(n) => {
				if tx.send(buf[..n].to_vec()).is_err() {
					return;
				}
			}
			Err(e) => break e.to_string(),
		}
	};

	lifeline.crashed.store(true, Ordering::SeqCst);
	if lifeline.closing.load(Ordering::SeqCst) {
		debug!(target = "uia.channel", %reason, "helper socket closed");
	} else {
		error!(target = "uia.channel", %reason, "helper socket transport crashed");
		lifeline.crash.send_replace(Some(reason));
	}
}
