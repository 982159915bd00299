// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Attached I/O: a bidirectional byte channel to the main container's
//! standard streams.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tether_k8s::{BoxedReader, BoxedWriter, K8sClient};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, info, instrument, warn};

use crate::controller::Deployment;
use crate::error::{AttachError, TransportBrokenError};
use crate::phase::Phase;

/// Open the attach session for `deployment`'s main container. Fails with
/// `NotRunning` unless the deployment is in `Running`.
///
/// `closed` ends the channel: once cancelled, reads return end of stream and
/// writes fail.
#[instrument(skip(client, deployment, closed), fields(pod = %deployment.name()))]
pub async fn attach(
	client: &dyn K8sClient,
	deployment: &Deployment,
	closed: CancellationToken,
) -> Result<DuplexChannel, AttachError> {
	let phase = deployment.phase();
	if phase != Phase::Running {
		return Err(AttachError::not_running(phase));
	}

	let process = client
		.attach(
			deployment.name(),
			deployment.namespace(),
			deployment.main_container(),
		)
		.await
		.map_err(|e| AttachError::from_k8s(&e))?;

	info!(container = %deployment.main_container(), "attached to main container");
	Ok(DuplexChannel::new(
		process.stdin,
		process.stdout,
		process.stderr,
		closed,
	))
}

/// Read half of a [`DuplexChannel`]: the workload's standard output.
pub struct ChannelReader {
	inner: BoxedReader,
	token: CancellationToken,
	closed: Pin<Box<WaitForCancellationFutureOwned>>,
	finished: Arc<AtomicBool>,
}

impl ChannelReader {
	fn new(inner: BoxedReader, closed: CancellationToken) -> Self {
		Self {
			inner,
			token: closed.clone(),
			closed: Box::pin(closed.cancelled_owned()),
			finished: Arc::new(AtomicBool::new(false)),
		}
	}

	/// Whether end of stream has been reached.
	pub fn is_finished(&self) -> bool {
		self.finished.load(Ordering::SeqCst)
	}
}

impl AsyncRead for ChannelReader {
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut ReadBuf<'_>,
	) -> Poll<io::Result<()>> {
		let this = self.get_mut();
		if this.finished.load(Ordering::SeqCst) || this.token.is_cancelled() {
			return Poll::Ready(Ok(()));
		}
		if this.closed.as_mut().poll(cx).is_ready() {
			return Poll::Ready(Ok(()));
		}

		// A zero-length read says nothing about end of stream.
		if buf.remaining() == 0 {
			return Poll::Ready(Ok(()));
		}

		let before = buf.filled().len();
		match this.inner.as_mut().poll_read(cx, buf) {
			Poll::Ready(Ok(())) => {
				if buf.filled().len() == before {
					this.finished.store(true, Ordering::SeqCst);
				}
				Poll::Ready(Ok(()))
			}
			Poll::Ready(Err(e)) => Poll::Ready(Err(broken(e))),
			Poll::Pending => Poll::Pending,
		}
	}
}

/// Write half of a [`DuplexChannel`]: the workload's standard input.
pub struct ChannelWriter {
	inner: Option<BoxedWriter>,
	closed: CancellationToken,
}

impl ChannelWriter {
	fn new(inner: BoxedWriter, closed: CancellationToken) -> Self {
		Self {
			inner: Some(inner),
			closed,
		}
	}

	fn writer(&mut self) -> io::Result<&mut BoxedWriter> {
		if self.closed.is_cancelled() {
			return Err(TransportBrokenError::new("channel closed").into_io(io::ErrorKind::BrokenPipe));
		}
		self.inner.as_mut().ok_or_else(|| {
			TransportBrokenError::new("write side already closed").into_io(io::ErrorKind::BrokenPipe)
		})
	}
}

impl AsyncWrite for ChannelWriter {
	fn poll_write(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		let writer = match self.get_mut().writer() {
			Ok(w) => w,
			Err(e) => return Poll::Ready(Err(e)),
		};
		writer.as_mut().poll_write(cx, buf).map_err(broken)
	}

	fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		match self.get_mut().inner.as_mut() {
			Some(w) => w.as_mut().poll_flush(cx).map_err(broken),
			None => Poll::Ready(Ok(())),
		}
	}

	/// Half-close: signals end of input to the workload. The read half stays
	/// open.
	fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		let this = self.get_mut();
		let Some(w) = this.inner.as_mut() else {
			return Poll::Ready(Ok(()));
		};
		match w.as_mut().poll_shutdown(cx) {
			Poll::Ready(result) => {
				this.inner = None;
				Poll::Ready(result.map_err(broken))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

fn broken(err: io::Error) -> io::Error {
	if TransportBrokenError::from_io(&err).is_some() {
		return err;
	}
	let kind = err.kind();
	TransportBrokenError::new(err.to_string()).into_io(kind)
}

/// Bidirectional byte channel to the main container.
///
/// Bytes written reach the workload's standard input in order; the workload's
/// standard output is read back in order. [`DuplexChannel::close_write`]
/// half-closes standard input. Reads return end of stream once the workload
/// has closed its output, or once the channel is closed.
pub struct DuplexChannel {
	reader: ChannelReader,
	writer: ChannelWriter,
	stderr: Option<BoxedReader>,
	closed: CancellationToken,
}

impl fmt::Debug for DuplexChannel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DuplexChannel")
			.field("read_finished", &self.reader.is_finished())
			.field("write_open", &self.writer.inner.is_some())
			.field("closed", &self.closed.is_cancelled())
			.finish_non_exhaustive()
	}
}

impl DuplexChannel {
	pub fn new(
		stdin: BoxedWriter,
		stdout: BoxedReader,
		stderr: Option<BoxedReader>,
		closed: CancellationToken,
	) -> Self {
		Self {
			reader: ChannelReader::new(stdout, closed.clone()),
			writer: ChannelWriter::new(stdin, closed.clone()),
			stderr,
			closed,
		}
	}

	/// Read up to `buf.len()` bytes. `Ok(0)` is end of stream.
	pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportBrokenError> {
		Ok(self.reader.read(buf).await?)
	}

	/// Read until end of stream, appending to `buf`.
	pub async fn read_to_end(&mut self, buf: &mut Vec<u8>) -> Result<usize, TransportBrokenError> {
		Ok(self.reader.read_to_end(buf).await?)
	}

	pub async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportBrokenError> {
		self.writer.write_all(data).await?;
		self.writer.flush().await?;
		Ok(())
	}

	/// Signal end of input to the workload.
	pub async fn close_write(&mut self) -> Result<(), TransportBrokenError> {
		Ok(self.writer.shutdown().await?)
	}

	/// Whether the workload's output has reached end of stream. Closing the
	/// channel does not count.
	pub fn is_read_finished(&self) -> bool {
		self.reader.is_finished()
	}

	pub(crate) fn read_finished_flag(&self) -> Arc<AtomicBool> {
		self.reader.finished.clone()
	}

	/// Token that is cancelled when the channel is closed.
	pub fn closed_token(&self) -> CancellationToken {
		self.closed.clone()
	}

	/// Standard error, when the session was started with
	/// [`crate::StderrMode::Separate`].
	pub fn take_stderr(&mut self) -> Option<BoxedReader> {
		self.stderr.take()
	}

	/// Close both directions. The owning session deletes the Pod in response.
	pub fn close(self) {
		debug!("closing attached channel");
		self.closed.cancel();
	}

	/// Split into independently owned halves, e.g. to pump each direction
	/// from its own task.
	pub fn into_split(self) -> (ChannelReader, ChannelWriter) {
		(self.reader, self.writer)
	}
}

/// Forward the workload's standard error to the log, one event per line.
pub(crate) fn spawn_stderr_logger(pod: String, stderr: BoxedReader) -> tokio::task::JoinHandle<()> {
	tokio::spawn(async move {
		let mut lines = BufReader::new(stderr).lines();
		loop {
			match lines.next_line().await {
				Ok(Some(line)) => info!(target: "tether::workload", %pod, "{line}"),
				Ok(None) => break,
				Err(e) => {
					warn!(%pod, error = %e, "stderr stream ended with an error");
					break;
				}
			}
		}
	})
}
