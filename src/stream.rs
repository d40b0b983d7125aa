//! The event emitter: raw response bytes in, typed [`StreamEvent`]s out.
//!
//! ```text
//! ByteStream ──► LineBuffer ──► parse_line ──► DeltaNormalizer ──► EventStream
//!                                                   │
//!                                        ToolCallAccumulator (deferred tool calls)
//! ```
//!
//! The returned stream is lazy and pull-based: nothing is read from the body
//! until the consumer polls. It ends after exactly one [`StreamEvent::Done`],
//! after a transport error, or silently once the cancellation token fires.

use crate::normalize::DeltaNormalizer;
use crate::sse::{LineBuffer, LineEvent, parse_line};
use crate::types::StreamEvent;
use crate::{Error, Result};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Response body as delivered by a [`Transport`](crate::Transport)
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Typed events produced from one response
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Wraps an in-memory sequence of chunks as a [`ByteStream`].
///
/// Used by scripted transports and benchmarks.
pub fn byte_stream_from_chunks<I, C>(chunks: I) -> ByteStream
where
    I: IntoIterator<Item = C>,
    I::IntoIter: Send + 'static,
    C: Into<Vec<u8>>,
{
    Box::pin(futures::stream::iter(
        chunks.into_iter().map(|chunk| Ok(chunk.into())),
    ))
}

/// Drives the parsing pipeline over `body`.
///
/// Text, reasoning and image events are yielded as soon as their line is
/// complete. Tool calls are yielded once the finish reason (or the `[DONE]`
/// sentinel) releases them, followed by `Done`. A body that ends with tool-call
/// fragments still pending ends with [`Error::Transport`] instead.
///
/// Cancelling `cancel` stops the read loop at the next suspension point or
/// before the next event; the stream then ends without an error. Any other
/// failure of the body ends the stream with [`Error::Transport`]; an in-band
/// provider error envelope ends it with [`Error::Api`].
pub fn event_stream(mut body: ByteStream, cancel: CancellationToken) -> EventStream {
    Box::pin(async_stream::stream! {
        let mut buffer = LineBuffer::new();
        let mut normalizer = DeltaNormalizer::new();
        let mut stopped = false;

        'read: loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::debug!("stream cancelled while awaiting transport");
                    stopped = true;
                    break 'read;
                }
                chunk = body.next() => chunk,
            };

            let bytes = match chunk {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    log::warn!("transport failed mid-stream: {}", e);
                    yield Err(into_transport_error(e));
                    stopped = true;
                    break 'read;
                }
                None => break 'read,
            };

            let lines: Vec<String> = buffer.push(&bytes).collect();
            for line in lines {
                match handle_line(&line, &mut normalizer) {
                    Ok(events) => {
                        for event in events {
                            if cancel.is_cancelled() {
                                log::debug!("stream cancelled between events");
                                stopped = true;
                                break 'read;
                            }
                            yield Ok(event);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        stopped = true;
                        break 'read;
                    }
                }

                if normalizer.is_finished() {
                    stopped = true;
                    break 'read;
                }
            }
        }

        if !stopped {
            let tail = match buffer.finish() {
                Some(line) => handle_line(&line, &mut normalizer),
                None => Ok(Vec::new()),
            };

            match tail {
                Ok(events) => {
                    for event in events {
                        if cancel.is_cancelled() {
                            break;
                        }
                        yield Ok(event);
                    }
                    if !cancel.is_cancelled() {
                        match normalizer.finish_truncated() {
                            Ok(closing) => {
                                for event in closing {
                                    yield Ok(event);
                                }
                            }
                            Err(e) => yield Err(e),
                        }
                    }
                }
                Err(e) => yield Err(e),
            }
        }
    })
}

/// Classifies one line and feeds it through the normalizer
fn handle_line(line: &str, normalizer: &mut DeltaNormalizer) -> Result<Vec<StreamEvent>> {
    match parse_line(line) {
        LineEvent::Delta(payload) => Ok(normalizer.normalize(payload)),
        LineEvent::Done => Ok(normalizer.finish_stream()),
        LineEvent::ProviderError(message) => {
            log::warn!("provider reported an error in-stream: {}", message);
            Err(Error::api(message))
        }
        LineEvent::Ignore => Ok(Vec::new()),
    }
}

fn into_transport_error(e: Error) -> Error {
    match e {
        Error::Transport(_) | Error::Api(_) => e,
        other => Error::transport(other.to_string()),
    }
}
