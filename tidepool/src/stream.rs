//! Write-only result streams.
//!
//! Outputs of proposals and queries travel out of band: the caller registers a
//! [`WriteStream`] and whoever produces results (the apply path, a read, a
//! handler loop) pushes into it. [`buffered_stream`] builds the standard
//! implementation: one producer handle ([`StreamWriter`], cloneable so the
//! registry can hold it), one consumer ([`StreamReader`]).
//!
//! ```text
//!  producer                              consumer
//!  ────────                              ────────
//!  value(a) ──┐                     ┌──> receive() = Some(Ok(a))
//!  value(b) ──┼──> unbounded buffer ┼──> receive() = Some(Ok(b))
//!  close()  ──┘                     └──> receive() = None        (end of stream)
//!
//!  error(e) ─────────────────────────> receive() = Some(Err(e)) then None
//! ```
//!
//! End-of-stream and error termination are distinct: consumers return success
//! on `None` and propagate `Some(Err(_))`. A stream whose last producer handle
//! is dropped without `close()` or `error()` terminates with
//! [`RsmError::Canceled`], never as a clean end.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::RsmError;

/// Returned when pushing into a stream whose consumer is gone or that was
/// already closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stream closed")]
pub struct StreamClosed;

/// Sink side of a result stream.
pub trait WriteStream<T>: Send + Sync {
    /// Push a value.
    ///
    /// # Errors
    ///
    /// [`StreamClosed`] if the stream was closed or errored, or the consumer
    /// dropped its reader.
    fn value(&self, value: T) -> Result<(), StreamClosed>;

    /// Terminate the stream with an error. Later pushes fail.
    fn error(&self, error: RsmError);

    /// Terminate the stream normally. Idempotent.
    fn close(&self);
}

type Item<T> = Result<T, RsmError>;

/// Sender shared by every clone of a [`StreamWriter`].
struct Shared<T> {
    sender: Mutex<Option<mpsc::UnboundedSender<Item<T>>>>,
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.get_mut().take() {
            let _ = sender.send(Err(RsmError::Canceled(
                "stream dropped before completion".to_string(),
            )));
        }
    }
}

/// Producer handle of a buffered stream.
pub struct StreamWriter<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for StreamWriter<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> StreamWriter<T> {
    /// Whether the stream was closed or errored by a producer.
    pub fn is_closed(&self) -> bool {
        match self.shared.sender.lock().as_ref() {
            Some(sender) => sender.is_closed(),
            None => true,
        }
    }
}

impl<T: Send> WriteStream<T> for StreamWriter<T> {
    fn value(&self, value: T) -> Result<(), StreamClosed> {
        let guard = self.shared.sender.lock();
        match guard.as_ref() {
            Some(sender) => sender.send(Ok(value)).map_err(|_| StreamClosed),
            None => Err(StreamClosed),
        }
    }

    fn error(&self, error: RsmError) {
        if let Some(sender) = self.shared.sender.lock().take() {
            let _ = sender.send(Err(error));
        }
    }

    fn close(&self) {
        self.shared.sender.lock().take();
    }
}

/// Consumer handle of a buffered stream.
pub struct StreamReader<T> {
    receiver: mpsc::UnboundedReceiver<Item<T>>,
}

impl<T> StreamReader<T> {
    /// Wait for the next item.
    ///
    /// - `Some(Ok(value))`: a value
    /// - `Some(Err(error))`: the producer terminated the stream with an error
    /// - `None`: the stream ended normally
    pub async fn receive(&mut self) -> Option<Result<T, RsmError>> {
        self.receiver.recv().await
    }

    /// Drain the stream to completion.
    ///
    /// # Errors
    ///
    /// The first error the producer pushed.
    pub async fn collect(mut self) -> Result<Vec<T>, RsmError> {
        let mut values = Vec::new();
        while let Some(item) = self.receive().await {
            values.push(item?);
        }
        Ok(values)
    }
}

/// Create a buffered stream: one producer handle, one consumer.
pub fn buffered_stream<T>() -> (StreamWriter<T>, StreamReader<T>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        StreamWriter {
            shared: Arc::new(Shared {
                sender: Mutex::new(Some(sender)),
            }),
        },
        StreamReader { receiver },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_values_then_close_is_end_of_stream() {
        let (writer, mut reader) = buffered_stream();
        writer.value(1).expect("open stream");
        writer.value(2).expect("open stream");
        writer.close();

        assert_eq!(reader.receive().await, Some(Ok(1)));
        assert_eq!(reader.receive().await, Some(Ok(2)));
        assert_eq!(reader.receive().await, None);
    }

    #[tokio::test]
    async fn test_error_terminates_stream() {
        let (writer, mut reader) = buffered_stream::<u32>();
        writer.value(7).expect("open stream");
        writer.error(RsmError::unavailable("leader lost"));

        assert_eq!(writer.value(8), Err(StreamClosed));
        assert_eq!(reader.receive().await, Some(Ok(7)));
        assert_eq!(
            reader.receive().await,
            Some(Err(RsmError::unavailable("leader lost")))
        );
        assert_eq!(reader.receive().await, None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (writer, reader) = buffered_stream::<u32>();
        writer.close();
        writer.close();
        writer.error(RsmError::internal("ignored after close"));
        assert!(writer.is_closed());
        assert_eq!(reader.collect().await, Ok(vec![]));
    }

    #[tokio::test]
    async fn test_push_after_reader_dropped_fails() {
        let (writer, reader) = buffered_stream::<u32>();
        drop(reader);
        assert_eq!(writer.value(1), Err(StreamClosed));
        assert!(writer.is_closed());
    }

    #[tokio::test]
    async fn test_clones_share_the_channel() {
        let (writer, reader) = buffered_stream::<u32>();
        let other = writer.clone();
        writer.value(1).expect("open stream");
        other.value(2).expect("open stream");
        other.close();

        assert_eq!(writer.value(3), Err(StreamClosed));
        assert_eq!(reader.collect().await, Ok(vec![1, 2]));
    }

    #[tokio::test]
    async fn test_dropped_writer_is_not_a_clean_end() {
        let (writer, reader) = buffered_stream::<u32>();
        let other = writer.clone();
        writer.value(1).expect("open stream");
        drop(writer);
        other.value(2).expect("a clone keeps the stream open");
        drop(other);

        assert!(matches!(
            reader.collect().await,
            Err(RsmError::Canceled(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_writer_drops_cleanly() {
        let (writer, mut reader) = buffered_stream::<u32>();
        writer.value(1).expect("open stream");
        writer.close();
        drop(writer);

        assert_eq!(reader.receive().await, Some(Ok(1)));
        assert_eq!(reader.receive().await, None);
    }

    #[tokio::test]
    async fn test_collect_propagates_error() {
        let (writer, reader) = buffered_stream::<u32>();
        writer.value(1).expect("open stream");
        writer.error(RsmError::timeout("slow"));
        assert_eq!(reader.collect().await, Err(RsmError::timeout("slow")));
    }
}
