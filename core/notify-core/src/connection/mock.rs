//! Scriptable transport for state-machine tests.

use std::sync::{Arc, Mutex};

use seller_notify_protocol::ClientFrame;

use super::transport::{OpenRequest, Transport, TransportEvent, TransportSink};
use crate::error::{NotifyError, Result};

#[derive(Default)]
struct MockInner {
    opens: Vec<OpenRequest>,
    sent: Vec<ClientFrame>,
    closes: usize,
    sink: Option<TransportSink>,
    fail_next_open: Option<String>,
}

/// Cloneable handle: the test keeps one clone, the manager owns the other.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap()
    }

    pub(crate) fn fail_next_open(&self, message: &str) {
        self.inner().fail_next_open = Some(message.to_string());
    }

    /// Publishes through the sink of the most recent `open`, even after
    /// `close`, so tests can simulate stragglers from a closed channel.
    pub(crate) fn emit(&self, event: TransportEvent) -> bool {
        let sink = self.inner().sink.clone();
        match sink {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }

    pub(crate) fn open_count(&self) -> usize {
        self.inner().opens.len()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.inner().closes
    }

    pub(crate) fn last_open(&self) -> Option<OpenRequest> {
        self.inner().opens.last().cloned()
    }

    pub(crate) fn sent_frames(&self) -> Vec<ClientFrame> {
        self.inner().sent.clone()
    }
}

impl Transport for MockTransport {
    fn open(&mut self, request: OpenRequest, sink: TransportSink) -> Result<()> {
        let mut inner = self.inner();
        if let Some(message) = inner.fail_next_open.take() {
            return Err(NotifyError::Transport {
                context: message,
                source: std::io::ErrorKind::ConnectionRefused.into(),
            });
        }
        inner.opens.push(request);
        inner.sink = Some(sink);
        Ok(())
    }

    fn send(&mut self, frame: &ClientFrame) -> Result<()> {
        self.inner().sent.push(frame.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.inner().closes += 1;
    }
}
