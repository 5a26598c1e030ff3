//! In-memory transports for unit tests

use crate::handle::ConnectionHandle;
use crate::journal::EventJournal;
use crate::transport::{Connection, LineReader, LineWriter, TransportError};
use crate::types::{HandleId, ServerLabel};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

pub(crate) struct ChannelReader(pub(crate) mpsc::UnboundedReceiver<String>);

#[async_trait]
impl LineReader for ChannelReader {
    async fn read_line(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self.0.recv().await)
    }
}

pub(crate) struct VecWriter(pub(crate) Arc<Mutex<Vec<String>>>);

#[async_trait]
impl LineWriter for VecWriter {
    async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.0.lock().push(line.to_string());
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Handle fed by the returned sender; writes land in the returned vector
pub(crate) fn scripted_handle(
    server: &str,
    nick: &str,
) -> (
    ConnectionHandle,
    mpsc::UnboundedSender<String>,
    Arc<Mutex<Vec<String>>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let written = Arc::new(Mutex::new(Vec::new()));
    let connection = Connection {
        writer: Box::new(VecWriter(Arc::clone(&written))),
        reader: Box::new(ChannelReader(rx)),
    };
    let id = HandleId::new(ServerLabel::new(server).unwrap(), nick);
    let handle = ConnectionHandle::attach(id, connection, Arc::new(EventJournal::new()));
    (handle, tx, written)
}

/// Wait until the handle has at least `n` inbound lines
pub(crate) async fn wait_for_lines(handle: &ConnectionHandle, n: usize) {
    let mut changes = handle.inbound().subscribe();
    while handle.inbound().len() < n {
        changes.changed().await.unwrap();
    }
}
