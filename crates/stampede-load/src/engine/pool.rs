use crate::engine::transport::{Connector, Transport};
use crate::error::{LoadError, TransportError};
use bytes::Bytes;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Upper bound on a single transport close during `retire` and `close_all`.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// One established session, owned by the pool.
pub struct Connection<T> {
    id: usize,
    transport: T,
    state: ConnectionState,
    last_activity: Instant,
}

impl<T: Transport> Connection<T> {
    fn new(id: usize, transport: T) -> Self {
        Self {
            id,
            transport,
            state: ConnectionState::Open,
            last_activity: Instant::now(),
        }
    }

    /// Ordinal index of the connection attempt that produced this session.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// A `Closed` error marks the connection closed; it stops counting as
    /// active until the pool retires it.
    pub async fn recv(&mut self) -> Result<Bytes, TransportError> {
        let payload = self.transport.recv().await.map_err(|e| self.observe_error(e))?;
        self.last_activity = Instant::now();
        Ok(payload)
    }

    pub async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        self.transport.send(text).await.map_err(|e| self.observe_error(e))?;
        self.last_activity = Instant::now();
        Ok(())
    }

    fn observe_error(&mut self, e: TransportError) -> TransportError {
        if matches!(e, TransportError::Closed) {
            self.state = ConnectionState::Closed;
        }
        e
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.state = ConnectionState::Closed;
        match timeout(CLOSE_TIMEOUT, self.transport.close()).await {
            Ok(result) => result,
            Err(_) => {
                debug!(connection = self.id, timeout = ?CLOSE_TIMEOUT, "Close handshake timed out");
                Ok(())
            }
        }
    }
}

/// Outcome of [`ConnectionPool::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenReport {
    pub requested: usize,
    pub opened: usize,
    pub failed: usize,
}

/// Holds the connection set.
///
/// Entries are added by `open` and removed by `retire` and `close_all`, which
/// the driver calls between rounds. A connection whose peer closed stays in
/// the set until retired but is skipped by the `active` views.
pub struct ConnectionPool<C: Connector> {
    connector: C,
    connections: Vec<Connection<C::Conn>>,
    next_id: usize,
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            connections: Vec::new(),
            next_id: 0,
        }
    }

    /// Attempts `count` connections to `url` concurrently and waits for all
    /// of them to settle.
    ///
    /// Partial failure is reported, not raised. Returns
    /// [`LoadError::PoolExhausted`] when no attempt succeeded.
    pub async fn open(&mut self, url: &str, count: usize) -> Result<OpenReport, LoadError> {
        let first_id = self.next_id;
        self.next_id += count;

        let connector = &self.connector;
        let attempts = (first_id..first_id + count)
            .map(move |id| async move { (id, connector.connect(url).await) });
        let results = join_all(attempts).await;

        let mut report = OpenReport {
            requested: count,
            opened: 0,
            failed: 0,
        };
        for (id, result) in results {
            match result {
                Ok(transport) => {
                    self.connections.push(Connection::new(id, transport));
                    report.opened += 1;
                }
                Err(e) => {
                    debug!(connection = id, error = %e, "Connection attempt failed");
                    report.failed += 1;
                }
            }
        }

        if report.opened == 0 {
            return Err(LoadError::PoolExhausted {
                url: url.to_string(),
                failures: report.failed,
            });
        }
        if report.failed > 0 {
            warn!(
                url = %url,
                opened = report.opened,
                failed = report.failed,
                "Some connections could not be established"
            );
        }
        info!(url = %url, opened = report.opened, "Connection pool ready");
        Ok(report)
    }

    pub fn active(&self) -> impl Iterator<Item = &Connection<C::Conn>> {
        self.connections.iter().filter(|c| c.is_open())
    }

    pub fn active_mut(&mut self) -> impl Iterator<Item = &mut Connection<C::Conn>> {
        self.connections.iter_mut().filter(|c| c.is_open())
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    /// Closes and removes the given connections. Returns how many were removed.
    pub async fn retire(&mut self, ids: &[usize]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let ids: HashSet<usize> = ids.iter().copied().collect();
        let (mut retired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.connections)
            .into_iter()
            .partition(|c| ids.contains(&c.id));
        self.connections = kept;

        close_each(&mut retired).await;
        debug!(retired = retired.len(), remaining = self.connections.len(), "Retired connections");
        retired.len()
    }

    /// Closes every connection. Calling it again is a no-op.
    pub async fn close_all(&mut self) {
        let mut all = std::mem::take(&mut self.connections);
        if all.is_empty() {
            return;
        }
        close_each(&mut all).await;
        info!(closed = all.len(), "Connection pool closed");
    }
}

async fn close_each<T: Transport>(connections: &mut [Connection<T>]) {
    let closes = connections.iter_mut().map(|c| async move {
        let id = c.id;
        (id, c.close().await)
    });
    for (id, result) in join_all(closes).await {
        if let Err(e) = result {
            debug!(connection = id, error = %e, "Error while closing connection");
        }
    }
}
