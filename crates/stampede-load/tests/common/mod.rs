//! Scripted in-memory transport shared by the integration tests.
#![allow(dead_code)]

use bytes::Bytes;
use stampede_load::{Connector, Transport, TransportError};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a scripted connection does on its next receive.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Message { after: Duration },
    Fail { after: Duration },
    Never,
}

pub fn message_after(ms: u64) -> Step {
    Step::Message {
        after: Duration::from_millis(ms),
    }
}

pub fn fail_after(ms: u64) -> Step {
    Step::Fail {
        after: Duration::from_millis(ms),
    }
}

#[derive(Default)]
struct Shared {
    accept_limit: Option<usize>,
    attempts: usize,
    scripts: HashMap<usize, VecDeque<Step>>,
    default_step: Option<Step>,
    failing_sends: HashSet<usize>,
    stalled_sends: HashSet<usize>,
    stalled_closes: HashSet<usize>,
    sent: Vec<(usize, String)>,
    closed: Vec<usize>,
}

/// Hands out [`ScriptedTransport`]s numbered by attempt order.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept the first `n` attempts and refuse the rest.
    pub fn accept_only(self, n: usize) -> Self {
        self.shared.lock().unwrap().accept_limit = Some(n);
        self
    }

    /// Per-receive steps for the connection with this ordinal.
    pub fn script(self, ordinal: usize, steps: Vec<Step>) -> Self {
        self.shared
            .lock()
            .unwrap()
            .scripts
            .insert(ordinal, steps.into());
        self
    }

    /// Step used once a connection's script runs out. Defaults to a message
    /// after 1ms.
    pub fn default_step(self, step: Step) -> Self {
        self.shared.lock().unwrap().default_step = Some(step);
        self
    }

    /// Sends on this connection fail with a broken pipe.
    pub fn fail_send(self, ordinal: usize) -> Self {
        self.shared.lock().unwrap().failing_sends.insert(ordinal);
        self
    }

    /// Sends on this connection never complete.
    pub fn stall_send(self, ordinal: usize) -> Self {
        self.shared.lock().unwrap().stalled_sends.insert(ordinal);
        self
    }

    /// Closing this connection is logged but never completes.
    pub fn stall_close(self, ordinal: usize) -> Self {
        self.shared.lock().unwrap().stalled_closes.insert(ordinal);
        self
    }

    pub fn attempts(&self) -> usize {
        self.shared.lock().unwrap().attempts
    }

    pub fn sent(&self) -> Vec<(usize, String)> {
        self.shared.lock().unwrap().sent.clone()
    }

    pub fn closed(&self) -> Vec<usize> {
        let mut closed = self.shared.lock().unwrap().closed.clone();
        closed.sort_unstable();
        closed
    }
}

impl Connector for ScriptedConnector {
    type Conn = ScriptedTransport;

    async fn connect(&self, _url: &str) -> Result<ScriptedTransport, TransportError> {
        let mut shared = self.shared.lock().unwrap();
        let ordinal = shared.attempts;
        shared.attempts += 1;

        if shared.accept_limit.is_some_and(|limit| ordinal >= limit) {
            return Err(TransportError::Io(io::Error::from(
                io::ErrorKind::ConnectionRefused,
            )));
        }

        let steps = shared.scripts.remove(&ordinal).unwrap_or_default();
        let fallback = shared
            .default_step
            .unwrap_or(Step::Message {
                after: Duration::from_millis(1),
            });
        Ok(ScriptedTransport {
            ordinal,
            steps,
            fallback,
            shared: Arc::clone(&self.shared),
        })
    }
}

pub struct ScriptedTransport {
    ordinal: usize,
    steps: VecDeque<Step>,
    fallback: Step,
    shared: Arc<Mutex<Shared>>,
}

impl Transport for ScriptedTransport {
    async fn recv(&mut self) -> Result<Bytes, TransportError> {
        match self.steps.pop_front().unwrap_or(self.fallback) {
            Step::Message { after } => {
                tokio::time::sleep(after).await;
                Ok(Bytes::from(format!("msg-{}", self.ordinal)))
            }
            Step::Fail { after } => {
                tokio::time::sleep(after).await;
                Err(TransportError::Closed)
            }
            Step::Never => std::future::pending().await,
        }
    }

    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        let stalled = {
            let shared = self.shared.lock().unwrap();
            if shared.failing_sends.contains(&self.ordinal) {
                return Err(TransportError::Io(io::Error::from(
                    io::ErrorKind::BrokenPipe,
                )));
            }
            shared.stalled_sends.contains(&self.ordinal)
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        self.shared
            .lock()
            .unwrap()
            .sent
            .push((self.ordinal, text.to_string()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let stalled = {
            let mut shared = self.shared.lock().unwrap();
            shared.closed.push(self.ordinal);
            shared.stalled_closes.contains(&self.ordinal)
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}
