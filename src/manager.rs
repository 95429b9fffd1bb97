// src/manager.rs

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ReconnectPolicy;
use crate::error::{Error, Result};
use crate::models::Event;

/// Callback a stream opener invokes for every decoded event.
pub type OnEvent<'a> = &'a mut (dyn FnMut(Event) + Send);

/// Opens one push stream starting at a cursor.
///
/// `open` blocks until the stream ends or fails and should return promptly once
/// `cancel` fires; the manager only checks for cancellation between attempts.
pub trait StreamOpener: Send + Sync {
    fn open<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        since: DateTime<Utc>,
        on_event: OnEvent<'a>,
    ) -> BoxFuture<'a, Result<()>>;
}

/// A subscription: where to resume, how to connect, and who receives events.
pub struct Connection {
    since: DateTime<Utc>,
    opener: Arc<dyn StreamOpener>,
    handler: Box<dyn FnMut(Event) + Send>,
}

impl Connection {
    pub fn new<O, H>(since: DateTime<Utc>, opener: O, handler: H) -> Self
    where
        O: StreamOpener + 'static,
        H: FnMut(Event) + Send + 'static,
    {
        Self { since, opener: Arc::new(opener), handler: Box::new(handler) }
    }

    /// Timestamp the next connection attempt resumes from.
    pub fn since(&self) -> DateTime<Utc> {
        self.since
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("since", &self.since).finish_non_exhaustive()
    }
}

/// Keeps a set of stream connections open until cancelled, reconnecting each one
/// from its last delivered event.
///
/// Delivery is at-least-once: the cursor moves before the handler runs, and a
/// reconnect resumes at that timestamp, so the last event may be seen twice.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: Vec<Connection>,
    policy: ReconnectPolicy,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: ReconnectPolicy) -> Self {
        Self { connections: Vec::new(), policy }
    }

    pub fn add(&mut self, connection: Connection) {
        self.connections.push(connection);
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Runs one supervisor per connection until `cancel` fires and all of them exit.
    ///
    /// Stream errors go to `errors` when provided and are dropped otherwise. A full
    /// channel holds its supervisor back until there is room or cancellation. The
    /// sender is dropped on return, so the channel closes once no other senders remain.
    /// Cursors reached by each connection are kept for the next call.
    pub async fn connect(&mut self, cancel: CancellationToken, errors: Option<mpsc::Sender<Error>>) {
        let mut supervisors = JoinSet::new();
        let count = self.connections.len();
        for (index, connection) in self.connections.drain(..).enumerate() {
            let supervisor = Supervisor {
                index,
                cancel: cancel.clone(),
                errors: errors.clone(),
                policy: self.policy,
            };
            supervisors.spawn(async move { (index, supervisor.run(connection).await) });
        }
        drop(errors);
        info!(connections = count, "connection manager started");

        let mut finished = Vec::with_capacity(count);
        while let Some(joined) = supervisors.join_next().await {
            match joined {
                Ok(done) => finished.push(done),
                Err(err) => error!(error = %err, "stream supervisor panicked"),
            }
        }
        finished.sort_by_key(|(index, _)| *index);
        self.connections = finished.into_iter().map(|(_, connection)| connection).collect();
        info!("connection manager stopped");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct Supervisor {
    index: usize,
    cancel: CancellationToken,
    errors: Option<mpsc::Sender<Error>>,
    policy: ReconnectPolicy,
}

impl Supervisor {
    async fn run(self, mut connection: Connection) -> Connection {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            let cursor = connection.since;
            debug!(connection = self.index, attempt, since = %cursor, "opening stream");

            let Connection { since, opener, handler } = &mut connection;
            let mut on_event = |event: Event| {
                if let Some(dt) = event.cursor() {
                    *since = dt;
                }
                handler(event);
            };
            // A panic in the opener or the handler ends this attempt only; the
            // connection and its cursor stay with the supervisor.
            let result = AssertUnwindSafe(opener.open(&self.cancel, cursor, &mut on_event))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(Error::Panicked(panic_message(panic.as_ref()))));

            if let Err(err) = result {
                warn!(connection = self.index, attempt, error = %err, "stream failed");
                self.report(err).await;
            }

            if self.cancel.is_cancelled() {
                break;
            }
            if !self.policy.delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.policy.delay) => {}
                }
            }
        }
        debug!(connection = self.index, since = %connection.since, "stream closed");
        connection
    }

    async fn report(&self, err: Error) {
        let Some(errors) = &self.errors else {
            return;
        };
        // Errors raised while shutting down are still delivered if there is room.
        tokio::select! {
            biased;
            _ = errors.send(err) => {}
            _ = self.cancel.cancelled() => {}
        }
    }
}
