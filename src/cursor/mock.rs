//! In-memory server for cursor tests.
//!
//! Holds collections and open cursors, answers `getMore` and `killCursors`,
//! logs every command with the connection it arrived on and the command
//! timeout the deadline allowed, and can inject faults into the next get-mores.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bson::{Bson, Document, doc};

use crate::connection::{
    AsyncConnection, Connection, ConnectionSource, ReferenceCounted, ServerAddress,
};
use crate::cursor::Interrupt;
use crate::error::{CursorError, Result};
use crate::timeout::DeadlineContext;

const DEFAULT_FIRST_BATCH_SIZE: usize = 101;
const DEFAULT_AWAIT: Duration = Duration::from_millis(1000);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Failure injected into the next get-more.
#[derive(Debug, Clone)]
pub(crate) enum Fault {
    Network,
    Timeout,
    TimeoutCausedByNetwork,
    CursorNotFound,
    Command(i32, &'static str),
    Delay(Duration),
}

/// One command as the server saw it.
#[derive(Debug, Clone)]
pub(crate) struct LoggedCommand {
    pub connection_id: usize,
    pub database: String,
    pub command: Document,
    pub command_timeout: Option<Duration>,
}

impl LoggedCommand {
    pub fn name(&self) -> &str {
        command_name(&self.command)
    }
}

struct MockCursor {
    namespace: String,
    position: usize,
    tailable: bool,
    await_data: bool,
}

#[derive(Default)]
struct ServerState {
    collections: HashMap<String, Vec<Document>>,
    cursors: HashMap<i64, MockCursor>,
    next_cursor_id: i64,
    log: Vec<LoggedCommand>,
    faults: VecDeque<Fault>,
    fail_kill_cursors: bool,
    violations: Vec<String>,
}

#[derive(Clone, Default)]
pub(crate) struct MockServer {
    state: Arc<Mutex<ServerState>>,
    next_connection_id: Arc<AtomicUsize>,
}

pub(crate) fn address() -> ServerAddress {
    ServerAddress::Tcp {
        host: "localhost".to_string(),
        port: Some(27017),
    }
}

fn command_name(command: &Document) -> &str {
    command.keys().next().map(String::as_str).unwrap_or("")
}

/// Abandon a blocking wait. Nothing was consumed, so the connection stays usable.
fn check_interrupt(interrupt: &Interrupt) -> Result<()> {
    if interrupt.should_stop() {
        Err(CursorError::Cancelled("wait for data interrupted".to_string()))
    } else {
        Ok(())
    }
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    /// Append `count` documents `{ _id: n }` to `ns`, continuing the numbering.
    pub fn insert(&self, ns: &str, count: usize) {
        let mut state = self.state();
        let docs = state.collections.entry(ns.to_string()).or_default();
        let start = docs.len();
        docs.extend((start..start + count).map(|i| doc! { "_id": i as i64 }));
    }

    /// Open a cursor on `ns` and return the initial reply.
    ///
    /// `batch_size` of 0 uses the server default. A non-tailable cursor whose
    /// first batch drains the collection is returned with id 0.
    pub fn find(&self, ns: &str, batch_size: i32) -> Document {
        self.open_cursor(ns, batch_size, false, false)
    }

    pub fn find_tailable(&self, ns: &str, batch_size: i32, await_data: bool) -> Document {
        self.open_cursor(ns, batch_size, true, await_data)
    }

    fn open_cursor(&self, ns: &str, batch_size: i32, tailable: bool, await_data: bool) -> Document {
        let mut state = self.state();
        let docs = state.collections.get(ns).cloned().unwrap_or_default();
        let size = match batch_size.unsigned_abs() as usize {
            0 => DEFAULT_FIRST_BATCH_SIZE,
            n => n,
        };
        let batch: Vec<Document> = docs.iter().take(size).cloned().collect();
        let position = batch.len();

        let id = if !tailable && (position >= docs.len() || batch_size < 0) {
            0
        } else {
            state.next_cursor_id += 1;
            let id = 1000 + state.next_cursor_id;
            state.cursors.insert(
                id,
                MockCursor {
                    namespace: ns.to_string(),
                    position,
                    tailable,
                    await_data,
                },
            );
            id
        };

        doc! {
            "cursor": { "id": id, "ns": ns, "firstBatch": batch },
            "ok": 1,
        }
    }

    pub fn connection(&self) -> MockConnection {
        MockConnection {
            id: self.next_connection_id.fetch_add(1, Ordering::SeqCst) + 1,
            server: self.clone(),
            refs: Arc::new(AtomicUsize::new(1)),
            active: Arc::new(AtomicUsize::new(0)),
            address: address(),
        }
    }

    pub fn source(&self) -> MockSource {
        MockSource {
            refs: Arc::new(AtomicUsize::new(1)),
            address: address(),
        }
    }

    pub fn push_fault(&self, fault: Fault) {
        self.state().faults.push_back(fault);
    }

    pub fn fail_kill_cursors(&self) {
        self.state().fail_kill_cursors = true;
    }

    pub fn log(&self) -> Vec<LoggedCommand> {
        self.state().log.clone()
    }

    pub fn commands_named(&self, name: &str) -> Vec<LoggedCommand> {
        self.log().into_iter().filter(|c| c.name() == name).collect()
    }

    /// Lease or sequencing rules broken by a client so far.
    pub fn violations(&self) -> Vec<String> {
        self.state().violations.clone()
    }

    fn violation(&self, message: &str) {
        self.state().violations.push(message.to_string());
    }

    pub fn open_cursors(&self) -> usize {
        self.state().cursors.len()
    }

    fn record(&self, connection_id: usize, database: &str, command: &Document, deadline: &DeadlineContext) {
        let command_timeout = deadline.command_timeout().ok().flatten();
        self.state().log.push(LoggedCommand {
            connection_id,
            database: database.to_string(),
            command: command.clone(),
            command_timeout,
        });
    }

    fn take_fault(&self) -> Option<Fault> {
        self.state().faults.pop_front()
    }

    fn fault_error(&self, fault: Fault, command: &Document) -> CursorError {
        match fault {
            Fault::Network => CursorError::network("connection reset by peer"),
            Fault::Timeout => CursorError::timeout("socket read timed out"),
            Fault::TimeoutCausedByNetwork => CursorError::timeout_caused_by(
                "socket read timed out",
                CursorError::network("connection reset by peer"),
            ),
            Fault::CursorNotFound => {
                let id = command.get_i64("getMore").unwrap_or_default();
                self.state().cursors.remove(&id);
                CursorError::command(43, "CursorNotFound", format!("cursor id {id} not found"))
            }
            Fault::Command(code, name) => CursorError::command(code, name, "injected failure"),
            Fault::Delay(_) => CursorError::InvalidArgument("delay is not an error".to_string()),
        }
    }

    /// How long a get-more may wait for data before answering with an empty batch.
    fn await_time(&self, command: &Document) -> Duration {
        let Ok(id) = command.get_i64("getMore") else {
            return Duration::ZERO;
        };
        match self.state().cursors.get(&id) {
            Some(cursor) if cursor.tailable && cursor.await_data => command
                .get_i64("maxTimeMS")
                .map(|ms| Duration::from_millis(ms as u64))
                .unwrap_or(DEFAULT_AWAIT),
            _ => Duration::ZERO,
        }
    }

    /// Answer a get-more, or `None` when an await cursor should keep waiting.
    fn get_more(&self, command: &Document, give_up: bool) -> Result<Option<Document>> {
        let id = command.get_i64("getMore")?;
        let mut guard = self.state();
        let state = &mut *guard;

        let Some(cursor) = state.cursors.get_mut(&id) else {
            return Err(CursorError::command(
                43,
                "CursorNotFound",
                format!("cursor id {id} not found"),
            ));
        };
        let docs = state
            .collections
            .get(&cursor.namespace)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let available = docs.len().saturating_sub(cursor.position);
        if available == 0 && cursor.tailable && cursor.await_data && !give_up {
            return Ok(None);
        }

        let size = match command.get_i32("batchSize") {
            Ok(n) if n > 0 => n as usize,
            _ => available,
        };
        let take = available.min(size);
        let batch: Vec<Document> = docs[cursor.position..cursor.position + take].to_vec();
        cursor.position += take;

        let namespace = cursor.namespace.clone();
        let exhausted = !cursor.tailable && cursor.position >= docs.len();
        if exhausted {
            state.cursors.remove(&id);
        }
        let reply_id = if exhausted { 0 } else { id };

        Ok(Some(doc! {
            "cursor": { "id": reply_id, "ns": namespace, "nextBatch": batch },
            "ok": 1,
        }))
    }

    fn kill_cursors(&self, command: &Document) -> Result<Document> {
        let mut state = self.state();
        if state.fail_kill_cursors {
            return Err(CursorError::network("connection closed during killCursors"));
        }
        let mut killed = Vec::new();
        let mut not_found = Vec::new();
        for id in command.get_array("cursors")? {
            if let Bson::Int64(id) = id {
                if state.cursors.remove(id).is_some() {
                    killed.push(*id);
                } else {
                    not_found.push(*id);
                }
            }
        }
        Ok(doc! { "cursorsKilled": killed, "cursorsNotFound": not_found, "ok": 1 })
    }
}

/// Connection handed out by [`MockServer::connection`].
#[derive(Clone)]
pub(crate) struct MockConnection {
    id: usize,
    server: MockServer,
    refs: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    address: ServerAddress,
}

impl MockConnection {
    pub fn id(&self) -> usize {
        self.id
    }

    fn enter(&self) -> InFlight<'_> {
        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.server.violation("overlapping commands on one connection");
        }
        InFlight(self)
    }
}

struct InFlight<'a>(&'a MockConnection);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ReferenceCounted for MockConnection {
    fn retain(&self) -> Self {
        self.refs.fetch_add(1, Ordering::SeqCst);
        self.clone()
    }

    fn release(&self) {
        if self.active.load(Ordering::SeqCst) > 0 {
            self.server.violation("connection released while a command was in flight");
        }
        self.refs.fetch_sub(1, Ordering::SeqCst);
    }

    fn ref_count(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }
}

impl Connection for MockConnection {
    fn address(&self) -> &ServerAddress {
        &self.address
    }

    fn command(
        &self,
        database: &str,
        command: Document,
        deadline: &DeadlineContext,
        interrupt: &Interrupt,
    ) -> Result<Document> {
        let _in_flight = self.enter();
        self.server.record(self.id, database, &command, deadline);
        match command_name(&command) {
            "getMore" => {
                match self.server.take_fault() {
                    Some(Fault::Delay(delay)) => {
                        let started = Instant::now();
                        while started.elapsed() < delay {
                            check_interrupt(interrupt)?;
                            std::thread::sleep(POLL_INTERVAL);
                        }
                    }
                    Some(fault) => return Err(self.server.fault_error(fault, &command)),
                    None => {}
                }
                let wait = self.server.await_time(&command);
                let started = Instant::now();
                loop {
                    if let Some(reply) = self.server.get_more(&command, started.elapsed() >= wait)? {
                        return Ok(reply);
                    }
                    check_interrupt(interrupt)?;
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
            "killCursors" => self.server.kill_cursors(&command),
            other => Err(CursorError::command(59, "CommandNotFound", format!("no such command: {other}"))),
        }
    }
}

#[async_trait]
impl AsyncConnection for MockConnection {
    fn address(&self) -> &ServerAddress {
        &self.address
    }

    async fn command(
        &self,
        database: &str,
        command: Document,
        deadline: &DeadlineContext,
    ) -> Result<Document> {
        let _in_flight = self.enter();
        self.server.record(self.id, database, &command, deadline);
        match command_name(&command) {
            "getMore" => {
                match self.server.take_fault() {
                    Some(Fault::Delay(delay)) => tokio::time::sleep(delay).await,
                    Some(fault) => return Err(self.server.fault_error(fault, &command)),
                    None => {}
                }
                let wait = self.server.await_time(&command);
                let started = Instant::now();
                loop {
                    if let Some(reply) = self.server.get_more(&command, started.elapsed() >= wait)? {
                        return Ok(reply);
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
            "killCursors" => self.server.kill_cursors(&command),
            other => Err(CursorError::command(59, "CommandNotFound", format!("no such command: {other}"))),
        }
    }
}

/// Connection source handed out by [`MockServer::source`].
#[derive(Clone)]
pub(crate) struct MockSource {
    refs: Arc<AtomicUsize>,
    address: ServerAddress,
}

impl ReferenceCounted for MockSource {
    fn retain(&self) -> Self {
        self.refs.fetch_add(1, Ordering::SeqCst);
        self.clone()
    }

    fn release(&self) {
        self.refs.fetch_sub(1, Ordering::SeqCst);
    }

    fn ref_count(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }
}

impl ConnectionSource for MockSource {
    fn server_address(&self) -> &ServerAddress {
        &self.address
    }
}
