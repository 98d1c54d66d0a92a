// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Mock collaborators for driving the session actor in tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bluer::Address;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::watch;
use uuid::Uuid;

use obex_client::bluetooth::{
    AdapterId, AdapterManager, BoxedTransport, DataElement, DiscoverySession, Security,
    ServiceDiscovery, ServiceRecord, TransportConnector,
};
use obex_client::obex::{
    EngineFactory, ObexEngine, ObjectRequest, Packet, Progress, StreamEngineFactory,
};
use obex_client::services::{DriverRegistry, ServiceDriver, SessionInfo};
use obex_client::{AgentFactory, Backend, Client, Error, Result, TransferAgent};

pub fn local() -> Address {
    Address::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x01])
}

pub fn peer() -> Address {
    Address::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13])
}

/// Poll `check` until it holds, failing the test after a few seconds.
pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until the client holds `expected` sessions.
pub async fn wait_for_sessions(client: &Client, expected: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let count = client.session_count().await.unwrap();
        if count == expected {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {} sessions, have {}",
            expected,
            count
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// A latch that holds async steps until opened.
#[derive(Clone)]
pub struct Gate(Arc<watch::Sender<bool>>);

impl Gate {
    pub fn closed() -> Self {
        Self(Arc::new(watch::channel(false).0))
    }

    pub fn open(&self) {
        self.0.send_replace(true);
    }

    pub async fn wait(&self) {
        let mut rx = self.0.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// Counts futures that were dropped before finishing.
pub struct AbortProbe {
    counter: Arc<AtomicUsize>,
    armed: bool,
}

impl AbortProbe {
    pub fn new(counter: &Arc<AtomicUsize>) -> Self {
        Self {
            counter: counter.clone(),
            armed: true,
        }
    }

    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbortProbe {
    fn drop(&mut self) {
        if self.armed {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// Adapter manager

pub struct MockAdapters {
    pub gate: Mutex<Option<Gate>>,
    pub admission_gate: Mutex<Option<Gate>>,
    /// Fail adapter resolution.
    pub missing: Mutex<bool>,
    /// Refuse admission.
    pub refuse: Mutex<bool>,
    pub resolved: AtomicUsize,
    pub admitted: AtomicUsize,
    pub released: AtomicUsize,
}

impl MockAdapters {
    pub fn new() -> Self {
        Self {
            gate: Mutex::new(None),
            admission_gate: Mutex::new(None),
            missing: Mutex::new(false),
            refuse: Mutex::new(false),
            resolved: AtomicUsize::new(0),
            admitted: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    /// Hold adapter resolution until the returned gate opens.
    pub fn hold(&self) -> Gate {
        let gate = Gate::closed();
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    /// Hold admission requests until the returned gate opens.
    pub fn hold_admission(&self) -> Gate {
        let gate = Gate::closed();
        *self.admission_gate.lock() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl AdapterManager for MockAdapters {
    async fn resolve_adapter(&self, source: Option<Address>) -> Result<AdapterId> {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.wait().await;
        }
        if *self.missing.lock() {
            return Err(Error::Admission("No such adapter".to_string()));
        }
        self.resolved.fetch_add(1, Ordering::SeqCst);
        Ok(AdapterId {
            name: "hci0".to_string(),
            address: source.unwrap_or_else(local),
        })
    }

    async fn request_admission(&self, _adapter: &AdapterId) -> Result<()> {
        let gate = self.admission_gate.lock().clone();
        if let Some(gate) = gate {
            gate.wait().await;
        }
        if *self.refuse.lock() {
            return Err(Error::Admission("Adapter busy".to_string()));
        }
        self.admitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn release_admission(&self, _adapter: &AdapterId) -> Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// Service discovery

/// A record advertising OBEX on `channel`.
pub fn rfcomm_record(channel: u8) -> ServiceRecord {
    let mut record = ServiceRecord::default();
    record.attributes.insert(
        0x0004,
        DataElement::Sequence(vec![
            DataElement::Sequence(vec![DataElement::Uuid16(0x0100)]),
            DataElement::Sequence(vec![DataElement::Uuid16(0x0003), DataElement::uint8(channel)]),
        ]),
    );
    record
}

pub struct MockDiscovery {
    pub records: Mutex<Vec<ServiceRecord>>,
    pub opens: AtomicUsize,
}

impl MockDiscovery {
    pub fn with_records(records: Vec<ServiceRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            opens: AtomicUsize::new(0),
        }
    }
}

struct MockSdpSession {
    records: Vec<ServiceRecord>,
}

impl DiscoverySession for MockSdpSession {
    fn search(self: Box<Self>, _uuid: Uuid) -> BoxStream<'static, Result<ServiceRecord>> {
        stream::iter(self.records.into_iter().map(Ok)).boxed()
    }
}

#[async_trait]
impl ServiceDiscovery for MockDiscovery {
    async fn open(&self, _local: Address, _remote: Address) -> Result<Box<dyn DiscoverySession>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSdpSession {
            records: self.records.lock().clone(),
        }))
    }
}

// Transport

/// Read one OBEX request on the remote end of a connection.
pub async fn read_packet(peer: &mut DuplexStream, prefix_len: usize) -> Packet {
    let mut head = [0u8; 3];
    peer.read_exact(&mut head).await.unwrap();
    let len = u16::from_be_bytes([head[1], head[2]]) as usize;
    let mut data = vec![0u8; len];
    data[..3].copy_from_slice(&head);
    peer.read_exact(&mut data[3..]).await.unwrap();
    Packet::decode(&data, prefix_len).unwrap()
}

/// Send an OBEX response from the remote end.
pub async fn answer(peer: &mut DuplexStream, packet: Packet) {
    peer.write_all(&packet.encode()).await.unwrap();
}

#[derive(Default)]
pub struct MockConnector {
    pub channels: Mutex<Vec<u8>>,
    pub refuse: Mutex<bool>,
    peers: Mutex<Vec<DuplexStream>>,
}

impl MockConnector {
    /// Remote end of the oldest connection not yet taken.
    pub fn take_peer(&self) -> Option<DuplexStream> {
        let mut peers = self.peers.lock();
        if peers.is_empty() {
            None
        } else {
            Some(peers.remove(0))
        }
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn connect(
        &self,
        _local: Address,
        _remote: Address,
        channel: u8,
        _security: Security,
    ) -> Result<BoxedTransport> {
        self.channels.lock().push(channel);
        if *self.refuse.lock() {
            return Err(Error::Transport("Connection refused".to_string()));
        }
        let (ours, theirs) = tokio::io::duplex(1024);
        self.peers.lock().push(theirs);
        Ok(Box::new(ours))
    }
}

// OBEX engine

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PutMode {
    /// Report the full size and return.
    #[default]
    Finish,
    /// Report the full size, then never return.
    ReportThenStall,
    /// Never make progress.
    Stall,
    /// Answer the first packet with Forbidden.
    Refuse,
}

#[derive(Default)]
pub struct EngineState {
    /// Engines currently alive.
    pub live: AtomicUsize,
    pub connects: AtomicUsize,
    /// Response code returned to CONNECT instead of success.
    pub connect_reply: Mutex<Option<u8>>,
    /// Calls to settle an interrupted operation.
    pub settles: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub targets: Mutex<Vec<Option<Vec<u8>>>>,
    pub paths: Mutex<Vec<String>>,
    pub path_gate: Mutex<Option<Gate>>,
    pub gets: Mutex<Vec<ObjectRequest>>,
    pub get_body: Mutex<Vec<u8>>,
    pub puts: Mutex<Vec<(ObjectRequest, Vec<u8>)>>,
    pub put_mode: Mutex<PutMode>,
    /// Engine futures dropped before they finished.
    pub aborted: Arc<AtomicUsize>,
}

impl EngineState {
    pub fn put_names(&self) -> Vec<Option<String>> {
        self.puts
            .lock()
            .iter()
            .map(|(request, _)| request.name.clone())
            .collect()
    }
}

struct MockEngine {
    state: Arc<EngineState>,
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.state.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObexEngine for MockEngine {
    async fn connect(&self, target: Option<&[u8]>) -> Result<()> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.state.targets.lock().push(target.map(<[u8]>::to_vec));
        match *self.state.connect_reply.lock() {
            Some(code) => Err(Error::Protocol {
                operation: "Connect",
                code,
            }),
            None => Ok(()),
        }
    }

    async fn set_path(&self, folder: &str) -> Result<()> {
        self.state.paths.lock().push(folder.to_string());
        let gate = self.state.path_gate.lock().clone();
        if let Some(gate) = gate {
            let probe = AbortProbe::new(&self.state.aborted);
            gate.wait().await;
            probe.disarm();
        }
        Ok(())
    }

    async fn get(&self, request: &ObjectRequest, progress: Progress<'_>) -> Result<Vec<u8>> {
        self.state.gets.lock().push(request.clone());
        let body = self.state.get_body.lock().clone();
        progress(body.len() as u64);
        Ok(body)
    }

    async fn put(
        &self,
        request: &ObjectRequest,
        body: &[u8],
        progress: Progress<'_>,
    ) -> Result<()> {
        self.state.puts.lock().push((request.clone(), body.to_vec()));
        let mode = *self.state.put_mode.lock();
        if mode == PutMode::Refuse {
            return Err(Error::Protocol {
                operation: "Put",
                code: 0xC3,
            });
        }
        if mode != PutMode::Stall {
            progress(body.len() as u64);
        }
        if mode != PutMode::Finish {
            let _probe = AbortProbe::new(&self.state.aborted);
            futures::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn abort(&self) -> Result<()> {
        self.state.settles.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockEngines {
    pub state: Arc<EngineState>,
}

impl EngineFactory for MockEngines {
    fn wrap(&self, _transport: BoxedTransport) -> Arc<dyn ObexEngine> {
        self.state.live.fetch_add(1, Ordering::SeqCst);
        Arc::new(MockEngine {
            state: self.state.clone(),
        })
    }
}

// Agents

/// Everything the agents of a client were told, in order.
#[derive(Default)]
pub struct AgentLog {
    pub events: Mutex<Vec<String>>,
    /// Answers to authorization requests; approve when empty.
    pub answers: Mutex<VecDeque<Result<String>>>,
}

impl AgentLog {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

struct MockAgent {
    log: Arc<AgentLog>,
}

#[async_trait]
impl TransferAgent for MockAgent {
    async fn request(&self, transfer_path: &str) -> Result<String> {
        self.log.events.lock().push(format!("request {}", transfer_path));
        let answer = self.log.answers.lock().pop_front();
        answer.unwrap_or_else(|| Ok(String::new()))
    }

    async fn notify_progress(&self, transfer_path: &str, transferred: u64) -> Result<()> {
        self.log
            .events
            .lock()
            .push(format!("progress {} {}", transfer_path, transferred));
        Ok(())
    }

    async fn notify_complete(&self, transfer_path: &str) -> Result<()> {
        self.log.events.lock().push(format!("complete {}", transfer_path));
        Ok(())
    }

    async fn notify_error(&self, transfer_path: &str, message: &str) -> Result<()> {
        self.log
            .events
            .lock()
            .push(format!("error {} {}", transfer_path, message));
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        self.log.events.lock().push("release".to_string());
        Ok(())
    }
}

pub struct MockAgents {
    pub log: Arc<AgentLog>,
}

impl AgentFactory for MockAgents {
    fn create(&self, _owner: &str, _path: &str) -> Arc<dyn TransferAgent> {
        Arc::new(MockAgent {
            log: self.log.clone(),
        })
    }
}

// Drivers

/// OPP driver that counts its hooks.
pub struct CountingDriver {
    pub probes: AtomicUsize,
    pub removes: AtomicUsize,
    pub refuse: Mutex<bool>,
}

impl CountingDriver {
    pub fn new() -> Self {
        Self {
            probes: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
            refuse: Mutex::new(false),
        }
    }
}

impl ServiceDriver for CountingDriver {
    fn service(&self) -> &str {
        "opp"
    }

    fn uuid(&self) -> &str {
        "00001105-0000-1000-8000-00805f9b34fb"
    }

    fn probe(&self, _session: &SessionInfo) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if *self.refuse.lock() {
            return Err(Error::InvalidArguments("probe refused".to_string()));
        }
        Ok(())
    }

    fn remove(&self, _session: &SessionInfo) {
        self.removes.fetch_add(1, Ordering::SeqCst);
    }
}

/// A client wired to mocks, with handles on every mock.
pub struct Harness {
    pub client: Client,
    pub adapters: Arc<MockAdapters>,
    pub discovery: Arc<MockDiscovery>,
    pub connector: Arc<MockConnector>,
    pub engine: Arc<EngineState>,
    pub agents: Arc<AgentLog>,
    pub driver: Arc<CountingDriver>,
}

impl Harness {
    /// Peer advertising every service on channel 12.
    pub fn new() -> Self {
        Self::with_records(vec![rfcomm_record(12)])
    }

    pub fn with_records(records: Vec<ServiceRecord>) -> Self {
        Self::build(records, None)
    }

    /// Sessions speak real OBEX; the remote ends are in
    /// [`MockConnector::take_peer`].
    pub fn with_stream_engine() -> Self {
        Self::build(
            vec![rfcomm_record(12)],
            Some(Arc::new(StreamEngineFactory::default())),
        )
    }

    fn build(records: Vec<ServiceRecord>, engines: Option<Arc<dyn EngineFactory>>) -> Self {
        let adapters = Arc::new(MockAdapters::new());
        let discovery = Arc::new(MockDiscovery::with_records(records));
        let connector = Arc::new(MockConnector::default());
        let engine = Arc::new(EngineState::default());
        let agents = Arc::new(AgentLog::default());
        let driver = Arc::new(CountingDriver::new());

        let engines: Arc<dyn EngineFactory> = match engines {
            Some(engines) => engines,
            None => Arc::new(MockEngines {
                state: engine.clone(),
            }),
        };

        let drivers = DriverRegistry::with_defaults();
        drivers.unregister("opp");
        drivers.register(driver.clone()).unwrap();

        let backend = Backend {
            adapters: adapters.clone(),
            discovery: discovery.clone(),
            connector: connector.clone(),
            engines,
            agents: Arc::new(MockAgents {
                log: agents.clone(),
            }),
            drivers: Arc::new(drivers),
            security: Security::Low,
        };

        Self {
            client: Client::spawn(backend),
            adapters,
            discovery,
            connector,
            engine,
            agents,
            driver,
        }
    }
}
