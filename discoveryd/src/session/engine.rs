use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use shared::protocol::{DISCOVERY, NDNSD, SERVICE_INFO};
use shared::tlv::{self, CodecError};
use shared::types::{DiscoveryReply, Name, ServiceRecord, SyncUpdate};
use crate::cache::{hash, ServiceCache};
use crate::error::FetchError;
use crate::face::{Data, DataSigner, Face};
use crate::sync::SyncAdapter;
use super::debounce::Debounce;
use super::handle::SessionCommand;
use super::retransmit::RetransmissionTracker;
use super::{
    discovery_prefix, service_info_prefix, DiscoveryCallback, Role, SessionConfig, SessionState,
};

pub(super) struct Parts {
    pub(super) role: Role,
    pub(super) config: SessionConfig,
    pub(super) face: Arc<dyn Face>,
    pub(super) signer: Arc<dyn DataSigner>,
    pub(super) callback: DiscoveryCallback,
    pub(super) adapter: SyncAdapter,
    pub(super) updates: flume::Receiver<Vec<SyncUpdate>>,
    pub(super) commands: mpsc::Receiver<SessionCommand>,
    pub(super) state_tx: watch::Sender<SessionState>,
    pub(super) digest_tx: watch::Sender<String>,
    pub(super) cancel: CancellationToken,
}

/// A started session, ready to run.
pub struct SessionTask {
    engine: Engine,
    updates: flume::Receiver<Vec<SyncUpdate>>,
    inbound: flume::Receiver<Vec<u8>>,
    commands: mpsc::Receiver<SessionCommand>,
    cancel: CancellationToken,
}

struct FetchOutcome {
    prefix: Name,
    seq: u64,
    name: Name,
    result: Result<Data, FetchError>,
}

type FetchTask = Pin<Box<dyn Future<Output = FetchOutcome> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subscription {
    ServiceInfo,
    DiscoveryRequest,
}

fn classify(prefix: &Name) -> Option<Subscription> {
    if prefix.ends_with(&[NDNSD, SERVICE_INFO]) {
        Some(Subscription::ServiceInfo)
    } else if prefix.ends_with(&[NDNSD, DISCOVERY]) {
        Some(Subscription::DiscoveryRequest)
    } else {
        None
    }
}

/// Session state owned by the loop.
struct Engine {
    role: Role,
    config: SessionConfig,
    face: Arc<dyn Face>,
    signer: Arc<dyn DataSigner>,
    callback: DiscoveryCallback,
    adapter: SyncAdapter,
    cache: ServiceCache,
    tracker: RetransmissionTracker,
    debounce: Debounce,
    /// Highest sequence delivered per service-info prefix
    delivered: HashMap<Name, u64>,
    state_tx: watch::Sender<SessionState>,
    digest_tx: watch::Sender<String>,
    finished: bool,
}

impl SessionTask {
    pub(super) fn new(parts: Parts) -> Self {
        let Parts {
            role,
            config,
            face,
            signer,
            callback,
            adapter,
            updates,
            commands,
            state_tx,
            digest_tx,
            cancel,
        } = parts;
        let inbound = adapter.inbound();
        let debounce = Debounce::new(config.debounce);
        Self {
            engine: Engine {
                role,
                config,
                face,
                signer,
                callback,
                adapter,
                cache: ServiceCache::new(),
                tracker: RetransmissionTracker::new(),
                debounce,
                delivered: HashMap::new(),
                state_tx,
                digest_tx,
                finished: false,
            },
            updates,
            inbound,
            commands,
            cancel,
        }
    }

    /// Run the session until cancelled, or until a one-shot consumer has
    /// delivered its first record.
    pub async fn run(self) {
        let Self {
            mut engine,
            updates,
            inbound,
            mut commands,
            cancel,
        } = self;

        engine.state_tx.send_replace(SessionState::Running);
        match engine.role.clone() {
            Role::Producer { services } => engine.producer_handler(services),
            Role::Consumer { .. } => engine.consumer_handler(),
        }

        let mut fetches: FuturesUnordered<FetchTask> = FuturesUnordered::new();
        let mut sync_tick = tokio::time::interval(engine.config.sync.interval);
        sync_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !engine.finished {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::debug!("Session {} cancelled", engine.config.node);
                    break;
                }
                Some(cmd) = commands.recv() => {
                    engine.on_command(cmd);
                }
                Ok(batch) = updates.recv_async() => {
                    engine.on_sync_updates(batch, &mut fetches);
                }
                Some(outcome) = fetches.next(), if !fetches.is_empty() => {
                    engine.on_fetch_outcome(outcome, &mut fetches);
                }
                Ok(packet) = inbound.recv_async() => {
                    engine.adapter.handle_packet(&packet);
                }
                _ = sync_tick.tick() => {
                    engine.adapter.on_tick();
                }
            }
        }

        engine.shutdown(fetches);
    }
}

impl Engine {
    fn producer_handler(&mut self, services: Vec<ServiceRecord>) {
        self.announce_discovery();
        for record in services {
            let name = record.service_name.clone();
            if let Err(e) = self.publish_service_detail(record) {
                tracing::error!("Failed to publish {}: {}", name, e);
            }
        }
    }

    fn consumer_handler(&mut self) {
        self.announce_discovery();
    }

    fn on_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Publish(record, reply) => {
                let result = self.publish_service_detail(record);
                let _ = reply.send(result);
            }
            SessionCommand::GetReceived(reply) => {
                let _ = reply.send(self.cache.received().clone());
            }
            SessionCommand::GetPublished(reply) => {
                let _ = reply.send(self.cache.published().clone());
            }
            SessionCommand::Discover(reply) => {
                self.announce_discovery();
                let _ = reply.send(());
            }
        }
    }

    fn publish_service_detail(&mut self, record: ServiceRecord) -> Result<(), CodecError> {
        self.publish_record(&record)?;
        self.cache.publish(record);
        Ok(())
    }

    fn publish_record(&mut self, record: &ServiceRecord) -> Result<u64, CodecError> {
        let content = tlv::encode(record)?;
        let prefix = service_info_prefix(&self.config.node, &record.service_name);
        self.adapter.add_node(&prefix);
        let seq = self.adapter.publish_update(&prefix);
        self.serve(prefix.with_seq(seq), content);
        tracing::info!("Published {} seq {}", record.service_name, seq);
        Ok(seq)
    }

    /// Tell the group this node wants every producer to re-announce.
    fn announce_discovery(&mut self) {
        let prefix = discovery_prefix(&self.config.node);
        let seq = self.adapter.publish_update(&prefix);
        self.serve(prefix.with_seq(seq), Vec::new());
        tracing::debug!("Sent discovery request {} seq {}", self.config.node, seq);
    }

    fn serve(&self, name: Name, content: Vec<u8>) {
        let mut data = Data::new(name, content);
        self.signer.sign(&mut data);
        self.face.put(data);
    }

    fn on_sync_updates(&mut self, batch: Vec<SyncUpdate>, fetches: &mut FuturesUnordered<FetchTask>) {
        for update in batch {
            match classify(&update.prefix) {
                Some(Subscription::ServiceInfo) => self.request_record(update, fetches),
                Some(Subscription::DiscoveryRequest) => self.on_discovery_request(&update.prefix),
                None => tracing::debug!("Ignoring update for {}", update.prefix),
            }
        }
    }

    fn on_discovery_request(&mut self, prefix: &Name) {
        if !self.debounce.ready(Instant::now()) {
            tracing::debug!("Discovery request from {} inside debounce window", prefix);
            return;
        }
        let records: Vec<ServiceRecord> = self.cache.published().values().cloned().collect();
        if records.is_empty() {
            return;
        }
        tracing::info!("Discovery request from {}, re-announcing {} record(s)", prefix, records.len());
        for record in &records {
            if let Err(e) = self.publish_record(record) {
                tracing::error!("Failed to re-announce {}: {}", record.service_name, e);
            }
        }
    }

    /// Only `high_seq` is fetched; older sequences of a prefix are superseded.
    fn request_record(&mut self, update: SyncUpdate, fetches: &mut FuturesUnordered<FetchTask>) {
        if self.is_delivered(&update.prefix, update.high_seq) {
            tracing::trace!("Already delivered {} seq {}", update.prefix, update.high_seq);
            return;
        }
        let name = update.prefix.clone().with_seq(update.high_seq);
        if self.tracker.contains(&name) {
            tracing::trace!("Fetch of {} already in flight", name);
            return;
        }
        let attempt = self.tracker.on_attempt(&name);
        tracing::debug!("Fetching {} (attempt {})", name, attempt);
        fetches.push(self.fetch(update.prefix, update.high_seq));
    }

    fn fetch(&self, prefix: Name, seq: u64) -> FetchTask {
        let name = prefix.clone().with_seq(seq);
        let fetch = self.face.fetch(&name);
        let timeout = self.config.fetch_timeout;
        Box::pin(async move {
            let result = match tokio::time::timeout(timeout, fetch).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(name.clone())),
            };
            FetchOutcome {
                prefix,
                seq,
                name,
                result,
            }
        })
    }

    fn on_fetch_outcome(&mut self, outcome: FetchOutcome, fetches: &mut FuturesUnordered<FetchTask>) {
        let FetchOutcome {
            prefix,
            seq,
            name,
            result,
        } = outcome;
        match result {
            Ok(data) => {
                self.tracker.on_success(&name);
                self.deliver(prefix, seq, data);
            }
            Err(FetchError::Superseded(_)) => {
                // A newer sequence exists and sync will announce it.
                self.tracker.abandon(&name);
                tracing::debug!("{} superseded, not retrying", name);
            }
            Err(e) => {
                let attempt = self.tracker.on_attempt(&name);
                if attempt > self.config.retransmissions {
                    self.tracker.abandon(&name);
                    tracing::warn!("Giving up on {} after {} attempts", name, attempt - 1);
                } else {
                    tracing::debug!("{}, retrying (attempt {})", e, attempt);
                    fetches.push(self.fetch(prefix, seq));
                }
            }
        }
    }

    fn deliver(&mut self, prefix: Name, seq: u64, data: Data) {
        if self.is_delivered(&prefix, seq) {
            tracing::debug!("Dropping stale {}", data.name);
            return;
        }
        if !self.signer.verify(&data) {
            tracing::warn!("Dropping {}: signature check failed", data.name);
            return;
        }
        let record = match tlv::decode(&data.content) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Dropping {}: {}", data.name, e);
                return;
            }
        };
        self.delivered.insert(prefix, seq);

        let reply = DiscoveryReply::from_record(&record, Utc::now());
        tracing::info!(
            "Discovered {} ({:?}, {} detail(s))",
            record.received_key(),
            reply.status,
            reply.service_details.len()
        );
        if self.cache.upsert_received(record.clone()) {
            self.digest_tx
                .send_replace(hash::compute_hash(self.cache.received()));
        }
        (self.callback)(&record, &reply);

        if matches!(self.role, Role::Consumer { continuous: false }) {
            tracing::info!("One-shot consumer {} done", self.config.node);
            self.finished = true;
        }
    }

    fn is_delivered(&self, prefix: &Name, seq: u64) -> bool {
        self.delivered.get(prefix).is_some_and(|high| *high >= seq)
    }

    fn shutdown(self, fetches: FuturesUnordered<FetchTask>) {
        let Engine {
            config,
            face,
            adapter,
            mut tracker,
            state_tx,
            ..
        } = self;
        state_tx.send_replace(SessionState::Stopping);
        drop(fetches);
        tracker.clear();
        face.unregister_prefix(&config.node);
        // Leaves the sync group.
        drop(adapter);
        tracing::info!("Session {} in {} stopped", config.node, config.group);
        state_tx.send_replace(SessionState::Stopped);
    }
}
