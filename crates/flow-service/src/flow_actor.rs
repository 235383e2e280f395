// Copyright (C) 2024-present The NetGauze Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Socket worker of the flow collection.
//!
//! Every [FlowCollectorActorHandle] owns one UDP socket. Each datagram read
//! from it is decoded against the process wide [TemplateStore] and the
//! resulting IPFIX message is offered to every subscriber channel.
//!
//! The worker listens on two sources at once:
//!
//! 1. the command channel, driven through the handle. Commands are served
//!    before pending datagrams, so `Shutdown` is never starved by a busy
//!    exporter.
//! 2. the UDP socket.
//!
//! Workers bound with `SO_REUSEPORT` to the same address receive the
//! messages of one exporter in no particular order. Templates are therefore
//! kept in the shared store and not per worker: a data set decodes no matter
//! which worker read the template set that defined it.
//!
//! A message is fully decoded and offered to the subscribers before the next
//! command is looked at. Once `Shutdown` is answered the worker drops its
//! subscriber channels, which is how the consumers learn that no more
//! messages will come.
//!
//! ```rust,no_run
//! use homeflow_flow_service::{
//!     flow_actor::FlowCollectorActorHandle,
//!     flow_supervisor::{BindingAddress, SupervisorConfig},
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let binding = BindingAddress {
//!         socket_addr: "127.0.0.1:4739".parse().unwrap(),
//!         num_workers: 1,
//!         interface: None,
//!     };
//!     let (join_handle, handle) =
//!         FlowCollectorActorHandle::new(0, &binding, &SupervisorConfig::default()).unwrap();
//!     let (messages, _subscription) = handle.subscribe(16).await.unwrap();
//!     if let Ok(message) = messages.recv().await {
//!         let (exporter, pkt) = message.as_ref();
//!         println!("{exporter} sent {} sets", pkt.sets().len());
//!     }
//!     handle.shutdown().await.unwrap();
//!     join_handle.await.unwrap().unwrap();
//! }
//! ```

use crate::{
    create_flow_channel,
    flow_supervisor::{BindingAddress, SupervisorConfig},
    ActorId, CollectorStats, FlowReceiver, FlowSender, SubscriberId, Subscription,
};
use futures_util::StreamExt;
use homeflow_flow_pkt::{codec::IpfixCodec, ipfix::IpfixPacket, ExporterId, TemplateStore};
use std::{collections::HashMap, io, net::SocketAddr, ops::ControlFlow, sync::Arc, time::Duration};
use tokio::{
    net::UdpSocket,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::{codec::BytesCodec, udp::UdpFramed};
use tracing::{debug, error, info, trace, warn};

/// Template IDs held in the store for the exporters behind one peer socket.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerTemplateIds {
    pub peer: SocketAddr,
    /// One entry per observation domain, ordered by domain id
    pub templates: Vec<(ExporterId, Vec<u16>)>,
}

impl PeerTemplateIds {
    pub fn is_empty(&self) -> bool {
        self.templates.iter().all(|(_, ids)| ids.is_empty())
    }
}

#[derive(Debug, strum_macros::Display)]
enum FlowCollectorActorCommand {
    Shutdown(oneshot::Sender<ActorId>),
    Subscribe(FlowSender, oneshot::Sender<Subscription>),
    Unsubscribe(SubscriberId, oneshot::Sender<Option<Subscription>>),
    GetPeers(oneshot::Sender<Vec<SocketAddr>>),
    GetPeerTemplateIds(SocketAddr, oneshot::Sender<PeerTemplateIds>),
}

#[derive(Debug, strum_macros::Display)]
pub enum FlowCollectorActorError {
    #[strum(to_string = "unable to listen on {0}: {1}")]
    Bind(SocketAddr, io::Error),
    #[strum(to_string = "[Actor {0}] reading from the socket failed: {1}")]
    Socket(ActorId, io::Error),
    #[strum(to_string = "[Actor {0}] every handle is dropped")]
    CommandChannelClosed(ActorId),
}

impl std::error::Error for FlowCollectorActorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bind(_, err) | Self::Socket(_, err) => Some(err),
            Self::CommandChannelClosed(_) => None,
        }
    }
}

#[derive(Debug)]
struct FlowCollectorActor {
    actor_id: ActorId,
    /// Log prefix, `Actor {id}-{local address}`
    label: String,
    cmd_rx: mpsc::Receiver<FlowCollectorActorCommand>,
    subscribers: HashMap<SubscriberId, FlowSender>,
    next_subscriber_id: SubscriberId,
    subscriber_timeout: Duration,
    store: TemplateStore,
    /// One codec per exporter socket seen by this worker
    peers: HashMap<SocketAddr, IpfixCodec>,
    stats: Arc<CollectorStats>,
}

impl FlowCollectorActor {
    fn decode(&mut self, peer: SocketAddr, buf: &[u8]) -> Option<IpfixPacket> {
        let label = &self.label;
        let store = &self.store;
        let codec = self.peers.entry(peer).or_insert_with(|| {
            info!("[{label}] First message from exporter {peer}");
            IpfixCodec::new(peer.ip(), store.clone())
        });
        match codec.decode_datagram(buf) {
            Ok(pkt) => {
                self.stats.packet_decoded(&pkt);
                for skipped in pkt.skipped_sets() {
                    debug!(
                        "[{label}] Set skipped in message {} of {peer}: {skipped}",
                        pkt.sequence_number()
                    );
                }
                Some(pkt)
            }
            Err(err) => {
                self.stats.packet_malformed();
                debug!(
                    "[{label}] Discarding {} bytes datagram of {peer}: {err}",
                    buf.len()
                );
                None
            }
        }
    }

    /// Offers the message to every subscriber concurrently, a subscriber that
    /// doesn't make room within `subscriber_timeout` misses it.
    async fn publish(&mut self, peer: SocketAddr, pkt: IpfixPacket) {
        let label = &self.label;
        self.subscribers.retain(|id, tx| {
            if tx.is_closed() {
                info!("[{label}] Subscriber {id} closed its channel, forgetting it");
            }
            !tx.is_closed()
        });
        if self.subscribers.is_empty() {
            trace!("[{label}] No subscriber for the message of {peer}");
            return;
        }
        let request = Arc::new((peer, pkt));
        let timeout = self.subscriber_timeout;
        let stats = &self.stats;
        let deliveries = self.subscribers.iter().map(|(id, tx)| {
            let request = Arc::clone(&request);
            async move {
                match tokio::time::timeout(timeout, tx.send(request)).await {
                    Ok(Ok(())) => trace!("[{label}] Message of {peer} handed to subscriber {id}"),
                    Ok(Err(_)) => {
                        debug!("[{label}] Subscriber {id} went away, message of {peer} is lost");
                        stats.subscriber_dropped();
                    }
                    Err(_) => {
                        warn!(
                            "[{label}] Subscriber {id} is lagging for {timeout:?}, message of {peer} is dropped"
                        );
                        stats.subscriber_dropped();
                    }
                }
            }
        });
        futures::future::join_all(deliveries).await;
    }

    fn peer_template_ids(&self, peer: SocketAddr) -> PeerTemplateIds {
        let mut templates = vec![];
        // Only answer for exporters this worker actually heard from
        if self.peers.contains_key(&peer) {
            templates = self
                .store
                .exporters()
                .into_iter()
                .filter(|exporter| exporter.addr() == peer.ip())
                .map(|exporter| {
                    let ids = self.store.template_ids(&exporter);
                    (exporter, ids)
                })
                .collect::<Vec<_>>();
            templates.sort_by_key(|(exporter, _)| exporter.observation_domain_id());
        }
        PeerTemplateIds { peer, templates }
    }

    fn handle_cmd(&mut self, cmd: FlowCollectorActorCommand) -> ControlFlow<()> {
        trace!("[{}] Serving command {cmd}", self.label);
        match cmd {
            FlowCollectorActorCommand::Shutdown(reply) => {
                info!("[{}] Shutting down on request", self.label);
                let _ = reply.send(self.actor_id);
                return ControlFlow::Break(());
            }
            FlowCollectorActorCommand::Subscribe(tx, reply) => {
                let id = self.next_subscriber_id;
                self.next_subscriber_id += 1;
                let subscription = Subscription {
                    actor_id: self.actor_id,
                    id,
                };
                if reply.send(subscription).is_ok() {
                    info!("[{}] Subscriber {id} registered", self.label);
                    self.subscribers.insert(id, tx);
                } else {
                    warn!("[{}] Subscriber {id} left before registration", self.label);
                }
            }
            FlowCollectorActorCommand::Unsubscribe(id, reply) => {
                let removed = self.subscribers.remove(&id).map(|_| Subscription {
                    actor_id: self.actor_id,
                    id,
                });
                if removed.is_some() {
                    info!("[{}] Subscriber {id} unregistered", self.label);
                } else {
                    debug!("[{}] No subscriber {id} to unregister", self.label);
                }
                let _ = reply.send(removed);
            }
            FlowCollectorActorCommand::GetPeers(reply) => {
                let _ = reply.send(self.peers.keys().copied().collect());
            }
            FlowCollectorActorCommand::GetPeerTemplateIds(peer, reply) => {
                let _ = reply.send(self.peer_template_ids(peer));
            }
        }
        ControlFlow::Continue(())
    }

    async fn run(
        mut self,
        socket: UdpSocket,
        local_addr: SocketAddr,
    ) -> Result<(ActorId, SocketAddr), FlowCollectorActorError> {
        let mut datagrams = UdpFramed::new(socket, BytesCodec::new());
        loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        warn!("[{}] All handles are gone, stopping", self.label);
                        return Err(FlowCollectorActorError::CommandChannelClosed(self.actor_id));
                    };
                    if self.handle_cmd(cmd).is_break() {
                        return Ok((self.actor_id, local_addr));
                    }
                }
                datagram = datagrams.next() => {
                    match datagram {
                        Some(Ok((buf, peer))) => {
                            self.stats.packet_received();
                            if let Some(pkt) = self.decode(peer, &buf) {
                                self.publish(peer, pkt).await;
                            }
                        }
                        Some(Err(err)) => {
                            error!("[{}] Stopping on socket error: {err}", self.label);
                            return Err(FlowCollectorActorError::Socket(self.actor_id, err));
                        }
                        None => {
                            warn!("[{}] Socket stream ended, stopping", self.label);
                            return Ok((self.actor_id, local_addr));
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug, strum_macros::Display)]
pub enum FlowCollectorActorHandleError {
    #[strum(to_string = "flow collector actor {0} is not running")]
    Stopped(ActorId),
}

impl std::error::Error for FlowCollectorActorHandleError {}

/// Cloneable control surface of one socket worker.
#[derive(Debug, Clone)]
pub struct FlowCollectorActorHandle {
    actor_id: ActorId,
    local_addr: SocketAddr,
    interface: Option<String>,
    cmd_tx: mpsc::Sender<FlowCollectorActorCommand>,
}

impl FlowCollectorActorHandle {
    /// Binds the socket of `binding` and spawns the worker reading it.
    ///
    /// Binding happens before spawning, so an address in use is reported
    /// here and not through the join handle. The join handle resolves to the
    /// actual bound address, which differs from the configured one when the
    /// port is 0.
    pub fn new(
        actor_id: ActorId,
        binding: &BindingAddress,
        config: &SupervisorConfig,
    ) -> Result<
        (
            JoinHandle<Result<(ActorId, SocketAddr), FlowCollectorActorError>>,
            Self,
        ),
        FlowCollectorActorError,
    > {
        let bind_error = |err| FlowCollectorActorError::Bind(binding.socket_addr, err);
        let socket = crate::new_udp_reuse_port(binding.socket_addr, binding.interface.clone())
            .map_err(bind_error)?;
        let local_addr = socket.local_addr().map_err(bind_error)?;
        let (cmd_tx, cmd_rx) = mpsc::channel(config.cmd_buffer_size);
        let actor = FlowCollectorActor {
            actor_id,
            label: format!("Actor {actor_id}-{local_addr}"),
            cmd_rx,
            subscribers: HashMap::new(),
            next_subscriber_id: 1,
            subscriber_timeout: config.subscriber_timeout,
            store: config.store.clone(),
            peers: HashMap::new(),
            stats: Arc::clone(&config.stats),
        };
        debug!("[{}] Listening", actor.label);
        let join_handle = tokio::spawn(actor.run(socket, local_addr));
        let handle = Self {
            actor_id,
            local_addr,
            interface: binding.interface.clone(),
            cmd_tx,
        };
        Ok((join_handle, handle))
    }

    pub const fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    async fn request<T>(
        &self,
        cmd: impl FnOnce(oneshot::Sender<T>) -> FlowCollectorActorCommand,
    ) -> Result<T, FlowCollectorActorHandleError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(cmd(tx))
            .await
            .map_err(|_| FlowCollectorActorHandleError::Stopped(self.actor_id))?;
        rx.await
            .map_err(|_| FlowCollectorActorHandleError::Stopped(self.actor_id))
    }

    /// Subscribes with a new bounded channel of `buffer_size` messages.
    pub async fn subscribe(
        &self,
        buffer_size: usize,
    ) -> Result<(FlowReceiver, Subscription), FlowCollectorActorHandleError> {
        let (tx, rx) = create_flow_channel(buffer_size);
        let subscription = self.subscribe_tx(tx).await?;
        Ok((rx, subscription))
    }

    pub async fn subscribe_tx(
        &self,
        tx: FlowSender,
    ) -> Result<Subscription, FlowCollectorActorHandleError> {
        self.request(|reply| FlowCollectorActorCommand::Subscribe(tx, reply))
            .await
    }

    /// Returns `None` when `id` isn't subscribed to this worker.
    pub async fn unsubscribe(
        &self,
        id: SubscriberId,
    ) -> Result<Option<Subscription>, FlowCollectorActorHandleError> {
        self.request(|reply| FlowCollectorActorCommand::Unsubscribe(id, reply))
            .await
    }

    pub async fn shutdown(&self) -> Result<ActorId, FlowCollectorActorHandleError> {
        self.request(FlowCollectorActorCommand::Shutdown).await
    }

    /// Exporter sockets this worker received at least one datagram from.
    pub async fn get_peers(&self) -> Result<Vec<SocketAddr>, FlowCollectorActorHandleError> {
        self.request(FlowCollectorActorCommand::GetPeers).await
    }

    pub async fn get_peer_template_ids(
        &self,
        peer: SocketAddr,
    ) -> Result<PeerTemplateIds, FlowCollectorActorHandleError> {
        self.request(|reply| FlowCollectorActorCommand::GetPeerTemplateIds(peer, reply))
            .await
    }
}
