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

//! Supervisor of the socket workers.
//!
//! [SupervisorConfig] lists the listening addresses, each with its number of
//! workers. The supervisor starts them all, forwards requests of its handle to
//! every worker and merges their answers. One subscription through the
//! supervisor therefore receives the messages of every listening socket.
//!
//! A worker that stops on its own is logged and not restarted. The supervisor
//! exits when the last worker is gone or after a `Shutdown`, which it only
//! answers once every worker task has finished.

use crate::{
    create_flow_channel,
    flow_actor::{FlowCollectorActorError, FlowCollectorActorHandle, PeerTemplateIds},
    ActorId, CollectorStats, FlowReceiver, FlowSender, Subscription,
};
use futures_util::{stream::FuturesUnordered, StreamExt};
use homeflow_flow_pkt::TemplateStore;
use std::{
    collections::BTreeMap,
    future::Future,
    net::{Ipv4Addr, SocketAddr},
    ops::ControlFlow,
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::{JoinError, JoinHandle},
};
use tracing::{debug, error, info, warn};

/// IANA assigned IPFIX port
pub const IPFIX_PORT: u16 = 4739;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub binding_addresses: Vec<BindingAddress>,
    pub cmd_buffer_size: usize,
    /// How long a worker waits on a full subscriber channel
    pub subscriber_timeout: Duration,
    pub store: TemplateStore,
    pub stats: Arc<CollectorStats>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            binding_addresses: vec![BindingAddress {
                socket_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, IPFIX_PORT)),
                num_workers: 1,
                interface: None,
            }],
            cmd_buffer_size: 100,
            subscriber_timeout: Duration::from_millis(100),
            store: TemplateStore::new(),
            stats: Arc::new(CollectorStats::new()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BindingAddress {
    pub socket_addr: SocketAddr,
    /// Sockets opened on `socket_addr` with `SO_REUSEPORT`
    pub num_workers: usize,
    /// Restricts the sockets to one network interface, Linux only
    pub interface: Option<String>,
}

type WorkerExit = (
    ActorId,
    Result<Result<(ActorId, SocketAddr), FlowCollectorActorError>, JoinError>,
);

async fn watch(
    actor_id: ActorId,
    join_handle: JoinHandle<Result<(ActorId, SocketAddr), FlowCollectorActorError>>,
) -> WorkerExit {
    (actor_id, join_handle.await)
}

#[derive(Debug, strum_macros::Display)]
enum SupervisorCommand {
    Subscribe(FlowSender, oneshot::Sender<Vec<Subscription>>),
    Unsubscribe(Vec<Subscription>, oneshot::Sender<Vec<Option<ActorId>>>),
    LocalAddresses(oneshot::Sender<Vec<(ActorId, SocketAddr)>>),
    GetPeers(oneshot::Sender<Vec<(ActorId, Vec<SocketAddr>)>>),
    GetPeerTemplateIds(SocketAddr, oneshot::Sender<Vec<(ActorId, PeerTemplateIds)>>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug)]
struct FlowCollectorsSupervisorActor {
    /// Running workers, ordered so answers come back in start order
    workers: BTreeMap<ActorId, FlowCollectorActorHandle>,
    cmd_rx: mpsc::Receiver<SupervisorCommand>,
}

impl FlowCollectorsSupervisorActor {
    fn worker_exited(&mut self, (actor_id, ret): WorkerExit) {
        self.workers.remove(&actor_id);
        match ret {
            Ok(Ok((_, addr))) => info!("[FlowSupervisor] Worker {actor_id} on {addr} stopped"),
            Ok(Err(err)) => error!("[FlowSupervisor] Worker {actor_id} failed: {err}"),
            Err(err) => error!("[FlowSupervisor] Worker {actor_id} panicked: {err}"),
        }
    }

    async fn subscribe(&self, tx: FlowSender) -> Vec<Subscription> {
        let mut subscriptions = Vec::with_capacity(self.workers.len());
        for (actor_id, worker) in &self.workers {
            match worker.subscribe_tx(tx.clone()).await {
                Ok(subscription) => subscriptions.push(subscription),
                Err(err) => warn!("[FlowSupervisor] Worker {actor_id} refused subscription: {err}"),
            }
        }
        subscriptions
    }

    async fn unsubscribe(&self, subscriptions: Vec<Subscription>) -> Vec<Option<ActorId>> {
        let mut unsubscribed = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            let actor_id = subscription.actor_id();
            let removed = match self.workers.get(&actor_id) {
                Some(worker) => worker.unsubscribe(subscription.id()).await,
                None => Ok(None),
            };
            match removed {
                Ok(Some(_)) => unsubscribed.push(Some(actor_id)),
                Ok(None) => {
                    debug!("[FlowSupervisor] {subscription} is unknown");
                    unsubscribed.push(None);
                }
                Err(err) => {
                    warn!("[FlowSupervisor] Unable to cancel {subscription}: {err}");
                    unsubscribed.push(None);
                }
            }
        }
        unsubscribed
    }

    async fn get_peers(&self) -> Vec<(ActorId, Vec<SocketAddr>)> {
        let mut peers = vec![];
        for (actor_id, worker) in &self.workers {
            match worker.get_peers().await {
                Ok(addrs) => peers.push((*actor_id, addrs)),
                Err(err) => warn!("[FlowSupervisor] {err}"),
            }
        }
        peers
    }

    async fn get_peer_template_ids(&self, peer: SocketAddr) -> Vec<(ActorId, PeerTemplateIds)> {
        let mut template_ids = vec![];
        for (actor_id, worker) in &self.workers {
            match worker.get_peer_template_ids(peer).await {
                Ok(ids) => template_ids.push((*actor_id, ids)),
                Err(err) => warn!("[FlowSupervisor] {err}"),
            }
        }
        template_ids
    }

    async fn handle_cmd(&mut self, cmd: SupervisorCommand) -> ControlFlow<oneshot::Sender<()>> {
        debug!(
            "[FlowSupervisor] Relaying {cmd} to {} workers",
            self.workers.len()
        );
        match cmd {
            SupervisorCommand::Subscribe(tx, reply) => {
                let _ = reply.send(self.subscribe(tx).await);
            }
            SupervisorCommand::Unsubscribe(subscriptions, reply) => {
                let _ = reply.send(self.unsubscribe(subscriptions).await);
            }
            SupervisorCommand::LocalAddresses(reply) => {
                let addrs = self
                    .workers
                    .iter()
                    .map(|(actor_id, worker)| (*actor_id, worker.local_addr()))
                    .collect();
                let _ = reply.send(addrs);
            }
            SupervisorCommand::GetPeers(reply) => {
                let _ = reply.send(self.get_peers().await);
            }
            SupervisorCommand::GetPeerTemplateIds(peer, reply) => {
                let _ = reply.send(self.get_peer_template_ids(peer).await);
            }
            SupervisorCommand::Shutdown(reply) => return ControlFlow::Break(reply),
        }
        ControlFlow::Continue(())
    }

    async fn stop_workers(
        &mut self,
        mut running: FuturesUnordered<impl Future<Output = WorkerExit>>,
    ) {
        for (actor_id, worker) in &self.workers {
            if let Err(err) = worker.shutdown().await {
                debug!("[FlowSupervisor] Worker {actor_id} already stopped: {err}");
            }
        }
        while let Some(exit) = running.next().await {
            self.worker_exited(exit);
        }
    }

    async fn run(mut self, mut running: FuturesUnordered<impl Future<Output = WorkerExit>>) {
        if running.is_empty() {
            warn!("[FlowSupervisor] No worker could be started");
            return;
        }
        loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if let ControlFlow::Break(reply) = self.handle_cmd(cmd).await {
                                info!("[FlowSupervisor] Stopping {} workers", self.workers.len());
                                self.stop_workers(running).await;
                                let _ = reply.send(());
                                return;
                            }
                        }
                        None => {
                            info!("[FlowSupervisor] Handle dropped, stopping workers");
                            self.stop_workers(running).await;
                            return;
                        }
                    }
                }
                Some(exit) = running.next() => {
                    self.worker_exited(exit);
                    if running.is_empty() {
                        warn!("[FlowSupervisor] Every worker stopped, exiting");
                        return;
                    }
                }
            }
        }
    }
}

#[derive(Debug, strum_macros::Display)]
pub enum FlowCollectorsSupervisorActorHandleError {
    #[strum(to_string = "flow supervisor is not running")]
    Stopped,
}

impl std::error::Error for FlowCollectorsSupervisorActorHandleError {}

#[derive(Debug, Clone)]
pub struct FlowCollectorsSupervisorActorHandle {
    cmd_tx: mpsc::Sender<SupervisorCommand>,
}

impl FlowCollectorsSupervisorActorHandle {
    /// Starts `num_workers` workers on every binding address. A worker that
    /// can't bind is logged and skipped, the join handle completes right away
    /// when none could be started.
    pub fn new(config: SupervisorConfig) -> (JoinHandle<()>, Self) {
        let mut workers = BTreeMap::new();
        let running = FuturesUnordered::new();
        let mut next_actor_id: ActorId = 0;
        for binding in &config.binding_addresses {
            for _ in 0..binding.num_workers {
                match FlowCollectorActorHandle::new(next_actor_id, binding, &config) {
                    Ok((join_handle, worker)) => {
                        info!(
                            "[FlowSupervisor] Worker {next_actor_id} listening on {}",
                            worker.local_addr()
                        );
                        running.push(watch(next_actor_id, join_handle));
                        workers.insert(next_actor_id, worker);
                        next_actor_id += 1;
                    }
                    Err(err) => error!("[FlowSupervisor] Worker not started: {err}"),
                }
            }
        }
        let (cmd_tx, cmd_rx) = mpsc::channel(config.cmd_buffer_size);
        let supervisor = FlowCollectorsSupervisorActor { workers, cmd_rx };
        (tokio::spawn(supervisor.run(running)), Self { cmd_tx })
    }

    async fn request<T>(
        &self,
        cmd: impl FnOnce(oneshot::Sender<T>) -> SupervisorCommand,
    ) -> Result<T, FlowCollectorsSupervisorActorHandleError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(cmd(tx))
            .await
            .map_err(|_| FlowCollectorsSupervisorActorHandleError::Stopped)?;
        rx.await
            .map_err(|_| FlowCollectorsSupervisorActorHandleError::Stopped)
    }

    /// Stops every worker. Returns once all of them dropped their
    /// subscriber channels.
    pub async fn shutdown(&self) -> Result<(), FlowCollectorsSupervisorActorHandleError> {
        self.request(SupervisorCommand::Shutdown).await
    }

    /// Subscribes one channel to every worker, the receiver closes when the
    /// last worker holding it stops.
    pub async fn subscribe(
        &self,
        buffer_size: usize,
    ) -> Result<(FlowReceiver, Vec<Subscription>), FlowCollectorsSupervisorActorHandleError> {
        let (tx, rx) = create_flow_channel(buffer_size);
        let subscriptions = self.subscribe_tx(tx).await?;
        Ok((rx, subscriptions))
    }

    pub async fn subscribe_tx(
        &self,
        tx: FlowSender,
    ) -> Result<Vec<Subscription>, FlowCollectorsSupervisorActorHandleError> {
        self.request(|reply| SupervisorCommand::Subscribe(tx, reply))
            .await
    }

    /// One entry per subscription, the worker it was removed from or `None`.
    pub async fn unsubscribe(
        &self,
        subscriptions: Vec<Subscription>,
    ) -> Result<Vec<Option<ActorId>>, FlowCollectorsSupervisorActorHandleError> {
        self.request(|reply| SupervisorCommand::Unsubscribe(subscriptions, reply))
            .await
    }

    pub async fn local_addresses(
        &self,
    ) -> Result<Vec<(ActorId, SocketAddr)>, FlowCollectorsSupervisorActorHandleError> {
        self.request(SupervisorCommand::LocalAddresses).await
    }

    pub async fn get_peers(
        &self,
    ) -> Result<Vec<(ActorId, Vec<SocketAddr>)>, FlowCollectorsSupervisorActorHandleError> {
        self.request(SupervisorCommand::GetPeers).await
    }

    pub async fn get_peer_template_ids(
        &self,
        peer: SocketAddr,
    ) -> Result<Vec<(ActorId, PeerTemplateIds)>, FlowCollectorsSupervisorActorHandleError> {
        self.request(|reply| SupervisorCommand::GetPeerTemplateIds(peer, reply))
            .await
    }
}
