use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::config::SwimConfig;
use crate::membership::{MembershipEvent, Snapshot};
use crate::message::{Message, MAX_DATAGRAM_SIZE};
use crate::node::{Event, SwimNode};
use crate::timeout::{Timeout, TimeoutId, Timer};
use crate::transport::{AddressBook, UdpTransport};

/// Timer service backed by tokio tasks.
///
/// Each timeout is a spawned task that sleeps and then pushes
/// `Event::TimeoutFired` into the node's event channel. Cancelling aborts the
/// task; a firing already queued is discarded by the node.
pub struct TokioTimer {
    events: mpsc::UnboundedSender<Event>,
    tasks: HashMap<TimeoutId, JoinHandle<()>>,
}

impl TokioTimer {
    pub fn new(events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            events,
            tasks: HashMap::new(),
        }
    }

    fn prune(&mut self) {
        self.tasks.retain(|_, task| !task.is_finished());
    }
}

impl Timer for TokioTimer {
    fn schedule_once(&mut self, delay: Duration, timeout: Timeout) {
        self.prune();
        let id = timeout.id;
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = events.send(Event::TimeoutFired(timeout));
        });
        self.tasks.insert(id, task);
    }

    fn schedule_periodic(&mut self, initial_delay: Duration, period: Duration, timeout: Timeout) {
        self.prune();
        let id = timeout.id;
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + initial_delay, period);
            loop {
                ticker.tick().await;
                if events.send(Event::TimeoutFired(timeout.clone())).is_err() {
                    break;
                }
            }
        });
        self.tasks.insert(id, task);
    }

    fn cancel(&mut self, id: TimeoutId) {
        if let Some(task) = self.tasks.remove(&id) {
            task.abort();
        }
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

pub type UdpSwimNode = SwimNode<UdpTransport, TokioTimer>;

/// A node bound to a UDP socket, ready to run.
pub struct SwimService {
    config: SwimConfig,
    socket: Arc<UdpSocket>,
}

impl SwimService {
    pub async fn bind(mut config: SwimConfig) -> Result<Self> {
        config.validate()?;
        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind UDP socket on {}", config.bind_addr))?;

        // With an ephemeral port the identity must be the address peers can reach
        if config.node_id.is_none() {
            let local = socket
                .local_addr()
                .context("Failed to read local socket address")?;
            config.node_id = Some(local.to_string());
        }

        Ok(Self {
            config,
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .context("Failed to read local socket address")
    }

    /// Start the protocol loop on the current tokio runtime.
    pub fn spawn(self) -> ServiceHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (membership_tx, membership_rx) = mpsc::channel(100);
        let (view_tx, view_rx) = watch::channel(Snapshot::new());

        let task = tokio::spawn(async move {
            let result = self.run(shutdown_rx, membership_tx, view_tx).await;
            if let Err(e) = &result {
                error!("Membership protocol error: {:#}", e);
            }
            result
        });

        ServiceHandle {
            shutdown_tx,
            events: Some(membership_rx),
            view: view_rx,
            task,
        }
    }

    // Main protocol loop: one event at a time, to completion
    async fn run(
        self,
        mut shutdown_rx: mpsc::Receiver<()>,
        membership_tx: mpsc::Sender<MembershipEvent>,
        view_tx: watch::Sender<Snapshot>,
    ) -> Result<()> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let transport = UdpTransport::new(
            self.socket.clone(),
            AddressBook::new(self.config.address_book()),
        );
        let timer = TokioTimer::new(event_tx);
        let mut node = SwimNode::new(self.config.node_config(), transport, timer);

        info!(
            "Starting membership protocol for {} on {}",
            node.local_id(),
            self.local_addr()?
        );
        node.start();
        publish(&mut node, &membership_tx, &view_tx);

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                Some(event) = event_rx.recv() => {
                    node.handle(event);
                }
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, src)) => match Message::decode(&buf[..len]) {
                            Ok(message) => {
                                node.transport_mut().addresses_mut().learn(message.sender(), src);
                                node.handle(Event::from(message));
                            }
                            Err(e) => warn!("Dropping datagram from {}: {:#}", src, e),
                        },
                        Err(e) => {
                            warn!("Failed to receive: {}", e);
                            continue;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutting down membership protocol");
                    break;
                }
            }

            publish(&mut node, &membership_tx, &view_tx);
        }

        node.stop();
        Ok(())
    }
}

// Hand the latest view and membership events to the outside world
fn publish(
    node: &mut UdpSwimNode,
    membership_tx: &mpsc::Sender<MembershipEvent>,
    view_tx: &watch::Sender<Snapshot>,
) {
    for event in node.drain_events() {
        if membership_tx.try_send(event).is_err() {
            debug!("Membership event dropped, no listener or channel full");
        }
    }

    view_tx.send_if_modified(|current| {
        let latest = node.view().snapshot();
        if *current == latest {
            return false;
        }
        *current = latest;
        true
    });
}

/// Control handle of a running `SwimService`.
pub struct ServiceHandle {
    shutdown_tx: mpsc::Sender<()>,
    events: Option<mpsc::Receiver<MembershipEvent>>,
    view: watch::Receiver<Snapshot>,
    task: JoinHandle<Result<()>>,
}

impl ServiceHandle {
    /// Latest published membership view.
    pub fn view(&self) -> Snapshot {
        self.view.borrow().clone()
    }

    /// Watch the view for changes.
    pub fn subscribe_view(&self) -> watch::Receiver<Snapshot> {
        self.view.clone()
    }

    /// Membership events. Can only be taken once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<MembershipEvent>> {
        self.events.take()
    }

    /// Stop the protocol and wait for the loop to finish.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(()).await;
        self.task
            .await
            .context("Membership protocol task panicked")?
    }
}
