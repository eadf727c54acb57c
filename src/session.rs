//! Per-master sessions.
//!
//! A [`Session`] owns one [`Connection`] and runs in its own task. It reads
//! inbound ASDUs, hands them to the [`Dispatcher`], sends the replies in
//! order and, while the link is active, drains its [`OutboundQueue`].
//! Every live session is listed in the [`SessionRegistry`] so producers can
//! fan out to all of them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::StationConfig;
use crate::dispatcher::{Dispatcher, Responder};
use crate::error::{Iec104Error, Result};
use crate::macros::{log_debug, log_info, log_trace, log_warn};
use crate::queue::OutboundQueue;
use crate::types::{Asdu, Cot};

/// Something that happened on a link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A decoded ASDU from the master
    Asdu(Asdu),
    /// Data transfer started (STARTDT) or stopped (STOPDT)
    Active(bool),
    /// The peer closed the link
    Closed,
}

/// Transport seam between a session and its master.
///
/// `receive` must be cancel safe: the session polls it concurrently with
/// its outbound queue and drops it when the queue wins.
pub trait Connection: Send {
    /// Wait for the next link event.
    fn receive(&mut self) -> impl Future<Output = Result<LinkEvent>> + Send;

    /// Send one ASDU. An error ends the session.
    fn send(&mut self, asdu: Asdu) -> impl Future<Output = Result<()>> + Send;
}

/// In-process [`Connection`] backed by two mpsc channels.
#[derive(Debug)]
pub struct ChannelConnection {
    events: mpsc::Receiver<LinkEvent>,
    replies: mpsc::Sender<Asdu>,
}

/// Master side of a [`ChannelConnection`].
#[derive(Debug)]
pub struct ChannelPeer {
    events: mpsc::Sender<LinkEvent>,
    replies: mpsc::Receiver<Asdu>,
}

/// Create a connected channel pair with `buffer` slots per direction.
pub fn channel_connection(buffer: usize) -> (ChannelConnection, ChannelPeer) {
    let (event_tx, event_rx) = mpsc::channel(buffer.max(1));
    let (reply_tx, reply_rx) = mpsc::channel(buffer.max(1));
    (
        ChannelConnection {
            events: event_rx,
            replies: reply_tx,
        },
        ChannelPeer {
            events: event_tx,
            replies: reply_rx,
        },
    )
}

impl Connection for ChannelConnection {
    async fn receive(&mut self) -> Result<LinkEvent> {
        Ok(self.events.recv().await.unwrap_or(LinkEvent::Closed))
    }

    async fn send(&mut self, asdu: Asdu) -> Result<()> {
        self.replies
            .send(asdu)
            .await
            .map_err(|_| Iec104Error::LinkClosed)
    }
}

impl ChannelPeer {
    /// Start or stop data transfer.
    pub async fn set_active(&self, active: bool) -> Result<()> {
        self.event(LinkEvent::Active(active)).await
    }

    /// Send an ASDU to the station.
    pub async fn send(&self, asdu: Asdu) -> Result<()> {
        self.event(LinkEvent::Asdu(asdu)).await
    }

    /// Signal an orderly close.
    pub async fn close(&self) -> Result<()> {
        self.event(LinkEvent::Closed).await
    }

    async fn event(&self, event: LinkEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| Iec104Error::LinkClosed)
    }

    /// Wait for the next ASDU from the station. `None` once the session ended.
    pub async fn recv(&mut self) -> Option<Asdu> {
        self.replies.recv().await
    }

    /// Take an ASDU if one is already waiting.
    pub fn try_recv(&mut self) -> Option<Asdu> {
        self.replies.try_recv().ok()
    }
}

/// Live sessions by id.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<u64, Arc<OutboundQueue>>>>,
    next_id: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Arc<OutboundQueue>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a session queue and return the new session id.
    pub fn register(&self, queue: Arc<OutboundQueue>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, queue);
        id
    }

    /// Remove a session. Its queue is discarded.
    pub fn unregister(&self, id: u64) {
        if let Some(queue) = self.lock().remove(&id) {
            queue.clear();
        }
    }

    /// Queue of a session, if it is still registered.
    pub fn queue(&self, id: u64) -> Option<Arc<OutboundQueue>> {
        self.lock().get(&id).cloned()
    }

    /// Enqueue a copy of `asdu` on every session. Returns the number of
    /// sessions reached.
    pub fn broadcast(&self, asdu: &Asdu) -> usize {
        // Clone the queue handles so producers never hold the map lock
        // while touching a session queue.
        let queues: Vec<(u64, Arc<OutboundQueue>)> = self
            .lock()
            .iter()
            .map(|(id, q)| (*id, q.clone()))
            .collect();

        for (id, queue) in &queues {
            if let Some(evicted) = queue.enqueue(asdu.clone()) {
                log_debug!(
                    "Session {} queue full, evicted entry {} ({})",
                    id,
                    evicted.seq,
                    evicted.asdu
                );
            }
        }
        queues.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove every session.
    pub fn clear(&self) {
        let drained: Vec<Arc<OutboundQueue>> = self.lock().drain().map(|(_, q)| q).collect();
        for queue in drained {
            queue.clear();
        }
    }
}

/// State of one master link.
pub struct Session<C: Connection> {
    id: u64,
    conn: C,
    queue: Arc<OutboundQueue>,
    dispatcher: Dispatcher,
    config: Arc<StationConfig>,
    registry: SessionRegistry,
    cancel: CancellationToken,
    active: bool,
}

impl<C: Connection> Session<C> {
    /// Create a session for `conn` and register its queue.
    ///
    /// The link starts inactive; nothing is sent from the queue before the
    /// connection reports `LinkEvent::Active(true)`.
    pub fn new(
        conn: C,
        dispatcher: Dispatcher,
        config: Arc<StationConfig>,
        registry: SessionRegistry,
        cancel: CancellationToken,
    ) -> Self {
        let queue = Arc::new(OutboundQueue::new(config.queue_capacity));
        let id = registry.register(queue.clone());
        Self {
            id,
            conn,
            queue,
            dispatcher,
            config,
            registry,
            cancel,
            active: false,
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn queue(&self) -> &Arc<OutboundQueue> {
        &self.queue
    }

    /// Run until the link closes, fails or the station is stopped.
    ///
    /// The session unregisters itself when it ends.
    pub async fn run(mut self) -> Result<()> {
        log_info!("Session {} opened", self.id);

        let result = self.run_loop().await;
        match &result {
            Ok(()) => log_info!("Session {} closed", self.id),
            Err(e) => log_warn!("Session {} ended: {}", self.id, e),
        }
        result
    }

    async fn run_loop(&mut self) -> Result<()> {
        loop {
            if self.active {
                self.drain_queue().await?;
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return Ok(()),

                event = self.conn.receive() => match event? {
                    LinkEvent::Asdu(asdu) => self.handle_asdu(asdu).await?,
                    LinkEvent::Active(active) => {
                        log_debug!("Session {} data transfer active={}", self.id, active);
                        self.active = active;
                    }
                    LinkEvent::Closed => return Ok(()),
                },

                _ = self.queue.notified(), if self.active => {}
            }
        }
    }

    /// Dispatch one inbound ASDU and send every reply before returning.
    async fn handle_asdu(&mut self, asdu: Asdu) -> Result<()> {
        log_trace!("Session {} received {}", self.id, asdu);

        let mut responder = Responder::new(self.config.common_address);
        if !self.config.accepts_address(asdu.common_address()) {
            log_debug!(
                "Session {}: ASDU for unknown common address {}",
                self.id,
                asdu.common_address()
            );
            responder.send_error(&asdu, Cot::UnknownCommonAddress);
        } else if !self.dispatcher.handle_inbound(&mut responder, &asdu) {
            responder.send_error(&asdu, Cot::UnknownTypeId);
        }

        let replies: Vec<Asdu> = responder.drain().collect();
        for reply in replies {
            self.send(reply).await?;
        }
        Ok(())
    }

    async fn drain_queue(&mut self) -> Result<()> {
        while let Some(entry) = self.queue.pop() {
            self.send(entry.asdu).await?;
        }
        Ok(())
    }

    async fn send(&mut self, asdu: Asdu) -> Result<()> {
        log_trace!("Session {} sending {}", self.id, asdu);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Iec104Error::LinkClosed),
            result = self.conn.send(asdu) => result,
        }
    }
}

impl<C: Connection> Drop for Session<C> {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

impl<C: Connection> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("active", &self.active)
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Handlers;
    use crate::process::ProcessHandler;
    use crate::config::BROADCAST_ADDRESS;
    use crate::types::{
        ClockSyncCommand, Cp56Time2a, InformationObject, InterrogationCommand, Ioa,
        MeasuredValueFloat, MeasuredValueScaled, Quality, SingleCommand, TypeId,
    };
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn periodic(value: i16) -> Asdu {
        let mut asdu = Asdu::new(TypeId::MeasuredScaled, Cot::Periodic, 1);
        asdu.add_object(MeasuredValueScaled {
            ioa: Ioa::new(110),
            value,
            quality: Quality::GOOD,
        })
        .unwrap();
        asdu
    }

    fn command(ioa: u32, common_address: u16) -> Asdu {
        let mut asdu = Asdu::new(TypeId::SingleCommand, Cot::Activation, common_address);
        asdu.add_object(SingleCommand {
            ioa: Ioa::new(ioa),
            state: true,
            select: false,
            qualifier: 0,
        })
        .unwrap();
        asdu
    }

    fn session(
        conn: ChannelConnection,
        config: StationConfig,
        registry: &SessionRegistry,
        cancel: &CancellationToken,
    ) -> Session<ChannelConnection> {
        Session::new(
            conn,
            Dispatcher::new(Arc::new(ProcessHandler::default())),
            Arc::new(config),
            registry.clone(),
            cancel.clone(),
        )
    }

    async fn next(peer: &mut ChannelPeer) -> Asdu {
        timeout(WAIT, peer.recv())
            .await
            .expect("timed out waiting for ASDU")
            .expect("session ended")
    }

    #[tokio::test]
    async fn test_command_replies() {
        let (conn, mut peer) = channel_connection(16);
        let registry = SessionRegistry::new();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(session(conn, StationConfig::default(), &registry, &cancel).run());

        peer.set_active(true).await.unwrap();
        peer.send(command(5000, 1)).await.unwrap();
        let reply = next(&mut peer).await;
        assert_eq!(reply.cot(), Cot::ActivationCon);
        assert!(!reply.is_negative());

        peer.send(command(9999, 1)).await.unwrap();
        assert_eq!(next(&mut peer).await.cot(), Cot::UnknownIoa);

        peer.close().await.unwrap();
        assert!(handle.await.unwrap().is_ok());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unhandled_asdu_is_rejected() {
        let (conn, mut peer) = channel_connection(16);
        let registry = SessionRegistry::new();
        let cancel = CancellationToken::new();
        let s = Session::new(
            conn,
            Dispatcher::new(Arc::new(Handlers::new())),
            Arc::new(StationConfig::default()),
            registry.clone(),
            cancel.clone(),
        );
        tokio::spawn(s.run());

        let mut asdu = Asdu::new(TypeId::MeasuredFloat, Cot::Spontaneous, 1);
        asdu.add_object(MeasuredValueFloat {
            ioa: Ioa::new(1),
            value: 1.0,
            quality: Quality::GOOD,
        })
        .unwrap();
        peer.send(asdu.clone()).await.unwrap();

        let reply = next(&mut peer).await;
        assert_eq!(reply.cot(), Cot::UnknownTypeId);
        assert!(reply.is_negative());
        assert_eq!(reply.objects(), asdu.objects());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_unknown_common_address() {
        let (conn, mut peer) = channel_connection(16);
        let registry = SessionRegistry::new();
        let cancel = CancellationToken::new();
        tokio::spawn(session(conn, StationConfig::default(), &registry, &cancel).run());

        peer.send(command(5000, 42)).await.unwrap();
        let reply = next(&mut peer).await;
        assert_eq!(reply.cot(), Cot::UnknownCommonAddress);
        assert!(reply.is_negative());

        // Broadcast address is accepted
        peer.send(command(5000, 0xFFFF)).await.unwrap();
        assert_eq!(next(&mut peer).await.cot(), Cot::ActivationCon);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_rejected_clock_sync_has_no_reply() {
        let (conn, mut peer) = channel_connection(16);
        let registry = SessionRegistry::new();
        let cancel = CancellationToken::new();
        let handler = Arc::new(ProcessHandler::default());
        let s = Session::new(
            conn,
            Dispatcher::new(handler.clone()),
            Arc::new(StationConfig::default()),
            registry.clone(),
            cancel.clone(),
        );
        tokio::spawn(s.run());
        peer.set_active(true).await.unwrap();

        let mut sync = Asdu::new(TypeId::ClockSync, Cot::Activation, 1);
        sync.add_object(ClockSyncCommand {
            ioa: Ioa::new(0),
            time: Cp56Time2a {
                invalid: true,
                ..Cp56Time2a::now()
            },
        })
        .unwrap();
        peer.send(sync).await.unwrap();

        // The next reply belongs to the command sent afterwards
        peer.send(command(5000, 1)).await.unwrap();
        let reply = next(&mut peer).await;
        assert_eq!(reply.type_id(), TypeId::SingleCommand);
        assert_eq!(reply.cot(), Cot::ActivationCon);
        assert!(peer.try_recv().is_none());
        assert!(handler.last_clock_sync().is_none());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_broadcast_interrogation_uses_station_address() {
        let (conn, mut peer) = channel_connection(16);
        let registry = SessionRegistry::new();
        let cancel = CancellationToken::new();
        let config = StationConfig::default().common_address(7);
        tokio::spawn(session(conn, config, &registry, &cancel).run());
        peer.set_active(true).await.unwrap();

        let mut gi = Asdu::new(TypeId::InterrogationCommand, Cot::Activation, BROADCAST_ADDRESS);
        gi.add_object(InterrogationCommand { ioa: Ioa::new(0), qoi: 20 })
            .unwrap();
        peer.send(gi).await.unwrap();

        let mut replies = Vec::new();
        for _ in 0..5 {
            let reply = next(&mut peer).await;
            replies.push((reply.cot(), reply.common_address()));
        }
        assert_eq!(
            replies,
            vec![
                (Cot::ActivationCon, 7),
                (Cot::InterrogatedByStation, 7),
                (Cot::InterrogatedByStation, 7),
                (Cot::InterrogatedByStation, 7),
                (Cot::ActivationTerm, 7),
            ]
        );
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_queue_held_until_active() {
        let (conn, mut peer) = channel_connection(16);
        let registry = SessionRegistry::new();
        let cancel = CancellationToken::new();
        let config = StationConfig::default().queue_capacity(3);
        let s = session(conn, config, &registry, &cancel);
        let queue = s.queue().clone();
        tokio::spawn(s.run());

        for v in 0..5 {
            assert_eq!(registry.broadcast(&periodic(v)), 1);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(peer.try_recv().is_none());
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 2);

        peer.set_active(true).await.unwrap();
        let mut values = Vec::new();
        for _ in 0..3 {
            match next(&mut peer).await.first_object() {
                Some(InformationObject::MeasuredScaled(m)) => values.push(m.value),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(values, vec![2, 3, 4]);

        // Queue keeps flowing while active
        registry.broadcast(&periodic(5));
        assert_eq!(next(&mut peer).await.cot(), Cot::Periodic);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_stopdt_pauses_queue() {
        let (conn, mut peer) = channel_connection(16);
        let registry = SessionRegistry::new();
        let cancel = CancellationToken::new();
        tokio::spawn(session(conn, StationConfig::default(), &registry, &cancel).run());

        peer.set_active(true).await.unwrap();
        peer.set_active(false).await.unwrap();
        // Round-trip a command so both link events are processed
        peer.send(command(5000, 1)).await.unwrap();
        next(&mut peer).await;

        registry.broadcast(&periodic(1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(peer.try_recv().is_none());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_cancel_ends_session() {
        let (conn, _peer) = channel_connection(16);
        let registry = SessionRegistry::new();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(session(conn, StationConfig::default(), &registry, &cancel).run());

        tokio::task::yield_now().await;
        assert_eq!(registry.len(), 1);
        cancel.cancel();
        assert!(timeout(WAIT, handle).await.unwrap().unwrap().is_ok());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_registry_broadcast() {
        let registry = SessionRegistry::new();
        let a = Arc::new(OutboundQueue::new(2));
        let b = Arc::new(OutboundQueue::new(2));
        let id_a = registry.register(a.clone());
        let id_b = registry.register(b.clone());
        assert_ne!(id_a, id_b);

        assert_eq!(registry.broadcast(&periodic(1)), 2);
        assert_eq!((a.len(), b.len()), (1, 1));

        registry.unregister(id_a);
        assert!(a.is_empty());
        assert!(registry.queue(id_a).is_none());
        assert_eq!(registry.broadcast(&periodic(2)), 1);
        assert_eq!(b.len(), 2);

        registry.clear();
        assert!(registry.is_empty());
        assert!(b.is_empty());
    }
}
