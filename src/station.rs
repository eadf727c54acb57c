//! Outstation lifecycle.
//!
//! A [`Station`] owns the configuration, the dispatcher and the session
//! registry. [`Station::start`] binds the TCP listener and arms the
//! [`PeriodicReporter`]; [`Station::stop`] cancels both together with every
//! session.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::StationConfig;
use crate::dispatcher::{Dispatcher, StationHandler};
use crate::error::{Iec104Error, Result};
use crate::macros::{log_debug, log_info, log_warn};
use crate::session::{Connection, Session, SessionRegistry};
use crate::transport::TcpConnection;
use crate::types::{Asdu, Cot, Ioa, MeasuredValueScaled, Quality, TypeId};

/// IEC 104 outstation.
pub struct Station {
    config: Arc<StationConfig>,
    dispatcher: Dispatcher,
    registry: SessionRegistry,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl Station {
    /// Create a stopped station.
    pub fn new(config: StationConfig, handler: Arc<dyn StationHandler>) -> Self {
        Self {
            config: Arc::new(config),
            dispatcher: Dispatcher::new(handler),
            registry: SessionRegistry::new(),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            local_addr: None,
        }
    }

    #[inline]
    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    /// Bind the listener and start accepting masters.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 is used.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.is_running() {
            return Err(Iec104Error::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.config.bind_address).await?;
        let local_addr = listener.local_addr()?;
        log_info!("Outstation listening on {}", local_addr);

        self.tasks.push(tokio::spawn(accept_loop(
            listener,
            self.config.clone(),
            self.dispatcher.clone(),
            self.registry.clone(),
            self.cancel.clone(),
        )));

        if let Some(reporter) = PeriodicReporter::from_config(&self.config) {
            self.tasks.push(tokio::spawn(
                reporter.run(self.registry.clone(), self.cancel.clone()),
            ));
        }

        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Stop the listener, the periodic reporter and every session.
    ///
    /// Queued ASDUs are discarded. The station can be started again.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            return Err(Iec104Error::NotRunning);
        }

        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                log_warn!("Station task failed: {}", e);
            }
        }
        self.registry.clear();
        self.cancel = CancellationToken::new();
        self.local_addr = None;

        log_info!("Outstation stopped");
        Ok(())
    }

    /// Serve an already established connection in its own task.
    ///
    /// The session is registered before this returns, so it receives every
    /// ASDU enqueued afterwards.
    pub fn attach<C>(&self, conn: C) -> JoinHandle<()>
    where
        C: Connection + 'static,
    {
        let session = Session::new(
            conn,
            self.dispatcher.clone(),
            self.config.clone(),
            self.registry.clone(),
            self.cancel.clone(),
        );
        tokio::spawn(async move {
            let _ = session.run().await;
        })
    }

    /// Enqueue `asdu` on every live session. Returns the number of sessions
    /// reached.
    pub fn enqueue_asdu(&self, asdu: Asdu) -> usize {
        self.registry.broadcast(&asdu)
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.local_addr.is_some()
    }

    /// Address the listener is bound to while running.
    #[inline]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    #[inline]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }
}

impl Drop for Station {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Station {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Station")
            .field("config", &self.config)
            .field("local_addr", &self.local_addr)
            .field("sessions", &self.registry.len())
            .finish_non_exhaustive()
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<StationConfig>,
    dispatcher: Dispatcher,
    registry: SessionRegistry,
    cancel: CancellationToken,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        log_warn!("Accept failed: {}", e);
                        continue;
                    }
                };

                if sessions.len() >= config.max_connections {
                    log_warn!("Connection limit reached, rejecting {}", peer);
                    drop(stream);
                    continue;
                }
                if let Err(e) = stream.set_nodelay(true) {
                    log_debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                }

                log_info!("Master connected from {}", peer);
                let session = Session::new(
                    TcpConnection::with_config(stream, &config),
                    dispatcher.clone(),
                    config.clone(),
                    registry.clone(),
                    cancel.clone(),
                );
                sessions.spawn(async move {
                    let _ = session.run().await;
                    log_info!("Master {} disconnected", peer);
                });
            }

            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }

    while sessions.join_next().await.is_some() {}
}

/// Timer-driven producer of periodic scaled measurements.
///
/// Every tick enqueues one M_ME_NB_1 with cause PERIODIC on each live
/// session. The reported value is a wrapping counter starting at 0.
#[derive(Debug, Clone)]
pub struct PeriodicReporter {
    ioa: Ioa,
    common_address: u16,
    period: Duration,
    counter: i16,
}

impl PeriodicReporter {
    pub fn new(ioa: Ioa, common_address: u16, period: Duration) -> Self {
        Self {
            ioa,
            common_address,
            period,
            counter: 0,
        }
    }

    /// Reporter for `config`, or `None` when periodic reporting is disabled.
    pub fn from_config(config: &StationConfig) -> Option<Self> {
        config
            .periodic_interval
            .filter(|period| !period.is_zero())
            .map(|period| Self::new(config.periodic_ioa, config.common_address, period))
    }

    #[inline]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Build the next periodic ASDU and advance the counter.
    pub fn next_asdu(&mut self) -> Result<Asdu> {
        let mut asdu = Asdu::new(TypeId::MeasuredScaled, Cot::Periodic, self.common_address);
        asdu.add_object(MeasuredValueScaled {
            ioa: self.ioa,
            value: self.counter,
            quality: Quality::GOOD,
        })?;
        self.counter = self.counter.wrapping_add(1);
        Ok(asdu)
    }

    /// Enqueue the next ASDU on every session in `registry`.
    pub fn tick(&mut self, registry: &SessionRegistry) -> Result<usize> {
        let asdu = self.next_asdu()?;
        Ok(registry.broadcast(&asdu))
    }

    /// Tick every period until `cancel` fires. The first tick comes one
    /// period after the call.
    pub async fn run(mut self, registry: SessionRegistry, cancel: CancellationToken) {
        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick(&registry) {
                        log_warn!("Periodic report failed: {}", e);
                    }
                }
            }
        }
    }
}
