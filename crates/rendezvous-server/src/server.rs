//! Server runtime: binds both channels and runs the accept loop, the
//! receive loop and the liveness sweeper.

use crate::config::Config;
use crate::control::ControlSession;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::metrics::{self, SessionMetricsGuard};
use anyhow::Result;
use rendezvous_core::{Role, RoomRegistry, Sweeper};
use rendezvous_protocol::FrameCodec;
use rendezvous_transport::{ControlListener, DatagramSink, UdpChannel};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound Rendezvous server.
pub struct Server {
    config: Config,
    registry: Arc<RoomRegistry>,
    listener: ControlListener,
    channel: UdpChannel,
    codec: FrameCodec,
    /// Bounds in-flight control sessions.
    control_workers: Arc<Semaphore>,
    /// Bounds in-flight datagram dispatches.
    data_workers: Arc<Semaphore>,
}

impl Server {
    /// Bind the control and data channels.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or either socket
    /// cannot be bound.
    pub async fn bind(config: Config) -> Result<Self> {
        let codec = config.codec()?;
        let listener = ControlListener::bind(config.control_addr()?, codec.frame_size()).await?;
        let channel = UdpChannel::bind(config.data_addr()?, codec.frame_size()).await?;
        let registry = Arc::new(RoomRegistry::with_config(config.registry_config()));
        let limit = config.limits.max_concurrent_handlers;

        Ok(Self {
            config,
            registry,
            listener,
            channel,
            codec,
            control_workers: Arc::new(Semaphore::new(limit)),
            data_workers: Arc::new(Semaphore::new(limit)),
        })
    }

    /// Address of the control channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn control_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Address of the data channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn data_addr(&self) -> Result<SocketAddr> {
        Ok(self.channel.local_addr()?)
    }

    /// Shared handle to the room registry.
    #[must_use]
    pub fn registry(&self) -> Arc<RoomRegistry> {
        Arc::clone(&self.registry)
    }

    /// Run until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns an error if a serving loop fails.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns an error if a serving loop fails.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            control = %self.control_addr()?,
            data = %self.data_addr()?,
            frame_size = self.codec.frame_size(),
            "Rendezvous server running"
        );

        let stats_registry = Arc::clone(&self.registry);
        let sweeper = Sweeper::new(Arc::clone(&self.registry), self.config.sweeper_config())
            .spawn(move |report| {
                metrics::record_sweep(report);
                metrics::set_registry_stats(stats_registry.stats());
            });

        let result = tokio::select! {
            () = shutdown => {
                info!("Shutdown requested");
                Ok(())
            }
            r = self.accept_loop() => r,
            r = self.recv_loop() => r,
        };

        sweeper.abort();
        result
    }

    async fn accept_loop(&self) -> Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    metrics::record_error("accept");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            let permit = Arc::clone(&self.control_workers).acquire_owned().await?;

            let session = ControlSession::new(
                stream,
                Arc::clone(&self.registry),
                self.codec,
                self.config.request_timeout(),
            );
            let registry = Arc::clone(&self.registry);

            tokio::spawn(async move {
                let _permit = permit;
                let _metrics_guard = SessionMetricsGuard::new();

                match session.run().await {
                    Ok(admitted) => {
                        info!(
                            peer = %peer,
                            room = %admitted.room,
                            identity = %admitted.identity,
                            role = %admitted.role,
                            "Admitted"
                        );
                        metrics::record_handshake("admitted", role_label(admitted.role));
                        metrics::set_registry_stats(registry.stats());
                    }
                    Err(e) => {
                        debug!(peer = %peer, error = %e, "Handshake failed");
                        metrics::record_handshake("rejected", "none");
                        metrics::record_error(e.kind());
                    }
                }
            });
        }
    }

    async fn recv_loop(&self) -> Result<()> {
        let sink: Arc<dyn DatagramSink> = Arc::new(self.channel.clone());
        let dispatcher = Dispatcher::new(Arc::clone(&self.registry), sink, self.codec);

        loop {
            let (frame, src) = match self.channel.recv().await {
                Ok(received) => received,
                Err(e) => {
                    warn!("Receive failed: {}", e);
                    metrics::record_error("recv");
                    continue;
                }
            };
            let permit = Arc::clone(&self.data_workers).acquire_owned().await?;

            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let started = Instant::now();
                let outcome = dispatcher.dispatch(&frame, src).await;

                metrics::record_datagram(outcome.label(), started.elapsed().as_secs_f64());
                if let DispatchOutcome::Relayed { delivered, evicted } = &outcome {
                    metrics::record_deliveries(*delivered);
                    metrics::record_evictions("unreachable", evicted.len());
                }
            });
        }
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::Owner => "owner",
        Role::Member => "member",
    }
}
