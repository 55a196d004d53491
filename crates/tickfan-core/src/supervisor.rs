//! Upstream connection supervisor.
//!
//! Owns the TCP connection to the feed for the life of the process:
//! resolve, connect, send the credential token, stream into the pipeline,
//! and reconnect with jittered exponential backoff on any failure. The
//! token is written to the socket exactly once per connection and never
//! logged.

use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::config::UpstreamConfig;
use crate::metrics;
use crate::pipeline::IngestPipeline;

const READ_BUF_SIZE: usize = 16 * 1024;

/// Connection lifecycle, exported as a gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    Connecting,
    Authenticating,
    Streaming,
    Backoff,
}

impl SupervisorState {
    pub fn code(&self) -> i64 {
        match self {
            SupervisorState::Disconnected => 0,
            SupervisorState::Connecting => 1,
            SupervisorState::Authenticating => 2,
            SupervisorState::Streaming => 3,
            SupervisorState::Backoff => 4,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => SupervisorState::Connecting,
            2 => SupervisorState::Authenticating,
            3 => SupervisorState::Streaming,
            4 => SupervisorState::Backoff,
            _ => SupervisorState::Disconnected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::Disconnected => "disconnected",
            SupervisorState::Connecting => "connecting",
            SupervisorState::Authenticating => "authenticating",
            SupervisorState::Streaming => "streaming",
            SupervisorState::Backoff => "backoff",
        }
    }
}

/// How a connection attempt or an established stream failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Dns,
    Refused,
    AuthRejected,
    Idle,
    ReadError,
}

impl FailureKind {
    pub const ALL: &'static [FailureKind] = &[
        FailureKind::Dns,
        FailureKind::Refused,
        FailureKind::AuthRejected,
        FailureKind::Idle,
        FailureKind::ReadError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Dns => "dns",
            FailureKind::Refused => "refused",
            FailureKind::AuthRejected => "auth_rejected",
            FailureKind::Idle => "idle",
            FailureKind::ReadError => "read_error",
        }
    }
}

pub struct Supervisor {
    config: UpstreamConfig,
    pipeline: IngestPipeline,
    shutdown: watch::Receiver<bool>,
}

impl Supervisor {
    pub fn new(
        config: UpstreamConfig,
        pipeline: IngestPipeline,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            pipeline,
            shutdown,
        }
    }

    /// Run until shutdown. Never returns early on upstream failures; every
    /// failure path funnels into backoff and another attempt.
    pub async fn run(mut self) {
        // Attempt counts consecutive failures; a connection that streams at
        // least one record resets it so a later outage backs off from
        // scratch.
        let mut attempt: u32 = 0;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let kind = match self.connect_and_stream(&mut attempt).await {
                Ok(()) => break, // shutdown requested mid-stream
                Err(kind) => kind,
            };

            attempt += 1;
            metrics::inc_upstream_failure(kind);
            metrics::inc_reconnects();
            metrics::set_supervisor_state(SupervisorState::Backoff);

            let delay = backoff_delay(
                attempt,
                Duration::from_secs(self.config.backoff_initial_secs),
                Duration::from_secs(self.config.backoff_max_secs),
            );
            tracing::warn!(
                kind = kind.as_str(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "upstream connection failed, backing off"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }

        metrics::set_supervisor_state(SupervisorState::Disconnected);
        tracing::info!("supervisor stopped");
    }

    /// One connection lifetime. `Ok(())` means shutdown was requested;
    /// any upstream problem comes back as a [`FailureKind`].
    async fn connect_and_stream(&mut self, attempt: &mut u32) -> Result<(), FailureKind> {
        metrics::set_supervisor_state(SupervisorState::Connecting);
        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            "connecting to upstream"
        );

        let addr = tokio::net::lookup_host((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "upstream host resolution failed");
                FailureKind::Dns
            })?
            .next()
            .ok_or(FailureKind::Dns)?;

        let mut stream = TcpStream::connect(addr).await.map_err(|e| {
            tracing::warn!(error = %e, "upstream connect failed");
            FailureKind::Refused
        })?;

        metrics::set_supervisor_state(SupervisorState::Authenticating);
        stream
            .write_all(self.config.token.as_bytes())
            .await
            .map_err(|_| FailureKind::ReadError)?;

        self.stream_loop(&mut stream, attempt).await
    }

    async fn stream_loop(
        &mut self,
        stream: &mut TcpStream,
        attempt: &mut u32,
    ) -> Result<(), FailureKind> {
        let mut buf = vec![0u8; READ_BUF_SIZE];
        let mut streaming = false;

        loop {
            let read = tokio::select! {
                read = tokio::time::timeout(self.config.idle_timeout(), stream.read(&mut buf)) => read,
                _ = self.shutdown.changed() => return Ok(()),
            };

            let n = match read {
                Err(_elapsed) => {
                    tracing::warn!(
                        idle_secs = self.config.idle_timeout_secs,
                        "upstream went silent"
                    );
                    return Err(FailureKind::Idle);
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "upstream read failed");
                    return Err(FailureKind::ReadError);
                }
                Ok(Ok(0)) => {
                    // EOF straight after the token means the upstream did
                    // not like the credential.
                    return if streaming {
                        tracing::warn!("upstream closed the connection");
                        Err(FailureKind::ReadError)
                    } else {
                        tracing::warn!("upstream closed before streaming; credential rejected?");
                        Err(FailureKind::AuthRejected)
                    };
                }
                Ok(Ok(n)) => n,
            };

            let records = self.pipeline.push_bytes(&buf[..n]);
            if !streaming && records > 0 {
                streaming = true;
                *attempt = 0;
                metrics::set_supervisor_state(SupervisorState::Streaming);
                tracing::info!("upstream streaming");
            }
        }
    }
}

/// Exponential backoff capped at `max`, plus jitter uniform in
/// `[0, initial)` so a fleet of consumers does not reconnect in lockstep.
pub fn backoff_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let exp = initial
        .checked_mul(1u32 << attempt.saturating_sub(1).min(16))
        .unwrap_or(max)
        .min(max);
    let jitter_ms = initial.as_millis() as u64;
    if jitter_ms == 0 {
        return exp;
    }
    exp + Duration::from_millis(rand::rng().random_range(0..jitter_ms))
}
