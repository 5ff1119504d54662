use crate::error::{RegistryError, Result};
use crate::registry::DiscoverClient;
use crate::service::{InstanceIdentity, HEALTH_CHECK_PATH};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Registering,
    Serving,
    Deregistering,
    Stopped,
    /// Registration was refused; nothing was served.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "interrupt"),
            ShutdownSignal::Terminate => write!(f, "terminated"),
        }
    }
}

/// Whatever ended the serving phase first.
#[derive(Debug)]
pub enum ShutdownCause {
    Signal(ShutdownSignal),
    ServeFailed(io::Error),
    ServeStopped,
}

impl ShutdownCause {
    pub fn is_failure(&self) -> bool {
        matches!(self, ShutdownCause::ServeFailed(_))
    }
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownCause::Signal(signal) => write!(f, "forced to exit by signal: {}", signal),
            ShutdownCause::ServeFailed(e) => write!(f, "server failed: {}", e),
            ShutdownCause::ServeStopped => write!(f, "server stopped"),
        }
    }
}

/// Drives register → serve → deregister for one instance.
pub struct ServiceLifecycle {
    identity: InstanceIdentity,
    client: Arc<dyn DiscoverClient>,
    meta: HashMap<String, String>,
    state: LifecycleState,
    span: Span,
}

impl ServiceLifecycle {
    pub fn new(identity: InstanceIdentity, client: Arc<dyn DiscoverClient>) -> Self {
        let span = info_span!(
            "lifecycle",
            service = %identity.service_name(),
            instance = %identity.instance_id()
        );

        Self {
            identity,
            client,
            meta: HashMap::new(),
            state: LifecycleState::Starting,
            span,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn identity(&self) -> &InstanceIdentity {
        &self.identity
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Registers the instance, then polls `serve` and `signal` until one of
    /// them completes, then deregisters.
    ///
    /// `serve` is not polled at all when registration fails, so binding the
    /// listener inside it keeps an unregistered instance from accepting
    /// traffic. Returns [`RegistryError::RegistrationRejected`] in that case.
    pub async fn run<S, F>(&mut self, serve: S, signal: F) -> Result<ShutdownCause>
    where
        S: Future<Output = io::Result<()>>,
        F: Future<Output = ShutdownSignal>,
    {
        let span = self.span.clone();
        self.drive(serve, signal).instrument(span).await
    }

    async fn drive<S, F>(&mut self, serve: S, signal: F) -> Result<ShutdownCause>
    where
        S: Future<Output = io::Result<()>>,
        F: Future<Output = ShutdownSignal>,
    {
        if self.state != LifecycleState::Starting {
            return Err(RegistryError::InvalidState(self.state));
        }

        self.transition(LifecycleState::Registering);
        info!(
            "Registering {} with health check {}",
            self.identity.instance_id(),
            HEALTH_CHECK_PATH
        );

        if !self
            .client
            .register(&self.identity, HEALTH_CHECK_PATH, &self.meta)
            .await
        {
            self.transition(LifecycleState::Aborted);
            error!("Service {} register failed", self.identity.service_name());
            return Err(RegistryError::RegistrationRejected(
                self.identity.instance_id().to_string(),
            ));
        }

        self.transition(LifecycleState::Serving);
        info!(
            "Service {} serving at {}:{}",
            self.identity.service_name(),
            self.identity.host(),
            self.identity.port()
        );

        let keep_alive = self.spawn_keep_alive();

        let cause = tokio::select! {
            biased;
            result = serve => match result {
                Ok(()) => ShutdownCause::ServeStopped,
                Err(e) => ShutdownCause::ServeFailed(e),
            },
            signal = signal => ShutdownCause::Signal(signal),
        };

        if let Some(handle) = keep_alive {
            handle.abort();
        }

        self.transition(LifecycleState::Deregistering);
        if cause.is_failure() {
            error!("Service {} shutting down, {}", self.identity.instance_id(), cause);
        } else {
            info!("Service {} shutting down, {}", self.identity.instance_id(), cause);
        }

        if !self.client.deregister(self.identity.instance_id()).await {
            warn!(
                "Instance {} may stay in the registry until its check expires",
                self.identity.instance_id()
            );
        }

        self.transition(LifecycleState::Stopped);
        Ok(cause)
    }

    fn spawn_keep_alive(&self) -> Option<JoinHandle<()>> {
        let period = self.client.keep_alive_interval()?;
        let client = Arc::clone(&self.client);
        let instance_id = self.identity.instance_id().to_string();

        let task = async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if !client.keep_alive(&instance_id).await {
                    warn!("Keep-alive for {} was not accepted", instance_id);
                }
            }
        };

        Some(tokio::spawn(task.instrument(self.span.clone())))
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!("Lifecycle {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// Completes when the process receives an interrupt or terminate signal.
pub async fn shutdown_signal() -> ShutdownSignal {
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ShutdownSignal::Interrupt,
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                ShutdownSignal::Terminate
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<ShutdownSignal>();

    tokio::select! {
        signal = interrupt => signal,
        signal = terminate => signal,
    }
}
