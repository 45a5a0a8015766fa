//! Graceful stop plumbing between process signals and the poll loop.

use std::fmt;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    Interrupt,
    Terminate,
    Requested,
}

impl fmt::Display for StopCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopCause::Interrupt => write!(f, "SIGINT"),
            StopCause::Terminate => write!(f, "SIGTERM"),
            StopCause::Requested => write!(f, "stop requested"),
        }
    }
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(None);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: watch::Sender<Option<StopCause>>,
}

impl ShutdownTrigger {
    /// Record the stop cause. Only the first trigger counts.
    pub fn trigger(&self, cause: StopCause) {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(cause);
            true
        });
    }
}

#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<Option<StopCause>>,
}

impl Shutdown {
    pub fn cause(&self) -> Option<StopCause> {
        *self.rx.borrow()
    }

    /// Resolves once a stop was triggered. Never resolves if every trigger
    /// has been dropped without firing.
    pub async fn triggered(&self) -> StopCause {
        let mut rx = self.rx.clone();
        let cause = match rx.wait_for(Option::is_some).await {
            Ok(cause) => *cause,
            Err(_) => None,
        };
        match cause {
            Some(cause) => cause,
            None => std::future::pending().await,
        }
    }
}

/// Signals the listener handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    Interrupt,
    Terminate,
    Hangup,
    User1,
    User2,
}

impl fmt::Display for Received {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Received::Interrupt => "SIGINT",
            Received::Terminate => "SIGTERM",
            Received::Hangup => "SIGHUP",
            Received::User1 => "SIGUSR1",
            Received::User2 => "SIGUSR2",
        };
        f.write_str(name)
    }
}

/// Only SIGINT and SIGTERM stop the publisher.
pub fn stop_cause(signal: Received) -> Option<StopCause> {
    match signal {
        Received::Interrupt => Some(StopCause::Interrupt),
        Received::Terminate => Some(StopCause::Terminate),
        Received::Hangup | Received::User1 | Received::User2 => None,
    }
}

fn handle(signal: Received, trigger: &ShutdownTrigger) {
    match stop_cause(signal) {
        Some(cause) => {
            info!("Received {}, stopping", signal);
            trigger.trigger(cause);
        }
        None => warn!("Received {}, ignoring", signal),
    }
}

/// Process signal handlers, installed before any network activity.
#[cfg(unix)]
pub struct SignalListener {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
    user1: tokio::signal::unix::Signal,
    user2: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    pub fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
            user1: signal(SignalKind::user_defined1())?,
            user2: signal(SignalKind::user_defined2())?,
        })
    }

    pub async fn run(mut self, trigger: ShutdownTrigger) {
        loop {
            let signal = tokio::select! {
                _ = self.interrupt.recv() => Received::Interrupt,
                _ = self.terminate.recv() => Received::Terminate,
                _ = self.hangup.recv() => Received::Hangup,
                _ = self.user1.recv() => Received::User1,
                _ = self.user2.recv() => Received::User2,
            };
            handle(signal, &trigger);
        }
    }
}

#[cfg(not(unix))]
pub struct SignalListener;

#[cfg(not(unix))]
impl SignalListener {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    pub async fn run(self, trigger: ShutdownTrigger) {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            handle(Received::Interrupt, &trigger);
        }
    }
}
