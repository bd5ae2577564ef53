// ai
//! 🛑 shutdown.rs: how to stop a few hundred workers without losing the row in flight.
//!
//! Stage one is cooperative: the first interrupt cancels the process-wide
//! [`CancellationToken`], and every loop in the pipeline notices at its next checkpoint.
//! Inserts and aggregation calls already running are allowed to finish.
//!
//! Stage two is not cooperative: a second interrupt, or the grace period running out,
//! returns a forced verdict and the binary exits with status 1 right there.
//!
//! | signal | trigger |
//! |---|---|
//! | SIGINT | Ctrl+C |
//! | SIGTERM | kill, Kubernetes, Docker |
//! | SIGHUP | terminal hangup |
//! | SIGQUIT | Ctrl+\ |

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 📟 Which signal came in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Interrupt,
    Terminate,
    Hangup,
    Quit,
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Interrupt => write!(f, "SIGINT"),
            Interrupt::Terminate => write!(f, "SIGTERM"),
            Interrupt::Hangup => write!(f, "SIGHUP"),
            Interrupt::Quit => write!(f, "SIGQUIT"),
        }
    }
}

/// 🚦 The process-wide cancellation signal. Cheap to clone, set at most once in effect.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🎟️ A handle for a component that needs to watch for cancellation.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// ⚖️ How the run ended.
#[derive(Debug, PartialEq, Eq)]
pub enum ShutdownVerdict<T> {
    /// ✅ The work finished by itself, interrupted or not.
    Clean(T),
    /// 💥 Someone pressed Ctrl+C twice.
    SecondInterrupt,
    /// ⏳ Cleanup took longer than the grace period.
    GraceExpired,
}

impl<T> ShutdownVerdict<T> {
    pub fn is_forced(&self) -> bool {
        !matches!(self, ShutdownVerdict::Clean(_))
    }
}

/// 👀 Drive `done` to completion while watching `interrupts`.
///
/// The first interrupt triggers `shutdown` and starts the grace timer. From then on the
/// first of {`done` finishes, second interrupt, timer expires} decides the verdict.
/// A closed interrupt channel just means nobody will ever interrupt us.
pub async fn watch_interrupts<T>(
    mut interrupts: mpsc::Receiver<Interrupt>,
    shutdown: &Shutdown,
    grace: Duration,
    done: impl Future<Output = T>,
) -> ShutdownVerdict<T> {
    tokio::pin!(done);

    let first = tokio::select! {
        result = &mut done => return ShutdownVerdict::Clean(result),
        first = interrupts.recv() => first,
    };
    let Some(first) = first else {
        return ShutdownVerdict::Clean(done.await);
    };

    info!(signal = %first, grace_secs = grace.as_secs(), "🛑 interrupt received, stopping cooperatively");
    shutdown.trigger();

    let grace_timer = tokio::time::sleep(grace);
    tokio::pin!(grace_timer);
    let mut listening = true;
    loop {
        tokio::select! {
            result = &mut done => {
                info!("✅ cleanup finished inside the grace period");
                return ShutdownVerdict::Clean(result);
            }
            second = interrupts.recv(), if listening => match second {
                Some(second) => {
                    warn!(signal = %second, "💥 second interrupt, forcing exit");
                    return ShutdownVerdict::SecondInterrupt;
                }
                None => listening = false,
            },
            _ = &mut grace_timer => {
                error!(grace_secs = grace.as_secs(), "⏳ grace period expired, forcing exit");
                return ShutdownVerdict::GraceExpired;
            }
        }
    }
}

/// 📡 Spawn a task that forwards SIGINT, SIGTERM, SIGHUP and SIGQUIT into a channel.
#[cfg(unix)]
pub fn forward_os_signals() -> anyhow::Result<mpsc::Receiver<Interrupt>> {
    use anyhow::Context;
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt()).context("💀 couldn't install SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("💀 couldn't install SIGTERM handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("💀 couldn't install SIGHUP handler")?;
    let mut sigquit = signal(SignalKind::quit()).context("💀 couldn't install SIGQUIT handler")?;

    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        loop {
            let interrupt = tokio::select! {
                _ = sigint.recv() => Interrupt::Interrupt,
                _ = sigterm.recv() => Interrupt::Terminate,
                _ = sighup.recv() => Interrupt::Hangup,
                _ = sigquit.recv() => Interrupt::Quit,
            };
            if tx.send(interrupt).await.is_err() {
                break;
            }
        }
    });
    Ok(rx)
}

/// 📡 Ctrl+C is the only signal on offer here.
#[cfg(not(unix))]
pub fn forward_os_signals() -> anyhow::Result<mpsc::Receiver<Interrupt>> {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(Interrupt::Interrupt).await.is_err() {
                break;
            }
        }
    });
    Ok(rx)
}
