//! Shutdown requests from the operating system.
//!
//! Ctrl-C ends a session everywhere; on Unix so does SIGTERM, which is what
//! service managers send.

use std::{fmt, future};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// How the shutdown was requested.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Shutdown {
    Interrupt,
    Terminate,
}

impl fmt::Display for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "interrupt"),
            Self::Terminate => write!(f, "termination request"),
        }
    }
}

/// Completes on the first shutdown request.
///
/// Listening starts when the future is first polled; until then the default
/// action of each signal applies. A signal that cannot be listened for is
/// logged and then ignored.
pub async fn requested() -> Shutdown {
    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for Ctrl-C: {e}");
            future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminated = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminated = future::pending::<()>();

    tokio::select! {
        () = interrupted => Shutdown::Interrupt,
        () = terminated => Shutdown::Terminate,
    }
}
