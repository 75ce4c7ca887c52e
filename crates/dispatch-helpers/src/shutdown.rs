use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Exit status used when a second signal interrupts a drain.
pub const FORCED_EXIT_CODE: i32 = 130;

/// Cancels `token` on the first SIGTERM/SIGINT so loops can drain, and exits
/// the process on the second one.
///
/// Long-running consumers only check the token between units of work, so the
/// first signal lets the in-flight unit finish. Operators who cannot wait send
/// the signal again.
pub async fn listen_shutdown(token: CancellationToken) {
    let Some(first) = wait_for_signal().await else {
        return;
    };
    warn!("shutdown signal received, draining: signal={first}");
    token.cancel();

    if let Some(second) = wait_for_signal().await {
        warn!("second shutdown signal received, exiting now: signal={second}");
        std::process::exit(FORCED_EXIT_CODE);
    }
}

/// Resolves with the name of the next termination signal, or `None` when no
/// handler could be installed at all.
#[cfg(unix)]
async fn wait_for_signal() -> Option<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(err), _) | (_, Err(err)) => {
                warn!("failed to install unix signal handlers: error={err}");
                return ctrl_c().await;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => Some("SIGTERM"),
        _ = sigint.recv() => Some("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Option<&'static str> {
    ctrl_c().await
}

async fn ctrl_c() -> Option<&'static str> {
    match tokio::signal::ctrl_c().await {
        Ok(()) => Some("SIGINT"),
        Err(err) => {
            warn!("failed to install ctrl-c handler: error={err}");
            None
        }
    }
}
