//! Liveness probing for a connected event stream.
//!
//! Some platform transports can wedge without ever reporting the connection
//! closed; the probe/ack cycle on the live socket catches that. A missed
//! ack cancels the connection token, which aborts the listen loop and
//! forces a full reconnect.

use crate::session::runtime::SessionState;
use crate::session::socket::SocketPinger;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub(crate) async fn run(
    pinger: SocketPinger,
    interval: Duration,
    state: Arc<watch::Sender<SessionState>>,
    connection: CancellationToken,
    platform: &'static str,
) {
    loop {
        let probe = tokio::select! {
            biased;
            _ = connection.cancelled() => return,
            outcome = tokio::time::timeout(interval, pinger.ping()) => outcome,
        };
        match probe {
            Ok(Ok(())) => {
                tokio::select! {
                    biased;
                    _ = connection.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            Ok(Err(error)) => {
                tracing::warn!(platform, %error, "liveness probe failed, forcing reconnect");
                state.send_replace(SessionState::Degraded);
                connection.cancel();
                return;
            }
            Err(_elapsed) => {
                tracing::warn!(
                    platform,
                    timeout_secs = interval.as_secs(),
                    "liveness ack missed, forcing reconnect"
                );
                state.send_replace(SessionState::Degraded);
                connection.cancel();
                return;
            }
        }
    }
}
