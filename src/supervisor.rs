//! Reconnect loop keeping one session alive at a time

use crate::config::ClientConfig;
use crate::session::{self, SessionError};
use std::time::Duration;
use tracing::{error, info, warn};

/// Fixed delay between a session ending and the next connect attempt.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Run sessions forever: construct, drive to close, wait, repeat.
///
/// No backoff and no retry cap; the loop only ends when the process is
/// killed from outside.
pub async fn run(config: ClientConfig) {
    loop {
        match session::run(&config).await {
            Ok(()) => info!("session closed"),
            Err(SessionError::Connect(e)) => {
                warn!(upstream = %config.upstream, error = %e, "upstream connect failed")
            }
            Err(SessionError::Eof) => info!("upstream closed the connection"),
            Err(e @ SessionError::Transport(_)) => warn!(error = %e, "upstream connection lost"),
            Err(e) => error!(error = %e, "session failed"),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}
