// services/connectivity.rs
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Online/offline observable. The current value is readable at any time and
/// subscribers see every transition; an offline -> online edge is what
/// triggers the offline-queue drain.
pub struct ConnectivitySignal {
    sender: watch::Sender<bool>,
}

impl ConnectivitySignal {
    pub fn new(initially_online: bool) -> Self {
        let (sender, _) = watch::channel(initially_online);
        Self { sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn set_online(&self, online: bool) {
        let changed = self.sender.send_if_modified(|current| {
            if *current != online {
                *current = online;
                true
            } else {
                false
            }
        });
        if changed {
            if online {
                info!("Connectivity restored");
            } else {
                warn!("Connectivity lost");
            }
        }
    }
}

/// Background reachability probe feeding the signal. Any response from the
/// probe target counts as online; only transport errors count as offline.
pub async fn probe_loop(
    signal: Arc<ConnectivitySignal>,
    client: Client,
    probe_url: String,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let online = client.head(&probe_url).send().await.is_ok();
        signal.set_online(online);
    }
}
