use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use context_protocol::ServerConfig;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;

use crate::client::DownstreamClient;
use crate::error::RegistryError;

const PING_INTERVAL: Duration = Duration::from_secs(30);

type Slot = Arc<OnceCell<Arc<DownstreamClient>>>;

/// Lazy, concurrency-safe registry of downstream MCP connections (C2).
///
/// Initialization is keyed per server name by a [`tokio::sync::OnceCell`]
/// behind a brief map mutex, giving at-most-once init per name (G1)
/// without serializing unrelated names (G3): the mutex is only ever held
/// long enough to fetch-or-insert the name's slot, never across the
/// initialization itself. `OnceCell::get_or_try_init` leaves the cell
/// empty on a failed or cancelled attempt, which is exactly §4.2's
/// "failures are not cached" — the next caller retries from scratch with
/// no bookkeeping on our part.
pub struct ServerRegistry {
    configs: HashMap<String, ServerConfig>,
    slots: Mutex<HashMap<String, Slot>>,
    ping_context: CancellationToken,
}

impl ServerRegistry {
    pub fn new(configs: HashMap<String, ServerConfig>) -> Self {
        Self {
            configs,
            slots: Mutex::new(HashMap::new()),
            ping_context: CancellationToken::new(),
        }
    }

    async fn slot_for(&self, name: &str) -> Slot {
        let mut slots = self.slots.lock().await;
        slots
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// `get_or_load` (C2): returns the cached client for `name`, or
    /// performs (and shares) its one-time initialization. `cancel` is the
    /// caller's cancellation context (P5); cancelling it while this
    /// caller is the one performing initialization aborts the attempt and
    /// leaves `name` absent for the next caller.
    ///
    /// The transport's background ping loop (step 5 of §4.2's algorithm)
    /// is spawned from inside the same `OnceCell` initializer that
    /// constructs the client, so it runs exactly once per name no matter
    /// how many callers raced to trigger the initialization.
    pub async fn get_or_load(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<Arc<DownstreamClient>, RegistryError> {
        let config = self
            .configs
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::ConfigMissing(name.to_string()))?;

        let slot = self.slot_for(name).await;
        let initialized_now = std::sync::atomic::AtomicBool::new(false);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RegistryError::Cancelled(name.to_string())),
            result = slot.get_or_try_init(|| async {
                let client = DownstreamClient::connect(name, &config).await.map(Arc::new)?;
                initialized_now.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(client)
            }) => result.map(Arc::clone),
        };

        if let Ok(client) = &result {
            if initialized_now.load(std::sync::atomic::Ordering::SeqCst) && config.needs_ping() {
                self.spawn_ping_loop(name.to_string(), Arc::clone(client));
            }
        }

        result
    }

    /// Spawns the background ping loop for `name` if the transport needs
    /// one (§4.4). Bound to `self.ping_context`, which `close_all`
    /// cancels.
    pub fn spawn_ping_loop(self: &Arc<Self>, name: String, client: Arc<DownstreamClient>) {
        let cancel = self.ping_context.child_token();
        tokio::spawn(async move {
            let mut failures = 0u32;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(PING_INTERVAL) => {}
                }
                match client.ping().await {
                    Ok(()) => {
                        if failures > 0 {
                            log::info!("downstream \"{name}\" recovered after {failures} failed ping(s)");
                        }
                        failures = 0;
                    }
                    Err(err) => {
                        failures += 1;
                        log::warn!("ping failed for downstream \"{name}\" ({failures} in a row): {err}");
                    }
                }
            }
        });
    }

    /// Closes every connected client (best-effort, errors logged) and
    /// stops all ping loops.
    pub async fn close_all(&self) {
        self.ping_context.cancel();
        let mut slots = self.slots.lock().await;
        for (name, slot) in slots.drain() {
            if let Some(client) = slot.get() {
                client.clone().close().await;
            }
            log::debug!("closed downstream \"{name}\"");
        }
    }
}
