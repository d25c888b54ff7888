//! Connection pool keyed by device identity

use crate::device::{DeviceControl, DeviceError, DeviceTransport};
use crate::registry::DeviceRegistry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

type ConnectionMap = Arc<RwLock<HashMap<String, PooledConnection>>>;

struct PooledConnection {
    /// Distinguishes this session from later ones for the same identity
    generation: u64,
    control: Arc<dyn DeviceControl>,
    /// Error observer task; aborted on explicit disconnect
    observer: JoinHandle<()>,
}

/// Manages at most one live control session per device
pub struct ConnectionPool {
    registry: Arc<DeviceRegistry>,
    transport: Arc<dyn DeviceTransport>,
    connections: ConnectionMap,
    /// Per-identity creation gates so concurrent callers share one handshake
    gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    next_generation: AtomicU64,
}

impl ConnectionPool {
    /// Create a new pool
    pub fn new(registry: Arc<DeviceRegistry>, transport: Arc<dyn DeviceTransport>) -> Self {
        Self {
            registry,
            transport,
            connections: Arc::new(RwLock::new(HashMap::new())),
            gates: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Get the live connection for `identity`, connecting if needed
    pub async fn get_connection(&self, identity: &str) -> Result<Arc<dyn DeviceControl>, DeviceError> {
        if let Some(control) = self.lookup(identity).await {
            return Ok(control);
        }

        let gate = self.gate(identity).await;
        let result = {
            let _creating = gate.lock().await;
            self.create(identity).await
        };
        self.release_gate(identity, gate).await;
        result
    }

    /// Connect and launch; runs with the identity's creation gate held
    async fn create(&self, identity: &str) -> Result<Arc<dyn DeviceControl>, DeviceError> {
        // Another caller may have finished the handshake while we waited
        if let Some(control) = self.lookup(identity).await {
            return Ok(control);
        }

        let record = self
            .registry
            .get(identity)
            .await
            .ok_or_else(|| DeviceError::UnknownDevice(identity.to_string()))?;

        info!(
            "[POOL] Connecting to {} at {}:{} via {}",
            identity,
            record.host,
            record.port,
            self.transport.name()
        );
        let control = self.transport.connect(&record.host, record.port).await?;

        if let Err(e) = control.launch_default_receiver().await {
            warn!("[POOL] Launch on {} failed: {}", identity, e);
            control.close().await;
            return Err(e);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;

        // The observer needs this write lock to evict, so it cannot act
        // before the entry it watches is in the map
        let mut connections = self.connections.write().await;
        let observer = self.observe_errors(identity, generation, control.clone());
        let previous = connections.insert(
            identity.to_string(),
            PooledConnection {
                generation,
                control: control.clone(),
                observer,
            },
        );
        drop(connections);
        if let Some(stale) = previous {
            // Unreachable while creation is gated, kept so nothing leaks silently
            stale.observer.abort();
            stale.control.close().await;
        }

        info!("[POOL] Connected to {} (session {})", identity, generation);
        Ok(control)
    }

    /// Close and evict the connection for `identity`
    pub async fn disconnect(&self, identity: &str) -> Result<(), DeviceError> {
        let entry = self
            .connections
            .write()
            .await
            .remove(identity)
            .ok_or_else(|| DeviceError::NoActiveConnection(identity.to_string()))?;

        entry.observer.abort();
        entry.control.close().await;
        info!("[POOL] Disconnected from {}", identity);
        Ok(())
    }

    /// Whether a live connection exists for `identity`
    #[cfg(test)]
    pub async fn is_connected(&self, identity: &str) -> bool {
        self.connections.read().await.contains_key(identity)
    }

    async fn lookup(&self, identity: &str) -> Option<Arc<dyn DeviceControl>> {
        self.connections
            .read()
            .await
            .get(identity)
            .map(|entry| entry.control.clone())
    }

    async fn gate(&self, identity: &str) -> Arc<Mutex<()>> {
        self.gates
            .lock()
            .await
            .entry(identity.to_string())
            .or_default()
            .clone()
    }

    /// Drop the gate once no other caller holds it
    ///
    /// Gate handles are only cloned and dropped under the map lock, so the
    /// last caller out sees exactly two references.
    async fn release_gate(&self, identity: &str, gate: Arc<Mutex<()>>) {
        let mut gates = self.gates.lock().await;
        let unused = gates
            .get(identity)
            .is_some_and(|current| Arc::ptr_eq(current, &gate) && Arc::strong_count(&gate) == 2);
        if unused {
            gates.remove(identity);
        }
        drop(gate);
        drop(gates);
    }

    #[cfg(test)]
    async fn gate_count(&self) -> usize {
        self.gates.lock().await.len()
    }

    /// Close and evict the session on its first transport error
    fn observe_errors(
        &self,
        identity: &str,
        generation: u64,
        control: Arc<dyn DeviceControl>,
    ) -> JoinHandle<()> {
        let connections = self.connections.clone();
        let identity = identity.to_string();

        tokio::spawn(async move {
            let error = control.transport_error().await;
            warn!("[POOL] Client error for {}: {}", identity, error);
            control.close().await;

            let mut connections = connections.write().await;
            if connections
                .get(&identity)
                .is_some_and(|entry| entry.generation == generation)
            {
                connections.remove(&identity);
                info!("[POOL] Evicted {} after transport error", identity);
            }
        })
    }
}
