//! Refresh controller
//!
//! Pulls chain state from the node and balances for every known account,
//! then publishes one immutable `RefreshSnapshot` through a watch channel.
//! Triggers that arrive while a pass is running collapse into a single
//! follow-up pass.

pub mod snapshot;

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::address::Address;
use crate::naming::NamingRegistry;
use crate::node::{NodeError, NodeFacade};
use crate::vault::KeyVault;

pub use snapshot::RefreshSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Tick,
    NewBlock,
    NewPeer,
    PendingChanged,
    KeysChanged,
    Manual,
}

/// Receives every published snapshot, in publish order.
#[async_trait]
pub trait RefreshObserver: Send + Sync {
    fn name(&self) -> &str;

    async fn on_refresh(&self, snapshot: Arc<RefreshSnapshot>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// This call ran the pass (plus any follow-up)
    Ran,
    /// Folded into the pass already in flight
    Coalesced,
}

struct PassState {
    state: RefreshState,
    follow_up: Option<RefreshTrigger>,
}

/// Resets the pass state if `request` never reaches its normal exit.
struct PassGuard<'a> {
    pass: &'a Mutex<PassState>,
    armed: bool,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut pass = self.pass.lock().unwrap_or_else(|p| p.into_inner());
            pass.state = RefreshState::Idle;
            pass.follow_up = None;
            debug!("Refresh pass abandoned");
        }
    }
}

pub struct RefreshController {
    node: Arc<dyn NodeFacade>,
    naming: Arc<NamingRegistry>,
    vault: Arc<dyn KeyVault>,
    beneficiary: RwLock<Option<Address>>,
    pass: Mutex<PassState>,
    published: watch::Sender<Arc<RefreshSnapshot>>,
    observers: Mutex<Vec<Arc<dyn RefreshObserver>>>,
    threshold: u32,
    failures: AtomicU32,
    unreachable: AtomicBool,
    passes: AtomicU64,
}

impl RefreshController {
    pub fn new(
        node: Arc<dyn NodeFacade>,
        naming: Arc<NamingRegistry>,
        vault: Arc<dyn KeyVault>,
        unavailable_threshold: u32,
    ) -> Self {
        let (published, _) = watch::channel(Arc::new(RefreshSnapshot::empty()));
        Self {
            node,
            naming,
            vault,
            beneficiary: RwLock::new(None),
            pass: Mutex::new(PassState { state: RefreshState::Idle, follow_up: None }),
            published,
            observers: Mutex::new(Vec::new()),
            threshold: unavailable_threshold.max(1),
            failures: AtomicU32::new(0),
            unreachable: AtomicBool::new(false),
            passes: AtomicU64::new(0),
        }
    }

    pub fn set_beneficiary(&self, beneficiary: Option<Address>) {
        *self.beneficiary.write().unwrap_or_else(|p| p.into_inner()) = beneficiary;
    }

    pub fn state(&self) -> RefreshState {
        self.pass.lock().unwrap_or_else(|p| p.into_inner()).state
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<RefreshSnapshot> {
        self.published.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<RefreshSnapshot>> {
        self.published.subscribe()
    }

    /// Completed publishes since start.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Set after `unavailable_threshold` consecutive failed passes.
    pub fn node_unreachable(&self) -> bool {
        self.unreachable.load(Ordering::SeqCst)
    }

    pub fn add_observer(&self, observer: Arc<dyn RefreshObserver>) {
        let mut observers = self.observers.lock().unwrap_or_else(|p| p.into_inner());
        if !observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
            debug!("Refresh: observer '{}' added", observer.name());
            observers.push(observer);
        }
    }

    pub fn remove_observer(&self, observer: &Arc<dyn RefreshObserver>) -> bool {
        let mut observers = self.observers.lock().unwrap_or_else(|p| p.into_inner());
        let before = observers.len();
        observers.retain(|o| !Arc::ptr_eq(o, observer));
        observers.len() != before
    }

    /// Run a refresh pass, or fold into the one already running.
    ///
    /// Dropping the returned future mid-pass puts the controller back to
    /// `Idle`; a pending follow-up is discarded with it.
    pub async fn request(&self, trigger: RefreshTrigger) -> RequestOutcome {
        {
            let mut pass = self.pass.lock().unwrap_or_else(|p| p.into_inner());
            if pass.state == RefreshState::Refreshing {
                pass.follow_up.get_or_insert(trigger);
                return RequestOutcome::Coalesced;
            }
            pass.state = RefreshState::Refreshing;
        }

        let mut guard = PassGuard { pass: &self.pass, armed: true };
        let mut trigger = trigger;
        loop {
            self.run_pass(trigger).await;
            let mut pass = self.pass.lock().unwrap_or_else(|p| p.into_inner());
            match pass.follow_up.take() {
                Some(next) => trigger = next,
                None => {
                    pass.state = RefreshState::Idle;
                    guard.armed = false;
                    break;
                }
            }
        }
        RequestOutcome::Ran
    }

    async fn run_pass(&self, trigger: RefreshTrigger) {
        match self.collect() {
            Ok(snapshot) => {
                self.note_success();
                let snapshot = Arc::new(snapshot);
                debug!(
                    "Refresh #{} ({:?}): block {} / {} peers",
                    snapshot.sequence, trigger, snapshot.block_count, snapshot.peer_count
                );
                self.published.send_replace(snapshot.clone());
                self.passes.fetch_add(1, Ordering::SeqCst);
                self.notify_observers(snapshot).await;
            }
            Err(e) => self.note_failure(trigger, &e),
        }
    }

    /// Each observer runs as its own task so a panic stays with it.
    async fn notify_observers(&self, snapshot: Arc<RefreshSnapshot>) {
        let observers: Vec<_> = self.observers.lock().unwrap_or_else(|p| p.into_inner()).clone();
        for observer in observers {
            let name = observer.name().to_string();
            let snapshot = snapshot.clone();
            let handle = tokio::spawn(async move { observer.on_refresh(snapshot).await });
            if let Err(e) = handle.await {
                error!("Refresh observer '{}' failed: {}", name, e);
            }
        }
    }

    /// Addresses whose balances go into the snapshot.
    pub fn tracked_addresses(&self) -> BTreeSet<Address> {
        let mut tracked = self.naming.all_known_addresses();
        tracked.extend(self.vault.list_known());
        if let Some(b) = *self.beneficiary.read().unwrap_or_else(|p| p.into_inner()) {
            tracked.insert(b);
        }
        tracked
    }

    fn collect(&self) -> Result<RefreshSnapshot, NodeError> {
        let block_count = self.node.current_block_count()?;
        let peer_count = self.node.peer_count()?;
        let mining = self.node.mining_status()?;
        let naming_version = self.naming.version();

        let mut balances = BTreeMap::new();
        for address in self.tracked_addresses() {
            balances.insert(address, self.node.balance_of(&address)?);
        }
        let total_balance = balances.values().fold(0u64, |acc, v| acc.saturating_add(*v));

        Ok(RefreshSnapshot {
            sequence: self.passes() + 1,
            taken_at: chrono::Utc::now(),
            block_count,
            peer_count,
            mining,
            balances,
            total_balance,
            naming_version,
        })
    }

    fn note_success(&self) {
        self.failures.store(0, Ordering::SeqCst);
        if self.unreachable.swap(false, Ordering::SeqCst) {
            info!("Node reachable again");
        }
    }

    fn note_failure(&self, trigger: RefreshTrigger, err: &NodeError) {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        match err {
            NodeError::Unavailable(_) => debug!("Refresh ({:?}) skipped: {}", trigger, err),
            _ => warn!("Refresh ({:?}) failed: {}", trigger, err),
        }
        if failures == self.threshold {
            error!("Node unreachable after {} consecutive refresh failures: {}", failures, err);
            self.unreachable.store(true, Ordering::SeqCst);
        }
    }
}
