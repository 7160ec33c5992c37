//! Logs balance movements of tracked accounts after each refresh.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::info;

use super::{Capabilities, Plugin, PluginContext, PluginError};
use crate::address::Address;
use crate::naming::NamingRegistry;
use crate::refresh::{RefreshObserver, RefreshSnapshot};

#[derive(Default)]
pub struct BalanceWatch;

impl BalanceWatch {
    pub const NAME: &'static str = "balance-watch";
}

impl Plugin for BalanceWatch {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn initialize(&mut self, ctx: &PluginContext) -> Result<Capabilities, PluginError> {
        Ok(Capabilities {
            namer: None,
            observer: Some(Arc::new(Watcher { naming: ctx.naming.clone(), last: Mutex::new(None) })),
        })
    }
}

struct Watcher {
    naming: Arc<NamingRegistry>,
    last: Mutex<Option<BTreeMap<Address, u64>>>,
}

impl Watcher {
    /// (address, old, new) for every balance that moved.
    fn diff(before: &BTreeMap<Address, u64>, after: &BTreeMap<Address, u64>) -> Vec<(Address, u64, u64)> {
        after
            .iter()
            .filter_map(|(a, new)| {
                let old = before.get(a).copied().unwrap_or(0);
                (old != *new).then_some((*a, old, *new))
            })
            .collect()
    }
}

#[async_trait]
impl RefreshObserver for Watcher {
    fn name(&self) -> &str {
        BalanceWatch::NAME
    }

    async fn on_refresh(&self, snapshot: Arc<RefreshSnapshot>) {
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(before) = last.as_ref() {
            for (address, old, new) in Self::diff(before, &snapshot.balances) {
                info!(
                    target: "helmsman::console",
                    "{}: {} -> {} at block #{}",
                    self.naming.resolve_name(&address),
                    old,
                    new,
                    snapshot.block_count.saturating_sub(1)
                );
            }
        }
        *last = Some(snapshot.balances.clone());
    }
}
