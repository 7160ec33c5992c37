use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::address::Address;
use crate::node::MiningStatus;

/// Derived display state from one refresh pass. Never mutated after publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshSnapshot {
    /// 0 for the placeholder published before the first pass
    pub sequence: u64,
    pub taken_at: DateTime<Utc>,
    pub block_count: u64,
    pub peer_count: usize,
    pub mining: MiningStatus,
    pub balances: BTreeMap<Address, u64>,
    pub total_balance: u64,
    pub naming_version: u64,
}

impl RefreshSnapshot {
    pub fn empty() -> Self {
        Self {
            sequence: 0,
            taken_at: Utc::now(),
            block_count: 0,
            peer_count: 0,
            mining: MiningStatus::default(),
            balances: BTreeMap::new(),
            total_balance: 0,
            naming_version: 0,
        }
    }

    pub fn balance_of(&self, address: &Address) -> Option<u64> {
        self.balances.get(address).copied()
    }

    pub fn is_placeholder(&self) -> bool {
        self.sequence == 0
    }
}
