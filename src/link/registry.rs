//! Connection registry.
//!
//! A fixed table of connection entries, initiator ("master") region first,
//! acceptor ("slave") region after it, so `index < MAX_CONN_AS_MASTER`
//! always means initiator role. Each valid link handle appears in exactly
//! one entry, and the handle→index map is kept as the exact inverse of
//! entry→handle across reserve/bind/release.

use heapless::FnvIndexMap;

use super::{ADDR_TYPE_RANDOM, BdAddr, LinkHandle};

/// Initiator-role capacity (indices `0..MAX_CONN_AS_MASTER`).
pub const MAX_CONN_AS_MASTER: usize = 8;

/// Acceptor-role capacity (indices after the initiator region).
pub const MAX_CONN_AS_SLAVE: usize = 2;

pub const TOTAL_CONN: usize = MAX_CONN_AS_MASTER + MAX_CONN_AS_SLAVE;

// FnvIndexMap capacity must be a power of two ≥ TOTAL_CONN.
const HANDLE_MAP_CAP: usize = 16;

/// A notification/indication registration on one characteristic.
///
/// Created lazily on the first `AT+BLEGATTCSUB` for a value handle and
/// reused (by value-handle match) on re-subscription; freed in bulk when
/// the owning connection disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub value_handle: u16,
    pub desc_handle: u16,
    /// CCCD word: 0 = off, 1 = notify, 2 = indicate.
    pub config: u16,
    /// Whether the stack-side value-update listener is installed.
    pub registered: bool,
}

/// One possible concurrent link.
#[derive(Debug, Clone)]
pub struct ConnEntry {
    pub handle: Option<LinkHandle>,
    pub peer_addr_type: u8,
    pub peer_addr: BdAddr,
    pub min_interval: u16,
    pub max_interval: u16,
    pub cur_interval: u16,
    pub latency: u16,
    pub timeout: u16,
    pub subscriptions: Vec<Subscription>,
    /// At most one in-flight full discovery per connection.
    pub discovering: bool,
}

impl Default for ConnEntry {
    fn default() -> Self {
        Self {
            handle: None,
            peer_addr_type: ADDR_TYPE_RANDOM,
            peer_addr: BdAddr::default(),
            min_interval: 350,
            max_interval: 350,
            cur_interval: 0,
            latency: 0,
            timeout: 800,
            subscriptions: Vec::new(),
            discovering: false,
        }
    }
}

/// Why a reserve/bind failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// No free acceptor-role slot; the caller must terminate the link.
    Exhausted,
    /// The completion's peer identity matches no requested entry.
    IdentityMismatch,
}

pub struct ConnRegistry {
    entries: [ConnEntry; TOTAL_CONN],
    handle_map: FnvIndexMap<LinkHandle, usize, HANDLE_MAP_CAP>,
}

impl ConnRegistry {
    pub fn new() -> Self {
        Self {
            entries: core::array::from_fn(|_| ConnEntry::default()),
            handle_map: FnvIndexMap::new(),
        }
    }

    /// Bind a freshly accepted (acceptor-role) link to the first free slot
    /// in the acceptor region.
    pub fn reserve_slave(
        &mut self,
        handle: LinkHandle,
        peer_addr_type: u8,
        peer_addr: BdAddr,
    ) -> Result<usize, RegistryError> {
        let idx = (MAX_CONN_AS_MASTER..TOTAL_CONN)
            .find(|&i| self.entries[i].handle.is_none())
            .ok_or(RegistryError::Exhausted)?;

        let entry = &mut self.entries[idx];
        entry.handle = Some(handle);
        entry.peer_addr_type = peer_addr_type;
        entry.peer_addr = peer_addr;
        self.handle_map.insert(handle, idx).ok();
        Ok(idx)
    }

    /// Bind an initiator-role completion to the entry whose requested peer
    /// identity matches. The index was chosen by the `AT+BLECONN` command;
    /// a mismatch means the link must be torn down by the caller.
    pub fn bind_master(
        &mut self,
        handle: LinkHandle,
        peer_addr_type: u8,
        peer_addr: BdAddr,
    ) -> Result<usize, RegistryError> {
        let idx = self
            .lookup_by_addr(peer_addr_type, peer_addr)
            .ok_or(RegistryError::IdentityMismatch)?;
        self.entries[idx].handle = Some(handle);
        self.handle_map.insert(handle, idx).ok();
        Ok(idx)
    }

    pub fn index_of_handle(&self, handle: LinkHandle) -> Option<usize> {
        self.handle_map.get(&handle).copied()
    }

    /// Find an initiator-region entry by requested peer identity.
    pub fn lookup_by_addr(&self, peer_addr_type: u8, peer_addr: BdAddr) -> Option<usize> {
        (0..MAX_CONN_AS_MASTER).find(|&i| {
            self.entries[i].peer_addr_type == peer_addr_type
                && self.entries[i].peer_addr == peer_addr
        })
    }

    pub fn entry(&self, index: usize) -> Option<&ConnEntry> {
        self.entries.get(index)
    }

    pub fn entry_mut(&mut self, index: usize) -> Option<&mut ConnEntry> {
        self.entries.get_mut(index)
    }

    /// Link handle of a connected entry, `None` for free slots.
    pub fn handle_of(&self, index: usize) -> Option<LinkHandle> {
        self.entries.get(index).and_then(|e| e.handle)
    }

    /// Release the entry bound to `handle`: clears the handle, removes the
    /// inverse mapping and frees every notification subscription.
    pub fn release(&mut self, handle: LinkHandle) -> Option<usize> {
        let idx = self.handle_map.remove(&handle)?;
        let entry = &mut self.entries[idx];
        entry.handle = None;
        entry.cur_interval = 0;
        entry.discovering = false;
        entry.subscriptions.clear();
        Some(idx)
    }

    pub fn iter_connected(&self) -> impl Iterator<Item = (usize, &ConnEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.handle.is_some())
    }

    /// Find or create the subscription record for `value_handle` on the
    /// given entry. New records default the descriptor handle to
    /// `value_handle + 1` (the usual CCCD position).
    pub fn upsert_subscription(
        &mut self,
        index: usize,
        value_handle: u16,
    ) -> Option<&mut Subscription> {
        let entry = self.entries.get_mut(index)?;
        if let Some(pos) = entry
            .subscriptions
            .iter()
            .position(|s| s.value_handle == value_handle)
        {
            return entry.subscriptions.get_mut(pos);
        }
        entry.subscriptions.push(Subscription {
            value_handle,
            desc_handle: value_handle + 1,
            config: 0,
            registered: false,
        });
        entry.subscriptions.last_mut()
    }

    pub fn subscription(&self, index: usize, value_handle: u16) -> Option<&Subscription> {
        self.entries
            .get(index)?
            .subscriptions
            .iter()
            .find(|s| s.value_handle == value_handle)
    }

    pub fn subscription_mut(
        &mut self,
        index: usize,
        value_handle: u16,
    ) -> Option<&mut Subscription> {
        self.entries
            .get_mut(index)?
            .subscriptions
            .iter_mut()
            .find(|s| s.value_handle == value_handle)
    }
}

impl Default for ConnRegistry {
    fn default() -> Self {
        Self::new()
    }
}
