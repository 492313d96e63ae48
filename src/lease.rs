//! IP lease allocation for stations associated with the access point.
//!
//! [`LeaseTable`] binds station MAC addresses to pool addresses. It keeps two
//! logical lists over one slot arena:
//!
//! - the **active** list, bindings currently in use
//! - the **reuse** list, bindings a station released, kept so that a
//!   returning station is handed the address it had before
//!
//! Moving a binding between the lists re-tags its slot; the binding itself
//! never moves. The reuse list is drained oldest-first when the pool or the
//! arena runs out of room.
//!
//! # Thread Safety
//!
//! `LeaseTable` is plain data. The server wraps it in a
//! [`std::sync::Mutex`] shared by the receive worker and the link-layer
//! disconnect hook, and holds the lock for one table operation at a time.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::packet::MacAddr;

/// Which list a binding currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Active,
    /// Released; `order` increases with every release, so the smallest
    /// value is the oldest entry of the reuse list.
    Released { order: u64 },
}

/// Where the address returned by [`LeaseTable::lease_for`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseSource {
    /// The station already had an active binding.
    Active,
    /// The station's released binding was moved back to the active list.
    Reused,
    /// A new binding was created.
    Fresh,
}

/// Result of [`LeaseTable::lease_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leased {
    pub ip: Ipv4Addr,
    pub source: LeaseSource,
}

/// A point-in-time copy of one binding, for listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseEntry {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub state: LeaseState,
    pub bound_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

impl fmt::Display for LeaseEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.released_at {
            Some(released_at) => write!(
                f,
                "{} -> {} (released {})",
                self.mac,
                self.ip,
                released_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            None => write!(
                f,
                "{} -> {} (bound {})",
                self.mac,
                self.ip,
                self.bound_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
        }
    }
}

#[derive(Debug, Clone)]
struct Binding {
    mac: MacAddr,
    ip: Ipv4Addr,
    state: LeaseState,
    bound_at: DateTime<Utc>,
    released_at: Option<DateTime<Utc>>,
}

/// Unsigned, byte-wise comparison of two addresses, most significant octet first.
///
/// This is the order in which the allocator walks the pool.
pub fn compare(a: Ipv4Addr, b: Ipv4Addr) -> Ordering {
    a.octets().cmp(&b.octets())
}

/// MAC to IP bindings plus the allocation cursor.
#[derive(Debug)]
pub struct LeaseTable {
    pool_start: Ipv4Addr,
    pool_end: Ipv4Addr,
    netmask: Ipv4Addr,
    gateway: Ipv4Addr,
    retain_released: bool,
    capacity: usize,

    slots: Vec<Option<Binding>>,
    free_slots: Vec<usize>,
    by_mac: HashMap<MacAddr, usize>,
    by_ip: HashMap<Ipv4Addr, usize>,

    /// Address most recently produced by the pool scan.
    cursor: Option<Ipv4Addr>,
    release_counter: u64,
}

impl LeaseTable {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            pool_start: config.pool_start,
            pool_end: config.pool_end,
            netmask: config.netmask,
            gateway: config.gateway,
            retain_released: config.retain_released,
            capacity: config.max_leases,
            slots: Vec::new(),
            free_slots: Vec::new(),
            by_mac: HashMap::new(),
            by_ip: HashMap::new(),
            cursor: None,
            release_counter: 0,
        }
    }

    /// Returns the address bound to `mac`, creating a binding if needed.
    ///
    /// # Resolution Order
    ///
    /// 1. An active binding is returned unchanged.
    /// 2. A binding on the reuse list is moved back to the active list.
    /// 3. Otherwise a new address is taken from the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if step 3 finds neither a free
    /// address nor a released binding to evict.
    pub fn lease_for(&mut self, mac: MacAddr) -> Result<Leased> {
        if let Some(&slot) = self.by_mac.get(&mac)
            && let Some(binding) = self.slots[slot].as_mut()
        {
            let source = match binding.state {
                LeaseState::Active => LeaseSource::Active,
                LeaseState::Released { .. } => {
                    binding.state = LeaseState::Active;
                    binding.bound_at = Utc::now();
                    binding.released_at = None;
                    LeaseSource::Reused
                }
            };
            return Ok(Leased {
                ip: binding.ip,
                source,
            });
        }

        if self.is_full() && self.evict_oldest_released().is_none() {
            return Err(Error::PoolExhausted);
        }

        let ip = self.allocate_new()?;
        self.insert(Binding {
            mac,
            ip,
            state: LeaseState::Active,
            bound_at: Utc::now(),
            released_at: None,
        });

        Ok(Leased {
            ip,
            source: LeaseSource::Fresh,
        })
    }

    /// Picks an unbound pool address.
    ///
    /// Scans forward from the address after the cursor (or from
    /// `pool_start` on the first call), wrapping once. If nothing is
    /// free, the oldest released binding is evicted and its address
    /// returned instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] when the scan and the eviction both fail.
    pub fn allocate_new(&mut self) -> Result<Ipv4Addr> {
        let start = u32::from(self.pool_start) as u64;
        let end = u32::from(self.pool_end) as u64;

        if start <= end {
            let size = end - start + 1;
            let first = match self.cursor {
                Some(cursor) => {
                    let cursor = u32::from(cursor) as u64;
                    if (start..=end).contains(&cursor) {
                        (cursor - start + 1) % size
                    } else {
                        0
                    }
                }
                None => 0,
            };

            for step in 0..size {
                let candidate = Ipv4Addr::from((start + (first + step) % size) as u32);
                if self.is_allocable(candidate) {
                    self.cursor = Some(candidate);
                    return Ok(candidate);
                }
            }
        }

        match self.evict_oldest_released() {
            Some(ip) => {
                debug!("Pool exhausted, reusing released address {}", ip);
                Ok(ip)
            }
            None => Err(Error::PoolExhausted),
        }
    }

    /// Whether `ip` could be handed to a new station right now.
    ///
    /// The address must lie in the pool, must not be the gateway, must not
    /// have an all-zeros or all-ones host part, and must not be bound by any
    /// entry of either list.
    pub fn is_allocable(&self, ip: Ipv4Addr) -> bool {
        if compare(ip, self.pool_start) == Ordering::Less
            || compare(ip, self.pool_end) == Ordering::Greater
        {
            return false;
        }

        let host_mask = !u32::from(self.netmask);
        let host = u32::from(ip) & host_mask;
        if host == 0 || host == host_mask {
            return false;
        }

        ip != self.gateway && !self.by_ip.contains_key(&ip)
    }

    /// Moves the active binding for `mac` to the reuse list, or drops it
    /// when released bindings are not retained.
    ///
    /// Returns false if `mac` had no active binding.
    pub fn release(&mut self, mac: MacAddr) -> bool {
        let Some(slot) = self.active_slot(mac) else {
            return false;
        };

        if !self.retain_released {
            self.remove(slot);
            return true;
        }

        self.release_counter += 1;
        let order = self.release_counter;
        if let Some(binding) = self.slots[slot].as_mut() {
            binding.state = LeaseState::Released { order };
            binding.released_at = Some(Utc::now());
        }
        true
    }

    /// Destroys the active binding for `mac` without keeping it for reuse.
    ///
    /// Returns false if `mac` had no active binding.
    pub fn revoke(&mut self, mac: MacAddr) -> bool {
        match self.active_slot(mac) {
            Some(slot) => {
                self.remove(slot);
                true
            }
            None => false,
        }
    }

    /// The active address of `mac`, if any. Does not allocate.
    pub fn active_ip(&self, mac: MacAddr) -> Option<Ipv4Addr> {
        self.active_slot(mac)
            .and_then(|slot| self.slots[slot].as_ref())
            .map(|binding| binding.ip)
    }

    /// Drops every binding and resets the cursor.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free_slots.clear();
        self.by_mac.clear();
        self.by_ip.clear();
        self.cursor = None;
        self.release_counter = 0;
    }

    /// Lists all bindings, ordered by address.
    pub fn snapshot(&self) -> Vec<LeaseEntry> {
        let mut entries: Vec<LeaseEntry> = self
            .slots
            .iter()
            .flatten()
            .map(|binding| LeaseEntry {
                mac: binding.mac,
                ip: binding.ip,
                state: binding.state,
                bound_at: binding.bound_at,
                released_at: binding.released_at,
            })
            .collect();
        entries.sort_by(|a, b| compare(a.ip, b.ip));
        entries
    }

    pub fn active_count(&self) -> usize {
        self.bindings()
            .filter(|binding| binding.state == LeaseState::Active)
            .count()
    }

    pub fn released_count(&self) -> usize {
        self.bindings()
            .filter(|binding| matches!(binding.state, LeaseState::Released { .. }))
            .count()
    }

    pub fn cursor(&self) -> Option<Ipv4Addr> {
        self.cursor
    }

    fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.slots.iter().flatten()
    }

    fn active_slot(&self, mac: MacAddr) -> Option<usize> {
        let slot = *self.by_mac.get(&mac)?;
        match self.slots[slot].as_ref() {
            Some(binding) if binding.state == LeaseState::Active => Some(slot),
            _ => None,
        }
    }

    fn is_full(&self) -> bool {
        self.by_mac.len() >= self.capacity
    }

    fn insert(&mut self, binding: Binding) {
        let (mac, ip) = (binding.mac, binding.ip);
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.slots[slot] = Some(binding);
                slot
            }
            None => {
                self.slots.push(Some(binding));
                self.slots.len() - 1
            }
        };
        self.by_mac.insert(mac, slot);
        self.by_ip.insert(ip, slot);
    }

    fn remove(&mut self, slot: usize) -> Option<Binding> {
        let binding = self.slots[slot].take()?;
        self.by_mac.remove(&binding.mac);
        self.by_ip.remove(&binding.ip);
        self.free_slots.push(slot);
        Some(binding)
    }

    /// Drops the head of the reuse list and returns the address it held.
    fn evict_oldest_released(&mut self) -> Option<Ipv4Addr> {
        let slot = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, binding)| match binding.as_ref()?.state {
                LeaseState::Released { order } => Some((order, slot)),
                LeaseState::Active => None,
            })
            .min()
            .map(|(_, slot)| slot)?;

        let binding = self.remove(slot)?;
        debug!(
            "Evicted released lease {} -> {} from reuse list",
            binding.mac,
            binding.ip
        );
        Some(binding.ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_config(pool_start: &str, pool_end: &str) -> ServerConfig {
        Config {
            server_address: "10.0.0.1".to_string(),
            gateway: "10.0.0.1".to_string(),
            netmask: "255.255.255.0".to_string(),
            dns_primary: "8.8.8.8".to_string(),
            dns_secondary: String::new(),
            pool_start: pool_start.to_string(),
            pool_end: pool_end.to_string(),
            ..Default::default()
        }
        .resolve()
        .unwrap()
    }

    fn make_mac(last: u8) -> MacAddr {
        MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, last])
    }

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn assert_unique(table: &LeaseTable) {
        let entries = table.snapshot();
        for (index, entry) in entries.iter().enumerate() {
            for other in &entries[index + 1..] {
                assert_ne!(entry.ip, other.ip, "address bound twice");
                assert_ne!(entry.mac, other.mac, "station bound twice");
            }
        }
    }

    #[test]
    fn test_first_allocations_advance_cursor() {
        let mut table = LeaseTable::new(&test_config("10.0.0.2", "10.0.0.10"));

        let first = table.lease_for(make_mac(1)).unwrap();
        assert_eq!(first, Leased { ip: ip(2), source: LeaseSource::Fresh });

        let second = table.lease_for(make_mac(2)).unwrap();
        assert_eq!(second.ip, ip(3));
        assert_eq!(table.cursor(), Some(ip(3)));
    }

    #[test]
    fn test_idempotent_renewal() {
        let mut table = LeaseTable::new(&test_config("10.0.0.2", "10.0.0.10"));

        let first = table.lease_for(make_mac(1)).unwrap();
        let again = table.lease_for(make_mac(1)).unwrap();
        assert_eq!(first.ip, again.ip);
        assert_eq!(again.source, LeaseSource::Active);
        assert_eq!(table.active_count(), 1);
    }

    #[test]
    fn test_reconnect_gets_same_address() {
        let mut table = LeaseTable::new(&test_config("10.0.0.2", "10.0.0.10"));

        let first = table.lease_for(make_mac(1)).unwrap();
        table.lease_for(make_mac(2)).unwrap();
        assert!(table.release(make_mac(1)));
        assert_eq!(table.released_count(), 1);

        let back = table.lease_for(make_mac(1)).unwrap();
        assert_eq!(back, Leased { ip: first.ip, source: LeaseSource::Reused });
        assert_eq!(table.released_count(), 0);
        assert_unique(&table);
    }

    #[test]
    fn test_release_unknown_is_noop() {
        let mut table = LeaseTable::new(&test_config("10.0.0.2", "10.0.0.10"));
        assert!(!table.release(make_mac(9)));

        table.lease_for(make_mac(1)).unwrap();
        assert!(table.release(make_mac(1)));
        assert!(!table.release(make_mac(1)));
        assert_eq!(table.released_count(), 1);
    }

    #[test]
    fn test_released_address_not_handed_to_others() {
        let mut table = LeaseTable::new(&test_config("10.0.0.2", "10.0.0.10"));

        table.lease_for(make_mac(1)).unwrap();
        table.release(make_mac(1));
        let other = table.lease_for(make_mac(2)).unwrap();
        assert_eq!(other.ip, ip(3));
        assert!(!table.is_allocable(ip(2)));
    }

    #[test]
    fn test_exhaustion_reuses_oldest_released() {
        let mut table = LeaseTable::new(&test_config("10.0.0.2", "10.0.0.2"));

        let a = table.lease_for(make_mac(1)).unwrap();
        table.release(make_mac(1));

        let b = table.lease_for(make_mac(2)).unwrap();
        assert_eq!(b, Leased { ip: a.ip, source: LeaseSource::Fresh });
        assert_eq!(table.released_count(), 0);

        // The evicted station now has to start over and the pool is full.
        assert!(matches!(
            table.lease_for(make_mac(1)),
            Err(Error::PoolExhausted)
        ));
    }

    #[test]
    fn test_eviction_is_fifo() {
        let mut table = LeaseTable::new(&test_config("10.0.0.2", "10.0.0.4"));

        for last in 1..=3 {
            table.lease_for(make_mac(last)).unwrap();
        }
        table.release(make_mac(2));
        table.release(make_mac(1));
        table.release(make_mac(3));

        assert_eq!(table.lease_for(make_mac(4)).unwrap().ip, ip(3));
        assert_eq!(table.lease_for(make_mac(5)).unwrap().ip, ip(2));
        assert_eq!(table.lease_for(make_mac(3)).unwrap().source, LeaseSource::Reused);
        assert_unique(&table);
    }

    #[test]
    fn test_pool_exhaustion_without_reuse() {
        let mut table = LeaseTable::new(&test_config("10.0.0.2", "10.0.0.3"));

        table.lease_for(make_mac(1)).unwrap();
        table.lease_for(make_mac(2)).unwrap();
        assert!(matches!(
            table.lease_for(make_mac(3)),
            Err(Error::PoolExhausted)
        ));
        assert_eq!(table.active_count(), 2);
    }

    #[test]
    fn test_no_retention_frees_address() {
        let config = ServerConfig {
            retain_released: false,
            ..test_config("10.0.0.2", "10.0.0.3")
        };
        let mut table = LeaseTable::new(&config);

        table.lease_for(make_mac(1)).unwrap();
        assert!(table.release(make_mac(1)));
        assert_eq!(table.released_count(), 0);
        assert!(table.is_allocable(ip(2)));

        // The cursor moved past .2, so the station gets .3 next.
        assert_eq!(table.lease_for(make_mac(1)).unwrap().ip, ip(3));
    }

    #[test]
    fn test_scan_wraps_once() {
        let mut table = LeaseTable::new(&test_config("10.0.0.2", "10.0.0.4"));

        for last in 1..=3 {
            table.lease_for(make_mac(last)).unwrap();
        }
        table.revoke(make_mac(1));
        assert_eq!(table.cursor(), Some(ip(4)));

        let wrapped = table.lease_for(make_mac(9)).unwrap();
        assert_eq!(wrapped.ip, ip(2));
    }

    #[test]
    fn test_gateway_and_host_part_skipped() {
        let config = ServerConfig {
            gateway: ip(1),
            ..test_config("10.0.0.0", "10.0.0.255")
        };
        let mut table = LeaseTable::new(&config);

        assert!(!table.is_allocable(ip(0)));
        assert!(!table.is_allocable(ip(1)));
        assert!(!table.is_allocable(ip(255)));
        assert!(table.is_allocable(ip(2)));
        assert!(!table.is_allocable(Ipv4Addr::new(10, 0, 1, 2)));

        assert_eq!(table.lease_for(make_mac(1)).unwrap().ip, ip(2));
    }

    #[test]
    fn test_allocations_stay_in_range() {
        let mut table = LeaseTable::new(&test_config("10.0.0.250", "10.0.0.255"));

        let mut handed_out = Vec::new();
        for last in 1..=10 {
            match table.lease_for(make_mac(last)) {
                Ok(leased) => handed_out.push(leased.ip),
                Err(Error::PoolExhausted) => break,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(handed_out, vec![ip(250), ip(251), ip(252), ip(253), ip(254)]);
        assert_unique(&table);
    }

    #[test]
    fn test_full_arena_evicts_released() {
        let config = ServerConfig {
            max_leases: 2,
            ..test_config("10.0.0.2", "10.0.0.10")
        };
        let mut table = LeaseTable::new(&config);

        table.lease_for(make_mac(1)).unwrap();
        table.lease_for(make_mac(2)).unwrap();
        table.release(make_mac(1));

        let third = table.lease_for(make_mac(3)).unwrap();
        assert_eq!(third.ip, ip(4));
        assert_eq!(table.snapshot().len(), 2);
        assert!(table.is_allocable(ip(2)));

        assert!(matches!(
            table.lease_for(make_mac(4)),
            Err(Error::PoolExhausted)
        ));
    }

    #[test]
    fn test_revoke_only_touches_active() {
        let mut table = LeaseTable::new(&test_config("10.0.0.2", "10.0.0.10"));

        table.lease_for(make_mac(1)).unwrap();
        table.release(make_mac(1));
        assert!(!table.revoke(make_mac(1)));
        assert_eq!(table.released_count(), 1);

        table.lease_for(make_mac(2)).unwrap();
        assert!(table.revoke(make_mac(2)));
        assert_eq!(table.active_ip(make_mac(2)), None);
    }

    #[test]
    fn test_clear_resets_cursor() {
        let mut table = LeaseTable::new(&test_config("10.0.0.2", "10.0.0.10"));

        table.lease_for(make_mac(1)).unwrap();
        table.lease_for(make_mac(2)).unwrap();
        table.release(make_mac(2));
        table.clear();

        assert!(table.snapshot().is_empty());
        assert_eq!(table.cursor(), None);
        assert_eq!(table.lease_for(make_mac(3)).unwrap().ip, ip(2));
    }

    #[test]
    fn test_compare() {
        assert_eq!(compare(ip(2), ip(3)), Ordering::Less);
        assert_eq!(compare(ip(3), ip(3)), Ordering::Equal);
        assert_eq!(
            compare(Ipv4Addr::new(10, 0, 1, 0), Ipv4Addr::new(10, 0, 0, 255)),
            Ordering::Greater
        );
        assert_eq!(
            compare(Ipv4Addr::new(200, 0, 0, 0), Ipv4Addr::new(10, 255, 255, 255)),
            Ordering::Greater
        );
    }

    #[test]
    fn test_snapshot_reports_state() {
        let mut table = LeaseTable::new(&test_config("10.0.0.2", "10.0.0.10"));

        table.lease_for(make_mac(1)).unwrap();
        table.lease_for(make_mac(2)).unwrap();
        table.release(make_mac(1));

        let entries = table.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].ip, ip(2));
        assert!(matches!(entries[0].state, LeaseState::Released { .. }));
        assert!(entries[0].released_at.is_some());
        assert_eq!(entries[1].state, LeaseState::Active);
        assert!(entries[1].to_string().starts_with("aa:bb:cc:dd:ee:02 -> 10.0.0.3"));
    }
}
