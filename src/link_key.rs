//! Link key persistence.
use bt_hci::param::BdAddr;
use heapless::Vec;

use crate::connection::SecurityLevel;

pub type LinkKey = [u8; 16];

/// Link key type as reported in the link key notification event.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkKeyType(pub u8);

impl LinkKeyType {
    pub const COMBINATION: Self = Self(0x00);
    pub const LOCAL_UNIT: Self = Self(0x01);
    pub const REMOTE_UNIT: Self = Self(0x02);
    pub const DEBUG_COMBINATION: Self = Self(0x03);
    pub const UNAUTHENTICATED_P192: Self = Self(0x04);
    pub const AUTHENTICATED_P192: Self = Self(0x05);
    pub const CHANGED_COMBINATION: Self = Self(0x06);
    pub const UNAUTHENTICATED_P256: Self = Self(0x07);
    pub const AUTHENTICATED_P256: Self = Self(0x08);
    pub const INVALID: Self = Self(0xff);

    pub fn security_level(&self) -> SecurityLevel {
        match *self {
            Self::AUTHENTICATED_P256 => SecurityLevel::Level4,
            Self::COMBINATION | Self::AUTHENTICATED_P192 => SecurityLevel::Level3,
            _ => SecurityLevel::Level2,
        }
    }

    /// Keys generated with Secure Connections (P-256).
    pub fn is_secure_connection(&self) -> bool {
        matches!(*self, Self::AUTHENTICATED_P256 | Self::UNAUTHENTICATED_P256)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(*self, Self::AUTHENTICATED_P256 | Self::AUTHENTICATED_P192)
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredLinkKey {
    pub addr: BdAddr,
    pub key: LinkKey,
    pub key_type: LinkKeyType,
}

pub trait LinkKeyDb {
    fn open(&mut self) {}

    fn close(&mut self) {}

    /// Called once the controller address is known, for stores keyed by local address.
    fn set_local_bd_addr(&mut self, addr: &BdAddr) {
        let _ = addr;
    }

    fn get_link_key(&self, addr: &BdAddr) -> Option<(LinkKey, LinkKeyType)>;

    fn put_link_key(&mut self, addr: &BdAddr, key: &LinkKey, key_type: LinkKeyType);

    fn delete_link_key(&mut self, addr: &BdAddr);

    fn for_each(&self, f: &mut dyn FnMut(&StoredLinkKey));

    fn clear(&mut self);
}

/// Keeps up to `N` link keys in RAM, evicting the oldest when full.
pub struct MemoryLinkKeyDb<const N: usize> {
    local: Option<BdAddr>,
    keys: Vec<StoredLinkKey, N>,
}

impl<const N: usize> MemoryLinkKeyDb<N> {
    pub const fn new() -> Self {
        Self {
            local: None,
            keys: Vec::new(),
        }
    }

    pub fn local_bd_addr(&self) -> Option<BdAddr> {
        self.local
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<const N: usize> Default for MemoryLinkKeyDb<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> LinkKeyDb for MemoryLinkKeyDb<N> {
    fn set_local_bd_addr(&mut self, addr: &BdAddr) {
        self.local.replace(*addr);
    }

    fn get_link_key(&self, addr: &BdAddr) -> Option<(LinkKey, LinkKeyType)> {
        self.keys
            .iter()
            .find(|k| k.addr == *addr)
            .map(|k| (k.key, k.key_type))
    }

    fn put_link_key(&mut self, addr: &BdAddr, key: &LinkKey, key_type: LinkKeyType) {
        self.delete_link_key(addr);
        if self.keys.is_full() && !self.keys.is_empty() {
            self.keys.remove(0);
        }
        let entry = StoredLinkKey {
            addr: *addr,
            key: *key,
            key_type,
        };
        if self.keys.push(entry).is_err() {
            warn!("[link_key] no room for key");
        }
    }

    fn delete_link_key(&mut self, addr: &BdAddr) {
        self.keys.retain(|k| k.addr != *addr);
    }

    fn for_each(&self, f: &mut dyn FnMut(&StoredLinkKey)) {
        self.keys.iter().for_each(f);
    }

    fn clear(&mut self) {
        self.keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_evicts() {
        let mut db: MemoryLinkKeyDb<2> = MemoryLinkKeyDb::new();
        let a = BdAddr::new([1; 6]);
        let b = BdAddr::new([2; 6]);
        let c = BdAddr::new([3; 6]);
        db.put_link_key(&a, &[0xaa; 16], LinkKeyType::COMBINATION);
        db.put_link_key(&b, &[0xbb; 16], LinkKeyType::UNAUTHENTICATED_P192);
        db.put_link_key(&c, &[0xcc; 16], LinkKeyType::AUTHENTICATED_P256);

        assert_eq!(db.len(), 2);
        assert!(db.get_link_key(&a).is_none());
        assert_eq!(db.get_link_key(&c), Some(([0xcc; 16], LinkKeyType::AUTHENTICATED_P256)));

        db.put_link_key(&b, &[0xbd; 16], LinkKeyType::AUTHENTICATED_P192);
        assert_eq!(db.len(), 2);
        assert_eq!(db.get_link_key(&b).map(|(k, _)| k[0]), Some(0xbd));

        let mut seen = 0;
        db.for_each(&mut |_| seen += 1);
        assert_eq!(seen, 2);
        db.clear();
        assert!(db.is_empty());
    }

    #[test]
    fn key_type_levels() {
        assert_eq!(LinkKeyType::AUTHENTICATED_P256.security_level(), SecurityLevel::Level4);
        assert_eq!(LinkKeyType::COMBINATION.security_level(), SecurityLevel::Level3);
        assert_eq!(LinkKeyType::UNAUTHENTICATED_P256.security_level(), SecurityLevel::Level2);
        assert!(LinkKeyType::UNAUTHENTICATED_P256.is_secure_connection());
        assert!(!LinkKeyType::UNAUTHENTICATED_P256.is_authenticated());
    }
}
