//! The Maglev slot table: a contiguous array of node indices, sized to a
//! prime `M`, read-only once built.

use crate::hashutil::is_prime;

/// Sentinel stored in a slot before it has been distributed.
pub const UNDISTRIBUTED: i64 = -1;

/// Fixed-capacity slot table of size `M` (`M` prime), indexed by `key mod M`.
#[derive(Debug, Clone)]
pub struct SlotArray {
    slots: Vec<i64>,
}

impl SlotArray {
    /// `m` must be prime and greater than 1.
    pub fn new(m: usize) -> Self {
        assert!(m > 1, "slot table size must be > 1");
        assert!(
            m <= u32::MAX as usize && is_prime(m as u32),
            "slot table size must be prime"
        );
        Self {
            slots: vec![UNDISTRIBUTED; m],
        }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn is_distributed(&self, idx: usize) -> bool {
        self.slots[idx] != UNDISTRIBUTED
    }

    pub fn set(&mut self, idx: usize, node_idx: usize) {
        self.slots[idx] = node_idx as i64;
    }

    /// Reset every slot back to the undistributed sentinel.
    pub fn clear(&mut self) {
        self.slots.fill(UNDISTRIBUTED);
    }

    /// Lookup by raw bucket (`hashed_key mod size()` already applied by caller,
    /// or pass the full key and let this do the modulo).
    pub fn get(&self, idx: usize) -> i64 {
        self.slots[idx]
    }

    pub fn get_by_key(&self, hashed_key: u64) -> i64 {
        self.slots[(hashed_key as usize) % self.slots.len()]
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_undistributed() {
        let s = SlotArray::new(7);
        assert_eq!(s.size(), 7);
        for i in 0..7 {
            assert!(!s.is_distributed(i));
            assert_eq!(s.get(i), UNDISTRIBUTED);
        }
    }

    #[test]
    fn set_and_get() {
        let mut s = SlotArray::new(7);
        s.set(3, 2);
        assert!(s.is_distributed(3));
        assert_eq!(s.get(3), 2);
    }

    #[test]
    #[should_panic(expected = "prime")]
    fn rejects_non_prime() {
        SlotArray::new(10);
    }

    #[test]
    fn get_by_key_wraps() {
        let mut s = SlotArray::new(7);
        s.set(2, 9);
        assert_eq!(s.get_by_key(2), 9);
        assert_eq!(s.get_by_key(9), 9); // 9 mod 7 == 2
    }
}
