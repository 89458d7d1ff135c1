//! Transaction identifiers
//!
//! This module defines [`TransactionId`], the XA-style identity of one branch
//! of a logical transaction:
//! - a fixed 28-byte global part shared by every branch of the transaction
//! - a short branch qualifier distinguishing co-located participants
//!
//! ## Global Layout
//!
//! ```text
//! +-------+-----------+-----------+-----------+
//! | magic | server id |   salt    | sequence  |
//! | 4 B   | 8 B (BE)  | 8 B (BE)  | 8 B (BE)  |
//! +-------+-----------+-----------+-----------+
//! ```
//!
//! The branch qualifier is the big-endian branch ordinal with leading zero
//! bytes stripped. Root ids carry ordinal 1.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Length of the global transaction id in bytes
pub const GLOBAL_ID_LEN: usize = 28;

/// Magic prefix identifying ids minted by this coordinator
pub const XID_MAGIC: [u8; 4] = *b"XAPL";

/// XA format identifier reported to resource managers
pub const XID_FORMAT_ID: i32 = 0x5841_504c;

/// Branch ordinal carried by the root id of every transaction
pub const ROOT_BRANCH: u32 = 1;

/// Identity of one transaction branch
///
/// Two ids with the same global part and different branch parts denote
/// participants of the same logical transaction. Equality compares both
/// parts byte-for-byte; hashing only uses the global part, so ids of the
/// same transaction land in the same bucket.
///
/// # Examples
///
/// ```
/// use xapool_core::TransactionId;
///
/// let root = TransactionId::new(7, 0xfeed, 1);
/// let child = root.derive(2);
///
/// assert!(root.same_transaction(&child));
/// assert_ne!(root, child);
/// assert_eq!(child.branch_ordinal(), 2);
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionId {
    global: [u8; GLOBAL_ID_LEN],
    branch: Vec<u8>,
}

impl TransactionId {
    /// Create the root id of a new transaction
    ///
    /// The caller is responsible for supplying a process-wide unique
    /// `(server_id, salt, sequence)` tuple.
    pub fn new(server_id: u64, salt: u64, sequence: u64) -> Self {
        let mut global = [0u8; GLOBAL_ID_LEN];
        global[0..4].copy_from_slice(&XID_MAGIC);
        global[4..12].copy_from_slice(&server_id.to_be_bytes());
        global[12..20].copy_from_slice(&salt.to_be_bytes());
        global[20..28].copy_from_slice(&sequence.to_be_bytes());

        TransactionId {
            global,
            branch: encode_ordinal(ROOT_BRANCH),
        }
    }

    /// Rebuild an id from raw parts, e.g. ids reported by a resource
    /// manager during recovery
    pub fn from_parts(global: [u8; GLOBAL_ID_LEN], branch: impl Into<Vec<u8>>) -> Self {
        TransactionId {
            global,
            branch: branch.into(),
        }
    }

    /// Derive the id of another branch of the same transaction
    pub fn derive(&self, branch_ordinal: u32) -> Self {
        TransactionId {
            global: self.global,
            branch: encode_ordinal(branch_ordinal),
        }
    }

    /// Global transaction id bytes
    pub fn global(&self) -> &[u8; GLOBAL_ID_LEN] {
        &self.global
    }

    /// Branch qualifier bytes
    pub fn branch(&self) -> &[u8] {
        &self.branch
    }

    /// Branch ordinal decoded from the qualifier
    ///
    /// Qualifiers longer than four bytes (foreign ids) keep their low four
    /// bytes.
    pub fn branch_ordinal(&self) -> u32 {
        self.branch
            .iter()
            .fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
    }

    /// Originating server id
    pub fn server_id(&self) -> u64 {
        read_u64(&self.global[4..12])
    }

    /// Random salt chosen by the originating server
    pub fn salt(&self) -> u64 {
        read_u64(&self.global[12..20])
    }

    /// Monotonic sequence number assigned by the originating server
    pub fn sequence(&self) -> u64 {
        read_u64(&self.global[20..28])
    }

    /// XA format identifier
    pub fn format_id(&self) -> i32 {
        XID_FORMAT_ID
    }

    /// True if both ids belong to the same logical transaction
    pub fn same_transaction(&self, other: &TransactionId) -> bool {
        self.global == other.global
    }

    /// True if this id was minted by a coordinator with the given server id
    pub fn is_local_format(&self, server_id: u64) -> bool {
        self.global[0..4] == XID_MAGIC && self.server_id() == server_id
    }
}

fn encode_ordinal(ordinal: u32) -> Vec<u8> {
    let bytes = ordinal.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(3);
    bytes[first..].to_vec()
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

impl Hash for TransactionId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.global.hash(state);
    }
}

impl std::fmt::Display for TransactionId {
    /// Short form: `xid[<branch>:<low 32 bits of sequence>]`
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "xid[")?;
        for b in &self.branch {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ":")?;
        for b in &self.global[24..28] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "]")
    }
}

impl std::fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionId")
            .field("server_id", &self.server_id())
            .field("salt", &format_args!("{:#x}", self.salt()))
            .field("sequence", &self.sequence())
            .field("branch", &self.branch_ordinal())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    // ===== Construction =====

    #[test]
    fn test_root_id_layout() {
        let id = TransactionId::new(42, 0xdead_beef, 9);

        assert_eq!(&id.global()[0..4], &XID_MAGIC);
        assert_eq!(id.server_id(), 42);
        assert_eq!(id.salt(), 0xdead_beef);
        assert_eq!(id.sequence(), 9);
        assert_eq!(id.branch_ordinal(), ROOT_BRANCH);
        assert_eq!(id.branch(), &[1u8]);
    }

    #[test]
    fn test_distinct_sequences_differ() {
        let a = TransactionId::new(1, 77, 1);
        let b = TransactionId::new(1, 77, 2);

        assert_ne!(a, b);
        assert!(!a.same_transaction(&b));
    }

    #[test]
    fn test_derive_keeps_global() {
        let root = TransactionId::new(3, 5, 8);
        let child = root.derive(2);
        let grandchild = root.derive(300);

        assert_eq!(root.global(), child.global());
        assert_eq!(root.global(), grandchild.global());
        assert_ne!(root, child);
        assert_ne!(child, grandchild);
        assert_eq!(grandchild.branch(), &[0x01, 0x2c]);
    }

    #[test]
    fn test_hash_uses_global_only() {
        use std::collections::hash_map::DefaultHasher;

        let root = TransactionId::new(3, 5, 8);
        let child = root.derive(4);

        let hash = |id: &TransactionId| {
            let mut h = DefaultHasher::new();
            id.hash(&mut h);
            h.finish()
        };
        assert_eq!(hash(&root), hash(&child));

        let mut set = HashSet::new();
        set.insert(root.clone());
        set.insert(child.clone());
        assert_eq!(set.len(), 2, "equal hashes must not collapse distinct branches");
    }

    #[test]
    fn test_local_format() {
        let id = TransactionId::new(11, 1, 1);
        assert!(id.is_local_format(11));
        assert!(!id.is_local_format(12));

        let foreign = TransactionId::from_parts([0u8; GLOBAL_ID_LEN], vec![1]);
        assert!(!foreign.is_local_format(0));
    }

    #[test]
    fn test_display_short_form() {
        let id = TransactionId::new(1, 2, 0x0102_0304).derive(2);
        assert_eq!(id.to_string(), "xid[02:01020304]");
    }

    #[test]
    fn test_serialization() {
        let id = TransactionId::new(5, 6, 7).derive(3);
        let json = serde_json::to_string(&id).unwrap();
        let restored: TransactionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, restored);
    }

    proptest! {
        #[test]
        fn prop_derived_branches_share_global(
            server in any::<u64>(),
            salt in any::<u64>(),
            seq in any::<u64>(),
            a in 1u32..,
            b in 1u32..,
        ) {
            let root = TransactionId::new(server, salt, seq);
            let x = root.derive(a);
            let y = root.derive(b);

            prop_assert!(x.same_transaction(&y));
            prop_assert_eq!(x.branch_ordinal(), a);
            prop_assert_eq!(x == y, a == b);
        }
    }
}
