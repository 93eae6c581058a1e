use super::inode::InodeId;
use bytes::Bytes;
use std::fmt;
use std::io::Cursor;

const PREFIX_INODE: u8 = 0x01;
const PREFIX_DIR_ENTRY: u8 = 0x02;
const PREFIX_XATTR: u8 = 0x03;
const PREFIX_CHUNK: u8 = 0x04;

const U64_SIZE: usize = 8;
// prefix byte + big-endian inode ID
const KEY_SCOPE_SIZE: usize = 1 + U64_SIZE;

/// Deterministic 16-byte chunk identifier: the 128-bit murmur3 hash of
/// (customer, share, inode, block), each encoded big-endian. The same tuple
/// always yields the same key; the hash is mixing, not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId([u8; 16]);

impl ChunkId {
    pub fn derive(customer_id: u64, share_id: u64, inode: InodeId, block: u64) -> Self {
        let mut tuple = [0u8; 32];
        tuple[..8].copy_from_slice(&customer_id.to_be_bytes());
        tuple[8..16].copy_from_slice(&share_id.to_be_bytes());
        tuple[16..24].copy_from_slice(&inode.to_be_bytes());
        tuple[24..32].copy_from_slice(&block.to_be_bytes());
        let hash = murmur3::murmur3_x64_128(&mut Cursor::new(&tuple[..]), 0)
            .expect("hashing an in-memory buffer cannot fail");
        Self(hash.to_be_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

pub struct KeyCodec;

impl KeyCodec {
    pub fn inode_key(inode: InodeId) -> Bytes {
        let mut key = Vec::with_capacity(KEY_SCOPE_SIZE);
        key.push(PREFIX_INODE);
        key.extend_from_slice(&inode.to_be_bytes());
        Bytes::from(key)
    }

    pub fn dir_entry_key(parent: InodeId, name: &str) -> Bytes {
        let mut key = Vec::with_capacity(KEY_SCOPE_SIZE + name.len());
        key.push(PREFIX_DIR_ENTRY);
        key.extend_from_slice(&parent.to_be_bytes());
        key.extend_from_slice(name.as_bytes());
        Bytes::from(key)
    }

    pub fn dir_entry_prefix(parent: InodeId) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(KEY_SCOPE_SIZE);
        prefix.push(PREFIX_DIR_ENTRY);
        prefix.extend_from_slice(&parent.to_be_bytes());
        prefix
    }

    pub fn xattr_key(inode: InodeId, name: &str) -> Bytes {
        let mut key = Vec::with_capacity(KEY_SCOPE_SIZE + name.len());
        key.push(PREFIX_XATTR);
        key.extend_from_slice(&inode.to_be_bytes());
        key.extend_from_slice(name.as_bytes());
        Bytes::from(key)
    }

    pub fn xattr_prefix(inode: InodeId) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(KEY_SCOPE_SIZE);
        prefix.push(PREFIX_XATTR);
        prefix.extend_from_slice(&inode.to_be_bytes());
        prefix
    }

    pub fn chunk_key(id: &ChunkId) -> Bytes {
        let mut key = Vec::with_capacity(1 + 16);
        key.push(PREFIX_CHUNK);
        key.extend_from_slice(id.as_bytes());
        Bytes::from(key)
    }

    /// Recovers the entry name from a scoped key (dir entry or xattr).
    pub fn name_from_key(key: &[u8]) -> Option<&str> {
        if key.len() <= KEY_SCOPE_SIZE {
            return None;
        }
        std::str::from_utf8(&key[KEY_SCOPE_SIZE..]).ok()
    }

    pub fn encode_child(inode: InodeId) -> Bytes {
        Bytes::copy_from_slice(&inode.to_le_bytes())
    }

    pub fn decode_child(data: &[u8]) -> Option<InodeId> {
        let bytes: [u8; U64_SIZE] = data.try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_pure() {
        let a = ChunkId::derive(1, 1, 42, 0);
        let b = ChunkId::derive(1, 1, 42, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn chunk_id_separates_tuples() {
        let base = ChunkId::derive(1, 1, 42, 0);
        assert_ne!(base, ChunkId::derive(1, 1, 42, 1));
        assert_ne!(base, ChunkId::derive(1, 1, 43, 0));
        assert_ne!(base, ChunkId::derive(1, 2, 42, 0));
        assert_ne!(base, ChunkId::derive(2, 1, 42, 0));
        // Field boundaries matter: swapping adjacent fields changes the key.
        assert_ne!(ChunkId::derive(1, 2, 3, 4), ChunkId::derive(2, 1, 3, 4));
    }

    #[test]
    fn dir_entry_key_roundtrip() {
        let key = KeyCodec::dir_entry_key(7, "notes.txt");
        assert_eq!(KeyCodec::name_from_key(&key), Some("notes.txt"));
        assert!(key.starts_with(&KeyCodec::dir_entry_prefix(7)));
        assert!(!key.starts_with(&KeyCodec::dir_entry_prefix(8)));
    }

    #[test]
    fn child_value_roundtrip() {
        let encoded = KeyCodec::encode_child(0xDEAD_BEEF);
        assert_eq!(KeyCodec::decode_child(&encoded), Some(0xDEAD_BEEF));
        assert_eq!(KeyCodec::decode_child(b"short"), None);
    }

    #[test]
    fn key_spaces_are_disjoint() {
        let inode = KeyCodec::inode_key(1);
        let entry = KeyCodec::dir_entry_key(1, "");
        let xattr = KeyCodec::xattr_key(1, "");
        assert_ne!(inode[0], entry[0]);
        assert_ne!(entry[0], xattr[0]);
    }
}
