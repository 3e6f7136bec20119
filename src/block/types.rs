use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content identifier: BLAKE3 digest of a block's payload
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cid([u8; 32]);

impl Cid {
    /// Derive the identifier for a payload
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short hex prefix used in log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", self.short())
    }
}

/// Network peer identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random identifier, handy for tests and ephemeral nodes
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// An immutable block of content together with its identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    cid: Cid,
    data: Bytes,
}

impl Block {
    /// Build a block, deriving its identifier from the payload
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            cid: Cid::of(&data),
            data,
        }
    }

    pub fn cid(&self) -> Cid {
        self.cid
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cid_is_content_derived() {
        let a = Block::new(vec![1u8, 2, 3]);
        let b = Block::new(vec![1u8, 2, 3]);
        let c = Block::new(vec![3u8, 2, 1]);

        assert_eq!(a.cid(), b.cid());
        assert_ne!(a.cid(), c.cid());
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_cid_display() {
        let cid = Cid::of(b"hello");
        assert_eq!(cid.to_string().len(), 64);
        assert!(cid.to_string().starts_with(&cid.short()));
    }

    #[test]
    fn test_peer_id() {
        let p = PeerId::new("peer-a");
        assert_eq!(p.as_str(), "peer-a");
        assert_ne!(PeerId::random(), PeerId::random());
    }
}
