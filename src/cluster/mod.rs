//! Cluster role and transport capability
//!
//! The viewer runs on a master/client rendering cluster. The transport
//! itself (frame-locked state broadcast, reliable point-to-point transfers)
//! belongs to the host framework; the viewer only needs to know its role,
//! its own address, and how to hand off a reliable payload.

pub mod state;

/// Role and transport surface provided by the host clustering framework.
pub trait ClusterChannel: Send + Sync {
    /// Whether this node authors the shared state each synchronized frame.
    fn is_master(&self) -> bool;

    /// Address of this node, matched against the configured capture host.
    fn this_node_address(&self) -> &str;

    /// Total node count, master included.
    fn node_count(&self) -> usize;

    /// Reliable out-of-band transfer to every client, tagged with a
    /// package id that comes back through the acknowledgment callback.
    fn transfer_reliable(&self, payload: &[u8], tag: i32);
}

/// Single-node stand-in used when running without a cluster.
#[derive(Debug, Clone)]
pub struct SoloNode {
    address: String,
}

impl SoloNode {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl ClusterChannel for SoloNode {
    fn is_master(&self) -> bool {
        true
    }

    fn this_node_address(&self) -> &str {
        &self.address
    }

    fn node_count(&self) -> usize {
        1
    }

    fn transfer_reliable(&self, payload: &[u8], tag: i32) {
        log::debug!("solo node: dropping reliable transfer of {} bytes (tag {tag})", payload.len());
    }
}
