use async_trait::async_trait;
use bytes::Bytes;

use crate::error::GatewayResult;
use crate::models::{ContainerId, ItemId, TransferDescriptor};

/// The remote protocol's fixed unit of transfer. Media is only delivered in
/// chunks aligned to this size.
pub const CHUNK_SIZE: u64 = 1024 * 1024;

/// The remote object store the gateway fronts.
///
/// Implementations hold one authenticated session per index; callers route
/// work to a session chosen through the [`SessionPool`](super::SessionPool).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Number of authenticated sessions available.
    fn session_count(&self) -> usize;

    /// Fetch a fresh transfer descriptor for one item, through the given
    /// session.
    ///
    /// Descriptors are never cached by callers: the embedded handle may
    /// expire, so every streaming operation starts with a fresh locate.
    async fn locate(
        &self,
        session: usize,
        container_id: &ContainerId,
        item_id: &ItemId,
    ) -> GatewayResult<TransferDescriptor>;

    /// Fetch one aligned chunk of at most [`CHUNK_SIZE`] bytes starting at
    /// `offset` (a multiple of the chunk size). The final chunk of a file
    /// may be shorter.
    async fn fetch_chunk(
        &self,
        session: usize,
        descriptor: &TransferDescriptor,
        offset: u64,
    ) -> GatewayResult<Bytes>;

    /// Thumbnail bytes for an item (JPEG).
    async fn thumbnail(
        &self,
        session: usize,
        container_id: &ContainerId,
        item_id: &ItemId,
    ) -> GatewayResult<Bytes>;
}
