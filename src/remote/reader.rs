use async_stream::stream;
use bytes::Bytes;
use futures::Stream;
use std::sync::Arc;
use tracing::{debug, warn};

use super::session::SessionPool;
use super::store::{CHUNK_SIZE, RemoteStore};
use crate::error::GatewayResult;
use crate::models::{ContainerId, ItemId, TransferDescriptor};

/// How an inclusive HTTP byte range maps onto aligned remote chunks.
///
/// The remote store only delivers 1 MiB aligned chunks, so a request for
/// `bytes=a-b` is widened to the covering chunks and trimmed at both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePlan {
    /// Aligned start offset of the first chunk.
    pub offset: u64,
    /// Bytes to discard from the front of the first chunk.
    pub first_cut: usize,
    /// Bytes to retain from the last chunk.
    pub last_cut: usize,
    /// Number of chunks covering the range.
    pub part_count: u64,
}

impl RangePlan {
    /// Plan the chunks covering the inclusive range `from..=until`.
    pub fn new(from: u64, until: u64) -> Self {
        debug_assert!(from <= until);
        let offset = from - (from % CHUNK_SIZE);
        Self {
            offset,
            first_cut: (from - offset) as usize,
            last_cut: (until % CHUNK_SIZE + 1) as usize,
            part_count: until / CHUNK_SIZE - offset / CHUNK_SIZE + 1,
        }
    }

    /// Trim one fetched chunk down to the bytes the range actually covers.
    fn trim(&self, part: u64, chunk: Bytes) -> Bytes {
        let len = chunk.len();
        if self.part_count == 1 {
            chunk.slice(self.first_cut.min(len)..self.last_cut.min(len))
        } else if part == 0 {
            chunk.slice(self.first_cut.min(len)..)
        } else if part == self.part_count - 1 {
            chunk.slice(..self.last_cut.min(len))
        } else {
            chunk
        }
    }
}

/// Stream the inclusive byte range `from..=until` of one remote file.
///
/// The result is a lazy, non-restartable sequence of buffers delivered in
/// offset order; the task suspends between chunks. While no byte has been
/// yielded yet, `Throttled`/`Transient` failures rotate to the next session
/// (with a fresh locate, since the old handle may have expired) and retry
/// from the same offset, bounded by the pool size. Once data has flowed, an
/// error terminates the stream and the client is expected to resume with a
/// fresh range request.
pub fn stream_range(
    store: Arc<dyn RemoteStore>,
    pool: Arc<SessionPool>,
    session: usize,
    container_id: ContainerId,
    item_id: ItemId,
    descriptor: TransferDescriptor,
    from: u64,
    until: u64,
) -> impl Stream<Item = GatewayResult<Bytes>> + Send {
    stream! {
        let plan = RangePlan::new(from, until);
        let max_attempts = pool.len();
        let mut attempts = 1;
        let mut lease = pool.acquire(session);
        let mut descriptor = descriptor;
        let mut yielded = false;

        debug!(
            offset = plan.offset,
            parts = plan.part_count,
            session = lease.index(),
            "starting chunked range stream"
        );

        'attempt: loop {
            for part in 0..plan.part_count {
                let chunk_offset = plan.offset + part * CHUNK_SIZE;
                match store.fetch_chunk(lease.index(), &descriptor, chunk_offset).await {
                    Ok(chunk) => {
                        yielded = true;
                        yield Ok(plan.trim(part, chunk));
                    }
                    Err(e) if e.is_retryable() && !yielded && attempts < max_attempts => {
                        attempts += 1;
                        warn!(
                            session = lease.index(),
                            error = %e,
                            "retryable failure before first byte, rotating session"
                        );
                        lease = lease.rotate();
                        match store.locate(lease.index(), &container_id, &item_id).await {
                            Ok(fresh) => descriptor = fresh,
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        }
                        continue 'attempt;
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::test_utils::FakeRemoteStore;
    use futures::StreamExt;

    const MIB: u64 = CHUNK_SIZE;

    async fn collect(
        stream: impl Stream<Item = GatewayResult<Bytes>>,
    ) -> GatewayResult<Vec<u8>> {
        futures::pin_mut!(stream);
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            out.extend_from_slice(&item?);
        }
        Ok(out)
    }

    #[test]
    fn plan_mid_file_range() {
        // Range 1048575-2097151 of a 2.5 MB file: one byte of chunk 0 plus
        // all of chunk 1.
        let plan = RangePlan::new(1_048_575, 2_097_151);
        assert_eq!(plan.offset, 0);
        assert_eq!(plan.first_cut, 1_048_575);
        assert_eq!(plan.last_cut, MIB as usize);
        assert_eq!(plan.part_count, 2);
    }

    #[test]
    fn plan_single_part() {
        let plan = RangePlan::new(10, 99);
        assert_eq!(plan.offset, 0);
        assert_eq!(plan.first_cut, 10);
        assert_eq!(plan.last_cut, 100);
        assert_eq!(plan.part_count, 1);
    }

    #[test]
    fn plan_range_on_chunk_boundary() {
        // A one-byte range exactly at a chunk boundary still covers a chunk.
        let plan = RangePlan::new(2 * MIB, 2 * MIB);
        assert_eq!(plan.offset, 2 * MIB);
        assert_eq!(plan.first_cut, 0);
        assert_eq!(plan.last_cut, 1);
        assert_eq!(plan.part_count, 1);
    }

    #[tokio::test]
    async fn range_round_trip() {
        let file: Vec<u8> = (0..2_500_000u32).map(|i| (i % 251) as u8).collect();
        let store = Arc::new(FakeRemoteStore::new(2, file.clone()));
        let pool = Arc::new(SessionPool::new(2));
        let descriptor = store.descriptor();

        for (from, until) in [
            (0, file.len() as u64 - 1),
            (1_048_575, 2_097_151),
            (0, 0),
            (2_097_152, 2_097_152),
            (999, 1_048_576),
            (500, 499_999),
        ] {
            let body = collect(stream_range(
                store.clone(),
                pool.clone(),
                0,
                ContainerId::from("C"),
                ItemId::from("17"),
                descriptor.clone(),
                from,
                until,
            ))
            .await
            .unwrap();
            assert_eq!(
                body,
                &file[from as usize..=until as usize],
                "range {from}-{until}"
            );
        }
    }

    #[tokio::test]
    async fn rotates_before_first_byte() {
        let file: Vec<u8> = vec![7; 100];
        let store = Arc::new(FakeRemoteStore::new(3, file.clone()));
        store.fail_session(0, GatewayError::Throttled { wait_secs: 5 });
        let pool = Arc::new(SessionPool::new(3));
        let descriptor = store.descriptor();

        let body = collect(stream_range(
            store.clone(),
            pool.clone(),
            0,
            ContainerId::from("C"),
            ItemId::from("17"),
            descriptor,
            0,
            99,
        ))
        .await
        .unwrap();

        assert_eq!(body, file);
        // The throttled session was tried once, then abandoned.
        assert_eq!(store.chunk_requests(0), 1);
        assert_eq!(store.chunk_requests(1), 1);
    }

    #[tokio::test]
    async fn exhausted_rotation_surfaces_error() {
        let store = Arc::new(FakeRemoteStore::new(2, vec![1; 10]));
        store.fail_session(0, GatewayError::Transient("boom".into()));
        store.fail_session(1, GatewayError::Transient("boom".into()));
        let pool = Arc::new(SessionPool::new(2));
        let descriptor = store.descriptor();

        let err = collect(stream_range(
            store.clone(),
            pool,
            0,
            ContainerId::from("C"),
            ItemId::from("17"),
            descriptor,
            0,
            9,
        ))
        .await
        .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn mid_stream_error_terminates() {
        let file: Vec<u8> = (0..(2 * MIB as usize + 10)).map(|i| i as u8).collect();
        let store = Arc::new(FakeRemoteStore::new(2, file.clone()));
        // First chunk succeeds, then the session starts failing.
        store.fail_session_after(0, 1, GatewayError::Transient("reset".into()));
        let pool = Arc::new(SessionPool::new(2));
        let descriptor = store.descriptor();

        let stream = stream_range(
            store.clone(),
            pool,
            0,
            ContainerId::from("C"),
            ItemId::from("17"),
            descriptor,
            0,
            file.len() as u64 - 1,
        );
        futures::pin_mut!(stream);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.len(), MIB as usize);
        let second = stream.next().await.unwrap();
        assert!(second.is_err());
        assert!(stream.next().await.is_none());
        // No rotation happened after bytes were delivered.
        assert_eq!(store.chunk_requests(1), 0);
    }
}
