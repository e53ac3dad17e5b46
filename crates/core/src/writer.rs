use crate::config::WriterConfig;
use crate::models::VectorChunk;
use crate::traits::{Pacer, VectorStore};
use crate::StoreError;
use thiserror::Error;
use tracing::{debug, error};

/// A batch failed after `inserted` rows were stored; earlier batches are not rolled back.
#[derive(Debug, Error)]
#[error("insert batch {} failed after {inserted} of {total} chunks: {source}", .batch_index + 1)]
pub struct PartialWrite {
    pub inserted: usize,
    pub total: usize,
    pub batch_index: usize,
    #[source]
    pub source: StoreError,
}

pub struct VectorStoreWriter<'a, V: ?Sized> {
    store: &'a V,
    pacer: &'a dyn Pacer,
    config: WriterConfig,
}

impl<'a, V> VectorStoreWriter<'a, V>
where
    V: VectorStore + ?Sized,
{
    pub fn new(store: &'a V, pacer: &'a dyn Pacer, config: WriterConfig) -> Self {
        Self {
            store,
            pacer,
            config,
        }
    }

    pub async fn write_chunks(&self, chunks: &[VectorChunk]) -> Result<usize, PartialWrite> {
        let batch_size = self.config.insert_batch_size.max(1);
        let total_batches = chunks.len().div_ceil(batch_size);
        let mut inserted = 0usize;

        for (batch_index, batch) in chunks.chunks(batch_size).enumerate() {
            if batch_index > 0 {
                self.pacer.pause(self.config.delay()).await;
            }

            if let Err(source) = self.store.insert_chunks(batch).await {
                error!(
                    batch = batch_index + 1,
                    total_batches,
                    inserted,
                    error = %source,
                    "vector chunk insert failed"
                );
                return Err(PartialWrite {
                    inserted,
                    total: chunks.len(),
                    batch_index,
                    source,
                });
            }

            inserted += batch.len();
            debug!(
                batch = batch_index + 1,
                total_batches,
                inserted,
                total = chunks.len(),
                "vector chunk batch inserted"
            );
        }

        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::RecordingPacer;
    use crate::stores::memory::tests::document_chunk;
    use crate::stores::InMemoryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn writes_all_batches_with_pauses() {
        let store = InMemoryStore::new();
        let pacer = RecordingPacer::default();
        let writer = VectorStoreWriter::new(&store, &pacer, WriterConfig::default());

        let chunks: Vec<_> = (0..250)
            .map(|index| document_chunk("u-1", "t-1", "d-1", index, vec![1.0, 0.0]))
            .collect();
        let inserted = writer.write_chunks(&chunks).await.unwrap();

        assert_eq!(inserted, 250);
        assert_eq!(store.chunk_count(), 250);
        assert_eq!(pacer.pauses(), vec![Duration::from_millis(100); 2]);
    }

    #[tokio::test]
    async fn failure_reports_rows_written_before_it() {
        let store = InMemoryStore::new();
        store.fail_insert_batch(2);
        let pacer = RecordingPacer::default();
        let writer = VectorStoreWriter::new(&store, &pacer, WriterConfig::default());

        let chunks: Vec<_> = (0..350)
            .map(|index| document_chunk("u-1", "t-1", "d-1", index, vec![1.0, 0.0]))
            .collect();
        let failure = writer.write_chunks(&chunks).await.unwrap_err();

        assert_eq!(failure.inserted, 200);
        assert_eq!(failure.total, 350);
        assert_eq!(failure.batch_index, 2);
        assert_eq!(store.chunk_count(), 200);
    }
}
