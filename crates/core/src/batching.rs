use crate::config::EmbeddingBatchConfig;
use crate::traits::{EmbeddingModel, Pacer};
use crate::RagError;
use std::time::Instant;
use tracing::{debug, error};

/// Output order matches input order. The first failing batch aborts the whole
/// call; vectors from earlier batches are discarded.
pub struct EmbeddingBatcher<'a, E: ?Sized> {
    model: &'a E,
    pacer: &'a dyn Pacer,
    config: EmbeddingBatchConfig,
}

impl<'a, E> EmbeddingBatcher<'a, E>
where
    E: EmbeddingModel + ?Sized,
{
    pub fn new(model: &'a E, pacer: &'a dyn Pacer, config: EmbeddingBatchConfig) -> Self {
        Self {
            model,
            pacer,
            config,
        }
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let batch_size = self.config.max_batch_size.max(1);
        let total_batches = texts.len().div_ceil(batch_size);
        let mut vectors = Vec::with_capacity(texts.len());

        for (batch_index, batch) in texts.chunks(batch_size).enumerate() {
            if batch_index > 0 {
                self.pacer.pause(self.config.delay()).await;
            }

            let started = Instant::now();
            let embedded = self.model.embed_documents(batch).await.map_err(|source| {
                error!(batch = batch_index + 1, total_batches, error = %source, "embedding batch failed");
                RagError::EmbeddingBatchFailed {
                    batch_index,
                    total_batches,
                    details: source.to_string(),
                }
            })?;

            if embedded.len() != batch.len() {
                return Err(RagError::EmbeddingBatchFailed {
                    batch_index,
                    total_batches,
                    details: format!(
                        "provider returned {} vectors for {} texts",
                        embedded.len(),
                        batch.len()
                    ),
                });
            }

            debug!(
                batch = batch_index + 1,
                total_batches,
                size = batch.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "embedding batch completed"
            );
            vectors.extend(embedded);
        }

        Ok(vectors)
    }
}
