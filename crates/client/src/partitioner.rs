//! Target partitioner.
//!
//! Turns free-text target input into an [`ExpandedTargetSet`] through the
//! backend's expansion endpoint, then slices it into execution batches
//! with [`scanwatch_core::targets::chunk`].

use std::sync::Arc;

use scanwatch_core::targets::{chunk, normalize_target_lines, Batch, ExpandedTargetSet};

use crate::api::ApiError;
use crate::backend::ScanBackend;

/// Target expansion failed. The caller keeps its previous set.
#[derive(Debug, thiserror::Error)]
pub enum ExpansionError {
    /// Every input line was blank; nothing was sent.
    #[error("No targets given")]
    EmptyInput,

    /// The expansion endpoint was unreachable or answered non-2xx.
    #[error("Target expansion failed: {0}")]
    Request(#[from] ApiError),
}

pub struct TargetPartitioner {
    backend: Arc<dyn ScanBackend>,
}

impl TargetPartitioner {
    pub fn new(backend: Arc<dyn ScanBackend>) -> Self {
        Self { backend }
    }

    /// Trim `raw_lines`, drop blanks and expand the rest on the backend.
    ///
    /// The returned set keeps the backend's order, duplicates included.
    pub async fn expand<I, S>(&self, raw_lines: I) -> Result<ExpandedTargetSet, ExpansionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let inputs: Vec<String> = normalize_target_lines(raw_lines)
            .into_iter()
            .map(|t| t.into_string())
            .collect();
        if inputs.is_empty() {
            return Err(ExpansionError::EmptyInput);
        }

        let addresses = self.backend.expand_targets(&inputs).await.map_err(|e| {
            tracing::warn!(inputs = inputs.len(), error = %e, "Target expansion failed");
            e
        })?;

        let set = ExpandedTargetSet::from_addresses(addresses);
        tracing::debug!(inputs = inputs.len(), expanded = set.len(), "Targets expanded");
        Ok(set)
    }

    /// [`expand`](Self::expand) followed by [`chunk`].
    pub async fn expand_and_chunk<I, S>(
        &self,
        raw_lines: I,
        chunk_size: i64,
    ) -> Result<(ExpandedTargetSet, Vec<Batch>), ExpansionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = self.expand(raw_lines).await?;
        let batches = chunk(&set, chunk_size);
        Ok((set, batches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use assert_matches::assert_matches;

    fn addresses(prefix: &str, count: usize) -> Vec<String> {
        (0..count).map(|i| format!("{prefix}.{i}")).collect()
    }

    #[tokio::test]
    async fn cidr_expansion_yields_two_batches() {
        let backend = MockBackend::new();
        let mut block = addresses("198.51.100", 256);
        block.extend(addresses("198.51.101", 9));
        backend.set_expansion("198.51.100.0/24", block);
        let partitioner = TargetPartitioner::new(Arc::new(backend.clone()));

        let (set, batches) = partitioner
            .expand_and_chunk(["192.0.2.10", "198.51.100.0/24"], 256)
            .await
            .unwrap();

        assert_eq!(set.len(), 266);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 256);
        assert_eq!(batches[1].len(), 10);
        assert_eq!(batches[0].targets[0].as_str(), "192.0.2.10");
        assert_eq!(batches[1].index, 2);
    }

    #[tokio::test]
    async fn lines_are_trimmed_and_blanks_dropped() {
        let backend = MockBackend::new();
        let partitioner = TargetPartitioner::new(Arc::new(backend.clone()));

        let set = partitioner
            .expand(["  10.0.0.1 ", "", "   ", "host.example\t", "10.0.0.1"])
            .await
            .unwrap();

        assert_eq!(
            backend.expand_requests(),
            vec![vec![
                "10.0.0.1".to_string(),
                "host.example".to_string(),
                "10.0.0.1".to_string(),
            ]]
        );
        // Duplicates survive.
        assert_eq!(set.len(), 3);
    }

    #[tokio::test]
    async fn blank_input_fails_without_request() {
        let backend = MockBackend::new();
        let partitioner = TargetPartitioner::new(Arc::new(backend.clone()));

        assert_matches!(
            partitioner.expand(["", "  "]).await,
            Err(ExpansionError::EmptyInput)
        );
        assert_eq!(backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn backend_failure_is_an_error_not_an_empty_set() {
        let backend = MockBackend::new();
        backend.fail_next("expand_targets", 503);
        let partitioner = TargetPartitioner::new(Arc::new(backend));

        let err = partitioner.expand(["10.0.0.0/30"]).await.unwrap_err();
        assert_matches!(
            err,
            ExpansionError::Request(ApiError::Status { status: 503, .. })
        );
    }
}
