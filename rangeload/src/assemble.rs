//! Reassembly of fetched chunks into the final artifact.

use tracing::debug;

use crate::error::DownloadError;
use crate::plan::Chunk;

/// Concatenate chunk payloads in index order into the original artifact.
///
/// Completion order during fetching is irrelevant; only index order matters
/// here. Payloads are taken out of the chunks as they are copied so the
/// per-chunk buffers are released incrementally.
///
/// # Errors
///
/// Returns `IncompleteAssembly` if any chunk has no data. The scheduler
/// contract guarantees this cannot happen on a successful run; hitting it
/// means a bug upstream, not a recoverable condition.
pub fn combine(chunks: &mut [Chunk]) -> Result<Vec<u8>, DownloadError> {
    if let Some(missing) = chunks.iter().find(|c| c.data.is_none()) {
        return Err(DownloadError::IncompleteAssembly {
            index: missing.index,
        });
    }

    let total: u64 = chunks.iter().map(|c| c.len()).sum();
    let mut artifact = Vec::with_capacity(total as usize);

    for chunk in chunks.iter_mut() {
        // Checked above; take() releases the buffer once copied.
        if let Some(data) = chunk.data.take() {
            artifact.extend_from_slice(&data);
        }
    }

    debug!(bytes = artifact.len(), chunks = chunks.len(), "artifact assembled");
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn chunk(index: u32, start: u64, payload: &'static [u8]) -> Chunk {
        Chunk {
            index,
            start,
            end: start + payload.len() as u64 - 1,
            data: Some(Bytes::from_static(payload)),
            retry_count: 0,
        }
    }

    #[test]
    fn test_combine_preserves_index_order() {
        let mut chunks = vec![
            chunk(0, 0, b"hello "),
            chunk(1, 6, b"chunked "),
            chunk(2, 14, b"world"),
        ];

        let artifact = combine(&mut chunks).unwrap();
        assert_eq!(artifact, b"hello chunked world");
    }

    #[test]
    fn test_combine_releases_buffers() {
        let mut chunks = vec![chunk(0, 0, b"abc"), chunk(1, 3, b"def")];

        combine(&mut chunks).unwrap();
        assert!(chunks.iter().all(|c| c.data.is_none()));
    }

    #[test]
    fn test_combine_rejects_missing_data() {
        let mut chunks = vec![chunk(0, 0, b"abc"), chunk(1, 3, b"def")];
        chunks[1].data = None;

        let err = combine(&mut chunks).unwrap_err();
        assert!(matches!(
            err,
            DownloadError::IncompleteAssembly { index: 1 }
        ));
    }

    #[test]
    fn test_combine_single_chunk() {
        let mut chunks = vec![chunk(0, 0, b"solo")];
        assert_eq!(combine(&mut chunks).unwrap(), b"solo");
    }
}
