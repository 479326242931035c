//! Row attachment descriptors and batching.

use std::path::PathBuf;

/// Everything needed to move one row attachment: where it lives locally,
/// where it lives on the server, and its row-path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommonFileAttachmentTerms {
    /// Path relative to the row's instance folder, `/`-separated.
    pub rowpath: String,
    pub local_file: PathBuf,
    pub server_uri: String,
    /// Size hint used for batching; zero when unknown.
    pub content_length: u64,
}

/// Groups attachments into batches of at most `max_batch_bytes`.
///
/// Order is preserved. An attachment larger than the limit goes into a
/// batch of its own.
pub fn partition_into_batches(
    terms: Vec<CommonFileAttachmentTerms>,
    max_batch_bytes: u64,
) -> Vec<Vec<CommonFileAttachmentTerms>> {
    let mut batches = Vec::new();
    let mut current: Vec<CommonFileAttachmentTerms> = Vec::new();
    let mut current_bytes = 0u64;

    for term in terms {
        let size = term.content_length;
        if !current.is_empty() && current_bytes.saturating_add(size) > max_batch_bytes {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes = current_bytes.saturating_add(size);
        current.push(term);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
