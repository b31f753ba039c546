//! Blob and DRS metadata for task outputs

use crate::normalize::{NormalizeResult, Pass};
use serde_json::json;

const REPORTED_EXAMPLES: usize = 5;

/// Attach size, checksum and DRS URI to every task output. Outputs the caches
/// do not know stay unresolved placeholders.
pub(super) fn blob_attributes(pass: &mut Pass<'_>) -> NormalizeResult<()> {
    let mut missing_blobs: Vec<String> = Vec::new();
    let mut missing_drs = 0usize;

    let mut tasks = std::mem::take(&mut pass.ctx.tasks);
    for task in tasks.values_mut() {
        for output in &mut task.outputs {
            match pass.blobs.blob(&output.url)? {
                Some(info) => {
                    output.size = info.size;
                    output.md5 = info.md5;
                    output.resolved = true;
                }
                None => missing_blobs.push(output.url.clone()),
            }
            output.drs_uri = pass.blobs.drs(&output.url)?;
            if output.drs_uri.is_none() {
                missing_drs += 1;
            }
        }
    }
    pass.ctx.tasks = tasks;

    if !missing_blobs.is_empty() {
        let examples: Vec<&String> = missing_blobs.iter().take(REPORTED_EXAMPLES).collect();
        pass.warn_once("MissingBlob", vec![json!(missing_blobs.len()), json!(examples)]);
    }
    if missing_drs > 0 {
        pass.warn_once("MissingDrsUri", vec![json!(missing_drs)]);
    }
    Ok(())
}
