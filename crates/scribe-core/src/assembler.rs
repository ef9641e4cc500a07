//! **Result Assembler** — join per-chunk transcripts back into one string,
//! strictly by chunk index.

use crate::error::{ScribeError, ScribeResult};
use std::collections::HashMap;

/// Join `results[0..chunk_count]` with newlines, in ascending index order.
/// Completion order never matters here; a missing index is a Dispatcher bug
/// and surfaces as `IncompleteResults` rather than silently reordered or
/// truncated output.
pub fn assemble(results: &HashMap<usize, String>, chunk_count: usize) -> ScribeResult<String> {
    let mut parts = Vec::with_capacity(chunk_count);
    for index in 0..chunk_count {
        let transcript = results
            .get(&index)
            .ok_or(ScribeError::IncompleteResults(index))?;
        parts.push(transcript.as_str());
    }
    Ok(parts.join("\n"))
}
