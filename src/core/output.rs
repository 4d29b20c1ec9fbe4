//! Output capping for captured process streams

/// Maximum bytes kept per stream (64 KiB)
pub const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Appended after a stream has been cut short
pub const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// Cap `output` at `max_bytes`, appending [`TRUNCATION_MARKER`] when anything was dropped.
///
/// The cut lands on the nearest char boundary at or below `max_bytes`, so multi-byte
/// output never produces invalid UTF-8. Capping an already-capped string is a no-op.
pub fn cap_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }

    if let Some(kept) = output.strip_suffix(TRUNCATION_MARKER) {
        if kept.len() <= max_bytes {
            return output.to_string();
        }
    }

    let mut end = max_bytes;
    while !output.is_char_boundary(end) {
        end -= 1;
    }

    let mut capped = String::with_capacity(end + TRUNCATION_MARKER.len());
    capped.push_str(&output[..end]);
    capped.push_str(TRUNCATION_MARKER);
    capped
}

/// Cap a stream at the service-wide [`MAX_OUTPUT_BYTES`] bound
pub fn cap_stream(output: &str) -> String {
    cap_output(output, MAX_OUTPUT_BYTES)
}

/// Truncate to at most `max_chars` characters, without a marker
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
