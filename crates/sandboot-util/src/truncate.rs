//! Output truncation helpers.
//!
//! Process output is forwarded to UI surfaces (preview log, terminal tabs)
//! chunk by chunk. Pathological chunks (a minified bundle dumped to stdout,
//! an install log with megabytes of progress bars) are truncated before they
//! cross the UI boundary.

/// Truncate output if too long.
///
/// Keeps the head and tail of the output with an elision marker in the
/// middle, and reports whether truncation happened.
pub fn truncate_output(output: &str, max_size: usize) -> (String, bool) {
    if output.len() <= max_size {
        return (output.to_string(), false);
    }

    // Keep first half and last portion
    let keep_start = max_size * 2 / 3;
    let keep_end = max_size.saturating_sub(keep_start + 100);

    let start = floor_char_boundary(output, keep_start);
    let end_start = ceil_char_boundary(output, output.len().saturating_sub(keep_end));

    let truncated = format!(
        "{}\n\n... [truncated {} chars] ...\n\n{}",
        &output[..start],
        end_start - start,
        &output[end_start..]
    );

    (truncated, true)
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index += 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_output_small() {
        let (out, truncated) = truncate_output("hello", 100);
        assert_eq!(out, "hello");
        assert!(!truncated);
    }

    #[test]
    fn test_truncate_output_large() {
        let big = "x".repeat(10_000);
        let (out, truncated) = truncate_output(&big, 1000);
        assert!(truncated);
        assert!(out.len() < big.len());
        assert!(out.contains("truncated"));
    }

    #[test]
    fn test_truncate_output_multibyte() {
        let big = "é".repeat(5000);
        let (_, truncated) = truncate_output(&big, 1000);
        assert!(truncated);
    }
}
