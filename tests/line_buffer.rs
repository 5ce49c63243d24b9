// ABOUTME: Property tests for streamed output line re-assembly.
// ABOUTME: Any chunking of the same bytes must yield the same lines.

use deckhand::ssh::LineBuffer;
use proptest::prelude::*;

fn collect(data: &[u8], cuts: &[usize]) -> Vec<String> {
    let mut buffer = LineBuffer::default();
    let mut lines = Vec::new();
    let mut start = 0;
    for &cut in cuts {
        let end = cut.clamp(start, data.len());
        lines.extend(buffer.push(&data[start..end]));
        start = end;
    }
    lines.extend(buffer.push(&data[start..]));
    lines.extend(buffer.finish());
    lines
}

proptest! {
    #[test]
    fn chunking_does_not_change_lines(
        text in "[a-z \n]{0,200}",
        mut cuts in prop::collection::vec(0usize..200, 0..20),
    ) {
        cuts.sort_unstable();
        let data = text.as_bytes();
        prop_assert_eq!(collect(data, &cuts), collect(data, &[]));
    }

    #[test]
    fn every_line_is_returned_once(lines in prop::collection::vec("[a-z]{0,12}", 1..20)) {
        let text = lines.join("\n") + "\n";
        prop_assert_eq!(collect(text.as_bytes(), &[]), lines);
    }
}
