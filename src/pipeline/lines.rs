/// Number of segments after splitting on CRLF, bare CR and bare LF.
///
/// A CRLF pair counts once. An empty buffer is one (empty) segment, and a trailing terminator
/// opens a final empty segment, so `"a\n"` counts 2.
pub fn count_lines(content: &[u8]) -> u64 {
    let mut lines = 1u64;
    let mut i = 0;
    while i < content.len() {
        match content[i] {
            b'\r' => {
                lines += 1;
                if content.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
            }
            b'\n' => lines += 1,
            _ => {}
        }
        i += 1;
    }
    lines
}
