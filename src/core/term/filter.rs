//! ANSI escape sequence filter
//!
//! Strips CSI, OSC, and DCS sequences from a byte stream that arrives in
//! arbitrary-sized chunks, keeping only plain text. State is carried between
//! chunks, so a sequence split across two reads is still recognized.

/// Streaming filter state machine
pub struct EscapeFilter {
    state: FilterState,
    osc_escape: bool,
    dcs_escape: bool,
}

#[derive(Clone, Copy, Default, PartialEq)]
enum FilterState {
    #[default]
    Text,
    Escape,
    Csi,
    Osc,
    Dcs,
}

impl Default for EscapeFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl EscapeFilter {
    pub fn new() -> Self {
        Self {
            state: FilterState::Text,
            osc_escape: false,
            dcs_escape: false,
        }
    }

    /// Feed one chunk, returning the plain-text bytes it contributes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(chunk.len());
        for &byte in chunk {
            match self.state {
                FilterState::Text => self.text(byte, &mut out),
                FilterState::Escape => self.escape(byte),
                FilterState::Csi => self.csi(byte),
                FilterState::Osc => self.osc(byte),
                FilterState::Dcs => self.dcs(byte),
            }
        }
        out
    }

    fn text(&mut self, byte: u8, out: &mut Vec<u8>) {
        if byte == 0x1b {
            self.state = FilterState::Escape;
        } else {
            out.push(byte);
        }
    }

    fn escape(&mut self, byte: u8) {
        match byte {
            b'[' => self.state = FilterState::Csi,
            b']' => {
                self.state = FilterState::Osc;
                self.osc_escape = false;
            }
            b'P' => {
                self.state = FilterState::Dcs;
                self.dcs_escape = false;
            }
            // Anything else completes a two-byte escape (ESC 7, ESC M, ...)
            _ => self.state = FilterState::Text,
        }
    }

    fn csi(&mut self, byte: u8) {
        // Parameters and intermediates are swallowed up to the final byte
        if (0x40..=0x7e).contains(&byte) {
            self.state = FilterState::Text;
        }
    }

    fn osc(&mut self, byte: u8) {
        if self.osc_escape {
            // ESC seen last byte; only a backslash makes it an ST
            if byte == b'\\' {
                self.state = FilterState::Text;
            }
            self.osc_escape = false;
        } else if byte == 0x07 {
            self.state = FilterState::Text;
        } else if byte == 0x1b {
            self.osc_escape = true;
        }
    }

    fn dcs(&mut self, byte: u8) {
        // Like OSC, but BEL does not terminate a DCS
        if self.dcs_escape {
            if byte == b'\\' {
                self.state = FilterState::Text;
            }
            self.dcs_escape = false;
        } else if byte == 0x1b {
            self.dcs_escape = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passes_through() {
        let mut filter = EscapeFilter::new();
        assert_eq!(filter.feed(b"hello world\r\n"), b"hello world\r\n");
    }

    #[test]
    fn test_control_bytes_other_than_esc_pass_through() {
        let mut filter = EscapeFilter::new();
        assert_eq!(filter.feed(b"a\x07b\tc\x08"), b"a\x07b\tc\x08");
    }

    #[test]
    fn test_csi_color_stripped() {
        let mut filter = EscapeFilter::new();
        assert_eq!(filter.feed(b"\x1b[31mHELLO\x1b[0m"), b"HELLO");
    }

    #[test]
    fn test_cursor_movement_stripped() {
        let mut filter = EscapeFilter::new();
        assert_eq!(filter.feed(b"\x1b[5;10Hat"), b"at");
    }

    #[test]
    fn test_osc_bel_terminated() {
        let mut filter = EscapeFilter::new();
        assert_eq!(filter.feed(b"\x1b]0;title\x07world"), b"world");
    }

    #[test]
    fn test_osc_st_terminated() {
        let mut filter = EscapeFilter::new();
        assert_eq!(filter.feed(b"\x1b]0;title\x1b\\world"), b"world");
    }

    #[test]
    fn test_dcs_st_terminated() {
        let mut filter = EscapeFilter::new();
        assert_eq!(filter.feed(b"\x1bPq#0;payload\x1b\\ok"), b"ok");
    }

    #[test]
    fn test_dcs_ignores_bel() {
        let mut filter = EscapeFilter::new();
        assert_eq!(filter.feed(b"\x1bPdata\x07more\x1b\\x"), b"x");
    }

    #[test]
    fn test_two_byte_escape_dropped() {
        // ESC and the byte after it are dropped; the charset byte that
        // follows ESC ( is ordinary text to this filter
        let mut filter = EscapeFilter::new();
        assert_eq!(filter.feed(b"a\x1b(Bz"), b"aBz");
        assert_eq!(filter.feed(b"\x1b7save\x1b8"), b"save");
    }

    #[test]
    fn test_split_csi_across_feeds() {
        let mut filter = EscapeFilter::new();
        assert_eq!(filter.feed(b"\x1b"), b"");
        assert_eq!(filter.feed(b"["), b"");
        assert_eq!(filter.feed(b"31m"), b"");
    }

    #[test]
    fn test_split_osc_terminator_across_feeds() {
        let mut filter = EscapeFilter::new();
        assert_eq!(filter.feed(b"\x1b]2;t"), b"");
        assert_eq!(filter.feed(b"itle\x1b"), b"");
        assert_eq!(filter.feed(b"\\done"), b"done");
    }

    #[test]
    fn test_esc_inside_osc_does_not_terminate() {
        let mut filter = EscapeFilter::new();
        // ESC followed by anything but backslash stays inside the OSC
        assert_eq!(filter.feed(b"\x1b]0;a\x1bb\x07out"), b"out");
    }

    #[test]
    fn test_unterminated_osc_swallows_rest() {
        let mut filter = EscapeFilter::new();
        assert_eq!(filter.feed(b"before\x1b]0;never ends"), b"before");
        assert_eq!(filter.feed(b"still swallowed"), b"");
    }

    #[test]
    fn test_chunk_invariance() {
        let stream: &[u8] =
            b"plain\x1b[1;32mgreen\x1b[0m\x1b]0;title\x07mid\x1bPdcs\x1b\\tail\x1b(B!";
        let expected = EscapeFilter::new().feed(stream);

        for split in 0..=stream.len() {
            let mut filter = EscapeFilter::new();
            let mut out = filter.feed(&stream[..split]);
            out.extend(filter.feed(&stream[split..]));
            assert_eq!(out, expected, "split at {}", split);
        }
    }

    #[test]
    fn test_byte_at_a_time_matches_whole() {
        let stream: &[u8] = b"\x1b[31mred\x1b[0m \x1b]2;w\x07plain";
        let expected = EscapeFilter::new().feed(stream);

        let mut filter = EscapeFilter::new();
        let mut out = Vec::new();
        for byte in stream {
            out.extend(filter.feed(std::slice::from_ref(byte)));
        }
        assert_eq!(out, expected);
    }
}
