//! VT escape-sequence recognition.
//!
//! Consumes decoded UTF-8 sequences and yields at most one semantic event
//! per input: a printable character, a C0 control, a lone escape, or a
//! framed CSI / OSC / DCS / character-set sequence. The machine itself never
//! fails; unrecognized input flows through to the consumer, which is free to
//! ignore it.
//!
//! States: NORMAL, ESCAPE, CSI, DCS, OSC, IGNORE, INNER, SPECIAL. String
//! states (DCS/OSC/IGNORE) accumulate until a terminator; `ESC` inside them
//! enters INNER, where `\` (completing the ST pair) finishes the string with
//! its outer meaning and anything else falls back to the outer state with
//! the `ESC` re-inserted into the accumulator. `BEL` terminates OSC
//! directly. CAN and SUB abort whatever sequence is in progress.

use core_codec::Seq;
use tracing::trace;

const ESC: u8 = 0x1B;
const BEL: u8 = 0x07;
const CAN: u8 = 0x18;
const SUB: u8 = 0x1A;

/// One semantic event from the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VtEvent {
    /// A printable character sequence.
    Normal(Seq),
    /// A C0 control byte.
    Control(u8),
    /// `ESC x` for a final byte that introduces no longer sequence.
    Escape(u8),
    /// `ESC [ ... final`, parameters parsed.
    Csi {
        private: bool,
        params: Vec<i32>,
        finish: u8,
    },
    /// `ESC P ... ST`, raw payload.
    Dcs(Vec<u8>),
    /// `ESC ] ... (BEL|ST)`, payload split on `;`.
    Osc(Vec<String>),
    /// `ESC # x`, `ESC ( x`, `ESC ) x`: screen alignment and character-set
    /// designation.
    Special { intro: u8, code: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Normal,
    Escape,
    Csi,
    Dcs,
    Osc,
    Ignore,
    Inner,
    Special,
}

#[derive(Debug, Default)]
pub struct VtMachine {
    state: State,
    outer: State,
    accum: Vec<u8>,
    intro: u8,
}

impl VtMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort any sequence in progress and return to NORMAL.
    pub fn reset(&mut self) {
        self.state = State::Normal;
        self.outer = State::Normal;
        self.accum.clear();
        self.intro = 0;
    }

    /// Whether the machine is mid-sequence.
    pub fn busy(&self) -> bool {
        self.state != State::Normal
    }

    /// Advance with one complete UTF-8 sequence.
    pub fn advance(&mut self, seq: Seq) -> Option<VtEvent> {
        let lead = seq.lead();

        // CAN and SUB abort an escape sequence from any state.
        if self.state != State::Normal && (lead == CAN || lead == SUB) {
            trace!(target: "vt", lead, "sequence_aborted");
            self.reset();
            return None;
        }

        match self.state {
            State::Normal => {
                if lead == ESC {
                    self.state = State::Escape;
                    debug_assert!(self.accum.is_empty());
                    None
                } else if lead < 0x20 {
                    Some(VtEvent::Control(lead))
                } else {
                    Some(VtEvent::Normal(seq))
                }
            }
            State::Escape => match lead {
                b'P' => {
                    self.state = State::Dcs;
                    None
                }
                b'[' => {
                    self.state = State::Csi;
                    None
                }
                b']' => {
                    self.state = State::Osc;
                    None
                }
                b'#' | b'(' | b')' => {
                    self.state = State::Special;
                    self.intro = lead;
                    None
                }
                b'^' | b'_' => {
                    // PM and APC strings are accumulated and dropped.
                    self.state = State::Ignore;
                    None
                }
                _ => {
                    self.state = State::Normal;
                    Some(VtEvent::Escape(lead))
                }
            },
            State::Csi => {
                if lead.is_ascii_alphabetic() || lead == b'@' || lead == b'`' {
                    let event = self.finish_csi(lead);
                    self.accum.clear();
                    self.state = State::Normal;
                    Some(event)
                } else {
                    self.accum.extend_from_slice(seq.as_bytes());
                    None
                }
            }
            State::Dcs | State::Osc | State::Ignore => {
                if lead == ESC {
                    self.outer = self.state;
                    self.state = State::Inner;
                    None
                } else if lead == BEL && self.state == State::Osc {
                    let event = self.finish_osc();
                    self.accum.clear();
                    self.state = State::Normal;
                    Some(event)
                } else {
                    self.accum.extend_from_slice(seq.as_bytes());
                    None
                }
            }
            State::Inner => {
                if lead == b'\\' {
                    // ESC \ is ST: complete the string with its outer meaning.
                    let event = match self.outer {
                        State::Dcs => Some(VtEvent::Dcs(self.accum.clone())),
                        State::Osc => Some(self.finish_osc()),
                        _ => None,
                    };
                    self.accum.clear();
                    self.state = State::Normal;
                    event
                } else if lead == ESC {
                    None
                } else {
                    // Not a terminator after all: the ESC belongs to the
                    // string payload.
                    self.state = self.outer;
                    self.accum.push(ESC);
                    self.accum.extend_from_slice(seq.as_bytes());
                    None
                }
            }
            State::Special => {
                let event = if lead.is_ascii_alphanumeric() {
                    Some(VtEvent::Special {
                        intro: self.intro,
                        code: lead,
                    })
                } else {
                    trace!(target: "vt", intro = self.intro, lead, "special_ignored");
                    None
                };
                self.accum.clear();
                self.state = State::Normal;
                event
            }
        }
    }

    fn finish_csi(&self, finish: u8) -> VtEvent {
        let (private, body) = match self.accum.first() {
            Some(b'?') => (true, &self.accum[1..]),
            _ => (false, &self.accum[..]),
        };
        VtEvent::Csi {
            private,
            params: parse_params(body),
            finish,
        }
    }

    fn finish_osc(&self) -> VtEvent {
        let strings = if self.accum.is_empty() {
            Vec::new()
        } else {
            self.accum
                .split(|&b| b == b';')
                .map(|part| String::from_utf8_lossy(part).into_owned())
                .collect()
        };
        VtEvent::Osc(strings)
    }
}

/// Split a CSI parameter body on `;`, treating empty parameters as zero and
/// skipping non-digit noise.
fn parse_params(body: &[u8]) -> Vec<i32> {
    if body.is_empty() {
        return Vec::new();
    }
    body.split(|&b| b == b';')
        .map(|part| {
            part.iter()
                .filter(|b| b.is_ascii_digit())
                .fold(0i32, |acc, &b| {
                    acc.saturating_mul(10).saturating_add((b - b'0') as i32)
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(machine: &mut VtMachine, bytes: &[u8]) -> Vec<VtEvent> {
        let mut events = Vec::new();
        for &b in bytes {
            // Tests drive with single-byte sequences; multi-byte input goes
            // through the UTF-8 machine in production.
            if let Some(event) = machine.advance(Seq::ascii(b)) {
                events.push(event);
            }
        }
        events
    }

    #[test]
    fn printable_and_control_pass_through() {
        let mut machine = VtMachine::new();
        let events = feed(&mut machine, b"a\n");
        assert_eq!(
            events,
            vec![VtEvent::Normal(Seq::ascii(b'a')), VtEvent::Control(b'\n')]
        );
    }

    #[test]
    fn lone_escape_emits() {
        let mut machine = VtMachine::new();
        let events = feed(&mut machine, b"\x1b7");
        assert_eq!(events, vec![VtEvent::Escape(b'7')]);
        assert!(!machine.busy());
    }

    #[test]
    fn csi_with_params() {
        let mut machine = VtMachine::new();
        let events = feed(&mut machine, b"\x1b[2;10H");
        assert_eq!(
            events,
            vec![VtEvent::Csi {
                private: false,
                params: vec![2, 10],
                finish: b'H',
            }]
        );
    }

    #[test]
    fn csi_private_and_empty_params() {
        let mut machine = VtMachine::new();
        let events = feed(&mut machine, b"\x1b[?25l");
        assert_eq!(
            events,
            vec![VtEvent::Csi {
                private: true,
                params: vec![25],
                finish: b'l',
            }]
        );

        let events = feed(&mut machine, b"\x1b[;5m");
        assert_eq!(
            events,
            vec![VtEvent::Csi {
                private: false,
                params: vec![0, 5],
                finish: b'm',
            }]
        );
    }

    #[test]
    fn osc_terminates_on_bel_and_st() {
        let mut machine = VtMachine::new();
        let events = feed(&mut machine, b"\x1b]0;my title\x07");
        assert_eq!(
            events,
            vec![VtEvent::Osc(vec!["0".into(), "my title".into()])]
        );

        let events = feed(&mut machine, b"\x1b]2;other\x1b\\");
        assert_eq!(events, vec![VtEvent::Osc(vec!["2".into(), "other".into()])]);
    }

    #[test]
    fn inner_escape_falls_back_to_the_string() {
        // An ESC inside an OSC that is not part of ST stays in the payload.
        let mut machine = VtMachine::new();
        let events = feed(&mut machine, b"\x1b]0;a\x1bb\x07");
        assert_eq!(
            events,
            vec![VtEvent::Osc(vec!["0".into(), "a\u{1b}b".into()])]
        );
    }

    #[test]
    fn dcs_payload_is_raw() {
        let mut machine = VtMachine::new();
        let events = feed(&mut machine, b"\x1bPq#0\x1b\\");
        assert_eq!(events, vec![VtEvent::Dcs(b"q#0".to_vec())]);
    }

    #[test]
    fn pm_and_apc_are_ignored() {
        let mut machine = VtMachine::new();
        let events = feed(&mut machine, b"\x1b^secret\x1b\\a");
        assert_eq!(events, vec![VtEvent::Normal(Seq::ascii(b'a'))]);
    }

    #[test]
    fn charset_designation_is_special() {
        let mut machine = VtMachine::new();
        let events = feed(&mut machine, b"\x1b(0");
        assert_eq!(
            events,
            vec![VtEvent::Special {
                intro: b'(',
                code: b'0',
            }]
        );
    }

    #[test]
    fn can_aborts_a_sequence() {
        let mut machine = VtMachine::new();
        let events = feed(&mut machine, b"\x1b[2;\x18Hi");
        // The CSI died at CAN; H and i print normally.
        assert_eq!(
            events,
            vec![
                VtEvent::Normal(Seq::ascii(b'H')),
                VtEvent::Normal(Seq::ascii(b'i')),
            ]
        );
    }

    #[test]
    fn reset_from_any_state() {
        let mut machine = VtMachine::new();
        feed(&mut machine, b"\x1b]0;half");
        assert!(machine.busy());
        machine.reset();
        assert!(!machine.busy());
        let events = feed(&mut machine, b"x");
        assert_eq!(events, vec![VtEvent::Normal(Seq::ascii(b'x'))]);
    }
}
