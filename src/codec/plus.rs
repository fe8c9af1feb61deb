//! Stream Deck + specific reports: dials, touch strip and LCD framing.

use serde::Serialize;

use super::{ReportLayout, u16_le};

/// Number of rotary dials on a Stream Deck +.
pub const DIAL_COUNT: usize = 4;

/// Touch strip geometry in pixels.
pub const LCD_WIDTH: u16 = 800;
pub const LCD_HEIGHT: u16 = 100;

/// Width of one touch strip segment (one per dial).
pub const LCD_SEGMENT_WIDTH: u16 = 200;

/// Command byte for "write LCD region".
pub const LCD_COMMAND: u8 = 0x0C;

const DIAL_PREFIX: [u8; 3] = [0x01, 0x03, 0x05];
const TOUCH_PREFIX: [u8; 3] = [0x01, 0x02, 0x0E];

/// Kind of an incoming Stream Deck + report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlusReport {
    Keys,
    Dials,
    Touch,
}

impl PlusReport {
    /// Classify a report by its leading bytes.
    pub fn classify(report: &[u8]) -> Self {
        if report.starts_with(&DIAL_PREFIX) {
            Self::Dials
        } else if report.starts_with(&TOUCH_PREFIX) {
            Self::Touch
        } else {
            Self::Keys
        }
    }
}

/// A dial rotation step or press transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DialEvent {
    /// 1-based dial number.
    pub dial: usize,
    pub is_turning: bool,
    pub is_pressed: bool,
    /// +1 clockwise, -1 counter-clockwise, 0 for press/release.
    pub direction: i8,
    /// Raw signed step count reported for a turn.
    pub delta: i8,
}

/// Tracks per-dial press state across reports so releases can be detected.
#[derive(Debug, Default)]
pub struct DialTracker {
    pressed: [bool; DIAL_COUNT],
}

impl DialTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a dial report into events, updating press state.
    ///
    /// Byte 4 selects turning (`1`) or press mode; bytes 5..9 carry one value
    /// per dial. A zero value in press mode is a release only if that dial was
    /// previously pressed.
    pub fn decode(&mut self, report: &[u8]) -> Vec<DialEvent> {
        if report.len() < 5 + DIAL_COUNT || PlusReport::classify(report) != PlusReport::Dials {
            return Vec::new();
        }

        let is_turning = report[4] == 0x01;
        let mut events = Vec::new();

        for (i, &value) in report[5..5 + DIAL_COUNT].iter().enumerate() {
            if is_turning {
                #[allow(clippy::cast_possible_wrap)]
                let delta = value as i8;
                if delta != 0 {
                    events.push(DialEvent {
                        dial: i + 1,
                        is_turning: true,
                        is_pressed: false,
                        direction: delta.signum(),
                        delta,
                    });
                }
            } else if value == 0x01 {
                self.pressed[i] = true;
                events.push(DialEvent {
                    dial: i + 1,
                    is_turning: false,
                    is_pressed: true,
                    direction: 0,
                    delta: 0,
                });
            } else if value == 0x00 && self.pressed[i] {
                self.pressed[i] = false;
                events.push(DialEvent {
                    dial: i + 1,
                    is_turning: false,
                    is_pressed: false,
                    direction: 0,
                    delta: 0,
                });
            }
        }

        events
    }
}

/// A touch strip contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchEvent {
    pub x: u16,
    pub y: u8,
    pub is_pressed: bool,
}

impl TouchEvent {
    /// 1-based touch strip segment under the contact.
    pub fn segment(self) -> usize {
        usize::from(self.x.min(LCD_WIDTH - 1) / LCD_SEGMENT_WIDTH) + 1
    }
}

/// Decode a touch report.
pub fn decode_touch(report: &[u8]) -> Option<TouchEvent> {
    if report.len() < 8 || PlusReport::classify(report) != PlusReport::Touch {
        return None;
    }

    Some(TouchEvent {
        x: u16::from_le_bytes([report[5], report[6]]),
        y: report[7],
        is_pressed: report[4] == 0x02,
    })
}

/// Target rectangle on the LCD strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LcdRegion {
    pub x: u16,
    pub width: u16,
    pub height: u16,
}

impl LcdRegion {
    /// The whole strip.
    pub const FULL: Self = Self {
        x: 0,
        width: LCD_WIDTH,
        height: LCD_HEIGHT,
    };

    /// One of the four dial segments (1-based).
    pub fn segment(index: usize) -> Option<Self> {
        if !(1..=DIAL_COUNT).contains(&index) {
            return None;
        }
        let offset = u16::try_from(index - 1).ok()? * LCD_SEGMENT_WIDTH;
        Some(Self {
            x: offset,
            width: LCD_SEGMENT_WIDTH,
            height: LCD_HEIGHT,
        })
    }
}

/// Split an encoded image into LCD write frames.
///
/// Header layout:
/// `[0x02, 0x0C, x lo, x hi, 0, 0, w lo, w hi, h lo, h hi, final, page, 0, len lo, len hi, 0]`.
pub fn encode_lcd_image(pixels: &[u8], region: LcdRegion) -> Vec<Vec<u8>> {
    let layout = ReportLayout::LCD_IMAGE;
    let payload_len = layout.payload_len();
    let [x_lo, x_hi] = region.x.to_le_bytes();
    let [w_lo, w_hi] = region.width.to_le_bytes();
    let [h_lo, h_hi] = region.height.to_le_bytes();

    let mut frames = Vec::with_capacity(pixels.len().div_ceil(payload_len));
    let mut remaining = pixels.len();

    for (page, chunk) in pixels.chunks(payload_len).enumerate() {
        let is_final = u8::from(chunk.len() == remaining);
        let [len_lo, len_hi] = u16_le(chunk.len());
        let [page_lo, _] = u16_le(page);

        let mut frame = Vec::with_capacity(layout.report_len);
        frame.extend_from_slice(&[
            super::IMAGE_REPORT_ID,
            LCD_COMMAND,
            x_lo,
            x_hi,
            0,
            0,
            w_lo,
            w_hi,
            h_lo,
            h_hi,
            is_final,
            page_lo,
            0,
            len_lo,
            len_hi,
            0,
        ]);
        frame.extend_from_slice(chunk);
        frame.resize(layout.report_len, 0);

        frames.push(frame);
        remaining -= chunk.len();
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dial_report(mode: u8, values: [u8; 4]) -> Vec<u8> {
        let mut report = vec![0x01, 0x03, 0x05, 0x00, mode];
        report.extend_from_slice(&values);
        report.resize(64, 0);
        report
    }

    #[test]
    fn test_classify() {
        assert_eq!(PlusReport::classify(&[0x01, 0x03, 0x05, 0]), PlusReport::Dials);
        assert_eq!(PlusReport::classify(&[0x01, 0x02, 0x0E, 0]), PlusReport::Touch);
        assert_eq!(PlusReport::classify(&[0x01, 0x00, 0x08, 0]), PlusReport::Keys);
    }

    #[test]
    fn test_dial_turns() {
        let mut tracker = DialTracker::new();
        let events = tracker.decode(&dial_report(0x01, [0x01, 0x00, 0xFF, 0x00]));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].dial, 1);
        assert_eq!(events[0].direction, 1);
        assert_eq!(events[1].dial, 3);
        assert_eq!(events[1].direction, -1);
        assert!(events.iter().all(|e| e.is_turning));
    }

    #[test]
    fn test_dial_press_then_release() {
        let mut tracker = DialTracker::new();

        let pressed = tracker.decode(&dial_report(0x00, [0x00, 0x01, 0x00, 0x00]));
        assert_eq!(pressed.len(), 1);
        assert_eq!(pressed[0].dial, 2);
        assert!(pressed[0].is_pressed);

        let released = tracker.decode(&dial_report(0x00, [0x00, 0x00, 0x00, 0x00]));
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].dial, 2);
        assert!(!released[0].is_pressed);

        assert!(tracker.decode(&dial_report(0x00, [0; 4])).is_empty());
    }

    #[test]
    fn test_dial_ignores_other_reports() {
        let mut tracker = DialTracker::new();
        assert!(tracker.decode(&[0x01, 0x00, 0x08, 0x00, 0x01, 0x01]).is_empty());
    }

    #[test]
    fn test_decode_touch() {
        let report = [0x01, 0x02, 0x0E, 0x00, 0x02, 0x2C, 0x01, 0x32];
        let touch = decode_touch(&report).unwrap();
        assert_eq!(touch.x, 300);
        assert_eq!(touch.y, 50);
        assert!(touch.is_pressed);
        assert_eq!(touch.segment(), 2);
    }

    #[test]
    fn test_touch_segment_clamps() {
        let touch = TouchEvent {
            x: 900,
            y: 0,
            is_pressed: true,
        };
        assert_eq!(touch.segment(), 4);
    }

    #[test]
    fn test_lcd_region_segments() {
        assert_eq!(LcdRegion::segment(1).unwrap().x, 0);
        assert_eq!(LcdRegion::segment(4).unwrap().x, 600);
        assert!(LcdRegion::segment(0).is_none());
        assert!(LcdRegion::segment(5).is_none());
    }

    #[test]
    fn test_lcd_frames() {
        let pixels = vec![3u8; 2500];
        let frames = encode_lcd_image(&pixels, LcdRegion::FULL);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() == 1024));

        assert_eq!(
            &frames[0][..16],
            &[0x02, 0x0C, 0, 0, 0, 0, 0x20, 0x03, 0x64, 0x00, 0, 0, 0, 0xF0, 0x03, 0]
        );
        assert_eq!(frames[2][10], 1);
        assert_eq!(frames[2][11], 2);
        assert_eq!(
            usize::from(u16::from_le_bytes([frames[2][13], frames[2][14]])),
            2500 - 2 * 1008
        );
    }
}
