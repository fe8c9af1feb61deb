//! Binary framing for the Stream Deck raw HID report channel.
//!
//! Two directions are covered here:
//!
//! - input reports → pressed slot indices ([`decode_presses`])
//! - rendered key images → ordered output report frames ([`encode_image`])
//!
//! Slot indices are 1-based everywhere outside this module; the image header
//! carries them zero-based. Stream Deck + dial/touch reports and LCD strip
//! framing live in [`plus`].

pub mod plus;

use crate::error::{Result, SdError};

/// Length of the header preceding key state bytes in an input report.
pub const INPUT_HEADER_LEN: usize = 4;

/// Size of the buffer used for a single input report read.
pub const INPUT_REPORT_LEN: usize = 512;

/// Output report id used for image uploads.
pub const IMAGE_REPORT_ID: u8 = 0x02;

/// Command byte for "set key image".
pub const IMAGE_COMMAND: u8 = 0x07;

/// Returned by [`decode_presses`] when no key bit is set (button-up / no-op).
pub const NO_PRESS: usize = 0;

/// Fixed geometry of an output report class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportLayout {
    /// Total length of every frame written to the device.
    pub report_len: usize,
    /// Bytes of header at the start of every frame.
    pub header_len: usize,
}

impl ReportLayout {
    /// Key image uploads: 1024-byte reports with an 8-byte header.
    pub const KEY_IMAGE: Self = Self {
        report_len: 1024,
        header_len: 8,
    };

    /// Stream Deck + LCD strip uploads: 1024-byte reports with a 16-byte header.
    pub const LCD_IMAGE: Self = Self {
        report_len: 1024,
        header_len: 16,
    };

    /// Bytes of image data a single frame can carry.
    pub const fn payload_len(self) -> usize {
        self.report_len - self.header_len
    }
}

/// Decode an input report into 1-based pressed slot indices.
///
/// The first [`INPUT_HEADER_LEN`] bytes are skipped. Each remaining byte is
/// tested on bits 0 and 1; a set bit `b` at byte offset `i` yields index
/// `i + b + 1`. When nothing is set the result is `[NO_PRESS]`, never empty.
pub fn decode_presses(report: &[u8]) -> Vec<usize> {
    let body = report.get(INPUT_HEADER_LEN..).unwrap_or_default();

    let pressed: Vec<usize> = body
        .iter()
        .enumerate()
        .flat_map(|(i, byte)| {
            (0..2usize)
                .filter(move |bit| byte & (1 << bit) != 0)
                .map(move |bit| i + bit + 1)
        })
        .collect();

    if pressed.is_empty() {
        vec![NO_PRESS]
    } else {
        pressed
    }
}

/// Split a rendered key image into key-image report frames for `slot` (1-based).
///
/// # Errors
///
/// Returns `SdError::InvalidSlot` when `slot` is 0 or does not fit the
/// single-byte key field.
pub fn encode_image(pixels: &[u8], slot: usize) -> Result<Vec<Vec<u8>>> {
    encode_image_with(pixels, slot, ReportLayout::KEY_IMAGE)
}

/// [`encode_image`] with an explicit report geometry.
///
/// Frame `k` carries the header
/// `[report id, command, slot - 1, final, len lo, len hi, k lo, k hi]`
/// followed by its chunk, zero padded to `layout.report_len`. Frames are
/// returned in the order they must be written. An empty image yields no
/// frames.
pub fn encode_image_with(pixels: &[u8], slot: usize, layout: ReportLayout) -> Result<Vec<Vec<u8>>> {
    let key = slot
        .checked_sub(1)
        .and_then(|zero_based| u8::try_from(zero_based).ok())
        .ok_or(SdError::InvalidSlot { slot })?;

    let payload_len = layout.payload_len();
    let mut frames = Vec::with_capacity(pixels.len().div_ceil(payload_len));
    let mut remaining = pixels.len();

    for (index, chunk) in pixels.chunks(payload_len).enumerate() {
        let chunk_len = chunk.len();
        let is_final = u8::from(chunk_len == remaining);
        let [len_lo, len_hi] = u16_le(chunk_len);
        let [page_lo, page_hi] = u16_le(index);

        let mut frame = Vec::with_capacity(layout.report_len);
        frame.extend_from_slice(&[
            IMAGE_REPORT_ID,
            IMAGE_COMMAND,
            key,
            is_final,
            len_lo,
            len_hi,
            page_lo,
            page_hi,
        ]);
        frame.resize(layout.header_len, 0);
        frame.extend_from_slice(chunk);
        frame.resize(layout.report_len, 0);

        frames.push(frame);
        remaining -= chunk_len;
    }

    Ok(frames)
}

/// Decoded header of a key-image frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFrameHeader {
    /// Zero-based key index as carried on the wire.
    pub key: u8,
    pub is_final: bool,
    pub chunk_len: usize,
    pub chunk_index: usize,
}

impl ImageFrameHeader {
    /// Read the header of a key-image frame, if it is one.
    pub fn parse(frame: &[u8]) -> Option<Self> {
        if frame.len() < ReportLayout::KEY_IMAGE.header_len
            || frame[0] != IMAGE_REPORT_ID
            || frame[1] != IMAGE_COMMAND
        {
            return None;
        }

        Some(Self {
            key: frame[2],
            is_final: frame[3] == 1,
            chunk_len: usize::from(u16::from_le_bytes([frame[4], frame[5]])),
            chunk_index: usize::from(u16::from_le_bytes([frame[6], frame[7]])),
        })
    }

    /// The 1-based slot this frame targets.
    pub fn slot(self) -> usize {
        usize::from(self.key) + 1
    }
}

/// Reassemble the image bytes carried by key-image frames in emission order.
///
/// `None` when a frame is not a key-image frame or is shorter than its
/// header claims.
pub fn reassemble(frames: &[Vec<u8>]) -> Option<Vec<u8>> {
    let header_len = ReportLayout::KEY_IMAGE.header_len;
    let mut out = Vec::new();
    for frame in frames {
        let header = ImageFrameHeader::parse(frame)?;
        out.extend_from_slice(frame.get(header_len..header_len + header.chunk_len)?);
    }
    Some(out)
}

/// Low/high bytes of a length or chunk counter.
///
/// Values wider than 16 bits are truncated the way the hardware would.
#[allow(clippy::cast_possible_truncation)]
pub(crate) const fn u16_le(value: usize) -> [u8; 2] {
    [(value & 0xFF) as u8, ((value >> 8) & 0xFF) as u8]
}
