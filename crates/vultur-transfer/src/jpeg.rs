/// Payload decoding for completed transfers.
///
/// `JpegDecoder` does a structural check, not a full decode: it walks the
/// marker segments from SOI to the first SOS, takes the frame size from the
/// SOF header and requires the entropy-coded data to end in EOI. A payload
/// truncated or corrupted by a bad reassembly fails one of those checks.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u16,
    pub height: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("missing SOI marker")]
    NoStartOfImage,
    #[error("truncated at offset {0}")]
    Truncated(usize),
    #[error("bad marker 0x{marker:02X} at offset {offset}")]
    BadMarker { marker: u8, offset: usize },
    #[error("scan before frame header")]
    NoFrame,
    #[error("missing EOI marker")]
    NoEndOfImage,
    #[error("zero image dimension")]
    ZeroDimension,
}

/// Turns an assembled payload into an image, or says why it is not one.
pub trait PayloadDecoder: Send {
    fn decode(&self, payload: &[u8]) -> Result<DecodedImage, DecodeError>;
}

pub struct JpegDecoder;

/// Accepts anything; dimensions are reported as zero.
pub struct PassthroughDecoder;

impl PayloadDecoder for PassthroughDecoder {
    fn decode(&self, _payload: &[u8]) -> Result<DecodedImage, DecodeError> {
        Ok(DecodedImage { width: 0, height: 0 })
    }
}

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const TEM: u8 = 0x01;

/// Start-of-frame markers carrying image dimensions. C4 (DHT), C8 (JPG)
/// and CC (DAC) share the range but are not frame headers.
fn is_sof(marker: u8) -> bool {
    matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC)
}

/// Standalone markers without a length field.
fn is_standalone(marker: u8) -> bool {
    marker == TEM || (0xD0..=0xD7).contains(&marker)
}

impl PayloadDecoder for JpegDecoder {
    fn decode(&self, payload: &[u8]) -> Result<DecodedImage, DecodeError> {
        if payload.len() < 2 || payload[0] != 0xFF || payload[1] != SOI {
            return Err(DecodeError::NoStartOfImage);
        }

        let mut pos = 2;
        let mut frame: Option<DecodedImage> = None;

        loop {
            if pos >= payload.len() {
                return Err(DecodeError::Truncated(pos));
            }
            if payload[pos] != 0xFF {
                return Err(DecodeError::BadMarker {
                    marker: payload[pos],
                    offset: pos,
                });
            }
            // Fill bytes before a marker.
            while pos < payload.len() && payload[pos] == 0xFF {
                pos += 1;
            }
            let Some(&marker) = payload.get(pos) else {
                return Err(DecodeError::Truncated(pos));
            };
            pos += 1;

            if is_standalone(marker) {
                continue;
            }
            if marker == EOI || marker == 0x00 {
                return Err(DecodeError::BadMarker {
                    marker,
                    offset: pos - 1,
                });
            }

            let len = read_u16(payload, pos)? as usize;
            if len < 2 {
                return Err(DecodeError::BadMarker {
                    marker,
                    offset: pos - 1,
                });
            }
            let segment_end = pos + len;
            if segment_end > payload.len() {
                return Err(DecodeError::Truncated(payload.len()));
            }

            if is_sof(marker) {
                // length, precision, height, width
                let height = read_u16(payload, pos + 3)?;
                let width = read_u16(payload, pos + 5)?;
                if width == 0 || height == 0 {
                    return Err(DecodeError::ZeroDimension);
                }
                frame = Some(DecodedImage { width, height });
            }

            pos = segment_end;

            if marker == SOS {
                let image = frame.ok_or(DecodeError::NoFrame)?;
                return if ends_with_eoi(&payload[pos..]) {
                    Ok(image)
                } else {
                    Err(DecodeError::NoEndOfImage)
                };
            }
        }
    }
}

fn read_u16(buf: &[u8], at: usize) -> Result<u16, DecodeError> {
    match buf.get(at..at + 2) {
        Some(b) => Ok(u16::from_be_bytes([b[0], b[1]])),
        None => Err(DecodeError::Truncated(buf.len())),
    }
}

/// Trailing zero bytes are tolerated after EOI; some encoders pad.
fn ends_with_eoi(scan: &[u8]) -> bool {
    let end = scan.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    end >= 2 && scan[end - 2] == 0xFF && scan[end - 1] == EOI
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal structurally valid baseline JPEG of `width` x `height` with
    /// `scan_len` bytes of fake entropy-coded data.
    pub(crate) fn synthetic_jpeg(width: u16, height: u16, scan_len: usize) -> Vec<u8> {
        let mut out = vec![0xFF, SOI];
        // APP0 JFIF
        out.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
        out.extend_from_slice(b"JFIF\0");
        out.extend_from_slice(&[1, 1, 0, 0, 1, 0, 1, 0, 0]);
        // SOF0, one component
        out.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x0B, 0x08]);
        out.extend_from_slice(&height.to_be_bytes());
        out.extend_from_slice(&width.to_be_bytes());
        out.extend_from_slice(&[0x01, 0x01, 0x11, 0x00]);
        // SOS
        out.extend_from_slice(&[0xFF, SOS, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00]);
        out.extend((0..scan_len).map(|i| (i % 200) as u8 + 1));
        out.extend_from_slice(&[0xFF, EOI]);
        out
    }

    #[test]
    fn reads_dimensions() {
        let jpeg = synthetic_jpeg(640, 360, 500);
        assert_eq!(
            JpegDecoder.decode(&jpeg),
            Ok(DecodedImage { width: 640, height: 360 })
        );
    }

    #[test]
    fn tolerates_trailing_padding() {
        let mut jpeg = synthetic_jpeg(32, 16, 10);
        jpeg.extend_from_slice(&[0, 0, 0]);
        assert!(JpegDecoder.decode(&jpeg).is_ok());
    }

    #[test]
    fn rejects_damage() {
        let jpeg = synthetic_jpeg(640, 360, 500);
        assert_eq!(JpegDecoder.decode(b"not a jpeg"), Err(DecodeError::NoStartOfImage));
        assert_eq!(
            JpegDecoder.decode(&jpeg[..jpeg.len() - 100]),
            Err(DecodeError::NoEndOfImage)
        );
        assert!(matches!(JpegDecoder.decode(&jpeg[..30]), Err(DecodeError::Truncated(_))));

        let mut zero = synthetic_jpeg(0, 360, 10);
        assert_eq!(JpegDecoder.decode(&zero), Err(DecodeError::ZeroDimension));
        zero[2] = 0x12;
        assert!(matches!(JpegDecoder.decode(&zero), Err(DecodeError::BadMarker { .. })));
    }

    #[test]
    fn passthrough_accepts_anything() {
        assert!(PassthroughDecoder.decode(&[1, 2, 3]).is_ok());
    }
}
