/// Status lines the image protocol understands.
///
/// The status channel is shared with capture and GPS telemetry, so parsing
/// is strict about the lines it recognises and classifies everything else
/// as `Other` without complaint. Matching is case-insensitive.

use vultur_link::{MAX_STATUS_LEN, Severity, StatusText};

#[derive(Debug, Clone, PartialEq)]
pub enum StatusLine {
    /// "photo <tag> ok": the receiver decoded the transfer for `tag`.
    PhotoOk { tag: String },
    /// "retry: <n1> <n2> ...": resend these chunks.
    Retry(Vec<u16>),
    /// "gps ok | <lat>,<lon>,<alt>": position telemetry.
    Gps(GpsFix),
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl StatusLine {
    pub fn parse(text: &str) -> Self {
        let low = text.trim().to_ascii_lowercase();

        if let Some(rest) = low.strip_prefix("retry:") {
            return StatusLine::Retry(parse_sequences(rest));
        }

        if let Some(tag) = low
            .strip_prefix("photo ")
            .and_then(|r| r.strip_suffix(" ok"))
            .map(str::trim)
        {
            if !tag.is_empty() && !tag.contains(char::is_whitespace) {
                return StatusLine::PhotoOk {
                    tag: tag.to_string(),
                };
            }
        }

        if low.starts_with("gps ok") {
            if let Some(fix) = parse_gps(&low) {
                return StatusLine::Gps(fix);
            }
        }

        StatusLine::Other
    }

    /// True if this line acknowledges the transfer tagged `tag`.
    pub fn acknowledges(&self, tag: &str) -> bool {
        matches!(self, StatusLine::PhotoOk { tag: t } if t.eq_ignore_ascii_case(tag))
    }
}

/// Every run of digits in `rest`, as sequence numbers. Numbers that do not
/// fit a sequence number are skipped.
fn parse_sequences(rest: &str) -> Vec<u16> {
    rest.split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<u16>().ok())
        .collect()
}

fn parse_gps(low: &str) -> Option<GpsFix> {
    let (_, coords) = low.split_once('|')?;
    let mut parts = coords.split(',').map(|p| p.trim().parse::<f64>());
    let lat = parts.next()?.ok()?;
    let lon = parts.next()?.ok()?;
    let alt = parts.next()?.ok()?;
    if parts.next().is_some() || !lat.is_finite() || !lon.is_finite() || !alt.is_finite() {
        return None;
    }
    Some(GpsFix { lat, lon, alt })
}

/// Acknowledgment the receiver sends after decoding `tag`.
pub fn photo_ok(tag: &str, max_len: usize) -> StatusText {
    StatusText::new(Severity::Info, &format!("Photo {} ok", tag), max_len)
}

/// Final line the sender emits once its transfer is acknowledged.
pub fn photo_sent(tag: &str, max_len: usize) -> StatusText {
    StatusText::new(Severity::Info, &format!("Photo {} sent", tag), max_len)
}

/// "retry:" lines naming `missing`, split so each fits `max_len` bytes.
pub fn retry_lines(missing: &[u16], max_len: usize) -> Vec<StatusText> {
    const PREFIX: &str = "retry:";
    let max_len = max_len.min(MAX_STATUS_LEN);
    let mut lines = Vec::new();
    let mut current = String::from(PREFIX);

    for seq in missing {
        let item = format!(" {}", seq);
        if current.len() + item.len() > max_len && current.len() > PREFIX.len() {
            lines.push(StatusText::new(Severity::Info, &current, max_len));
            current = String::from(PREFIX);
        }
        current.push_str(&item);
    }
    if current.len() > PREFIX.len() {
        lines.push(StatusText::new(Severity::Info, &current, max_len));
    }
    lines
}
