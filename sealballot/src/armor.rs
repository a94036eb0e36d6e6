use crate::*;

const LINE_WIDTH: usize = 64;

/// The kinds of blobs that travel as ASCII armor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmorLabel {
    Message,
    PublicKey,
    PrivateKey,
}

impl ArmorLabel {
    fn as_str(&self) -> &'static str {
        match self {
            ArmorLabel::Message => "SEALBALLOT MESSAGE",
            ArmorLabel::PublicKey => "SEALBALLOT PUBLIC KEY",
            ArmorLabel::PrivateKey => "SEALBALLOT PRIVATE KEY",
        }
    }
}

/// Wrap bytes in `-----BEGIN <label>-----` / `-----END <label>-----` lines
/// with a base64 body broken at 64 columns.
pub fn armor(label: ArmorLabel, bytes: &[u8]) -> String {
    let body = base64::encode(bytes);

    let mut out = String::with_capacity(body.len() + body.len() / LINE_WIDTH + 80);
    out.push_str("-----BEGIN ");
    out.push_str(label.as_str());
    out.push_str("-----\n");
    for chunk in body.as_bytes().chunks(LINE_WIDTH) {
        // base64 output is ASCII so every chunk boundary is a char boundary
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out.push_str("-----END ");
    out.push_str(label.as_str());
    out.push_str("-----\n");
    out
}

/// Strip armor and decode the body.
///
/// Leading and trailing whitespace around the block is tolerated; anything
/// else (wrong label, missing footer, bad base64) is `Malformed`.
pub fn dearmor(label: ArmorLabel, text: &str) -> Result<Vec<u8>> {
    let header = format!("-----BEGIN {}-----", label.as_str());
    let footer = format!("-----END {}-----", label.as_str());

    let mut lines = text.trim().lines().map(str::trim);
    if lines.next() != Some(header.as_str()) {
        return Err(DecryptionFailure::Malformed.into());
    }

    let mut body = String::with_capacity(text.len());
    let mut closed = false;
    for line in lines {
        if line == footer {
            closed = true;
            break;
        }
        body.push_str(line);
    }
    if !closed || body.is_empty() {
        return Err(DecryptionFailure::Malformed.into());
    }

    base64::decode(&body).map_err(|_| DecryptionFailure::Malformed.into())
}
