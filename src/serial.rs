use x509_parser::prelude::X509Certificate;

/// Canonical serial form: lowercase hex octets separated by colons.
///
/// Callers may hand in hyphen-separated serials (the other common wire
/// form); both normalize to the same storage key.
pub fn normalize_serial(serial: &str) -> String {
    serial.replace('-', ":").to_ascii_lowercase()
}

/// Format big-endian serial bytes as colon-separated lowercase hex,
/// dropping leading zero octets.
pub fn serial_from_bytes(bytes: &[u8]) -> String {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    let slice = &bytes[start..];
    if slice.is_empty() {
        return "00".to_string();
    }

    let mut out = String::with_capacity(slice.len() * 3);
    for (i, b) in slice.iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        out.push_str(&hex::encode([*b]));
    }
    out
}

/// Canonical serial of a parsed certificate.
pub fn serial_from_cert(cert: &X509Certificate<'_>) -> String {
    serial_from_bytes(&cert.tbs_certificate.serial.to_bytes_be())
}
