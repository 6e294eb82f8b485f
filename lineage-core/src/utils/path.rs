/// Storage-safe form of a file identity. Anything outside `[A-Za-z0-9._-]`
/// becomes `_`; when that changes the input, a short blake3 suffix keeps
/// `a/b.csv` and `a_b.csv` apart.
pub fn sanitize_key(raw: &str) -> String {
    let clean: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let clean = if clean.is_empty() { "_".to_string() } else { clean };
    if clean == raw {
        return clean;
    }
    let h = blake3::hash(raw.as_bytes()).to_hex().to_string();
    format!("{}-{}", clean, &h[..12])
}
