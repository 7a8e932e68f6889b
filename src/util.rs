const BASE64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// 标准 Base64 编码（带填充），用于拼装 Basic 认证标头
pub fn base64_encode(input: &[u8]) -> String {
    let mut out = String::with_capacity((input.len() + 2) / 3 * 4);
    for chunk in input.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = chunk.get(1).copied().unwrap_or(0) as u32;
        let b2 = chunk.get(2).copied().unwrap_or(0) as u32;
        let triple = (b0 << 16) | (b1 << 8) | b2;

        out.push(BASE64_ALPHABET[(triple >> 18) as usize & 0x3F] as char);
        out.push(BASE64_ALPHABET[(triple >> 12) as usize & 0x3F] as char);
        match chunk.len() {
            1 => out.push_str("=="),
            2 => {
                out.push(BASE64_ALPHABET[(triple >> 6) as usize & 0x3F] as char);
                out.push('=');
            }
            _ => {
                out.push(BASE64_ALPHABET[(triple >> 6) as usize & 0x3F] as char);
                out.push(BASE64_ALPHABET[triple as usize & 0x3F] as char);
            }
        }
    }
    out
}

/// `X_FOO_BAR` → `X-Foo-Bar`
pub fn title_case_header(name: &str) -> String {
    name.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let lower = word.to_ascii_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join("-")
}
