/// HTTP user agent sent with every platform request,
/// e.g. `io.relayr.sdk.rust/0.1.0 (linux; x86_64)`.
pub fn user_agent(client_name: &str, client_version: &str) -> String {
    format!(
        "{}/{} ({}; {})",
        client_name,
        client_version,
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

// 日志里只打印 payload 的前几个字符
pub fn payload_preview(payload: &[u8], max_len: usize) -> String {
    let text = String::from_utf8_lossy(payload);
    if text.chars().count() <= max_len {
        text.into_owned()
    } else {
        let head: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
