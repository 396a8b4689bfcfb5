use std::fs;

const UNKNOWN_HOST: &str = "UnknownHost";

/// Identity written into the lock record: the host name when it can be found.
///
/// Only shown to operators; correctness never depends on it.
pub fn default_holder() -> String {
    detect_hostname().unwrap_or_else(|| UNKNOWN_HOST.to_string())
}

fn detect_hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .and_then(non_empty)
        .or_else(|| fs::read_to_string("/etc/hostname").ok().and_then(non_empty))
}

fn non_empty(name: String) -> Option<String> {
    let name = name.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
