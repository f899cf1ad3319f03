use std::env;
use std::fs;
use std::path::PathBuf;
use which::which;

const UNKNOWN_HOST: &str = "unk";

/// Finds the pg_dump executable in the system PATH.
pub fn find_pg_dump_executable() -> which::Result<PathBuf> {
    which("pg_dump")
}

/// Host name used in remote directory templates.
pub fn hostname() -> String {
    env::var("HOSTNAME")
        .ok()
        .or_else(|| fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_HOST.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_is_never_empty() {
        let host = hostname();
        assert!(!host.is_empty());
        assert_eq!(host, host.trim());
    }
}
