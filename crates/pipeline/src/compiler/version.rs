//! Compiler version banner parsing.

use std::sync::LazyLock;

use regex::Regex;

/// Matches `Version: 0.1.1` and `Version: 0.1.1-054b3c3c`, stopping at the first `/`.
static VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Version:\s*([0-9]+\.[0-9]+\.[0-9]+(?:-[0-9a-zA-Z]+)?)")
        .expect("version pattern is valid")
});

/// Extract the version token from the compiler's `--version` banner.
///
/// Returns `None` when the banner carries no version line.
pub fn parse_version(banner: &str) -> Option<String> {
    VERSION_REGEX
        .captures(banner)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_with_hash() {
        let banner = "solc, the solidity compiler commandline interface\nVersion: 0.1.1-054b3c3c/Release-Darwin/clang/JIT\n";
        assert_eq!(parse_version(banner).as_deref(), Some("0.1.1-054b3c3c"));
    }

    #[test]
    fn test_version_without_hash() {
        let banner = "solc, the solidity compiler commandline interface\nVersion: 0.1.1/Release-Darwin/clang/JIT\n";
        assert_eq!(parse_version(banner).as_deref(), Some("0.1.1"));
    }

    #[test]
    fn test_modern_banner() {
        let banner = "solc, the solidity compiler commandline interface\nVersion: 0.8.26+commit.8a97fa7a.Linux.g++\n";
        assert_eq!(parse_version(banner).as_deref(), Some("0.8.26"));
    }

    #[test]
    fn test_missing_version() {
        assert_eq!(parse_version("command not found"), None);
    }
}
