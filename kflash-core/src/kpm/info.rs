//! Parsing `kpmmgr` output and module packages.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const ELF_MAGIC: &[u8] = b"\x7fELF";
const MIN_STRING_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KpmModuleInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub args: String,
    pub enabled: bool,
    pub has_action: bool,
}

/// Parse `key=value` lines from `kpmmgr info <id>`.
///
/// Blank lines and `#` comments are skipped, a line without `=` becomes a key with an empty
/// value. Missing keys fall back to defaults, `name` defaults to the id.
pub fn parse_module_info(id: &str, text: &str) -> KpmModuleInfo {
    let props: HashMap<&str, &str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, ""),
        })
        .collect();
    let field = |key: &str| props.get(key).map(|v| v.to_string()).unwrap_or_default();

    KpmModuleInfo {
        id: id.to_string(),
        name: props
            .get("name")
            .map(|v| v.to_string())
            .unwrap_or_else(|| id.to_string()),
        version: field("version"),
        author: field("author"),
        description: field("description"),
        args: field("args"),
        enabled: true,
        has_action: true,
    }
}

/// Module names from `kpmmgr list`, one per line.
pub fn parse_module_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn is_elf(bytes: &[u8]) -> bool {
    bytes.starts_with(ELF_MAGIC)
}

/// Printable ASCII runs of at least four bytes, the way `strings` reports them.
pub fn printable_strings(bytes: &[u8]) -> impl Iterator<Item = &str> {
    bytes
        .split(|b| !(b.is_ascii_graphic() || *b == b' ' || *b == b'\t'))
        .filter(|run| run.len() >= MIN_STRING_LEN)
        .filter_map(|run| std::str::from_utf8(run).ok())
}

/// The module id embedded in a package as `name=<id>`.
pub fn extract_module_name(bytes: &[u8]) -> Option<String> {
    printable_strings(bytes)
        .find_map(|s| s.strip_prefix("name="))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_defaults_missing_fields() {
        let info = parse_module_info(
            "hello",
            "# kpm info\nversion=1.0.2\nauthor = someone\n\nargs\nbogus=a=b\n",
        );
        assert_eq!(info.name, "hello");
        assert_eq!(info.version, "1.0.2");
        assert_eq!(info.author, "someone");
        assert_eq!(info.args, "");
        assert!(info.description.is_empty());
        assert!(info.enabled && info.has_action);
    }

    #[test]
    fn info_keeps_explicit_name() {
        let info = parse_module_info("mod1", "name=Module One\ndescription=does things");
        assert_eq!(info.id, "mod1");
        assert_eq!(info.name, "Module One");
        assert_eq!(info.description, "does things");
    }

    #[test]
    fn list_skips_blank_lines() {
        assert_eq!(parse_module_list("mod1\n\n  mod2 \n"), vec!["mod1", "mod2"]);
        assert!(parse_module_list("  \n").is_empty());
    }

    #[test]
    fn module_name_comes_from_embedded_strings() {
        let mut bytes = b"\x7fELF\x02\x01\x01\0\0\0".to_vec();
        bytes.extend_from_slice(b"\0version=1.0\0name=hello_kpm\0author=x\0");
        assert!(is_elf(&bytes));
        assert_eq!(extract_module_name(&bytes).as_deref(), Some("hello_kpm"));
    }

    #[test]
    fn short_or_missing_names_are_ignored() {
        assert_eq!(extract_module_name(b"\x7fELF\0name=\0"), None);
        assert_eq!(extract_module_name(b"no metadata here"), None);
        assert!(!is_elf(b"PK\x03\x04"));
    }
}
