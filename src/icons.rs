// icons.rs - OS family icons shown next to hosts in the UI

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

const WINDOWS_SVG: &str = include_str!("../assets/windows.svg");
const LINUX_SVG: &str = include_str!("../assets/linux.svg");

/// Base64 SVG for the OS family, empty when unknown
pub fn get_icon(os: Option<&str>) -> String {
    let Some(os) = os else {
        return String::new();
    };
    let os = os.to_lowercase();

    if os.contains("windows") {
        STANDARD.encode(WINDOWS_SVG)
    } else if os.contains("linux") {
        STANDARD.encode(LINUX_SVG)
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icon_by_family() {
        let windows = get_icon(Some("Microsoft Windows 10|11"));
        let linux = get_icon(Some("Linux 5.X"));
        assert!(!windows.is_empty());
        assert!(!linux.is_empty());
        assert_ne!(windows, linux);

        let decoded = STANDARD.decode(&linux).unwrap();
        assert!(String::from_utf8(decoded).unwrap().contains("<svg"));
    }

    #[test]
    fn test_unknown_os_has_no_icon() {
        assert_eq!(get_icon(Some("FreeBSD 13")), "");
        assert_eq!(get_icon(None), "");
    }
}
