//! Device classification
//!
//! Maps a USB vendor/product id pair to the kind of launcher it is.

/// Vendor id of the standard launcher
pub const STD_VENDOR_ID: u16 = 0x2123;
/// Product id of the standard launcher
pub const STD_PRODUCT_ID: u16 = 0x1010;

/// Kind of device, as far as this library is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LauncherKind {
    NotALauncher,
    Standard,
}

impl LauncherKind {
    pub fn is_launcher(self) -> bool {
        self != LauncherKind::NotALauncher
    }
}

impl std::fmt::Display for LauncherKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LauncherKind::NotALauncher => write!(f, "Not a launcher"),
            LauncherKind::Standard => write!(f, "Standard launcher"),
        }
    }
}

/// Known (vendor_id, product_id) pairs
const KNOWN_LAUNCHERS: &[(u16, u16, LauncherKind)] =
    &[(STD_VENDOR_ID, STD_PRODUCT_ID, LauncherKind::Standard)];

/// Classify a device by its id pair
pub fn classify(vendor_id: u16, product_id: u16) -> LauncherKind {
    KNOWN_LAUNCHERS
        .iter()
        .find(|(vid, pid, _)| *vid == vendor_id && *pid == product_id)
        .map(|(_, _, kind)| *kind)
        .unwrap_or(LauncherKind::NotALauncher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_launcher() {
        assert_eq!(classify(8483, 4112), LauncherKind::Standard);
        assert!(classify(STD_VENDOR_ID, STD_PRODUCT_ID).is_launcher());
    }

    #[test]
    fn test_unknown_devices() {
        assert_eq!(classify(0x046d, 0xc52b), LauncherKind::NotALauncher);
        // Right vendor, wrong product
        assert_eq!(classify(STD_VENDOR_ID, 0x0001), LauncherKind::NotALauncher);
        // Swapped pair
        assert_eq!(classify(STD_PRODUCT_ID, STD_VENDOR_ID), LauncherKind::NotALauncher);
        assert!(!classify(0, 0).is_launcher());
    }
}
