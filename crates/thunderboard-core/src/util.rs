//! Utility functions for thunderboard-core.

use btleplug::platform::PeripheralId as BtlePeripheralId;

/// Format a btleplug peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms, they may be
/// MAC addresses or other formats. This function extracts the useful
/// identifier string.
///
/// # Example
///
/// ```ignore
/// use thunderboard_core::util::format_peripheral_id;
///
/// let id = peripheral.id();
/// let formatted = format_peripheral_id(&id);
/// println!("Board: {}", formatted);
/// ```
pub fn format_peripheral_id(id: &BtlePeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}
