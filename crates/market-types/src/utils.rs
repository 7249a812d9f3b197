//! Display helpers shared by log statements across the workspace.

/// Shortens an identifier for log output.
///
/// Identifiers of eight characters or fewer are returned unchanged; longer
/// ones keep their first eight characters followed by "..".
pub fn truncate_id(id: &str) -> String {
	match id.char_indices().nth(8) {
		Some((cut, _)) => format!("{}..", &id[..cut]),
		None => id.to_string(),
	}
}
