use std::sync::LazyLock;

/// Whether prim indexing culls nodes that contribute no opinions.
/// Read once from `PCP_CULLING`; anything but `0`/`false` enables it.
static CULLING: LazyLock<bool> = LazyLock::new(|| match std::env::var("PCP_CULLING") {
	Ok(value) => !matches!(value.trim(), "0" | "false" | "FALSE" | "off"),
	Err(_) => true,
});

pub fn culling_enabled() -> bool {
	*CULLING
}

/// Construction-time configuration of a [super::Cache].
#[derive(Debug, Clone)]
pub struct CacheOptions {
	/// USD mode: a lighter composition profile without relocations or
	/// cached property indexes.
	pub usd: bool,
	/// Target passed to file formats when opening layers.
	pub file_format_target: String,
	pub culling: bool,
	/// Pending parallel results at which the publisher stops skipping a
	/// contended write lock.
	pub flush_threshold: usize,
}

impl Default for CacheOptions {
	fn default() -> Self {
		Self {
			usd: false,
			file_format_target: String::new(),
			culling: culling_enabled(),
			flush_threshold: 20_000,
		}
	}
}

impl CacheOptions {
	pub fn usd(mut self, usd: bool) -> Self {
		self.usd = usd;
		self
	}

	pub fn file_format_target(mut self, target: impl Into<String>) -> Self {
		self.file_format_target = target.into();
		self
	}

	pub fn culling(mut self, culling: bool) -> Self {
		self.culling = culling;
		self
	}

	pub fn flush_threshold(mut self, threshold: usize) -> Self {
		self.flush_threshold = threshold.max(1);
		self
	}
}
