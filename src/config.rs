/// Tunables for a [`Heap`](crate::Heap).
///
/// ```rust
/// use brkalloc::Config;
///
/// let config = Config::new().limit(64 * 1024).trim(false);
///
/// assert_eq!(config.limit, Some(64 * 1024));
/// assert!(!config.trim);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// Most bytes the heap may take from the break, headers included.
  pub limit: Option<usize>,
  /// Give a released tail block back to the break.
  pub trim: bool,
}

impl Config {
  pub const fn new() -> Self {
    Self {
      limit: None,
      trim: true,
    }
  }

  pub const fn limit(
    mut self,
    bytes: usize,
  ) -> Self {
    self.limit = Some(bytes);
    self
  }

  pub const fn trim(
    mut self,
    trim: bool,
  ) -> Self {
    self.trim = trim;
    self
  }
}

impl Default for Config {
  fn default() -> Self {
    Self::new()
  }
}
