//! Emission backend configuration.

/// Configuration for one method compilation.
#[derive(Debug, Clone)]
pub struct EmitConfig {
    /// Hard limit on emitted code size in bytes. Exceeding it is reported
    /// as a distinct "method too large" error rather than a generic one.
    pub max_method_size: u32,
    /// Whether the jump-shrinking fixed point runs. Disabling it keeps
    /// every jump in its long form (useful when bisecting layout bugs).
    pub shrink_jumps: bool,
    /// Emit SSE instructions with the VEX prefix (AVX forms).
    pub use_avx: bool,
    /// Initial capacity of the output code buffer.
    pub code_capacity: usize,
}

impl Default for EmitConfig {
    fn default() -> Self {
        Self {
            max_method_size: 16 * 1024 * 1024,
            shrink_jumps: true,
            use_avx: false,
            code_capacity: 4096,
        }
    }
}
