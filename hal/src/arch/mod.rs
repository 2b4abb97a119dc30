//! # Architecture-Specific HAL Modules
//!
//! Re-exports the appropriate implementation for the target architecture.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

// Re-export the current architecture's HAL
#[cfg(target_arch = "x86_64")]
pub use x86_64 as current;

// Future architectures
// #[cfg(target_arch = "aarch64")]
// pub mod aarch64;
