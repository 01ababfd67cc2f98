/// Input backend capability trait
pub mod backend;
/// Core Graphics event tap backend
#[cfg(target_os = "macos")]
pub mod cgevent;
/// Key codes and modifier flags
pub mod keys;
