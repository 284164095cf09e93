//! Utility
mod prio_bitmap;
pub use self::prio_bitmap::*;
