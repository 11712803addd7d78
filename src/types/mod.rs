//! Core types shared across the relay.
//!
//! - [`Frame`] is one encoded image as received from the producer.
//! - [`Image`] is the raster type every decoder, processor and render sink
//!   works with (8-bit RGB).
//!
//! ```rust
//! use framerelay::types::Frame;
//!
//! let frame = Frame::new(vec![0xFF, 0xD8, 0xFF], 1);
//! assert_eq!(frame.sequence(), 1);
//! assert_eq!(frame.len(), 3);
//! ```

mod frame;

pub use frame::Frame;

/// Decoded raster image, 8-bit RGB.
pub type Image = image::RgbImage;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn frame_accessors() {
        let at = Instant::now() - Duration::from_millis(5);
        let frame = Frame::with_timestamp(vec![1u8, 2, 3], 42, at);

        assert_eq!(frame.data(), &[1, 2, 3]);
        assert_eq!(frame.sequence(), 42);
        assert_eq!(frame.received_at(), at);
        assert!(!frame.is_empty());
        assert_eq!(frame.into_data().len(), 3);
    }

    #[test]
    fn empty_payload_is_still_a_frame() {
        let frame = Frame::new(Vec::<u8>::new(), 1);
        assert!(frame.is_empty());
    }
}
