//! Processor that renders frames unchanged

use super::{ProcessError, Processor};
use crate::types::Image;

/// Returns every image as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Processor for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn process(&self, image: &Image) -> Result<Image, ProcessError> {
        Ok(image.clone())
    }
}
