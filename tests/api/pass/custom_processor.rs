use std::sync::Arc;

use framerelay::processors::{ProcessError, Processor};
use framerelay::render::{RenderError, RenderSink, RenderedFrame};
use framerelay::{FrameRelay, Image, RelayConfig};

struct Invert;

impl Processor for Invert {
    fn name(&self) -> &'static str {
        "invert"
    }

    fn process(&self, image: &Image) -> Result<Image, ProcessError> {
        let mut out = image.clone();
        image::imageops::invert(&mut out);
        Ok(out)
    }
}

struct Discard;

impl RenderSink for Discard {
    fn name(&self) -> &'static str {
        "discard"
    }

    fn render(&self, _frame: RenderedFrame) -> Result<(), RenderError> {
        Ok(())
    }
}

fn main() {
    let _server = FrameRelay::builder(RelayConfig::default())
        .with_processor(Arc::new(Invert))
        .with_sink(Arc::new(Discard));
}
