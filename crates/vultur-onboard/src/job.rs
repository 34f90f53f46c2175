/// Command-line send jobs: `TAG=PATH`.

use std::path::PathBuf;

use anyhow::{Context, bail};
use vultur_link::is_valid_tag;
use vultur_transfer::{JpegDecoder, PayloadDecoder, TransferDescriptor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendJob {
    pub tag: String,
    pub path: PathBuf,
}

impl SendJob {
    pub fn parse(arg: &str) -> anyhow::Result<Self> {
        let Some((tag, path)) = arg.split_once('=') else {
            bail!("expected TAG=PATH, got {:?}", arg);
        };
        if !is_valid_tag(tag) {
            bail!("invalid tag {:?}: 1-16 characters of A-Z a-z 0-9 - _", tag);
        }
        if path.is_empty() {
            bail!("missing path for {}", tag);
        }
        Ok(Self {
            tag: tag.to_string(),
            path: PathBuf::from(path),
        })
    }

    /// Read the JPEG and take its dimensions from the frame header.
    pub fn load(&self, quality: u8) -> anyhow::Result<TransferDescriptor> {
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("cannot read {}", self.path.display()))?;
        let image = JpegDecoder
            .decode(&bytes)
            .with_context(|| format!("{} is not a usable JPEG", self.path.display()))?;
        Ok(TransferDescriptor::new(
            self.tag.clone(),
            bytes,
            image.width,
            image.height,
            quality,
        ))
    }
}
