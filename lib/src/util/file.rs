use std::{fs::File, path::Path};

use anyhow::{Context, Result};
use memmap2::{Mmap, MmapOptions};

/// Memory maps an asset file for decoding.
pub fn map_asset<P: AsRef<Path>>(path: P) -> Result<Mmap> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("Failed to open asset '{}'", path.display()))?;
    unsafe { MmapOptions::new().map(&file) }
        .with_context(|| format!("Failed to map asset '{}'", path.display()))
}
