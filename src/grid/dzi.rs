//! Deep Zoom Image (DZI) descriptors.
//!
//! Some viewers publish a `.dzi` descriptor next to their tiles:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <Image xmlns="http://schemas.microsoft.com/deepzoom/2008"
//!        TileSize="256" Overlap="1" Format="jpg">
//!   <Size Width="5120" Height="7168" />
//! </Image>
//! ```
//!
//! Descriptors are often missing or stale, so probing stays authoritative.
//! A parsed descriptor is only used to cross-check the probed grid.
//!
//! Deep Zoom levels run from 0 (1x1 pixel) to `ceil(log2(max(w, h)))`
//! (full resolution).

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::DziError;

/// Parsed contents of a `.dzi` descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DziDescriptor {
    pub tile_size: u32,
    pub overlap: u32,
    pub format: String,
    pub width: u32,
    pub height: u32,
}

impl DziDescriptor {
    /// Parse a descriptor.
    ///
    /// `TileSize`, `Overlap` and `Format` come from the `<Image>` element,
    /// `Width` and `Height` from its `<Size>` child. Comments and any other
    /// elements are ignored.
    pub fn parse(xml: &str) -> Result<Self, DziError> {
        let mut reader = Reader::from_str(xml);
        let mut image: Option<ImageAttributes> = None;
        let mut size: Option<(u32, u32)> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(elem)) | Ok(Event::Empty(elem)) => {
                    match elem.local_name().as_ref() {
                        b"Image" if image.is_none() => {
                            image = Some(ImageAttributes::from_element(&elem)?);
                        }
                        b"Size" if image.is_some() && size.is_none() => {
                            let width = required_dimension(&elem, "Width")?;
                            let height = required_dimension(&elem, "Height")?;
                            size = Some((width, height));
                        }
                        _ => {}
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(DziError::Malformed(format!(
                        "at position {}: {}",
                        reader.error_position(),
                        e
                    )))
                }
            }
        }

        let image = image.ok_or(DziError::MissingElement("Image"))?;
        let (width, height) = size.ok_or(DziError::MissingElement("Size"))?;

        Ok(Self {
            tile_size: image.tile_size,
            overlap: image.overlap,
            format: image.format,
            width,
            height,
        })
    }

    /// Full-resolution Deep Zoom level.
    pub fn max_level(&self) -> u32 {
        let max_dim = self.width.max(self.height) as f64;
        if max_dim <= 1.0 {
            return 0;
        }
        max_dim.log2().ceil() as u32
    }

    /// Pixel size at `level`, `None` past the maximum level.
    pub fn level_dimensions(&self, level: u32) -> Option<(u32, u32)> {
        let max_level = self.max_level();
        if level > max_level {
            return None;
        }
        let scale = 1u64 << (max_level - level);
        let width = (self.width as u64).div_ceil(scale).max(1) as u32;
        let height = (self.height as u64).div_ceil(scale).max(1) as u32;
        Some((width, height))
    }

    /// Tile columns and rows at `level`.
    pub fn tile_grid(&self, level: u32) -> Option<(u32, u32)> {
        let (width, height) = self.level_dimensions(level)?;
        Some((
            width.div_ceil(self.tile_size).max(1),
            height.div_ceil(self.tile_size).max(1),
        ))
    }
}

struct ImageAttributes {
    tile_size: u32,
    overlap: u32,
    format: String,
}

impl ImageAttributes {
    fn from_element(elem: &BytesStart<'_>) -> Result<Self, DziError> {
        let tile_size = required_dimension(elem, "TileSize")?;
        let overlap = match attribute(elem, "Overlap")? {
            Some(value) => parse_number("Overlap", &value)?,
            None => 0,
        };
        let format = attribute(elem, "Format")?.unwrap_or_else(|| "jpg".to_string());
        Ok(Self {
            tile_size,
            overlap,
            format,
        })
    }
}

/// Attribute value on `elem`, matched by local name.
fn attribute(elem: &BytesStart<'_>, name: &'static str) -> Result<Option<String>, DziError> {
    for attr in elem.attributes() {
        let attr = attr.map_err(|e| DziError::Malformed(e.to_string()))?;
        if attr.key.local_name().as_ref() == name.as_bytes() {
            let value = std::str::from_utf8(&attr.value).map_err(|_| {
                DziError::InvalidAttribute {
                    attribute: name,
                    value: String::from_utf8_lossy(&attr.value).into_owned(),
                }
            })?;
            return Ok(Some(value.trim().to_string()));
        }
    }
    Ok(None)
}

/// A present, positive integer attribute.
fn required_dimension(elem: &BytesStart<'_>, name: &'static str) -> Result<u32, DziError> {
    let element = match elem.local_name().as_ref() {
        b"Size" => "Size",
        _ => "Image",
    };
    let value = attribute(elem, name)?.ok_or(DziError::MissingAttribute {
        element,
        attribute: name,
    })?;
    match parse_number(name, &value)? {
        0 => Err(DziError::InvalidAttribute {
            attribute: name,
            value,
        }),
        n => Ok(n),
    }
}

fn parse_number(name: &'static str, value: &str) -> Result<u32, DziError> {
    value.parse().map_err(|_| DziError::InvalidAttribute {
        attribute: name,
        value: value.to_string(),
    })
}
