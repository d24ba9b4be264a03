//! Tile URL layouts.
//!
//! The URL-discovery layer hands us one template per page. A template is any
//! string containing the `{level}`, `{col}` and `{row}` placeholders; the two
//! layouts seen most often have dedicated constructors:
//!
//! - Deep Zoom without a descriptor: `{base}_files/{level}/{col}_{row}.jpg`
//! - AjaxZoom zoomtiles: `{base}{level}-{col}-{row}.jpg`

use std::fmt;

use url::Url;

use crate::error::TileError;

use super::TileCoordinate;

const LEVEL: &str = "{level}";
const COLUMN: &str = "{col}";
const ROW: &str = "{row}";

/// A tile URL pattern for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileUrlTemplate {
    template: String,
}

impl TileUrlTemplate {
    /// Parse a template string.
    ///
    /// All three placeholders must be present and the text before the first
    /// placeholder must form an absolute http(s) URL once placeholders are
    /// substituted.
    pub fn parse(template: impl Into<String>) -> Result<Self, TileError> {
        let template = template.into();

        for placeholder in [LEVEL, COLUMN, ROW] {
            if !template.contains(placeholder) {
                return Err(TileError::InvalidTemplate {
                    template,
                    reason: format!("missing {} placeholder", placeholder),
                });
            }
        }

        let sample = render(&template, TileCoordinate::new(0, 0, 0));
        match Url::parse(&sample) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => {
                return Err(TileError::InvalidTemplate {
                    template,
                    reason: format!("unsupported scheme '{}'", url.scheme()),
                })
            }
            Err(e) => {
                return Err(TileError::InvalidTemplate {
                    template,
                    reason: e.to_string(),
                })
            }
        }

        Ok(Self { template })
    }

    /// Deep Zoom tile layout: `{base}_files/{level}/{col}_{row}.{extension}`.
    pub fn deep_zoom(base: &str, extension: &str) -> Result<Self, TileError> {
        Self::parse(format!(
            "{}_files/{}/{}_{}.{}",
            base, LEVEL, COLUMN, ROW, extension
        ))
    }

    /// AjaxZoom zoomtiles layout: `{base}{level}-{col}-{row}.jpg`.
    ///
    /// `base` is normalised to end with a slash.
    pub fn ajax_zoom(base: &str) -> Result<Self, TileError> {
        let base = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{}/", base)
        };
        Self::parse(format!("{}{}-{}-{}.jpg", base, LEVEL, COLUMN, ROW))
    }

    /// URL of one tile.
    pub fn url_for(&self, coordinate: TileCoordinate) -> String {
        render(&self.template, coordinate)
    }

    /// The raw template string.
    pub fn as_str(&self) -> &str {
        &self.template
    }
}

impl fmt::Display for TileUrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

fn render(template: &str, coordinate: TileCoordinate) -> String {
    template
        .replace(LEVEL, &coordinate.level.to_string())
        .replace(COLUMN, &coordinate.column.to_string())
        .replace(ROW, &coordinate.row.to_string())
}
