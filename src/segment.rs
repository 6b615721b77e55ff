//! Segmentation of a full-page raster into header, body and footer

use image::{DynamicImage, GenericImageView, ImageFormat};
use serde::Serialize;
use std::io::Cursor;
use tracing::debug;

use crate::{Error, Result};

/// Agreed region boundaries for one page
///
/// Invariant: `header_height < page_height - footer_height`. Construction fails
/// with `Error::Overlap` otherwise; values are never adjusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionBoundaries {
    header_height: u32,
    footer_height: u32,
    page_height: u32,
}

impl RegionBoundaries {
    pub fn new(header_height: u32, footer_height: u32, page_height: u32) -> Result<Self> {
        let footer_top = i64::from(page_height) - i64::from(footer_height);
        if i64::from(header_height) >= footer_top {
            return Err(Error::overlap(header_height, footer_height, page_height));
        }
        Ok(Self {
            header_height,
            footer_height,
            page_height,
        })
    }

    pub fn header_height(&self) -> u32 {
        self.header_height
    }

    pub fn footer_height(&self) -> u32 {
        self.footer_height
    }

    pub fn page_height(&self) -> u32 {
        self.page_height
    }

    /// First row of the footer
    pub fn footer_top(&self) -> u32 {
        self.page_height - self.footer_height
    }

    pub fn body_height(&self) -> u32 {
        self.footer_top() - self.header_height
    }
}

/// The three crops and the boundaries they were cut at
#[derive(Debug, Clone)]
pub struct SegmentationResult {
    pub header: DynamicImage,
    pub body: DynamicImage,
    pub footer: DynamicImage,
    pub boundaries: RegionBoundaries,
}

impl SegmentationResult {
    /// Crops in header, body, footer order with their names
    pub fn regions(&self) -> [(&'static str, &DynamicImage); 3] {
        [("header", &self.header), ("body", &self.body), ("footer", &self.footer)]
    }
}

/// Decode a PNG (or any supported raster)
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    Ok(image::load_from_memory(bytes)?)
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

/// Slice `[0, h)`, `[h, H - f)`, `[H - f, H)`
pub fn segment(image: &DynamicImage, boundaries: RegionBoundaries) -> Result<SegmentationResult> {
    let (width, height) = image.dimensions();
    if height != boundaries.page_height() {
        return Err(Error::internal(format!(
            "boundaries computed for a {}px page but the image is {}px tall",
            boundaries.page_height(),
            height
        )));
    }

    let header_height = boundaries.header_height();
    let footer_top = boundaries.footer_top();

    debug!(
        "Cropping {}x{} at header {} / footer top {}",
        width, height, header_height, footer_top
    );

    Ok(SegmentationResult {
        header: image.crop_imm(0, 0, width, header_height),
        body: image.crop_imm(0, header_height, width, boundaries.body_height()),
        footer: image.crop_imm(0, footer_top, width, boundaries.footer_height()),
        boundaries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::mock::{render_png, row_color};

    fn page(width: u32, height: u32) -> DynamicImage {
        decode_image(&render_png(width, height, 0).unwrap()).unwrap()
    }

    #[test]
    fn test_overlap_is_rejected_with_both_values() {
        match RegionBoundaries::new(900, 200, 1000) {
            Err(Error::Overlap {
                header_height,
                footer_top,
                ..
            }) => {
                assert_eq!(header_height, 900);
                assert_eq!(footer_top, 800);
            }
            other => panic!("expected overlap, got {:?}", other),
        }

        tokio_test::assert_err!(RegionBoundaries::new(800, 200, 1000));
        tokio_test::assert_err!(RegionBoundaries::new(10, 2000, 1000));
        tokio_test::assert_ok!(RegionBoundaries::new(799, 200, 1000));
        tokio_test::assert_ok!(RegionBoundaries::new(0, 0, 1));
    }

    #[test]
    fn test_crops_are_disjoint_and_cover_the_page() {
        let image = page(16, 1000);
        let result = segment(&image, RegionBoundaries::new(96, 300, 1000).unwrap()).unwrap();

        let heights: Vec<u32> = result.regions().iter().map(|(_, img)| img.height()).collect();
        assert_eq!(heights, vec![96, 604, 300]);
        assert_eq!(heights.iter().sum::<u32>(), 1000);

        let first_row = |img: &DynamicImage| img.to_rgba8().get_pixel(0, 0).0;
        let last_row = |img: &DynamicImage| img.to_rgba8().get_pixel(0, img.height() - 1).0;
        assert_eq!(last_row(&result.header), row_color(95));
        assert_eq!(first_row(&result.body), row_color(96));
        assert_eq!(last_row(&result.body), row_color(699));
        assert_eq!(first_row(&result.footer), row_color(700));
        assert_eq!(last_row(&result.footer), row_color(999));
        assert!(result.regions().iter().all(|(_, img)| img.width() == 16));
    }

    #[test]
    fn test_page_height_must_match_image() {
        let image = page(8, 500);
        let err = segment(&image, RegionBoundaries::new(50, 50, 600).unwrap()).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_encode_round_trips_dimensions() {
        let image = page(8, 40);
        let result = segment(&image, RegionBoundaries::new(10, 10, 40).unwrap()).unwrap();
        let png = encode_png(&result.body).unwrap();
        assert_eq!(decode_image(&png).unwrap().dimensions(), (8, 20));
    }
}
