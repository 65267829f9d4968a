//! Combine captured page rasters into a single PDF, one image per page.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use super::CapturedPage;

const JPEG_QUALITY: u8 = 90;

pub fn assemble_pdf(pages: &[CapturedPage], dest: &Path) -> Result<PathBuf> {
    if pages.is_empty() {
        bail!("no pages to assemble");
    }
    let mut ordered: Vec<&CapturedPage> = pages.iter().collect();
    ordered.sort_by_key(|p| p.ordinal);

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(ordered.len());

    for page in ordered {
        let (jpeg, w, h) = encode_jpeg(&page.path)?;
        let (w, h) = (i64::from(w), i64::from(h));

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => Object::Integer(w),
                "Height" => Object::Integer(h),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => Object::Integer(8),
                "Filter" => "DCTDecode",
            },
            jpeg,
        ));

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Integer(w),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Integer(h),
                        Object::Integer(0),
                        Object::Integer(0),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().context("encode page content")?,
        ));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(w),
                Object::Integer(h),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(count),
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    doc.save(dest)
        .with_context(|| format!("write {}", dest.display()))?;
    Ok(dest.to_path_buf())
}

fn encode_jpeg(path: &Path) -> Result<(Vec<u8>, u32, u32)> {
    let rgb = image::open(path)
        .with_context(|| format!("decode {}", path.display()))?
        .to_rgb8();
    let (w, h) = rgb.dimensions();
    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(&rgb)
        .with_context(|| format!("jpeg encode {}", path.display()))?;
    Ok((out.into_inner(), w, h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_png(dir: &Path, ordinal: usize) -> CapturedPage {
        let path = dir.join(format!("page_{ordinal:03}.png"));
        RgbImage::from_pixel(8, 12, Rgb([ordinal as u8 * 40, 10, 10]))
            .save(&path)
            .unwrap();
        CapturedPage { ordinal, path }
    }

    #[test]
    fn one_pdf_page_per_capture() {
        let dir = tempfile::tempdir().unwrap();
        let pages = vec![write_png(dir.path(), 2), write_png(dir.path(), 1), write_png(dir.path(), 3)];
        let dest = dir.path().join("X1.pdf");
        assemble_pdf(&pages, &dest).unwrap();

        let doc = Document::load(&dest).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
    }

    #[test]
    fn empty_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(assemble_pdf(&[], &dir.path().join("x.pdf")).is_err());
    }
}
