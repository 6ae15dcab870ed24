//! The Extractor (SPEC_FULL.md §4.A): turns a PDF byte stream into an
//! ordered sequence of pages, each carrying sanitized-on-read text, the raw
//! bytes and page rect of every embedded image, and page dimensions, plus a
//! document-level metadata map. Grounded on the teacher's `document/parser.rs`
//! PDF branch (`lopdf::Document::load` + `extract_text`), extended with
//! image and rect extraction via the content-stream CTM.

use lopdf::content::Content;
use lopdf::{Dictionary, Document as PdfDocument, Object, ObjectId};
use std::collections::HashMap;
use tracing::warn;

use crate::models::DocumentMetadata;
use crate::utils::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone)]
pub struct ExtractedImage {
    pub bytes: Vec<u8>,
    pub rect: ImageRect,
}

impl ExtractedImage {
    pub fn pixel_count(&self) -> Option<u64> {
        image::load_from_memory(&self.bytes)
            .ok()
            .map(|img| img.width() as u64 * img.height() as u64)
    }
}

#[derive(Debug, Clone)]
pub struct ExtractedPage {
    pub number: u32,
    pub text: String,
    pub images: Vec<ExtractedImage>,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub pages: Vec<ExtractedPage>,
    pub metadata: DocumentMetadata,
}

/// A 2D affine transform, tracked across `q`/`Q`/`cm` operators so image
/// placement (`Do`) can be mapped back to a page-space rectangle.
#[derive(Debug, Clone, Copy)]
struct Matrix {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    e: f32,
    f: f32,
}

impl Matrix {
    fn identity() -> Self {
        Self { a: 1.0, b: 0.0, c: 0.0, d: 1.0, e: 0.0, f: 0.0 }
    }

    /// `self` applied after `other`: equivalent to PDF's `other cm` under a
    /// current transform of `self`.
    fn prepend(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: other.a * self.a + other.b * self.c,
            b: other.a * self.b + other.b * self.d,
            c: other.c * self.a + other.d * self.c,
            d: other.c * self.b + other.d * self.d,
            e: other.e * self.a + other.f * self.c + self.e,
            f: other.e * self.b + other.f * self.d + self.f,
        }
    }

    fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (self.a * x + self.c * y + self.e, self.b * x + self.d * y + self.f)
    }

    fn unit_square_rect(&self) -> ImageRect {
        let corners = [self.apply(0.0, 0.0), self.apply(1.0, 0.0), self.apply(0.0, 1.0), self.apply(1.0, 1.0)];
        let min_x = corners.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
        let max_x = corners.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
        let min_y = corners.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
        let max_y = corners.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);
        ImageRect { x: min_x, y: min_y, width: max_x - min_x, height: max_y - min_y }
    }
}

pub struct Extractor;

impl Extractor {
    pub fn extract(bytes: &[u8], document_id: &str) -> Result<ExtractedDocument, CoreError> {
        let doc = PdfDocument::load_mem(bytes).map_err(|e| CoreError::DocumentProcessing {
            document_id: document_id.to_string(),
            reason: format!("unreadable PDF: {e}"),
        })?;

        let metadata = Self::extract_metadata(&doc);
        let mut pages = Vec::new();

        for (page_num, page_id) in doc.get_pages() {
            let text = doc.extract_text(&[page_num]).unwrap_or_default();
            let (width, height) = Self::page_dimensions(&doc, page_id);
            let images = Self::extract_page_images(&doc, page_id, page_num);

            pages.push(ExtractedPage { number: page_num, text, images, width, height });
        }

        pages.sort_by_key(|p| p.number);

        Ok(ExtractedDocument { pages, metadata })
    }

    fn extract_metadata(doc: &PdfDocument) -> DocumentMetadata {
        let mut metadata = HashMap::new();
        let Ok(trailer_info) = doc.trailer.get(b"Info") else {
            return metadata;
        };
        let Ok(info_id) = trailer_info.as_reference() else {
            return metadata;
        };
        let Ok(Object::Dictionary(info)) = doc.get_object(info_id) else {
            return metadata;
        };

        for key in [
            "Title", "Author", "Subject", "Keywords", "Creator", "Producer", "CreationDate",
        ] {
            if let Ok(value) = info.get(key.as_bytes()) {
                if let Ok(text) = value.as_str() {
                    metadata.insert(key.to_lowercase(), String::from_utf8_lossy(text).to_string());
                }
            }
        }

        metadata
    }

    fn page_dimensions(doc: &PdfDocument, page_id: ObjectId) -> (f32, f32) {
        if let Ok(media_box) = doc.get_object(page_id).and_then(|_| doc.get_page_attr(page_id, "MediaBox")) {
            if let Ok(rect) = media_box.as_array() {
                if rect.len() == 4 {
                    let coords: Vec<f32> = rect.iter().filter_map(|o| o.as_float().ok()).collect();
                    if coords.len() == 4 {
                        return (coords[2] - coords[0], coords[3] - coords[1]);
                    }
                }
            }
        }
        (612.0, 792.0)
    }

    fn extract_page_images(doc: &PdfDocument, page_id: ObjectId, page_num: u32) -> Vec<ExtractedImage> {
        let xobjects = Self::page_xobjects(doc, page_id);
        if xobjects.is_empty() {
            return Vec::new();
        }

        let rects = Self::scan_image_placements(doc, page_id, &xobjects);

        let mut images = Vec::new();
        for (name, obj_id) in &xobjects {
            match Self::decode_image_object(doc, *obj_id) {
                Ok(Some(bytes)) => {
                    let rect = rects.get(name).copied().unwrap_or(ImageRect {
                        x: 0.0,
                        y: 0.0,
                        width: 0.0,
                        height: 0.0,
                    });
                    images.push(ExtractedImage { bytes, rect });
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(page = page_num, image = %name, error = %err, "skipping malformed embedded image");
                }
            }
        }
        images
    }

    fn page_xobjects(doc: &PdfDocument, page_id: ObjectId) -> Vec<(String, ObjectId)> {
        let mut result = Vec::new();
        let Ok(resources) = doc.get_page_attr(page_id, "Resources") else {
            return result;
        };
        let Ok(Object::Dictionary(resources)) = Self::resolve(doc, resources) else {
            return result;
        };
        let Ok(xobject) = resources.get(b"XObject") else {
            return result;
        };
        let Ok(Object::Dictionary(xobject)) = Self::resolve(doc, xobject.clone()) else {
            return result;
        };

        for (name, value) in xobject.iter() {
            if let Ok(obj_id) = value.as_reference() {
                if let Ok(Object::Stream(stream)) = doc.get_object(obj_id) {
                    if stream.dict.get(b"Subtype").and_then(|s| s.as_name()).map(|n| n == b"Image").unwrap_or(false) {
                        result.push((String::from_utf8_lossy(name).to_string(), obj_id));
                    }
                }
            }
        }
        result
    }

    fn resolve(doc: &PdfDocument, object: Object) -> Result<Object, lopdf::Error> {
        match object {
            Object::Reference(id) => doc.get_object(id).cloned(),
            other => Ok(other),
        }
    }

    fn decode_image_object(doc: &PdfDocument, obj_id: ObjectId) -> Result<Option<Vec<u8>>, String> {
        let Object::Stream(stream) = doc.get_object(obj_id).map_err(|e| e.to_string())? else {
            return Ok(None);
        };

        let filter_is = |name: &[u8]| -> bool {
            match stream.dict.get(b"Filter") {
                Ok(Object::Name(n)) => n == name,
                Ok(Object::Array(arr)) => arr.iter().any(|o| matches!(o, Object::Name(n) if n == name)),
                _ => false,
            }
        };

        if filter_is(b"DCTDecode") || filter_is(b"JPXDecode") {
            return Ok(Some(stream.content.clone()));
        }

        // Raw (Flate-decoded) raster: reassemble from Width/Height/ColorSpace
        // and re-encode as PNG so downstream (vision padding/encoding) can
        // treat every image uniformly.
        let width = Self::dict_int(&stream.dict, "Width").ok_or("missing Width")? as u32;
        let height = Self::dict_int(&stream.dict, "Height").ok_or("missing Height")? as u32;
        let raw = stream.decompressed_content().map_err(|e| e.to_string())?;

        let is_rgb = matches!(
            stream.dict.get(b"ColorSpace").and_then(|o| o.as_name()),
            Ok(b"DeviceRGB")
        );

        let expected_rgb = (width as usize) * (height as usize) * 3;
        let expected_gray = (width as usize) * (height as usize);

        let dynamic = if is_rgb && raw.len() >= expected_rgb {
            image::RgbImage::from_raw(width, height, raw[..expected_rgb].to_vec())
                .map(image::DynamicImage::ImageRgb8)
        } else if raw.len() >= expected_gray {
            image::GrayImage::from_raw(width, height, raw[..expected_gray].to_vec())
                .map(image::DynamicImage::ImageLuma8)
        } else {
            None
        };

        let Some(dynamic) = dynamic else {
            return Err("unsupported raster encoding".to_string());
        };

        let mut png_bytes = Vec::new();
        dynamic
            .write_to(&mut std::io::Cursor::new(&mut png_bytes), image::ImageFormat::Png)
            .map_err(|e| e.to_string())?;

        Ok(Some(png_bytes))
    }

    fn dict_int(dict: &Dictionary, key: &str) -> Option<i64> {
        dict.get(key.as_bytes()).ok().and_then(|o| o.as_i64().ok())
    }

    /// Walks the page's content stream, tracking the CTM across `q`/`Q`/`cm`,
    /// to recover each named XObject's placement rectangle. Images drawn
    /// more than once keep their first placement (SPEC_FULL.md §4.A: "its
    /// first bounding rectangle on the page").
    fn scan_image_placements(
        doc: &PdfDocument,
        page_id: ObjectId,
        xobjects: &[(String, ObjectId)],
    ) -> HashMap<String, ImageRect> {
        let mut rects = HashMap::new();
        let Ok(content_bytes) = doc.get_page_content(page_id) else {
            return rects;
        };
        let Ok(content) = Content::decode(&content_bytes) else {
            return rects;
        };

        let names: std::collections::HashSet<&str> =
            xobjects.iter().map(|(n, _)| n.as_str()).collect();

        let mut stack: Vec<Matrix> = vec![Matrix::identity()];

        for op in content.operations {
            match op.operator.as_str() {
                "q" => {
                    let top = *stack.last().unwrap();
                    stack.push(top);
                }
                "Q" => {
                    if stack.len() > 1 {
                        stack.pop();
                    }
                }
                "cm" => {
                    if op.operands.len() == 6 {
                        let nums: Vec<f32> = op.operands.iter().filter_map(|o| o.as_float().ok()).collect();
                        if nums.len() == 6 {
                            let m = Matrix { a: nums[0], b: nums[1], c: nums[2], d: nums[3], e: nums[4], f: nums[5] };
                            if let Some(top) = stack.last_mut() {
                                *top = top.prepend(&m);
                            }
                        }
                    }
                }
                "Do" => {
                    if let Some(Object::Name(name)) = op.operands.first() {
                        let name = String::from_utf8_lossy(name).to_string();
                        if names.contains(name.as_str()) && !rects.contains_key(&name) {
                            let top = *stack.last().unwrap();
                            rects.insert(name, top.unit_square_rect());
                        }
                    }
                }
                _ => {}
            }
        }

        rects
    }
}
