//! Re-encoding of embedded raster images.

use flate2::read::ZlibDecoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Document, Object, ObjectId, Stream};
use std::io::Read;

use crate::errors::DomainError;

/// Images above this pixel count are left as they are.
const MAX_PIXELS: u64 = 40_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColorModel {
    Rgb,
    Gray,
}

impl ColorModel {
    fn pdf_name(self) -> &'static str {
        match self {
            ColorModel::Rgb => "DeviceRGB",
            ColorModel::Gray => "DeviceGray",
        }
    }

    fn channels(self) -> u64 {
        match self {
            ColorModel::Rgb => 3,
            ColorModel::Gray => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Raw,
    Flate,
    Jpeg,
}

/// Enough of an image XObject to decode it. `None` for anything we do not touch.
struct Candidate {
    width: u32,
    height: u32,
    color: ColorModel,
    encoding: Encoding,
}

fn name_of(obj: &Object) -> Option<&[u8]> {
    match obj {
        Object::Name(name) => Some(name.as_slice()),
        _ => None,
    }
}

fn dimension(stream: &Stream, key: &[u8]) -> Option<u32> {
    match stream.dict.get(key).ok()? {
        Object::Integer(v) if *v > 0 => u32::try_from(*v).ok(),
        _ => None,
    }
}

fn candidate(stream: &Stream) -> Option<Candidate> {
    if stream.dict.get(b"Subtype").ok().and_then(name_of) != Some(b"Image".as_slice()) {
        return None;
    }
    // masks and decode arrays do not survive lossy re-encoding
    if stream.dict.has(b"ImageMask") || stream.dict.has(b"Mask") || stream.dict.has(b"Decode") {
        return None;
    }
    if stream.dict.has(b"DecodeParms") {
        return None;
    }

    let color = match stream.dict.get(b"ColorSpace").ok().and_then(name_of)? {
        b"DeviceRGB" => ColorModel::Rgb,
        b"DeviceGray" => ColorModel::Gray,
        _ => return None,
    };

    let filter = match stream.dict.get(b"Filter") {
        Err(_) => None,
        Ok(Object::Array(filters)) if filters.len() == 1 => Some(name_of(&filters[0])?),
        Ok(obj) => Some(name_of(obj)?),
    };
    let encoding = match filter {
        None => Encoding::Raw,
        Some(b"FlateDecode") => Encoding::Flate,
        Some(b"DCTDecode") => Encoding::Jpeg,
        Some(_) => return None,
    };

    if encoding != Encoding::Jpeg {
        match stream.dict.get(b"BitsPerComponent").ok()? {
            Object::Integer(8) => {}
            _ => return None,
        }
    }

    let width = dimension(stream, b"Width")?;
    let height = dimension(stream, b"Height")?;
    if u64::from(width) * u64::from(height) > MAX_PIXELS {
        return None;
    }

    Some(Candidate { width, height, color, encoding })
}

fn decode(stream: &Stream, candidate: &Candidate) -> Result<DynamicImage, String> {
    let raw = match candidate.encoding {
        Encoding::Jpeg => {
            return image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg)
                .map_err(|e| format!("JPEG decode failed: {}", e));
        }
        Encoding::Raw => stream.content.clone(),
        Encoding::Flate => {
            let mut out = Vec::new();
            ZlibDecoder::new(stream.content.as_slice())
                .read_to_end(&mut out)
                .map_err(|e| format!("Flate decode failed: {}", e))?;
            out
        }
    };

    let expected = u64::from(candidate.width) * u64::from(candidate.height) * candidate.color.channels();
    if (raw.len() as u64) < expected {
        return Err(format!("sample data too short: {} < {}", raw.len(), expected));
    }
    let mut raw = raw;
    raw.truncate(expected as usize);

    let image = match candidate.color {
        ColorModel::Rgb => RgbImage::from_raw(candidate.width, candidate.height, raw).map(DynamicImage::ImageRgb8),
        ColorModel::Gray => GrayImage::from_raw(candidate.width, candidate.height, raw).map(DynamicImage::ImageLuma8),
    };
    image.ok_or_else(|| "sample buffer does not match dimensions".to_string())
}

fn encode_jpeg(img: &DynamicImage, color: ColorModel, quality: u8) -> Result<Vec<u8>, String> {
    let (samples, color_type) = match color {
        ColorModel::Rgb => (img.to_rgb8().into_raw(), ColorType::Rgb8),
        ColorModel::Gray => (img.to_luma8().into_raw(), ColorType::L8),
    };
    let mut output = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut output, quality.clamp(1, 100));
    encoder
        .encode(&samples, img.width(), img.height(), color_type)
        .map_err(|e| format!("JPEG encoding error: {}", e))?;
    Ok(output)
}

/// Returns `Ok(true)` when the stream was replaced by a smaller JPEG.
fn recompress_stream(stream: &mut Stream, scale: f32, quality: u8) -> Result<bool, String> {
    let candidate = match candidate(stream) {
        Some(candidate) => candidate,
        None => return Ok(false),
    };

    let mut img = decode(stream, &candidate)?;
    if scale < 1.0 {
        let width = ((candidate.width as f32 * scale).round() as u32).max(1);
        let height = ((candidate.height as f32 * scale).round() as u32).max(1);
        img = img.resize_exact(width, height, FilterType::Triangle);
    }

    let encoded = encode_jpeg(&img, candidate.color, quality)?;
    if encoded.len() >= stream.content.len() {
        return Ok(false);
    }

    stream.dict.set("Width", i64::from(img.width()));
    stream.dict.set("Height", i64::from(img.height()));
    stream.dict.set("BitsPerComponent", 8);
    stream.dict.set("ColorSpace", Object::Name(candidate.color.pdf_name().as_bytes().to_vec()));
    stream.dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
    stream.set_content(encoded);
    Ok(true)
}

/// Downsample every eligible image by `scale` and re-encode it at `quality`.
pub(crate) fn recompress_images(doc: &mut Document, scale: f32, quality: u8) -> (usize, Vec<DomainError>) {
    let image_ids: Vec<ObjectId> = doc
        .objects
        .iter()
        .filter_map(|(id, obj)| match obj {
            Object::Stream(stream) if candidate(stream).is_some() => Some(*id),
            _ => None,
        })
        .collect();

    let mut recompressed = 0;
    let mut failures = Vec::new();
    for id in image_ids {
        if let Some(Object::Stream(stream)) = doc.objects.get_mut(&id) {
            match recompress_stream(stream, scale, quality) {
                Ok(true) => recompressed += 1,
                Ok(false) => {}
                Err(message) => failures.push(DomainError::transform_step(
                    "image_recompress",
                    format!("object {:?}: {}", id, message),
                )),
            }
        }
    }
    (recompressed, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn raw_rgb_stream(width: u32, height: u32) -> Stream {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]);
            }
        }
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            data,
        )
    }

    #[test]
    fn raw_rgb_image_becomes_smaller_jpeg() {
        let mut stream = raw_rgb_stream(256, 128);
        let before = stream.content.len();

        assert!(recompress_stream(&mut stream, 0.5, 40).unwrap());

        assert!(stream.content.len() < before);
        assert!(matches!(stream.dict.get(b"Width"), Ok(Object::Integer(128))));
        assert!(matches!(stream.dict.get(b"Height"), Ok(Object::Integer(64))));
        assert_eq!(name_of(stream.dict.get(b"Filter").unwrap()), Some(b"DCTDecode".as_slice()));
        assert!(image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg).is_ok());
    }

    #[test]
    fn masked_and_indexed_images_are_skipped() {
        let mut masked = raw_rgb_stream(16, 16);
        masked.dict.set("ImageMask", true);
        assert!(candidate(&masked).is_none());

        let mut indexed = raw_rgb_stream(16, 16);
        indexed.dict.set("ColorSpace", Object::Array(vec![Object::Name(b"Indexed".to_vec())]));
        assert!(candidate(&indexed).is_none());
    }

    #[test]
    fn truncated_samples_are_reported() {
        let mut stream = raw_rgb_stream(32, 32);
        stream.set_content(vec![0u8; 10]);
        assert!(recompress_stream(&mut stream, 1.0, 50).is_err());
    }

    #[test]
    fn non_image_streams_are_ignored() {
        let mut doc = Document::with_version("1.5");
        doc.add_object(Stream::new(dictionary! {}, b"BT ET".to_vec()));
        let (count, failures) = recompress_images(&mut doc, 0.5, 40);
        assert_eq!(count, 0);
        assert!(failures.is_empty());
    }
}
