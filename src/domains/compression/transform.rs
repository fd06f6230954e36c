//! In-place transforms applied to a freshly loaded PDF.
//!
//! Every step is isolated: a failure is recorded in the [`TransformReport`]
//! and the remaining steps still run.

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::errors::{DomainError, DomainResult};
use super::images;
use super::types::CompressionProfile;

/// Pages are never shrunk below this side length (points).
pub const MIN_PAGE_SIDE: f32 = 72.0;

const INFO_TEXT_KEYS: [&str; 6] = ["Title", "Subject", "Keywords", "Author", "Producer", "Creator"];
const INFO_DATE_KEYS: [&str; 2] = ["CreationDate", "ModDate"];
const EPOCH_PDF_DATE: &str = "D:19700101000000Z";

const PAGE_STRUCTURE_KEYS: [&[u8]; 3] = [b"Annots", b"Tabs", b"StructParents"];
const CATALOG_STRUCTURE_KEYS: [&[u8]; 3] = [b"OCProperties", b"StructTreeRoot", b"MarkInfo"];
const PRINT_BOX_KEYS: [&[u8]; 3] = [b"BleedBox", b"TrimBox", b"ArtBox"];
const ANNOTATION_GEOMETRY_KEYS: [&[u8]; 2] = [b"Rect", b"QuadPoints"];

/// Parameters for one pass of the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformPlan {
    pub scale: f32,
    pub quality: u8,
    pub remove_metadata: bool,
    pub remove_annotations: bool,
    pub recompress_images: bool,
    pub max_page_width: f32,
    pub max_page_height: f32,
}

impl TransformPlan {
    pub fn from_profile(profile: &CompressionProfile) -> Self {
        Self {
            scale: profile.scale,
            quality: profile.quality,
            remove_metadata: profile.remove_metadata,
            remove_annotations: profile.remove_annotations,
            recompress_images: profile.recompress_images,
            max_page_width: profile.max_page_width,
            max_page_height: profile.max_page_height,
        }
    }

    pub fn with_scale(self, scale: f32) -> Self {
        Self { scale, ..self }
    }
}

/// What one pass managed to do
#[derive(Debug, Default)]
pub struct TransformReport {
    pub metadata_stripped: bool,
    pub pages_scaled: usize,
    pub pages_skipped: usize,
    pub structures_removed: usize,
    pub images_recompressed: usize,
    pub objects_pruned: usize,
    pub failures: Vec<DomainError>,
}

impl TransformReport {
    fn fail(&mut self, error: DomainError) {
        log::warn!("{}", error);
        self.failures.push(error);
    }
}

pub struct PageTransformEngine;

impl PageTransformEngine {
    pub fn apply(doc: &mut Document, plan: &TransformPlan) -> TransformReport {
        let mut report = TransformReport::default();

        if plan.remove_metadata {
            Self::strip_metadata_into(doc, &mut report);
        }

        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        for page_id in page_ids {
            match scale_page(doc, page_id, plan) {
                Ok(true) => report.pages_scaled += 1,
                Ok(false) => report.pages_skipped += 1,
                Err(e) => report.fail(e),
            }
            if plan.remove_annotations {
                match strip_page_structure(doc, page_id) {
                    Ok(removed) => report.structures_removed += removed,
                    Err(e) => report.fail(e),
                }
            }
        }

        if plan.remove_annotations {
            match strip_catalog_structure(doc) {
                Ok(removed) => report.structures_removed += removed,
                Err(e) => report.fail(e),
            }
        }

        if plan.recompress_images {
            let (recompressed, failures) = images::recompress_images(doc, plan.scale, plan.quality);
            report.images_recompressed = recompressed;
            for failure in failures {
                report.fail(failure);
            }
        }

        doc.delete_zero_length_streams();
        report.objects_pruned = doc.prune_objects().len();
        doc.compress();

        report
    }

    /// Metadata step on its own, for documents produced by an external tool
    pub fn strip_metadata(doc: &mut Document) -> TransformReport {
        let mut report = TransformReport::default();
        Self::strip_metadata_into(doc, &mut report);
        report
    }

    fn strip_metadata_into(doc: &mut Document, report: &mut TransformReport) {
        match clear_info_fields(doc) {
            Ok(()) => report.metadata_stripped = true,
            Err(e) => report.fail(e),
        }
        if let Err(e) = reset_timestamps(doc) {
            report.fail(e);
        }
        if let Err(e) = drop_xmp_metadata(doc) {
            report.fail(e);
        }
    }
}

fn catalog_id(doc: &Document, step: &str) -> DomainResult<ObjectId> {
    doc.trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|e| DomainError::transform_step(step, format!("no catalog: {}", e)))
}

/// Trailer `/Info`, either indirect or inline. `None` when the document has none.
fn info_dictionary_mut<'a>(doc: &'a mut Document, step: &str) -> DomainResult<Option<&'a mut Dictionary>> {
    let info_ref = match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) => Some(*id),
        Ok(Object::Dictionary(_)) => None,
        Ok(_) => return Err(DomainError::transform_step(step, "Info is not a dictionary")),
        Err(_) => return Ok(None),
    };
    match info_ref {
        Some(id) => doc
            .get_dictionary_mut(id)
            .map(Some)
            .map_err(|e| DomainError::transform_step(step, e)),
        None => match doc.trailer.get_mut(b"Info") {
            Ok(Object::Dictionary(dict)) => Ok(Some(dict)),
            _ => Ok(None),
        },
    }
}

fn clear_info_fields(doc: &mut Document) -> DomainResult<()> {
    if let Some(info) = info_dictionary_mut(doc, "metadata_strip")? {
        for key in INFO_TEXT_KEYS {
            info.set(key, Object::string_literal(""));
        }
    }
    Ok(())
}

fn reset_timestamps(doc: &mut Document) -> DomainResult<()> {
    if let Some(info) = info_dictionary_mut(doc, "timestamp_reset")? {
        for key in INFO_DATE_KEYS {
            if info.has(key.as_bytes()) {
                info.set(key, Object::string_literal(EPOCH_PDF_DATE));
            }
        }
    }
    Ok(())
}

fn drop_xmp_metadata(doc: &mut Document) -> DomainResult<()> {
    let root = catalog_id(doc, "xmp_metadata")?;
    let catalog = doc
        .get_dictionary_mut(root)
        .map_err(|e| DomainError::transform_step("xmp_metadata", e))?;
    catalog.remove(b"Metadata");
    Ok(())
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn rectangle(doc: &Document, obj: &Object) -> Option<[f32; 4]> {
    let values = resolve(doc, obj).as_array().ok()?;
    if values.len() != 4 {
        return None;
    }
    let mut rect = [0.0; 4];
    for (slot, value) in rect.iter_mut().zip(values) {
        *slot = number(resolve(doc, value))?;
    }
    Some(rect)
}

/// Page box, following `/Parent` for inherited attributes.
pub(crate) fn page_box(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<[f32; 4]> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    // page trees are shallow; the bound only guards against Parent cycles
    for _ in 0..64 {
        if let Ok(value) = current.get(key) {
            return rectangle(doc, value);
        }
        let parent = current.get(b"Parent").and_then(Object::as_reference).ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn scaled_rect(rect: [f32; 4], factor: f32) -> Object {
    Object::Array(rect.iter().map(|v| Object::from(v * factor)).collect())
}

/// Factor applied to both content and box of one page. `None` leaves the page alone.
fn page_factor(media_box: [f32; 4], plan: &TransformPlan) -> Option<f32> {
    let width = (media_box[2] - media_box[0]).abs();
    let height = (media_box[3] - media_box[1]).abs();
    if width <= 0.0 || height <= 0.0 {
        return None;
    }

    let mut factor = plan
        .scale
        .min(plan.max_page_width / width)
        .min(plan.max_page_height / height);

    let shortest = width.min(height);
    if shortest * factor < MIN_PAGE_SIDE {
        factor = MIN_PAGE_SIDE / shortest;
    }
    if factor >= 1.0 || !factor.is_finite() {
        return None;
    }
    Some(factor)
}

fn scale_page(doc: &mut Document, page_id: ObjectId, plan: &TransformPlan) -> DomainResult<bool> {
    let media_box = page_box(doc, page_id, b"MediaBox")
        .ok_or_else(|| DomainError::transform_step("page_resize", format!("page {:?} has no usable MediaBox", page_id)))?;
    let factor = match page_factor(media_box, plan) {
        Some(factor) => factor,
        None => return Ok(false),
    };

    // content and box must agree, so a failed content scale skips the resize
    scale_page_content(doc, page_id, factor)?;

    let crop_box = page_box(doc, page_id, b"CropBox");
    let page = doc
        .get_dictionary_mut(page_id)
        .map_err(|e| DomainError::transform_step("page_resize", e))?;
    page.set("MediaBox", scaled_rect(media_box, factor));
    if let Some(crop_box) = crop_box {
        page.set("CropBox", scaled_rect(crop_box, factor));
    }
    for key in PRINT_BOX_KEYS {
        page.remove(key);
    }

    scale_annotations(doc, page_id, factor);
    Ok(true)
}

fn scale_numbers(values: &mut [Object], factor: f32) {
    for value in values.iter_mut() {
        if let Some(n) = number(value) {
            *value = Object::from(n * factor);
        }
    }
}

fn scale_annotation(annot: &mut Dictionary, factor: f32) {
    for key in ANNOTATION_GEOMETRY_KEYS {
        if let Ok(Object::Array(values)) = annot.get_mut(key) {
            scale_numbers(values, factor);
        }
    }
}

/// Kept annotations follow the page into its new coordinate space.
fn scale_annotations(doc: &mut Document, page_id: ObjectId, factor: f32) {
    let annots = match doc.get_dictionary(page_id).and_then(|page| page.get(b"Annots")) {
        Ok(Object::Reference(id)) => doc.get_object(*id).ok().cloned(),
        Ok(obj) => Some(obj.clone()),
        Err(_) => None,
    };
    let entries = match annots {
        Some(Object::Array(entries)) => entries,
        _ => return,
    };

    let mut inline = false;
    for entry in &entries {
        match entry {
            Object::Reference(id) => {
                if let Ok(annot) = doc.get_dictionary_mut(*id) {
                    scale_annotation(annot, factor);
                }
            }
            Object::Dictionary(_) => inline = true,
            _ => {}
        }
    }

    if inline {
        if let Ok(Object::Array(entries)) = doc
            .get_dictionary_mut(page_id)
            .and_then(|page| page.get_mut(b"Annots"))
        {
            for entry in entries.iter_mut() {
                if let Object::Dictionary(annot) = entry {
                    scale_annotation(annot, factor);
                }
            }
        }
    }
}

fn scale_page_content(doc: &mut Document, page_id: ObjectId, factor: f32) -> DomainResult<()> {
    let content = doc
        .get_page_content(page_id)
        .map_err(|e| DomainError::transform_step("content_scale", e))?;

    let mut scaled = format!("q {f:.4} 0 0 {f:.4} 0 0 cm\n", f = factor).into_bytes();
    scaled.extend_from_slice(&content);
    scaled.extend_from_slice(b"\nQ\n");

    let stream_id = doc.add_object(Stream::new(Dictionary::new(), scaled));
    let page = doc
        .get_dictionary_mut(page_id)
        .map_err(|e| DomainError::transform_step("content_scale", e))?;
    page.set("Contents", Object::Reference(stream_id));
    Ok(())
}

fn strip_page_structure(doc: &mut Document, page_id: ObjectId) -> DomainResult<usize> {
    let page = doc
        .get_dictionary_mut(page_id)
        .map_err(|e| DomainError::transform_step("structure_strip", e))?;
    Ok(PAGE_STRUCTURE_KEYS
        .iter()
        .filter_map(|key| page.remove(key))
        .count())
}

fn strip_catalog_structure(doc: &mut Document) -> DomainResult<usize> {
    let root = catalog_id(doc, "structure_strip")?;
    let catalog = doc
        .get_dictionary_mut(root)
        .map_err(|e| DomainError::transform_step("structure_strip", e))?;
    Ok(CATALOG_STRUCTURE_KEYS
        .iter()
        .filter_map(|key| catalog.remove(key))
        .count())
}
