//! In-memory PDFs for tests.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::path::{Path, PathBuf};

pub struct FixtureOptions {
    pub pages: usize,
    pub with_info: bool,
    /// Highly compressible filler, uncompressed in the file
    pub filler_bytes: usize,
    /// Random bytes no codec can shrink
    pub noise_bytes: usize,
    /// Raw RGB image drawn on the first page
    pub image: Option<(u32, u32)>,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            pages: 2,
            with_info: true,
            filler_bytes: 0,
            noise_bytes: 0,
            image: None,
        }
    }
}

fn form_xobject(content: Vec<u8>) -> Stream {
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => vec![0.into(), 0.into(), 10.into(), 10.into()],
        },
        content,
    )
}

pub fn build_pdf(options: &FixtureOptions) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut xobjects = lopdf::Dictionary::new();
    if options.filler_bytes > 0 {
        let line = b"0 0 m 10 10 l S\n";
        let filler: Vec<u8> = line.iter().copied().cycle().take(options.filler_bytes).collect();
        xobjects.set("Fx0", doc.add_object(form_xobject(filler)));
    }
    if options.noise_bytes > 0 {
        let mut noise = vec![0u8; options.noise_bytes];
        StdRng::seed_from_u64(7).fill_bytes(&mut noise);
        xobjects.set("Fx1", doc.add_object(form_xobject(noise)));
    }
    if let Some((width, height)) = options.image {
        let mut samples = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                samples.extend_from_slice(&[(x % 251) as u8, (y % 241) as u8, ((x * y) % 239) as u8]);
            }
        }
        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            samples,
        );
        xobjects.set("Im0", doc.add_object(image));
    }

    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
        "XObject" => xobjects,
    });

    let mut kids = Vec::new();
    for index in 0..options.pages.max(1) {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 18.into()]),
            Operation::new("Td", vec![72.into(), 760.into()]),
            Operation::new("Tj", vec![Object::string_literal(format!("Bid document page {}", index + 1))]),
            Operation::new("ET", vec![]),
        ];
        if index == 0 && options.image.is_some() {
            operations.extend([
                Operation::new("q", vec![]),
                Operation::new("cm", vec![400.into(), 0.into(), 0.into(), 300.into(), 72.into(), 300.into()]),
                Operation::new("Do", vec!["Im0".into()]),
                Operation::new("Q", vec![]),
            ]);
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let annot_id = doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "Rect" => vec![72.into(), 700.into(), 300.into(), 720.into()],
        });
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Annots" => vec![annot_id.into()],
            "StructParents" => index as i64,
            "Tabs" => "S",
        });
        kids.push(page_id.into());
    }

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => options.pages.max(1) as i64,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let xmp_id = doc.add_object(Stream::new(
        dictionary! { "Type" => "Metadata", "Subtype" => "XML" },
        b"<x:xmpmeta xmlns:x=\"adobe:ns:meta/\"><dc:title>Tender 2024/117</dc:title></x:xmpmeta>".to_vec(),
    ));
    let struct_tree_id = doc.add_object(dictionary! { "Type" => "StructTreeRoot" });
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
        "Metadata" => xmp_id,
        "StructTreeRoot" => struct_tree_id,
        "MarkInfo" => dictionary! { "Marked" => true },
        "OCProperties" => dictionary! {
            "OCGs" => Vec::<Object>::new(),
            "D" => dictionary! { "Order" => Vec::<Object>::new() },
        },
    });
    doc.trailer.set("Root", catalog_id);

    if options.with_info {
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal("Tender 2024/117"),
            "Author" => Object::string_literal("Procurement Cell"),
            "Producer" => Object::string_literal("SquidJob Upload"),
            "Creator" => Object::string_literal("Scanner"),
            "CreationDate" => Object::string_literal("D:20240301120000Z"),
        });
        doc.trailer.set("Info", info_id);
    }

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

pub fn write_pdf(dir: &Path, name: &str, options: &FixtureOptions) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, build_pdf(options)).unwrap();
    path
}

/// Executable stand-in for Ghostscript. `$out` and `$last` (the input) are set
/// before `body` runs; `--version` always succeeds.
#[cfg(unix)]
pub fn write_fake_tool(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-gs");
    let script = format!(
        "#!/bin/sh\nout=\"\"\nlast=\"\"\nfor arg in \"$@\"; do\n  case \"$arg\" in\n    --version) echo \"10.02.1\"; exit 0 ;;\n    -sOutputFile=*) out=\"${{arg#-sOutputFile=}}\" ;;\n  esac\n  last=\"$arg\"\ndone\n{}\n",
        body
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
