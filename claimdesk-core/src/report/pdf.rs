//! PDF serialization of a [`Layout`] with `lopdf`.
//!
//! Text uses the standard Type1 Helvetica faces with WinAnsi encoding, so no
//! font program is embedded. Images are raw RGB XObjects, one per decoded
//! photo, shared by every page through a single resource dictionary.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};

use super::images::DecodedImage;
use super::layout::{Color, Element, Layout};
use super::text::{encode, Face};
use super::RenderError;

fn real(v: f32) -> Object {
    Object::Real(v.into())
}

fn font(base: &str) -> Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => Object::Name(base.as_bytes().to_vec()),
        "Encoding" => "WinAnsiEncoding",
    }
}

fn image_name(index: usize) -> String {
    format!("Im{}", index)
}

fn text_ops(ops: &mut Vec<Operation>, x: f32, y: f32, face: Face, size: f32, color: Color, text: &str) {
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new(
        "Tf",
        vec![face.resource_name().into(), real(size)],
    ));
    ops.push(Operation::new(
        "rg",
        vec![real(color.0), real(color.1), real(color.2)],
    ));
    ops.push(Operation::new("Td", vec![real(x), real(y)]));
    ops.push(Operation::new("Tj", vec![Object::string_literal(encode(text))]));
    ops.push(Operation::new("ET", vec![]));
}

fn image_ops(ops: &mut Vec<Operation>, index: usize, x: f32, y: f32, width: f32, height: f32) {
    ops.push(Operation::new("q", vec![]));
    ops.push(Operation::new(
        "cm",
        vec![real(width), real(0.0), real(0.0), real(height), real(x), real(y)],
    ));
    ops.push(Operation::new("Do", vec![image_name(index).as_str().into()]));
    ops.push(Operation::new("Q", vec![]));
}

/// Serialize `layout` into PDF bytes. `images` is indexed by the layout's
/// image elements.
pub fn write_pdf(layout: &Layout, images: &[DecodedImage]) -> Result<Vec<u8>, RenderError> {
    let pdf_err = |e: lopdf::Error| RenderError::Pdf(e.to_string());

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular_id = doc.add_object(font("Helvetica"));
    let bold_id = doc.add_object(font("Helvetica-Bold"));

    let mut xobjects = Dictionary::new();
    for (index, image) in images.iter().enumerate() {
        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => image.width as i64,
                "Height" => image.height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8_i64,
            },
            image.rgb.clone(),
        );
        let id = doc.add_object(stream);
        xobjects.set(image_name(index), id);
    }

    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            Face::Regular.resource_name() => regular_id,
            Face::Bold.resource_name() => bold_id,
        },
        "XObject" => xobjects,
    });

    let mut kids: Vec<Object> = Vec::with_capacity(layout.pages.len());
    for page in &layout.pages {
        let mut ops = Vec::new();
        for element in &page.elements {
            match element {
                Element::Text { x, y, face, size, color, text } => {
                    text_ops(&mut ops, *x, *y, *face, *size, *color, text)
                }
                Element::Image { index, x, y, width, height } => {
                    if *index >= images.len() {
                        return Err(RenderError::Layout(format!(
                            "image {} placed but only {} decoded",
                            index,
                            images.len()
                        )));
                    }
                    image_ops(&mut ops, *index, *x, *y, *width, *height)
                }
            }
        }

        let content = Content { operations: ops };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().map_err(pdf_err)?,
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let g = layout.geometry;
    let page_count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
            "Resources" => resources_id,
            "MediaBox" => vec![real(0.0), real(0.0), real(g.page_width), real(g.page_height)],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| RenderError::Pdf(e.to_string()))?;
    Ok(bytes)
}
