//! Export of finalized pages to PNG/JPG/PDF.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::RgbImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use scorecap_models::{ExportFormat, ExportOptions, FillMode};

use crate::error::{MediaError, MediaResult};
use crate::finalize::{finalize_sheet_pages, page_ratio_from_env};
use crate::fs_utils::ensure_dir;
use crate::imgops;
use crate::StageLogger;

/// JPEG quality for exported page images.
const JPG_QUALITY: u8 = 95;

/// JPEG quality for pages embedded in the PDF.
const PDF_JPG_QUALITY: u8 = 86;

/// Pages longer than this on their long edge are shrunk before PDF embed.
const PDF_MAX_EDGE: u32 = 2400;

/// PDF raster resolution.
const PDF_DPI: f64 = 150.0;

/// Files produced by the export stage.
#[derive(Debug, Clone, Default)]
pub struct ExportOutcome {
    pub images: Vec<PathBuf>,
    pub pdf: Option<PathBuf>,
    pub raw_frames: Vec<PathBuf>,
    pub complete_sheet: Option<PathBuf>,
}

/// Finalize the captured pages and write every requested format.
///
/// Previous exports in the target directory are cleared first.
pub fn export_pages(
    page_paths: &[PathBuf],
    options: &ExportOptions,
    workspace: &Path,
    source_frames: Option<&[PathBuf]>,
    logger: &dyn StageLogger,
) -> MediaResult<ExportOutcome> {
    ensure_dir(workspace)?;
    let image_dir = workspace.join("images");
    clear_previous_exports(workspace, &image_dir)?;

    let mut outcome = ExportOutcome::default();

    if options.include_raw_frames {
        if let Some(frames) = source_frames {
            let raw_dir = workspace.join("raw_frames");
            ensure_dir(&raw_dir)?;
            for (idx, source) in frames.iter().enumerate() {
                let target = raw_dir.join(format!("raw_{idx:05}.png"));
                std::fs::copy(source, &target)?;
                outcome.raw_frames.push(target);
            }
        }
    }

    let inputs: Vec<RgbImage> = page_paths
        .iter()
        .filter_map(|path| imgops::load_rgb(path).ok())
        .collect();
    let finalized = finalize_sheet_pages(
        &inputs,
        options.fill_mode,
        page_ratio_from_env(),
        logger,
    );

    let wants_png = options.wants(ExportFormat::Png);
    let wants_jpg = options.wants(ExportFormat::Jpg);
    let wants_pdf = options.wants(ExportFormat::Pdf);

    for (idx, page) in finalized.pages.iter().enumerate() {
        let number = idx + 1;
        if wants_png {
            let out = image_dir.join(format!("page_{number:04}.png"));
            imgops::save_png(page, &out)?;
            outcome.images.push(out);
        }
        if wants_jpg {
            let out = image_dir.join(format!("page_{number:04}.jpg"));
            imgops::save_jpg(page, &out, JPG_QUALITY)?;
            outcome.images.push(out);
        }
    }

    if wants_png {
        if let Some(sheet) = finalized.complete_sheet.as_ref() {
            let out = workspace.join("sheet_complete.png");
            imgops::save_png(sheet, &out)?;
            outcome.complete_sheet = Some(out);
        }
    }

    if wants_pdf && !finalized.pages.is_empty() {
        let pdf_path = workspace.join("sheet_export.pdf");
        write_pdf(&finalized.pages, &pdf_path)?;
        outcome.pdf = Some(pdf_path);
    }

    if outcome.images.is_empty() && outcome.pdf.is_none() && outcome.raw_frames.is_empty() {
        return Err(MediaError::EmptyExport);
    }
    logger.log(&format!("exported {} images", outcome.images.len()));
    Ok(outcome)
}

/// Re-export a kept subset of already-finalized page images.
///
/// Review keeps run after the job, so the inputs are final pages already:
/// the finalizer is not re-applied, only formats are rewritten.
pub fn review_export(
    kept_paths: &[PathBuf],
    formats: &[ExportFormat],
    workspace: &Path,
    logger: &dyn StageLogger,
) -> MediaResult<ExportOutcome> {
    ensure_dir(workspace)?;
    let image_dir = workspace.join("images");

    // Kept pages usually live inside the export tree being rewritten, so
    // load them before clearing anything.
    let pages: Vec<RgbImage> = kept_paths
        .iter()
        .map(imgops::load_rgb)
        .collect::<MediaResult<_>>()?;
    if pages.is_empty() {
        return Err(MediaError::EmptyExport);
    }
    clear_previous_exports(workspace, &image_dir)?;

    let wants_png = formats.contains(&ExportFormat::Png);
    let wants_jpg = formats.contains(&ExportFormat::Jpg);
    let wants_pdf = formats.contains(&ExportFormat::Pdf);

    let mut outcome = ExportOutcome::default();
    for (idx, page) in pages.iter().enumerate() {
        let number = idx + 1;
        if wants_png {
            let out = image_dir.join(format!("page_{number:04}.png"));
            imgops::save_png(page, &out)?;
            outcome.images.push(out);
        }
        if wants_jpg {
            let out = image_dir.join(format!("page_{number:04}.jpg"));
            imgops::save_jpg(page, &out, JPG_QUALITY)?;
            outcome.images.push(out);
        }
    }
    if wants_pdf {
        let pdf_path = workspace.join("sheet_export.pdf");
        write_pdf(&pages, &pdf_path)?;
        outcome.pdf = Some(pdf_path);
    }

    if outcome.images.is_empty() && outcome.pdf.is_none() {
        return Err(MediaError::EmptyExport);
    }
    logger.log(&format!(
        "review export rewrote {} pages",
        pages.len()
    ));
    Ok(outcome)
}

fn clear_previous_exports(workspace: &Path, image_dir: &Path) -> MediaResult<()> {
    if image_dir.is_dir() {
        std::fs::remove_dir_all(image_dir)?;
    }
    ensure_dir(image_dir)?;
    for stale in ["sheet_export.pdf", "sheet_complete.png"] {
        let path = workspace.join(stale);
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
    }
    let raw_dir = workspace.join("raw_frames");
    if raw_dir.is_dir() {
        std::fs::remove_dir_all(&raw_dir)?;
    }
    Ok(())
}

/// Assemble a multi-page PDF with one JPEG-compressed image per page.
pub fn write_pdf(pages: &[RgbImage], path: &Path) -> MediaResult<()> {
    if pages.is_empty() {
        return Err(MediaError::Pdf("no pages available for PDF export".to_string()));
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();

    for (idx, page) in pages.iter().enumerate() {
        let embedded = shrink_for_pdf(page);
        let (w, h) = embedded.dimensions();
        let jpeg = imgops::encode_jpg_buffer(&embedded, PDF_JPG_QUALITY)?;

        let image_stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => w as i64,
                "Height" => h as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg,
        );
        let image_id = doc.add_object(image_stream);

        let pt_w = (w as f64 * 72.0 / PDF_DPI).round().max(1.0) as i64;
        let pt_h = (h as f64 * 72.0 / PDF_DPI).round().max(1.0) as i64;
        let name = format!("Im{idx}");

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        pt_w.into(),
                        0.into(),
                        0.into(),
                        pt_h.into(),
                        0.into(),
                        0.into(),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(name.clone().into_bytes())]),
                Operation::new("Q", vec![]),
            ],
        };
        let encoded = content
            .encode()
            .map_err(|e| MediaError::Pdf(e.to_string()))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

        let mut xobjects = Dictionary::new();
        xobjects.set(name.into_bytes(), Object::Reference(image_id));
        let mut resources = Dictionary::new();
        resources.set("XObject", Object::Dictionary(xobjects));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => Object::Dictionary(resources),
            "MediaBox" => vec![0.into(), 0.into(), pt_w.into(), pt_h.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).map_err(|e| MediaError::Pdf(e.to_string()))?;
    Ok(())
}

fn shrink_for_pdf(page: &RgbImage) -> RgbImage {
    let (w, h) = page.dimensions();
    let long_edge = w.max(h);
    if long_edge <= PDF_MAX_EDGE {
        return page.clone();
    }
    let scale = PDF_MAX_EDGE as f64 / long_edge as f64;
    imgops::resize_rgb(
        page,
        ((w as f64 * scale).round() as u32).max(1),
        ((h as f64 * scale).round() as u32).max(1),
        FilterType::Triangle,
    )
}
