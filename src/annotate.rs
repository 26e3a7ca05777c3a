use crate::{
    controller::SyncController,
    protocol::ClientMessage,
    shape::{annotated_path, Rect, ShapeId, ShapeType},
};
use image::{imageops, DynamicImage, Rgba, RgbaImage};
use std::io::Cursor;
use tracing::{debug, warn};

/// Raster scale for exports, relative to the image's display size.
const PIXEL_RATIO: f64 = 2.0;
/// Stroke thickness in output pixels.
const STROKE_RADIUS: i64 = 3;
const STROKE_COLOR: Rgba<u8> = Rgba([20, 20, 20, 255]);

/// One stroke overlapping an image, already shifted into image-local page coordinates.
struct LocalStroke {
    points: Vec<(f64, f64)>,
}

/// Recomputes the annotation state of every mapped image: images newly overlapped by freehand
/// strokes get a rasterized `<stem>_annotated.png` uploaded beside them; images whose strokes
/// have all gone get their export deleted. Everything here is best-effort — a failed export
/// leaves the canvas perfectly valid.
pub(crate) async fn run_scan(ctrl: &mut SyncController) {
    // Gather the work under the lock, do the I/O after
    struct Job {
        image_path: String,
        bounds: Rect,
        strokes: Vec<LocalStroke>,
    }
    let mut jobs: Vec<Job> = Vec::new();
    {
        let store = ctrl.store.lock();
        let images: Vec<(ShapeId, String)> = ctrl
            .path_map()
            .iter()
            .filter_map(|(id, path)| {
                let shape = store.shape(id)?;
                (shape.ty == ShapeType::Image).then(|| (id.clone(), path.to_string()))
            })
            .collect();
        for (image_id, image_path) in images {
            let Some(image_shape) = store.shape(&image_id) else {
                continue;
            };
            let bounds = store.page_bounds(image_shape);
            let strokes: Vec<LocalStroke> = store
                .shapes_of_type(&ShapeType::Draw)
                .filter(|d| d.parent_id == image_shape.parent_id)
                .filter(|d| store.page_bounds(d).intersects(&bounds))
                .map(|d| {
                    let page = store.page_bounds(d);
                    LocalStroke {
                        points: d
                            .props
                            .points
                            .iter()
                            .map(|(px, py)| (page.x + px - bounds.x, page.y + py - bounds.y))
                            .collect(),
                    }
                })
                .collect();
            jobs.push(Job {
                image_path,
                bounds,
                strokes,
            });
        }
    }

    for job in jobs {
        let has_export = ctrl.annotated.contains(&job.image_path);
        if !job.strokes.is_empty() {
            if has_export {
                continue;
            }
            match render_export(ctrl, &job.image_path, job.bounds, &job.strokes).await {
                Some(bytes) => {
                    let target = annotated_path(&job.image_path);
                    match ctrl.uploader.put(target.clone(), bytes).await {
                        Ok(()) => {
                            debug!("exported annotation '{target}'");
                            ctrl.annotated.insert(job.image_path);
                        }
                        Err(err) => warn!("couldn't write annotation export '{target}': {err}"),
                    }
                }
                None => warn!("couldn't render annotation export for '{}'", job.image_path),
            }
        } else if has_export {
            // The strokes are gone: retire the export
            debug!("strokes cleared, deleting annotation for '{}'", job.image_path);
            if let Some(change) = ctrl.retire_annotation(&job.image_path) {
                let _ = ctrl.outbound.send(ClientMessage::CanvasSync {
                    changes: vec![change],
                });
            }
        }
    }
}

/// Rasterizes the image plus its overlapping strokes at 2× the display size. [`None`] on any
/// decode or encode failure.
async fn render_export(
    ctrl: &SyncController,
    image_path: &str,
    bounds: Rect,
    strokes: &[LocalStroke],
) -> Option<Vec<u8>> {
    let abs = ctrl.workspace_root.join(image_path);
    let out_w = (bounds.w * PIXEL_RATIO).round().max(1.0) as u32;
    let out_h = (bounds.h * PIXEL_RATIO).round().max(1.0) as u32;
    let stroke_points: Vec<Vec<(f64, f64)>> = strokes
        .iter()
        .map(|s| {
            s.points
                .iter()
                .map(|(x, y)| (x * PIXEL_RATIO, y * PIXEL_RATIO))
                .collect()
        })
        .collect();

    tokio::task::spawn_blocking(move || {
        let mut canvas: RgbaImage = match image::open(&abs) {
            Ok(base) => imageops::resize(&base, out_w, out_h, imageops::FilterType::Triangle),
            // A base image we can't decode (e.g. svg) still gets its strokes exported
            Err(_) => RgbaImage::from_pixel(out_w, out_h, Rgba([255, 255, 255, 255])),
        };
        for points in &stroke_points {
            for pair in points.windows(2) {
                draw_segment(&mut canvas, pair[0], pair[1]);
            }
            if points.len() == 1 {
                plot(&mut canvas, points[0].0, points[0].1);
            }
        }
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(canvas)
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .ok()?;
        Some(out)
    })
    .await
    .ok()
    .flatten()
}

/// Plots a thick line segment by stamping discs along it.
fn draw_segment(canvas: &mut RgbaImage, from: (f64, f64), to: (f64, f64)) {
    let dx = to.0 - from.0;
    let dy = to.1 - from.1;
    let len = (dx * dx + dy * dy).sqrt();
    let steps = (len.ceil() as usize).max(1);
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        plot(canvas, from.0 + dx * t, from.1 + dy * t);
    }
}

fn plot(canvas: &mut RgbaImage, cx: f64, cy: f64) {
    let (w, h) = (canvas.width() as i64, canvas.height() as i64);
    let (cx, cy) = (cx.round() as i64, cy.round() as i64);
    for dx in -STROKE_RADIUS..=STROKE_RADIUS {
        for dy in -STROKE_RADIUS..=STROKE_RADIUS {
            if dx * dx + dy * dy > STROKE_RADIUS * STROKE_RADIUS {
                continue;
            }
            let (x, y) = (cx + dx, cy + dy);
            if x >= 0 && y >= 0 && x < w && y < h {
                canvas.put_pixel(x as u32, y as u32, STROKE_COLOR);
            }
        }
    }
}
