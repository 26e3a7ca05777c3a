use crate::{
    controller::{SyncController, TimerAction, ASSET_POLL_MAX, ASSET_POLL_MS, FADE_IN_MS},
    error::SyncError,
    layout,
    path_map::KnownMeta,
    protocol::FsEvent,
    shape::{
        prompt_path_for_image, AssetId, AssetRecord, ShapeId, ShapeRecord, ShapeType,
        FALLBACK_IMAGE_DIMS, MAX_IMAGE_DISPLAY_DIM,
    },
    store::Source,
};
use base64::Engine;
use futures::future::BoxFuture;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info, warn};

/// The result of uploading image bytes to the workspace: the (possibly deduplicated) relative
/// path they landed at, and the canonical src the editor loads them from.
#[derive(Clone, Debug)]
pub struct UploadedAsset {
    pub path: String,
    pub src: String,
}

/// The seam between the controller and wherever asset bytes actually go. The bundled server
/// writes through the watcher (marking the ignore set); tests substitute their own.
///
/// Passed into the controller at construction rather than reached through any global.
pub trait AssetUploader: Send + Sync {
    /// Stores image bytes under a desired filename, deduplicating against existing workspace
    /// entries. Returns where they ended up.
    fn upload(&self, name: String, bytes: Vec<u8>)
        -> BoxFuture<'static, std::io::Result<UploadedAsset>>;
    /// Writes bytes to an exact workspace path (used for annotation exports).
    fn put(&self, path: String, bytes: Vec<u8>) -> BoxFuture<'static, std::io::Result<()>>;
    /// Writes a text sidecar to an exact workspace path.
    fn put_text(&self, path: String, content: String) -> BoxFuture<'static, std::io::Result<()>>;
}

/// The canonical src for a workspace image path.
pub fn src_for(path: &str) -> String {
    format!("/assets/{path}")
}
/// Recovers the workspace path from a canonical src, dropping any cache-busting query.
pub fn src_to_rel(src: &str) -> &str {
    let src = src.strip_prefix("/assets/").unwrap_or(src);
    src.split_once('?').map(|(p, _)| p).unwrap_or(src)
}

/// Scales native dimensions down to display size, preserving aspect ratio. Images already
/// within bounds are untouched.
pub fn display_size(native_w: f64, native_h: f64) -> (f64, f64) {
    let longest = native_w.max(native_h);
    if longest <= MAX_IMAGE_DISPLAY_DIM || longest <= 0.0 {
        return (native_w, native_h);
    }
    let scale = MAX_IMAGE_DISPLAY_DIM / longest;
    (native_w * scale, native_h * scale)
}

/// Decodes an image file's dimensions without loading the pixels. [`None`] on any failure.
pub async fn decode_dimensions(abs: &Path) -> Option<(f64, f64)> {
    let path = abs.to_path_buf();
    tokio::task::spawn_blocking(move || image::image_dimensions(&path).ok())
        .await
        .ok()
        .flatten()
        .map(|(w, h)| (w as f64, h as f64))
}

/// Decodes dimensions straight from bytes (the upload path already has them in hand).
pub fn decode_dimensions_bytes(bytes: &[u8]) -> Option<(f64, f64)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
        .map(|(w, h)| (w as f64, h as f64))
}

/// Builds the asset + shape pair for an image file the filesystem announced. Returns the new
/// shape's id so the caller can batch the fade-in.
pub(crate) async fn create_image_shape(
    ctrl: &mut SyncController,
    event: &FsEvent,
) -> Option<ShapeId> {
    let abs = ctrl.workspace_root.join(&event.path);
    // A failed decode still creates the shape, at placeholder dimensions
    let (native_w, native_h) = decode_dimensions(&abs).await.unwrap_or(FALLBACK_IMAGE_DIMS);
    let (w, h) = display_size(native_w, native_h);

    let parent = ctrl.ensure_frame_for(&event.path);
    let asset_id = AssetId::mint();
    let shape_id = ShapeId::mint();
    let asset = AssetRecord {
        id: asset_id.clone(),
        src: Some(src_for(&event.path)),
        native_w,
        native_h,
        extra: serde_json::Map::new(),
    };
    let mut shape = ShapeRecord::new(shape_id.clone(), ShapeType::Image);
    shape.props.name = Some(crate::shape::path_to_name(&event.path).to_string());
    shape.props.asset_id = Some(asset_id);
    shape.props.w = w;
    shape.props.h = h;
    shape.opacity = 0.0;
    shape.parent_id = parent.clone();

    let mut store = ctrl.store.lock();
    let (x, y) = match &parent {
        Some(frame) => layout::place_in_frame(&store, frame, (w, h), &[]),
        None => layout::place_root(&store, (w, h)),
    };
    shape.x = x;
    shape.y = y;
    store.transact(Source::Remote, |txn| {
        txn.put_asset(asset);
        txn.put_shape(shape);
    });
    drop(store);

    if let Err(err) = ctrl.map.assign(shape_id.clone(), event.path.clone()) {
        warn!("couldn't map image shape for '{}': {err}", event.path);
        return None;
    }
    info!("created image shape for '{}' at {native_w}x{native_h}", event.path);
    Some(shape_id)
}

/// A mapped image file changed on disk: recompute its dimensions and rebind the asset with a
/// cache-busting query so the editor's decoder reloads it.
pub(crate) async fn rebind_modified_image(
    ctrl: &mut SyncController,
    shape_id: &ShapeId,
    event: &FsEvent,
) {
    let abs = ctrl.workspace_root.join(&event.path);
    let (native_w, native_h) = decode_dimensions(&abs).await.unwrap_or(FALLBACK_IMAGE_DIMS);
    let (w, h) = display_size(native_w, native_h);
    let src = format!(
        "{}?v={}",
        src_for(&event.path),
        event.mtime_ms.unwrap_or(event.timestamp)
    );

    let asset_id = {
        let store = ctrl.store.lock();
        store
            .shape(shape_id)
            .and_then(|s| s.props.asset_id.clone())
    };
    let Some(asset_id) = asset_id else {
        return;
    };
    debug!("rebinding modified image '{}'", event.path);
    let mut store = ctrl.store.lock();
    store.transact(Source::Remote, |txn| {
        txn.update_asset(&asset_id, |a| {
            a.src = Some(src.clone());
            a.native_w = native_w;
            a.native_h = native_h;
        });
        txn.update_shape(shape_id, |s| {
            s.props.w = w;
            s.props.h = h;
        });
    });
}

/// One step of the asset-src binding poll for an upload-originated image. Registers the
/// mapping once the src appears, retries up to the cap, then gives up silently.
pub(crate) fn poll_asset_src(
    ctrl: &mut SyncController,
    asset: AssetId,
    shape: ShapeId,
    attempt: u32,
) {
    let src = {
        let store = ctrl.store.lock();
        store.asset(&asset).and_then(|a| a.src.clone())
    };
    match src {
        Some(src) => register_uploaded_image(ctrl, shape, &src),
        None if attempt + 1 < ASSET_POLL_MAX => {
            ctrl.schedule(
                ASSET_POLL_MS,
                TimerAction::AssetSrcPoll {
                    asset,
                    shape,
                    attempt: attempt + 1,
                },
            );
        }
        None => {
            debug!("asset {asset} never bound a src, giving up on mapping {shape}");
        }
    }
}

/// Registers the shape→path mapping for an image whose asset src just bound.
pub(crate) fn register_uploaded_image(ctrl: &mut SyncController, shape: ShapeId, src: &str) {
    let path = src_to_rel(src).to_string();
    if ctrl.map.contains_path(&path) || ctrl.map.path_for(&shape).is_some() {
        return;
    }
    match ctrl.map.assign(shape.clone(), path.clone()) {
        Ok(()) => {
            ctrl.map.record_known(path.clone(), KnownMeta::default());
            info!("registered uploaded image mapping {shape} -> '{path}'");
            ctrl.schedule_snapshot();
        }
        Err(err) => warn!("couldn't register uploaded image at '{path}': {err}"),
    }
}

impl SyncController {
    /// Adds an image to the canvas from base64 data (with or without a data-URL prefix),
    /// uploading the bytes to the workspace, writing the prompt sidecar when one is given, and
    /// creating the asset + shape. Fails loudly: the user explicitly asked for this one.
    pub async fn add_image_from_base64(
        &mut self,
        name: &str,
        data: &str,
        prompt: Option<&str>,
    ) -> Result<ShapeId, SyncError> {
        let raw = data.split_once(',').map(|(_, d)| d).unwrap_or(data);
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(raw.trim())
            .map_err(|err| SyncError::BadImageData {
                name: name.to_string(),
                err,
            })?;

        let uploaded = self
            .uploader
            .upload(name.to_string(), bytes.clone())
            .await
            .map_err(|err| SyncError::UploadFailed {
                name: name.to_string(),
                err,
            })?;

        if let Some(prompt) = prompt {
            // The sidecar is a convenience record; its failure shouldn't undo the upload
            if let Err(err) = self
                .uploader
                .put_text(prompt_path_for_image(&uploaded.path), prompt.to_string())
                .await
            {
                warn!("couldn't write prompt sidecar for '{}': {err}", uploaded.path);
            }
        }

        let (native_w, native_h) =
            decode_dimensions_bytes(&bytes).unwrap_or(FALLBACK_IMAGE_DIMS);
        let (w, h) = display_size(native_w, native_h);

        let asset_id = AssetId::mint();
        let shape_id = ShapeId::mint();
        let asset = AssetRecord {
            id: asset_id.clone(),
            src: Some(uploaded.src.clone()),
            native_w,
            native_h,
            extra: serde_json::Map::new(),
        };
        let mut shape = ShapeRecord::new(shape_id.clone(), ShapeType::Image);
        shape.props.name = Some(crate::shape::path_to_name(&uploaded.path).to_string());
        shape.props.asset_id = Some(asset_id);
        shape.props.w = w;
        shape.props.h = h;
        shape.opacity = 0.0;

        let mut store = self.store.lock();
        let (x, y) = layout::place_root(&store, (w, h));
        shape.x = x;
        shape.y = y;
        store.transact(Source::Remote, |txn| {
            txn.put_asset(asset);
            txn.put_shape(shape);
        });
        drop(store);

        self.map
            .assign(shape_id.clone(), uploaded.path.clone())
            .map_err(|_| SyncError::DuplicatePath {
                path: uploaded.path.clone(),
            })?;
        self.map.record_known(
            uploaded.path.clone(),
            KnownMeta {
                size: Some(bytes.len() as u64),
                ..KnownMeta::default()
            },
        );
        self.schedule(FADE_IN_MS, TimerAction::FadeIn(vec![shape_id.clone()]));
        self.schedule_snapshot();
        Ok(shape_id)
    }
}
