//! Neural ball detector: dual-backend dispatch, shared model lifecycle,
//! letterboxed single-image inference and tiled (sliced) inference.

pub mod letterbox;
pub mod nms;
pub mod session;
pub mod tiling;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use image::RgbImage;

use crate::ball::Circle;
use crate::config::{DetectionMethod, OnnxBackend, OnnxSection};
use crate::DetectError;

use letterbox::letterbox;
use nms::{single_class_nms, BBox};
use session::NeuralModel;
use tiling::tile_grid;

/// Process-wide model slot for one backend profile.
///
/// The ready flag is read with acquire ordering as the lock-free fast path;
/// construction happens once under the mutex and publishes with release.
struct ModelSlot {
    ready: AtomicBool,
    model: Mutex<Option<Arc<NeuralModel>>>,
}

impl ModelSlot {
    const fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            model: Mutex::new(None),
        }
    }

    fn get_or_load(&self, cfg: &OnnxSection, backend: OnnxBackend) -> Result<Arc<NeuralModel>, DetectError> {
        if self.ready.load(Ordering::Acquire) {
            if let Some(model) = self.model.lock().unwrap().as_ref() {
                return Ok(Arc::clone(model));
            }
        }
        let mut slot = self.model.lock().unwrap();
        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }
        let model = Arc::new(NeuralModel::load(cfg, backend)?);
        *slot = Some(Arc::clone(&model));
        self.ready.store(true, Ordering::Release);
        Ok(model)
    }

    fn release(&self) {
        let mut slot = self.model.lock().unwrap();
        self.ready.store(false, Ordering::Release);
        *slot = None;
    }
}

static PRIMARY: ModelSlot = ModelSlot::new();
static FALLBACK: ModelSlot = ModelSlot::new();

fn slot_for(backend: OnnxBackend) -> &'static ModelSlot {
    match backend {
        OnnxBackend::Primary => &PRIMARY,
        OnnxBackend::Fallback => &FALLBACK,
    }
}

/// Shared model handle for `backend`, loading it on first use.
pub fn shared_model(cfg: &OnnxSection, backend: OnnxBackend) -> Result<Arc<NeuralModel>, DetectError> {
    slot_for(backend).get_or_load(cfg, backend)
}

/// Eagerly load the configured backend's model at startup so the first
/// detection does not pay the load cost.
pub fn preload_model(cfg: &OnnxSection) -> Result<(), DetectError> {
    shared_model(cfg, cfg.backend).map(|_| ())
}

/// Drop all shared model handles. Intended for process shutdown.
pub fn release_models() {
    PRIMARY.release();
    FALLBACK.release();
    tracing::info!("released neural detector models");
}

/// Detect on the configured backend, retrying on the fallback profile when
/// the primary fails and auto-fallback is enabled.
pub fn detect_circles_with_fallback(
    cfg: &OnnxSection,
    method: DetectionMethod,
    image: &RgbImage,
) -> Result<Vec<Circle>, DetectError> {
    match detect_circles(cfg, cfg.backend, method, image) {
        Ok(circles) => Ok(circles),
        Err(e) if cfg.backend == OnnxBackend::Primary && cfg.runtime.auto_fallback => {
            tracing::warn!("primary backend failed ({e}), retrying on fallback profile");
            detect_circles(cfg, OnnxBackend::Fallback, method, image)
        }
        Err(e) => Err(e),
    }
}

/// Detect on one specific backend profile.
pub fn detect_circles(
    cfg: &OnnxSection,
    backend: OnnxBackend,
    method: DetectionMethod,
    image: &RgbImage,
) -> Result<Vec<Circle>, DetectError> {
    let model = shared_model(cfg, backend)?;
    match method {
        DetectionMethod::ExperimentalSahi => detect_tiled(cfg, &model, image),
        _ => detect_single(cfg, &model, image),
    }
}

/// Run one letterboxed inference over `region` and append confident boxes
/// (source coordinates, translated by `origin`) to the output lists.
fn infer_into(
    cfg: &OnnxSection,
    model: &NeuralModel,
    region: &RgbImage,
    origin: (f32, f32),
    boxes: &mut Vec<BBox>,
    confidences: &mut Vec<f32>,
) -> Result<(), DetectError> {
    let (canvas, lb) = letterbox(region, model.input_size());
    let rows = model.infer_letterboxed(&canvas)?;
    let (rw, rh) = region.dimensions();
    for [cx, cy, w, h, conf] in rows {
        if conf < cfg.confidence_threshold {
            continue;
        }
        let (sx, sy) = lb.to_source(cx, cy);
        let sw = lb.len_to_source(w);
        let sh = lb.len_to_source(h);
        let bbox = BBox::from_center(sx, sy, sw, sh);
        // Discard boxes that fall outside the region after unpadding.
        if bbox.w <= 0.0
            || bbox.h <= 0.0
            || bbox.x < 0.0
            || bbox.y < 0.0
            || bbox.x + bbox.w > rw as f32
            || bbox.y + bbox.h > rh as f32
        {
            continue;
        }
        boxes.push(BBox::new(bbox.x + origin.0, bbox.y + origin.1, bbox.w, bbox.h));
        confidences.push(conf);
    }
    Ok(())
}

fn boxes_to_circles(boxes: &[BBox], keep: &[usize]) -> Vec<Circle> {
    keep.iter()
        .map(|&i| {
            let b = &boxes[i];
            let (cx, cy) = b.center();
            Circle::new(cx, cy, b.w.max(b.h) * 0.5)
        })
        .collect()
}

fn detect_single(
    cfg: &OnnxSection,
    model: &NeuralModel,
    image: &RgbImage,
) -> Result<Vec<Circle>, DetectError> {
    let mut boxes = Vec::new();
    let mut confidences = Vec::new();
    infer_into(cfg, model, image, (0.0, 0.0), &mut boxes, &mut confidences)?;
    let keep = single_class_nms(&boxes, &confidences, cfg.confidence_threshold, cfg.nms_threshold);
    Ok(boxes_to_circles(&boxes, &keep))
}

fn detect_tiled(
    cfg: &OnnxSection,
    model: &NeuralModel,
    image: &RgbImage,
) -> Result<Vec<Circle>, DetectError> {
    let (w, h) = image.dimensions();
    let tiles = tile_grid(w, h, cfg.sahi_slice_width, cfg.sahi_slice_height, cfg.sahi_overlap_ratio);
    tracing::trace!("sliced inference over {} tiles", tiles.len());

    let mut boxes = Vec::new();
    let mut confidences = Vec::new();
    for tile in &tiles {
        let region = image::imageops::crop_imm(image, tile.x, tile.y, tile.w, tile.h).to_image();
        infer_into(
            cfg,
            model,
            &region,
            (tile.x as f32, tile.y as f32),
            &mut boxes,
            &mut confidences,
        )?;
    }

    // One global NMS pass removes duplicates across tile seams.
    let keep = single_class_nms(&boxes, &confidences, cfg.confidence_threshold, cfg.nms_threshold);
    Ok(boxes_to_circles(&boxes, &keep))
}
