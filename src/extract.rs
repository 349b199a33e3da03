//! Per-feature data extraction.
//!
//! Each enabled feature contributes one [`Extractor`] that reads its
//! middleware output for the acquired frame and writes the result into the
//! background [`DataFrame`].

use std::sync::Arc;

use crate::backend::Camera;
use crate::frame::DataFrame;
use crate::image::{copy_color_sample, copy_depth_sample};
use crate::scan::ScanController;
use crate::types::{Features, Hand};
use crate::{BridgeError, Result};

pub trait Extractor: Send {
    /// Feature that must be enabled for this extractor to run.
    fn feature(&self) -> Features;

    fn name(&self) -> &'static str;

    fn extract(&mut self, camera: &mut dyn Camera, frame: &mut DataFrame) -> Result<()>;
}

/// Color and depth images.
#[derive(Debug, Default)]
pub struct StreamExtractor;

impl Extractor for StreamExtractor {
    fn feature(&self) -> Features {
        Features::CAMERA_STREAMING
    }

    fn name(&self) -> &'static str {
        "stream"
    }

    fn extract(&mut self, camera: &mut dyn Camera, frame: &mut DataFrame) -> Result<()> {
        if let Some(color) = camera.query_color_sample() {
            copy_color_sample(&color, &mut frame.color_image)?;
        }
        if let Some(depth) = camera.query_depth_sample() {
            copy_depth_sample(&depth, &mut frame.depth_image)?;
        }
        Ok(())
    }
}

/// Head count and the pose of the first detected face.
#[derive(Debug, Default)]
pub struct HeadExtractor;

impl Extractor for HeadExtractor {
    fn feature(&self) -> Features {
        Features::HEAD_TRACKING
    }

    fn name(&self) -> &'static str {
        "head"
    }

    fn extract(&mut self, camera: &mut dyn Camera, frame: &mut DataFrame) -> Result<()> {
        let output = camera.query_face_output()?;
        let head = &mut frame.head;
        head.count = output.faces.len() as u32;
        if let Some(face) = output.faces.first() {
            if let Some(p) = face.position {
                head.position = p;
            }
            if let Some(r) = face.rotation {
                head.rotation = r;
            }
        }
        Ok(())
    }
}

/// Hand cursor positions, gestures and alerts.
#[derive(Debug, Default)]
pub struct CursorExtractor;

impl Extractor for CursorExtractor {
    fn feature(&self) -> Features {
        Features::HAND_CURSOR
    }

    fn name(&self) -> &'static str {
        "cursor"
    }

    fn extract(&mut self, camera: &mut dyn Camera, frame: &mut DataFrame) -> Result<()> {
        let output = camera.query_cursor_output()?;
        for cursor in &output.cursors {
            // Cursors the middleware cannot assign to a hand are dropped.
            if let Some(hand) = Hand::from_side(cursor.side) {
                let state = &mut frame.cursors[hand as usize];
                state.position = cursor.position;
                state.valid = true;
            }
        }
        for gesture in &output.gestures {
            let state = &mut frame.gestures[gesture.kind as usize];
            state.fired = true;
            state.side = gesture.side;
        }
        frame.alerts.extend_from_slice(&output.alerts);
        Ok(())
    }
}

/// Color image with the user's silhouette in the alpha channel.
#[derive(Debug, Default)]
pub struct SegmentationExtractor;

impl Extractor for SegmentationExtractor {
    fn feature(&self) -> Features {
        Features::SEGMENTATION_3D
    }

    fn name(&self) -> &'static str {
        "segmentation"
    }

    fn extract(&mut self, camera: &mut dyn Camera, frame: &mut DataFrame) -> Result<()> {
        let image = camera
            .query_segmented_image()
            .ok_or(BridgeError::DataUnavailable("segmentation"))?;
        copy_color_sample(&image, &mut frame.segmented_image)
    }
}

/// Largest tracked blob.
#[derive(Debug, Default)]
pub struct BlobExtractor;

impl Extractor for BlobExtractor {
    fn feature(&self) -> Features {
        Features::BLOB_TRACKING
    }

    fn name(&self) -> &'static str {
        "blob"
    }

    fn extract(&mut self, camera: &mut dyn Camera, frame: &mut DataFrame) -> Result<()> {
        let output = camera.query_blob_output()?;
        let blobs = &mut frame.blobs;
        blobs.count = output.blobs.len() as u32;
        if let Some(largest) = output.blobs.first() {
            blobs.pixel_count = largest.pixel_count;
            blobs.extremities = largest.extremities;
        }
        Ok(())
    }
}

/// Applies scan requests and captures the scan preview.
#[derive(Debug)]
pub struct ScanExtractor {
    scan: Arc<ScanController>,
}

impl ScanExtractor {
    pub fn new(scan: Arc<ScanController>) -> Self {
        Self { scan }
    }
}

impl Extractor for ScanExtractor {
    fn feature(&self) -> Features {
        Features::SCAN_3D
    }

    fn name(&self) -> &'static str {
        "scan"
    }

    fn extract(&mut self, camera: &mut dyn Camera, frame: &mut DataFrame) -> Result<()> {
        self.scan.step(camera, &mut frame.scan_preview)
    }
}

/// One extractor per feature, in the order they run each cycle.
pub fn default_extractors(scan: Arc<ScanController>) -> Vec<Box<dyn Extractor>> {
    vec![
        Box::new(StreamExtractor),
        Box::new(ScanExtractor::new(scan)),
        Box::new(HeadExtractor),
        Box::new(CursorExtractor),
        Box::new(SegmentationExtractor),
        Box::new(BlobExtractor),
    ]
}
