// ============================================================================
// CANVAS-LEVEL OPERATIONS: crop
// ============================================================================

use crate::components::history::{DeviceSnapshotCommand, UndoAdapter};
use crate::components::layers::Node;
use crate::error::Result;
use crate::geometry::Rect;
use crate::ops::processing::ProcessingVisitor;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CropState {
    Constructed,
    Applied,
}

/// Crops every device it visits to `rect`.
///
/// Paint layers and transparency masks are cropped identically, so a mask
/// keeps its alignment with the layer it belongs to. With `move_to_origin`
/// the kept area's top-left corner becomes (0, 0).
///
/// Example: a mask selecting (40, 40, 100, 100) cropped by
/// (25, 25, 100, 100) selects (15, 15, 85, 85) afterwards.
#[derive(Clone, Debug)]
pub struct CropVisitor {
    rect: Rect,
    move_to_origin: bool,
    state: CropState,
}

impl CropVisitor {
    pub fn new(rect: Rect) -> Self {
        Self {
            rect,
            move_to_origin: true,
            state: CropState::Constructed,
        }
    }

    /// Crop without moving the kept content.
    pub fn in_place(rect: Rect) -> Self {
        Self {
            move_to_origin: false,
            ..Self::new(rect)
        }
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn state(&self) -> CropState {
        self.state
    }

    fn crop_node(&mut self, node: &mut Node, undo: &mut dyn UndoAdapter) -> Result<()> {
        // Validates the rectangle before anything changes.
        node.device.check_writable(self.rect)?;

        let before = node.device.clone();
        node.device.crop(self.rect)?;
        if self.move_to_origin {
            node.device.move_by(self.rect.x.saturating_neg(), self.rect.y.saturating_neg());
        }
        log::debug!("cropped '{}' to {:?}", node.name, self.rect);

        undo.add_command(Box::new(DeviceSnapshotCommand::new(
            format!("Crop {}", node.name),
            node.id,
            before,
            node.device.clone(),
        )));
        self.state = CropState::Applied;
        Ok(())
    }
}

impl ProcessingVisitor for CropVisitor {
    fn name(&self) -> String {
        "Crop".to_string()
    }

    fn visit_paint_layer(&mut self, node: &mut Node, undo: &mut dyn UndoAdapter) -> Result<()> {
        self.crop_node(node, undo)
    }

    fn visit_transparency_mask(&mut self, node: &mut Node, undo: &mut dyn UndoAdapter) -> Result<()> {
        self.crop_node(node, undo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::history::SurrogateUndoStore;
    use crate::components::layers::CanvasState;
    use crate::config::CoreConfig;
    use crate::error::CoreError;

    #[test]
    fn in_place_crop_keeps_coordinates() {
        let mut canvas = CanvasState::new(100, 100, &CoreConfig::default());
        let layer = canvas.add_paint_layer("Layer");
        canvas.node_mut(layer).unwrap().device.fill(Rect::new(0, 0, 100, 100), &[1, 2, 3, 255]).unwrap();

        let mut crop = CropVisitor::in_place(Rect::new(10, 20, 30, 40));
        let mut store = SurrogateUndoStore::new();
        canvas.accept(layer, &mut crop, &mut store).unwrap();

        assert_eq!(crop.state(), CropState::Applied);
        assert_eq!(canvas.node(layer).unwrap().device.exact_bounds(), Rect::new(10, 20, 30, 40));
    }

    #[test]
    fn crop_outside_limits_is_rejected_before_mutation() {
        let config = CoreConfig {
            max_canvas_extent: 256,
            ..CoreConfig::default()
        };
        let mut canvas = CanvasState::new(100, 100, &config);
        let layer = canvas.add_paint_layer("Layer");
        canvas.node_mut(layer).unwrap().device.fill(Rect::new(0, 0, 100, 100), &[1, 2, 3, 255]).unwrap();

        let mut crop = CropVisitor::new(Rect::new(200, 200, 100, 100));
        let mut store = SurrogateUndoStore::new();
        let err = canvas.accept(layer, &mut crop, &mut store).unwrap_err();

        assert!(matches!(err, CoreError::OutOfBoundsGeometry { .. }));
        assert_eq!(crop.state(), CropState::Constructed);
        assert!(store.is_empty());
        assert_eq!(canvas.node(layer).unwrap().device.exact_bounds(), Rect::new(0, 0, 100, 100));
    }
}
