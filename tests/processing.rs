use paintfe_core::components::history::{Command, SurrogateUndoStore};
use paintfe_core::geometry::Rect;
use paintfe_core::ops::canvas_ops::{CropState, CropVisitor};
use paintfe_core::{
    CancellationToken, CanvasState, CoreConfig, OpStatus, PerspectiveTransformVisitor, ProcessingCommand, Project,
};

#[path = "util.rs"]
mod util;

use util::{WHITE, canvas_with_fill, square};

fn snapshot(canvas: &CanvasState) -> Vec<(Rect, Vec<u8>)> {
    let bounds = canvas.bounds().united(&Rect::new(-64, -64, 512, 512));
    canvas
        .root()
        .children()
        .iter()
        .flat_map(|layer| std::iter::once(layer).chain(layer.children().iter()))
        .map(|node| (node.device.exact_bounds(), node.device.read_rect(bounds).into_raw()))
        .collect()
}

#[test]
fn crop_then_undo_restores_original_bytes() {
    util::init_logging();
    let (mut canvas, layer) = canvas_with_fill(300, 300, Rect::new(50, 50, 100, 100), &WHITE);
    let original = snapshot(&canvas);

    let mut cmd = ProcessingCommand::new(canvas.root_id(), Box::new(CropVisitor::new(Rect::new(25, 25, 100, 100))));
    cmd.redo(&mut canvas).unwrap();
    assert_eq!(canvas.node(layer).unwrap().device.exact_bounds(), Rect::new(25, 25, 75, 75));

    cmd.undo(&mut canvas).unwrap();
    assert_eq!(snapshot(&canvas), original);
}

#[test]
fn masks_stay_aligned_with_their_layer() {
    let (mut canvas, layer) = canvas_with_fill(300, 300, Rect::new(0, 0, 300, 300), &WHITE);
    let mask = canvas.add_transparency_mask(layer, "Selection").unwrap();
    canvas.node_mut(mask).unwrap().device.fill(Rect::new(40, 40, 100, 100), &[255]).unwrap();

    let mut crop = CropVisitor::new(Rect::new(25, 25, 100, 100));
    let mut store = SurrogateUndoStore::new();
    canvas.accept(layer, &mut crop, &mut store).unwrap();

    assert_eq!(crop.state(), CropState::Applied);
    assert_eq!(store.len(), 2);
    assert_eq!(canvas.node(mask).unwrap().device.exact_bounds(), Rect::new(15, 15, 85, 85));
    assert_eq!(canvas.node(layer).unwrap().device.exact_bounds(), Rect::new(0, 0, 100, 100));
}

#[test]
fn redo_undo_redo_matches_a_single_redo() {
    let (mut once, _) = canvas_with_fill(300, 300, Rect::new(50, 50, 100, 100), &WHITE);
    let (mut thrice, _) = canvas_with_fill(300, 300, Rect::new(50, 50, 100, 100), &WHITE);
    let crop = Rect::new(25, 25, 100, 100);

    ProcessingCommand::new(once.root_id(), Box::new(CropVisitor::new(crop)))
        .redo(&mut once)
        .unwrap();

    let mut cmd = ProcessingCommand::new(thrice.root_id(), Box::new(CropVisitor::new(crop)));
    cmd.redo(&mut thrice).unwrap();
    cmd.undo(&mut thrice).unwrap();
    cmd.redo(&mut thrice).unwrap();

    assert_eq!(snapshot(&thrice), snapshot(&once));
}

#[test]
fn project_crop_goes_through_history() {
    let config = CoreConfig::default();
    let mut project = Project::new_untitled(1, 300, 300, &config);
    let layer = project.canvas_state.add_paint_layer("Layer 1");
    project
        .canvas_state
        .node_mut(layer)
        .unwrap()
        .device
        .fill(Rect::new(50, 50, 100, 100), &WHITE)
        .unwrap();
    let original = snapshot(&project.canvas_state);

    project.crop_image(Rect::new(25, 25, 100, 100)).unwrap();
    assert_eq!(project.canvas_state.bounds(), Rect::new(0, 0, 100, 100));

    project.undo().unwrap();
    assert_eq!(snapshot(&project.canvas_state), original);
    assert_eq!(project.canvas_state.bounds(), Rect::new(0, 0, 300, 300));

    project.redo().unwrap();
    assert_eq!(
        project.canvas_state.node(layer).unwrap().device.exact_bounds(),
        Rect::new(25, 25, 75, 75)
    );
}

#[test]
fn perspective_transform_is_undoable() {
    let config = CoreConfig::default();
    let mut project = Project::new_untitled(1, 64, 64, &config);
    let layer = project.canvas_state.add_paint_layer("Layer 1");
    project
        .canvas_state
        .node_mut(layer)
        .unwrap()
        .device
        .fill(Rect::new(0, 0, 16, 16), &WHITE)
        .unwrap();
    let original = snapshot(&project.canvas_state);

    let warp = PerspectiveTransformVisitor::new(square(16.0), square(32.0)).unwrap();
    project.apply_processing(layer, Box::new(warp)).unwrap();
    assert_eq!(project.canvas_state.node(layer).unwrap().device.exact_bounds(), Rect::new(0, 0, 32, 32));
    assert_eq!(project.canvas_state.node(layer).unwrap().device.read_pixel(20, 20), &WHITE);

    project.undo().unwrap();
    assert_eq!(snapshot(&project.canvas_state), original);
}

#[test]
fn cancelled_processing_leaves_no_trace() {
    let config = CoreConfig::default();
    let mut project = Project::new_untitled(1, 64, 64, &config);
    let layer = project.canvas_state.add_paint_layer("Layer 1");
    project
        .canvas_state
        .node_mut(layer)
        .unwrap()
        .device
        .fill(Rect::new(0, 0, 16, 16), &WHITE)
        .unwrap();
    let original = snapshot(&project.canvas_state);

    let token = CancellationToken::new();
    let warp = PerspectiveTransformVisitor::new(square(16.0), square(32.0))
        .unwrap()
        .with_cancel(token.clone());
    token.cancel();

    let status = project.apply_processing_cancellable(layer, Box::new(warp), &token).unwrap();
    assert_eq!(status, OpStatus::Cancelled);
    assert!(!project.history.can_undo());
    assert_eq!(snapshot(&project.canvas_state), original);
}
