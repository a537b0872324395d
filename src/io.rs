use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canvas::{PaintDevice, TILE_SIZE};
use crate::colorspace::{ColorConverter, ColorModel, ColorSpace};
use crate::components::layers::{CanvasState, Node, NodeKind};
use crate::composite::BlendMode;
use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::geometry::Rect;

// ============================================================================
// PFC PROJECT FILE FORMAT
// ============================================================================

/// Magic header of the sparse tiled node-tree format.
const PFC_MAGIC_V1: &str = "PFC1";

/// Maximum supported canvas dimension in pixels (per axis).
/// Prevents memory exhaustion from crafted project files.
const MAX_CANVAS_DIM: u32 = 32_768;
/// Maximum number of nodes in a project file.
const MAX_NODES: usize = 1024;

#[derive(Serialize, Deserialize)]
pub(crate) struct ProjectFile {
    magic: String,
    width: u32,
    height: u32,
    colorspace: ColorSpace,
    root: NodeData,
}

#[derive(Serialize, Deserialize)]
struct NodeData {
    id: Uuid,
    name: String,
    kind: NodeKind,
    visible: bool,
    opacity: f32,
    blend_mode: BlendMode,
    device: DeviceData,
    children: Vec<NodeData>,
}

/// Sparse device content: only allocated tiles are stored.
#[derive(Serialize, Deserialize)]
struct DeviceData {
    colorspace: ColorSpace,
    offset: (i32, i32),
    tiles: Vec<TileData>,
}

#[derive(Serialize, Deserialize)]
struct TileData {
    col: i32,
    row: i32,
    pixels: Vec<u8>,
}

/// Save a canvas as a `.pfc` project file.
pub fn save_project(state: &CanvasState, path: &Path) -> Result<()> {
    let project = build_project_file(state);
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, &project)?;
    log::info!("saved project {}x{} to {}", state.width, state.height, path.display());
    Ok(())
}

/// Build the serialisable form of `state`. Copies tile bytes, so the result
/// can be handed to another thread for writing.
pub(crate) fn build_project_file(state: &CanvasState) -> ProjectFile {
    ProjectFile {
        magic: PFC_MAGIC_V1.to_string(),
        width: state.width,
        height: state.height,
        colorspace: state.colorspace().clone(),
        root: node_to_data(state.root()),
    }
}

fn node_to_data(node: &Node) -> NodeData {
    let tiles = node
        .device
        .store()
        .tiles()
        .into_iter()
        .map(|(col, row, bytes)| TileData {
            col,
            row,
            pixels: bytes.to_vec(),
        })
        .collect();

    NodeData {
        id: node.id,
        name: node.name.clone(),
        kind: node.kind(),
        visible: node.visible,
        opacity: node.opacity,
        blend_mode: node.blend_mode,
        device: DeviceData {
            colorspace: node.device.colorspace().clone(),
            offset: node.device.offset(),
            tiles,
        },
        children: node.children().iter().map(node_to_data).collect(),
    }
}

/// Load a `.pfc` project file. Devices get the limits of `config`.
pub fn load_project(path: &Path, config: &CoreConfig) -> Result<CanvasState> {
    let raw = std::fs::read(path)?;
    if raw.len() < 12 {
        return Err(CoreError::InvalidFormat("File too small".into()));
    }

    // bincode encodes a String as an 8-byte length prefix + UTF-8 data,
    // so bytes 8..12 hold the magic.
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != PFC_MAGIC_V1 {
        return Err(CoreError::InvalidFormat(format!("Unknown magic '{}'", magic)));
    }

    let project: ProjectFile = bincode::deserialize(&raw)?;
    let state = project_to_state(project, config)?;
    log::info!("loaded project {}x{} from {}", state.width, state.height, path.display());
    Ok(state)
}

fn project_to_state(project: ProjectFile, config: &CoreConfig) -> Result<CanvasState> {
    if project.width == 0 || project.height == 0 {
        return Err(CoreError::InvalidFormat("Canvas dimensions cannot be zero".into()));
    }
    if project.width > MAX_CANVAS_DIM || project.height > MAX_CANVAS_DIM {
        return Err(CoreError::InvalidFormat(format!(
            "Canvas size {}x{} exceeds maximum allowed {}x{}",
            project.width, project.height, MAX_CANVAS_DIM, MAX_CANVAS_DIM
        )));
    }
    let count = count_nodes(&project.root);
    if count > MAX_NODES {
        return Err(CoreError::InvalidFormat(format!(
            "Project contains {} nodes, which exceeds the maximum of {}",
            count, MAX_NODES
        )));
    }
    if project.root.kind != NodeKind::Group {
        return Err(CoreError::InvalidFormat("Root node must be a group".into()));
    }

    let limits = config.canvas_limits();
    let converter = ColorConverter::with_builtin();
    let root = data_to_node(project.root, &project.colorspace, &converter, limits)?;
    Ok(CanvasState::from_root(project.width, project.height, project.colorspace, root, limits))
}

fn count_nodes(node: &NodeData) -> usize {
    1 + node.children.iter().map(count_nodes).sum::<usize>()
}

fn data_to_node(data: NodeData, document: &ColorSpace, converter: &ColorConverter, limits: Rect) -> Result<Node> {
    let cs = &data.device.colorspace;
    match data.kind {
        NodeKind::TransparencyMask if cs.model != ColorModel::Alpha => {
            return Err(CoreError::InvalidFormat(format!(
                "Mask '{}' has non-alpha colorspace {}",
                data.name, cs
            )));
        }
        NodeKind::PaintLayer if !converter.can_convert(cs, document) => {
            return Err(CoreError::InvalidFormat(format!(
                "Layer '{}' colorspace {} cannot be composited into {}",
                data.name, cs, document
            )));
        }
        _ => {}
    }

    let expected_tile_bytes = (TILE_SIZE * TILE_SIZE) as usize * cs.pixel_size();
    let mut device = PaintDevice::new(cs.clone(), limits);
    for tile in data.device.tiles {
        if tile.pixels.len() != expected_tile_bytes {
            return Err(CoreError::InvalidFormat(format!(
                "Tile ({},{}) in '{}' has {} bytes, expected {}",
                tile.col,
                tile.row,
                data.name,
                tile.pixels.len(),
                expected_tile_bytes,
            )));
        }
        device
            .store_mut()
            .insert_tile(tile.col, tile.row, tile.pixels)
            .map_err(|e| {
                CoreError::InvalidFormat(format!("Tile ({},{}) in '{}': {}", tile.col, tile.row, data.name, e))
            })?;
    }
    device.move_to(data.device.offset.0, data.device.offset.1);

    let mut node = Node::with_parts(data.id, data.name, data.kind, device);
    node.visible = data.visible;
    node.opacity = data.opacity.clamp(0.0, 1.0);
    node.blend_mode = data.blend_mode;
    for child in data.children {
        let child = data_to_node(child, document, converter, limits)?;
        node.add_child(child)
            .map_err(|e| CoreError::InvalidFormat(e.to_string()))?;
    }
    Ok(node)
}

/// Write the flattened canvas as an 8-bit PNG.
pub fn export_png(state: &CanvasState, path: &Path) -> Result<()> {
    let flat = state.composite()?;
    let img = flat.to_rgba_image(state.converter())?;
    img.save_with_format(path, image::ImageFormat::Png)?;
    log::info!("exported {} ({}x{})", path.display(), img.width(), img.height());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.pfc");
        std::fs::write(&path, b"\x04\0\0\0\0\0\0\0PFE1rest").unwrap();
        let err = load_project(&path, &CoreConfig::default()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFormat(_)));
    }

    #[test]
    fn rejects_short_tiles() {
        let config = CoreConfig::default();
        let mut state = CanvasState::new(8, 8, &config);
        let layer = state.add_paint_layer("Layer");
        state.node_mut(layer).unwrap().device.write_pixel(0, 0, &[1, 2, 3, 4]).unwrap();

        let mut project = build_project_file(&state);
        project.root.children[0].device.tiles[0].pixels.pop();
        let err = project_to_state(project, &config).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFormat(_)));
    }

    #[test]
    fn rejects_mask_with_colour_data() {
        let config = CoreConfig::default();
        let mut state = CanvasState::new(8, 8, &config);
        let layer = state.add_paint_layer("Layer");
        state.add_transparency_mask(layer, "Mask").unwrap();

        let mut project = build_project_file(&state);
        project.root.children[0].children[0].device.colorspace = ColorSpace::rgba8();
        assert!(project_to_state(project, &config).is_err());
    }

    #[test]
    fn keeps_tree_and_offsets() {
        let config = CoreConfig::default();
        let mut state = CanvasState::new(16, 16, &config);
        let layer = state.add_paint_layer("Layer");
        state.add_transparency_mask(layer, "Mask").unwrap();
        {
            let node = state.node_mut(layer).unwrap();
            node.device.fill(Rect::new(0, 0, 3, 3), &[9, 8, 7, 255]).unwrap();
            node.device.move_to(5, -2);
            node.opacity = 0.5;
        }

        let loaded = project_to_state(build_project_file(&state), &config).unwrap();
        let node = loaded.node(layer).unwrap();
        assert_eq!(node.device.offset(), (5, -2));
        assert_eq!(node.device.exact_bounds(), Rect::new(5, -2, 3, 3));
        assert_eq!(node.opacity, 0.5);
        assert_eq!(node.masks().count(), 1);
    }

    #[test]
    fn rejects_tiles_outside_the_limits() {
        let mut state = CanvasState::new(8, 8, &CoreConfig::default());
        let layer = state.add_paint_layer("Layer");
        state.node_mut(layer).unwrap().device.write_pixel(100_000, 100_000, &[1, 2, 3, 4]).unwrap();

        let narrow = CoreConfig {
            max_canvas_extent: 256,
            ..CoreConfig::default()
        };
        let err = project_to_state(build_project_file(&state), &narrow).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFormat(_)));

        let mut project = build_project_file(&state);
        project.root.children[0].device.tiles[0].col = i32::MAX;
        let err = project_to_state(project, &CoreConfig::default()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFormat(_)));
    }

    #[test]
    fn straddling_tiles_are_clipped_to_the_limits() {
        let mut state = CanvasState::new(8, 8, &CoreConfig::default());
        let layer = state.add_paint_layer("Layer");
        state.node_mut(layer).unwrap().device.fill(Rect::new(0, 0, 64, 64), &[1, 2, 3, 4]).unwrap();

        let narrow = CoreConfig {
            max_canvas_extent: 32,
            ..CoreConfig::default()
        };
        let loaded = project_to_state(build_project_file(&state), &narrow).unwrap();
        assert_eq!(loaded.node(layer).unwrap().device.exact_bounds(), Rect::new(0, 0, 32, 32));
    }
}
