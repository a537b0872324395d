use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canvas::PaintDevice;
use crate::colorspace::{ColorConverter, ColorSpace};
use crate::components::history::UndoAdapter;
use crate::composite::{BlendMode, CompositeOp, composite};
use crate::config::CoreConfig;
use crate::error::{CoreError, OpStatus, Result};
use crate::geometry::Rect;
use crate::ops::processing::ProcessingVisitor;
use crate::pixel::PixelBuffer;
use crate::pool::CancellationToken;

pub type NodeId = Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Group,
    PaintLayer,
    /// Selection attached to a layer; its device is single-channel alpha.
    TransparencyMask,
}

// ============================================================================
// NODE
// ============================================================================

/// One entry of the layer tree. Children are ordered bottom to top.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    kind: NodeKind,
    pub visible: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub device: PaintDevice,
    children: Vec<Node>,
}

impl Node {
    pub(crate) fn with_parts(id: NodeId, name: String, kind: NodeKind, device: PaintDevice) -> Self {
        Self {
            id,
            name,
            kind,
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::Over,
            device,
            children: Vec::new(),
        }
    }

    pub fn new_group(name: impl Into<String>, limits: Rect) -> Self {
        let device = PaintDevice::new(ColorSpace::rgba8(), limits);
        Self::with_parts(Uuid::new_v4(), name.into(), NodeKind::Group, device)
    }

    pub fn new_paint_layer(name: impl Into<String>, colorspace: ColorSpace, limits: Rect) -> Self {
        let device = PaintDevice::new(colorspace, limits);
        Self::with_parts(Uuid::new_v4(), name.into(), NodeKind::PaintLayer, device)
    }

    pub fn new_transparency_mask(name: impl Into<String>, limits: Rect) -> Self {
        let device = PaintDevice::new(ColorSpace::alpha8(), limits);
        Self::with_parts(Uuid::new_v4(), name.into(), NodeKind::TransparencyMask, device)
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// Masks attached directly to this node.
    pub fn masks(&self) -> impl Iterator<Item = &Node> {
        self.children
            .iter()
            .filter(|c| c.kind == NodeKind::TransparencyMask)
    }

    /// Append `child` on top. Groups take anything, paint layers only
    /// masks, masks nothing.
    pub fn add_child(&mut self, child: Node) -> Result<NodeId> {
        let allowed = match self.kind {
            NodeKind::Group => true,
            NodeKind::PaintLayer => child.kind == NodeKind::TransparencyMask,
            NodeKind::TransparencyMask => false,
        };
        if !allowed {
            return Err(CoreError::InvalidNode(format!(
                "a {:?} cannot hold a {:?}",
                self.kind, child.kind
            )));
        }
        let id = child.id;
        self.children.push(child);
        Ok(id)
    }

    pub fn find(&self, id: NodeId) -> Option<&Node> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    pub fn find_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(id))
    }

    /// Detach the descendant `id`.
    pub fn remove_descendant(&mut self, id: NodeId) -> Option<Node> {
        if let Some(pos) = self.children.iter().position(|c| c.id == id) {
            return Some(self.children.remove(pos));
        }
        self.children.iter_mut().find_map(|c| c.remove_descendant(id))
    }

    /// Run `visitor` on this node, then on every descendant.
    pub fn accept(&mut self, visitor: &mut dyn ProcessingVisitor, undo: &mut dyn UndoAdapter) -> Result<()> {
        match self.kind {
            NodeKind::Group => visitor.visit_group(self, undo)?,
            NodeKind::PaintLayer => visitor.visit_paint_layer(self, undo)?,
            NodeKind::TransparencyMask => visitor.visit_transparency_mask(self, undo)?,
        }
        for child in &mut self.children {
            child.accept(visitor, undo)?;
        }
        Ok(())
    }

    pub fn memory_bytes(&self) -> usize {
        self.device.memory_bytes() + self.children.iter().map(|c| c.memory_bytes()).sum::<usize>()
    }
}

// ============================================================================
// CANVAS STATE – the document: size, node tree, colorspace
// ============================================================================

#[derive(Debug)]
pub struct CanvasState {
    pub width: u32,
    pub height: u32,
    root: Node,
    colorspace: ColorSpace,
    converter: ColorConverter,
    limits: Rect,
}

impl CanvasState {
    pub fn new(width: u32, height: u32, config: &CoreConfig) -> Self {
        Self::with_colorspace(width, height, ColorSpace::rgba8(), config)
    }

    pub fn with_colorspace(width: u32, height: u32, colorspace: ColorSpace, config: &CoreConfig) -> Self {
        let limits = config.canvas_limits();
        Self {
            width,
            height,
            root: Node::new_group("root", limits),
            colorspace,
            converter: ColorConverter::with_builtin(),
            limits,
        }
    }

    pub(crate) fn from_root(width: u32, height: u32, colorspace: ColorSpace, root: Node, limits: Rect) -> Self {
        Self {
            width,
            height,
            root,
            colorspace,
            converter: ColorConverter::with_builtin(),
            limits,
        }
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width as i32, self.height as i32)
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn root_id(&self) -> NodeId {
        self.root.id
    }

    pub fn colorspace(&self) -> &ColorSpace {
        &self.colorspace
    }

    pub fn converter(&self) -> &ColorConverter {
        &self.converter
    }

    pub fn converter_mut(&mut self) -> &mut ColorConverter {
        &mut self.converter
    }

    pub fn limits(&self) -> Rect {
        self.limits
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.root.find(id).ok_or(CoreError::NodeNotFound(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.root.find_mut(id).ok_or(CoreError::NodeNotFound(id))
    }

    /// Add a paint layer in the document colorspace on top of the root.
    pub fn add_paint_layer(&mut self, name: &str) -> NodeId {
        let layer = Node::new_paint_layer(name, self.colorspace.clone(), self.limits);
        let id = layer.id;
        self.root.children.push(layer);
        id
    }

    pub fn add_node(&mut self, parent: NodeId, node: Node) -> Result<NodeId> {
        self.node_mut(parent)?.add_child(node)
    }

    pub fn add_group(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        let group = Node::new_group(name, self.limits);
        self.add_node(parent, group)
    }

    pub fn add_transparency_mask(&mut self, layer: NodeId, name: &str) -> Result<NodeId> {
        let mask = Node::new_transparency_mask(name, self.limits);
        self.add_node(layer, mask)
    }

    pub fn remove_node(&mut self, id: NodeId) -> Result<Node> {
        if id == self.root.id {
            return Err(CoreError::InvalidNode("the root group cannot be removed".into()));
        }
        self.root.remove_descendant(id).ok_or(CoreError::NodeNotFound(id))
    }

    /// Apply `visitor` to the subtree at `target`, recording into `undo`.
    pub fn accept(
        &mut self,
        target: NodeId,
        visitor: &mut dyn ProcessingVisitor,
        undo: &mut dyn UndoAdapter,
    ) -> Result<()> {
        log::debug!("applying '{}' to node {}", visitor.name(), target);
        self.node_mut(target)?.accept(visitor, undo)
    }

    pub fn memory_bytes(&self) -> usize {
        self.root.memory_bytes()
    }

    // ---- projection ---------------------------------------------------------

    /// Flatten every visible layer over the canvas bounds.
    pub fn composite(&self) -> Result<PixelBuffer> {
        let (buffer, _) = self.composite_rect(self.bounds(), None)?;
        Ok(buffer)
    }

    /// Flatten `rect`. Stops early, returning what was produced so far, when
    /// `cancel` fires.
    pub fn composite_rect(&self, rect: Rect, cancel: Option<&CancellationToken>) -> Result<(PixelBuffer, OpStatus)> {
        let (projection, status) = self.project_children(&self.root.children, rect, cancel)?;
        Ok((projection.read_rect(rect), status))
    }

    fn project_children(
        &self,
        children: &[Node],
        rect: Rect,
        cancel: Option<&CancellationToken>,
    ) -> Result<(PaintDevice, OpStatus)> {
        let mut projection = PaintDevice::new(self.colorspace.clone(), self.limits);
        for child in children {
            if !child.visible || child.kind == NodeKind::TransparencyMask {
                continue;
            }
            let source = match child.kind {
                NodeKind::Group => {
                    let (group, status) = self.project_children(&child.children, rect, cancel)?;
                    if status.is_cancelled() {
                        return Ok((projection, status));
                    }
                    group.read_rect(rect)
                }
                _ => child.device.read_rect(rect),
            };
            let mask = combined_mask(child, rect);
            let mut op = CompositeOp::new(child.blend_mode, child.opacity);
            op.mask = mask.as_ref();
            let status = composite(&mut projection, rect, &source, &op, &self.converter, cancel)?;
            if status.is_cancelled() {
                return Ok((projection, status));
            }
        }
        Ok((projection, OpStatus::Completed))
    }
}

/// Product of all visible masks of `node` over `rect`, or `None` if it has none.
fn combined_mask(node: &Node, rect: Rect) -> Option<PixelBuffer> {
    let mut masks = node.masks().filter(|m| m.visible).peekable();
    masks.peek()?;
    let mut combined = PixelBuffer::filled(rect, ColorSpace::alpha8(), &[255]);
    for mask in masks {
        let values = mask.device.read_rect(rect);
        let mcs = values.colorspace().clone();
        let ps = mcs.pixel_size();
        for (dst, src) in combined.data_mut().iter_mut().zip(values.data().chunks_exact(ps)) {
            let a = mcs.decode(src)[3];
            *dst = ((*dst as f32) * a).round() as u8;
        }
    }
    Some(combined)
}
