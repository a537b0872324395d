use std::collections::VecDeque;

use crate::canvas::PaintDevice;
use crate::components::layers::{CanvasState, NodeId};
use crate::config::CoreConfig;
use crate::error::Result;

// ============================================================================
// COMMAND TRAIT
// ============================================================================

/// Trait for undoable/redoable commands.
pub trait Command: Send {
    fn undo(&mut self, canvas: &mut CanvasState) -> Result<()>;
    fn redo(&mut self, canvas: &mut CanvasState) -> Result<()>;
    fn description(&self) -> String;
    fn memory_size(&self) -> usize;
}

/// Sink that receives the commands a mutation records. Visitors only ever
/// see this interface, never the concrete history.
pub trait UndoAdapter {
    fn add_command(&mut self, command: Box<dyn Command>);
}

// ============================================================================
// DEVICE SNAPSHOT COMMAND – before/after copies of one node's pixels
// ============================================================================

/// Swaps a node's paint device between two snapshots. Snapshots share
/// tiles with the live device, so only tiles that changed cost memory.
pub struct DeviceSnapshotCommand {
    description: String,
    node: NodeId,
    before: PaintDevice,
    after: PaintDevice,
}

impl DeviceSnapshotCommand {
    pub fn new(description: impl Into<String>, node: NodeId, before: PaintDevice, after: PaintDevice) -> Self {
        Self {
            description: description.into(),
            node,
            before,
            after,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }
}

impl Command for DeviceSnapshotCommand {
    fn undo(&mut self, canvas: &mut CanvasState) -> Result<()> {
        canvas.node_mut(self.node)?.device = self.before.clone();
        Ok(())
    }

    fn redo(&mut self, canvas: &mut CanvasState) -> Result<()> {
        canvas.node_mut(self.node)?.device = self.after.clone();
        Ok(())
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        self.before.memory_bytes() + self.after.memory_bytes()
    }
}

// ============================================================================
// CANVAS SIZE COMMAND
// ============================================================================

pub struct CanvasSizeCommand {
    before: (u32, u32),
    after: (u32, u32),
}

impl CanvasSizeCommand {
    pub fn new(before: (u32, u32), after: (u32, u32)) -> Self {
        Self { before, after }
    }
}

impl Command for CanvasSizeCommand {
    fn undo(&mut self, canvas: &mut CanvasState) -> Result<()> {
        (canvas.width, canvas.height) = self.before;
        Ok(())
    }

    fn redo(&mut self, canvas: &mut CanvasState) -> Result<()> {
        (canvas.width, canvas.height) = self.after;
        Ok(())
    }

    fn description(&self) -> String {
        format!("Canvas Size {}×{}", self.after.0, self.after.1)
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}

// ============================================================================
// MACRO COMMAND – several commands undone as one step
// ============================================================================

pub struct MacroCommand {
    description: String,
    commands: Vec<Box<dyn Command>>,
}

impl MacroCommand {
    pub fn new(description: impl Into<String>, commands: Vec<Box<dyn Command>>) -> Self {
        Self {
            description: description.into(),
            commands,
        }
    }
}

impl Command for MacroCommand {
    fn undo(&mut self, canvas: &mut CanvasState) -> Result<()> {
        for cmd in self.commands.iter_mut().rev() {
            cmd.undo(canvas)?;
        }
        Ok(())
    }

    fn redo(&mut self, canvas: &mut CanvasState) -> Result<()> {
        for cmd in self.commands.iter_mut() {
            cmd.redo(canvas)?;
        }
        Ok(())
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        self.commands.iter().map(|c| c.memory_size()).sum()
    }
}

// ============================================================================
// HISTORY MANAGER
// ============================================================================

pub struct HistoryManager {
    undo_stack: VecDeque<Box<dyn Command>>,
    redo_stack: VecDeque<Box<dyn Command>>,
    max_history_size: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    /// Running memory total across both stacks.
    total_memory: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(50)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history_size,
            max_memory_bytes: Some(100 * 1024 * 1024), // 100 MB default limit
            total_memory: 0,
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        let mut history = Self::new(config.history_steps);
        history.max_memory_bytes = Some(config.history_memory_bytes);
        history
    }

    /// Record an already-applied command.
    pub fn push(&mut self, command: Box<dyn Command>) {
        // Clear redo stack when a new action is performed
        for cmd in self.redo_stack.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(cmd.memory_size());
        }

        self.total_memory += command.memory_size();
        log::debug!("history push: {}", command.description());
        self.undo_stack.push_back(command);

        self.prune();
    }

    /// Undo the most recent command. A failing command stays on the undo stack.
    pub fn undo(&mut self, canvas: &mut CanvasState) -> Result<Option<String>> {
        let Some(mut command) = self.undo_stack.pop_back() else {
            return Ok(None);
        };
        let description = command.description();
        if let Err(e) = command.undo(canvas) {
            log::error!("undo of '{}' failed: {}", description, e);
            self.undo_stack.push_back(command);
            return Err(e);
        }
        self.redo_stack.push_back(command);
        Ok(Some(description))
    }

    pub fn redo(&mut self, canvas: &mut CanvasState) -> Result<Option<String>> {
        let Some(mut command) = self.redo_stack.pop_back() else {
            return Ok(None);
        };
        let description = command.description();
        if let Err(e) = command.redo(canvas) {
            log::error!("redo of '{}' failed: {}", description, e);
            self.redo_stack.push_back(command);
            return Err(e);
        }
        self.undo_stack.push_back(command);
        Ok(Some(description))
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(|c| c.description())
    }

    pub fn redo_description(&self) -> Option<String> {
        self.redo_stack.back().map(|c| c.description())
    }

    /// Get all undo descriptions (most recent first)
    pub fn undo_history(&self) -> Vec<String> {
        self.undo_stack.iter().rev().map(|c| c.description()).collect()
    }

    /// Current memory usage of the history (O(1) via cached total)
    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_history_size {
            if let Some(removed) = self.undo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
            }
        }

        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.undo_stack.len() > 1 {
                if let Some(removed) = self.undo_stack.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.total_memory = 0;
    }

    /// Undo `count` steps (0 = nothing), stopping early when the stack runs out.
    pub fn undo_to(&mut self, count: usize, canvas: &mut CanvasState) -> Result<()> {
        for _ in 0..count {
            if self.undo(canvas)?.is_none() {
                break;
            }
        }
        Ok(())
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }
}

impl UndoAdapter for HistoryManager {
    fn add_command(&mut self, command: Box<dyn Command>) {
        self.push(command);
    }
}

// ============================================================================
// SURROGATE UNDO STORE – records commands outside any document history
// ============================================================================

/// Flat command log for callers that apply visitors without a
/// [`HistoryManager`], e.g. batch jobs and tests.
#[derive(Default)]
pub struct SurrogateUndoStore {
    done: Vec<Box<dyn Command>>,
    undone: Vec<Box<dyn Command>>,
}

impl SurrogateUndoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.done.iter().map(|c| c.description()).collect()
    }

    /// Undo the most recent command. Returns false when nothing was left.
    pub fn undo_last(&mut self, canvas: &mut CanvasState) -> Result<bool> {
        let Some(mut command) = self.done.pop() else {
            return Ok(false);
        };
        command.undo(canvas)?;
        self.undone.push(command);
        Ok(true)
    }

    pub fn undo_all(&mut self, canvas: &mut CanvasState) -> Result<()> {
        while self.undo_last(canvas)? {}
        Ok(())
    }

    pub fn redo_all(&mut self, canvas: &mut CanvasState) -> Result<()> {
        while let Some(mut command) = self.undone.pop() {
            command.redo(canvas)?;
            self.done.push(command);
        }
        Ok(())
    }
}

impl UndoAdapter for SurrogateUndoStore {
    fn add_command(&mut self, command: Box<dyn Command>) {
        self.undone.clear();
        self.done.push(command);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;

    fn canvas_with_layer() -> (CanvasState, NodeId) {
        let mut canvas = CanvasState::new(64, 64, &CoreConfig::default());
        let id = canvas.add_paint_layer("Layer 1");
        (canvas, id)
    }

    fn paint(canvas: &mut CanvasState, id: NodeId, rect: Rect, history: &mut dyn UndoAdapter) {
        let node = canvas.node_mut(id).unwrap();
        let before = node.device.clone();
        node.device.fill(rect, &[255, 255, 255, 255]).unwrap();
        history.add_command(Box::new(DeviceSnapshotCommand::new(
            "Fill",
            id,
            before,
            node.device.clone(),
        )));
    }

    #[test]
    fn undo_and_redo_move_between_stacks() {
        let (mut canvas, id) = canvas_with_layer();
        let mut history = HistoryManager::new(10);
        paint(&mut canvas, id, Rect::new(0, 0, 8, 8), &mut history);

        assert_eq!(history.undo(&mut canvas).unwrap().as_deref(), Some("Fill"));
        assert!(canvas.node(id).unwrap().device.exact_bounds().is_empty());
        assert!(history.can_redo());

        history.redo(&mut canvas).unwrap();
        assert_eq!(canvas.node(id).unwrap().device.exact_bounds(), Rect::new(0, 0, 8, 8));

        // A command whose node is missing fails and stays undoable.
        let mut other = CanvasState::new(1, 1, &CoreConfig::default());
        assert!(history.undo(&mut other).is_err());
        assert_eq!(history.undo_count(), 1);
    }

    #[test]
    fn push_clears_redo_and_prunes_by_count() {
        let (mut canvas, id) = canvas_with_layer();
        let mut history = HistoryManager::new(2);
        for i in 0..3 {
            paint(&mut canvas, id, Rect::new(i, 0, 1, 1), &mut history);
        }
        assert_eq!(history.undo_count(), 2);
        history.undo(&mut canvas).unwrap();
        paint(&mut canvas, id, Rect::new(9, 9, 1, 1), &mut history);
        assert!(!history.can_redo());
    }

    #[test]
    fn empty_history_undo_is_a_no_op() {
        let (mut canvas, _) = canvas_with_layer();
        let mut history = HistoryManager::default();
        assert_eq!(history.undo(&mut canvas).unwrap(), None);
        assert_eq!(history.redo(&mut canvas).unwrap(), None);
    }

    #[test]
    fn surrogate_store_undoes_in_reverse() {
        let (mut canvas, id) = canvas_with_layer();
        let mut store = SurrogateUndoStore::new();
        paint(&mut canvas, id, Rect::new(0, 0, 4, 4), &mut store);
        paint(&mut canvas, id, Rect::new(10, 10, 4, 4), &mut store);
        assert_eq!(store.len(), 2);

        store.undo_all(&mut canvas).unwrap();
        assert!(canvas.node(id).unwrap().device.exact_bounds().is_empty());

        store.redo_all(&mut canvas).unwrap();
        assert_eq!(canvas.node(id).unwrap().device.exact_bounds(), Rect::new(0, 0, 14, 14));
    }

    #[test]
    fn undo_to_unwinds_that_many_steps() {
        let (mut canvas, id) = canvas_with_layer();
        let mut history = HistoryManager::new(10);
        for i in 0..4 {
            paint(&mut canvas, id, Rect::new(i * 2, 0, 1, 1), &mut history);
        }

        history.undo_to(3, &mut canvas).unwrap();
        assert_eq!(history.undo_count(), 1);
        assert_eq!(history.redo_count(), 3);
        assert_eq!(canvas.node(id).unwrap().device.exact_bounds(), Rect::new(0, 0, 1, 1));

        // Asking for more than is left stops at the bottom of the stack.
        history.undo_to(5, &mut canvas).unwrap();
        assert_eq!(history.undo_count(), 0);
        assert!(canvas.node(id).unwrap().device.exact_bounds().is_empty());
    }
}
