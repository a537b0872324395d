use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::components::history::{CanvasSizeCommand, Command, HistoryManager, MacroCommand};
use crate::components::layers::{CanvasState, NodeId};
use crate::config::CoreConfig;
use crate::error::{CoreError, OpStatus, Result};
use crate::geometry::Rect;
use crate::io;
use crate::ops::canvas_ops::CropVisitor;
use crate::ops::processing::{ProcessingCommand, ProcessingVisitor};
use crate::pool::CancellationToken;

/// Single open document.
pub struct Project {
    pub id: Uuid,
    pub canvas_state: CanvasState,
    pub history: HistoryManager,
    /// `None` for unsaved/untitled files.
    pub path: Option<PathBuf>,
    pub is_dirty: bool,

    /// Display name (derived from path or "Untitled-X")
    pub name: String,
}

impl Project {
    pub fn new_untitled(untitled_counter: usize, width: u32, height: u32, config: &CoreConfig) -> Self {
        let name = format!("Untitled-{}", untitled_counter);

        Self {
            id: Uuid::new_v4(),
            canvas_state: CanvasState::new(width, height, config),
            history: HistoryManager::from_config(config),
            path: None,
            is_dirty: false,
            name,
        }
    }

    pub fn from_file(path: PathBuf, canvas_state: CanvasState, config: &CoreConfig) -> Self {
        let name = name_from_path(&path);

        Self {
            id: Uuid::new_v4(),
            canvas_state,
            history: HistoryManager::from_config(config),
            path: Some(path),
            is_dirty: false,
            name,
        }
    }

    /// Load a project file.
    pub fn open(path: &Path, config: &CoreConfig) -> Result<Self> {
        let canvas_state = io::load_project(path, config)?;
        Ok(Self::from_file(path.to_path_buf(), canvas_state, config))
    }

    /// Save to the current path.
    pub fn save(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Err(CoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("'{}' has never been saved", self.name),
            )));
        };
        self.save_as(path)
    }

    pub fn save_as(&mut self, path: PathBuf) -> Result<()> {
        io::save_project(&self.canvas_state, &path)?;
        self.path = Some(path);
        self.update_name_from_path();
        self.mark_clean();
        Ok(())
    }

    // ---- processing ---------------------------------------------------------

    /// Run `visitor` over the subtree at `target` as one undoable step.
    pub fn apply_processing(&mut self, target: NodeId, visitor: Box<dyn ProcessingVisitor>) -> Result<()> {
        let mut cmd = ProcessingCommand::new(target, visitor);
        cmd.redo(&mut self.canvas_state)?;
        self.push_executed(Box::new(cmd));
        Ok(())
    }

    /// Like [`apply_processing`](Self::apply_processing), but when `token`
    /// fires during the run everything the visitor did is undone and
    /// nothing lands in the history.
    pub fn apply_processing_cancellable(
        &mut self,
        target: NodeId,
        visitor: Box<dyn ProcessingVisitor>,
        token: &CancellationToken,
    ) -> Result<OpStatus> {
        if token.is_cancelled() {
            return Ok(OpStatus::Cancelled);
        }
        let mut cmd = ProcessingCommand::new(target, visitor);
        cmd.redo(&mut self.canvas_state)?;
        if token.is_cancelled() {
            log::info!("'{}' cancelled, reverting", cmd.description());
            cmd.undo(&mut self.canvas_state)?;
            return Ok(OpStatus::Cancelled);
        }
        self.push_executed(Box::new(cmd));
        Ok(OpStatus::Completed)
    }

    /// Crop every node to `rect` and shrink the canvas to its size.
    pub fn crop_image(&mut self, rect: Rect) -> Result<()> {
        if rect.is_empty() {
            return Err(CoreError::OutOfBoundsGeometry {
                rect,
                limits: self.canvas_state.limits(),
            });
        }
        let root = self.canvas_state.root_id();
        let before = (self.canvas_state.width, self.canvas_state.height);
        let after = (rect.width as u32, rect.height as u32);

        let commands: Vec<Box<dyn Command>> = vec![
            Box::new(ProcessingCommand::new(root, Box::new(CropVisitor::new(rect)))),
            Box::new(CanvasSizeCommand::new(before, after)),
        ];
        let mut cmd = MacroCommand::new("Crop Image", commands);
        cmd.redo(&mut self.canvas_state)?;
        self.push_executed(Box::new(cmd));
        Ok(())
    }

    fn push_executed(&mut self, cmd: Box<dyn Command>) {
        self.history.push(cmd);
        self.mark_dirty();
    }

    // ---- history ------------------------------------------------------------

    /// Returns the description of the undone step.
    pub fn undo(&mut self) -> Result<Option<String>> {
        let done = self.history.undo(&mut self.canvas_state)?;
        if done.is_some() {
            self.mark_dirty();
        }
        Ok(done)
    }

    pub fn redo(&mut self) -> Result<Option<String>> {
        let done = self.history.redo(&mut self.canvas_state)?;
        if done.is_some() {
            self.mark_dirty();
        }
        Ok(done)
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    pub fn update_name_from_path(&mut self) {
        if let Some(ref path) = self.path {
            self.name = name_from_path(path);
        }
    }

    /// Get the display title (name with dirty indicator)
    pub fn display_title(&self) -> String {
        if self.is_dirty {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }
}

fn name_from_path(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}
