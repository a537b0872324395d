//! Processing visitors and the command that makes them undoable.
//!
//! A [`ProcessingVisitor`] mutates the nodes it is shown and records every
//! mutation into the [`UndoAdapter`] it is handed. [`ProcessingCommand`]
//! runs a visitor once, keeps what it recorded, and from then on replays that
//! record instead of running the visitor again.

use crate::components::history::{Command, UndoAdapter};
use crate::components::layers::{CanvasState, Node, NodeId};
use crate::error::{CoreError, Result};

/// Operation applied node by node. Each method must record its mutations
/// into `undo` and must not touch nodes other than the one it is given.
pub trait ProcessingVisitor: Send {
    fn name(&self) -> String;

    fn visit_group(&mut self, _node: &mut Node, _undo: &mut dyn UndoAdapter) -> Result<()> {
        Ok(())
    }

    fn visit_paint_layer(&mut self, node: &mut Node, undo: &mut dyn UndoAdapter) -> Result<()>;

    fn visit_transparency_mask(&mut self, node: &mut Node, undo: &mut dyn UndoAdapter) -> Result<()>;
}

// ============================================================================
// TRANSCRIPT
// ============================================================================

/// Ordered commands recorded by one visitor run.
#[derive(Default)]
pub struct Transcript {
    commands: Vec<Box<dyn Command>>,
}

impl Transcript {
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn undo_all(&mut self, canvas: &mut CanvasState) -> Result<()> {
        for cmd in self.commands.iter_mut().rev() {
            cmd.undo(canvas)?;
        }
        Ok(())
    }

    pub fn redo_all(&mut self, canvas: &mut CanvasState) -> Result<()> {
        for cmd in self.commands.iter_mut() {
            cmd.redo(canvas)?;
        }
        Ok(())
    }

    fn memory_size(&self) -> usize {
        self.commands.iter().map(|c| c.memory_size()).sum()
    }
}

impl UndoAdapter for Transcript {
    fn add_command(&mut self, command: Box<dyn Command>) {
        self.commands.push(command);
    }
}

// ============================================================================
// PROCESSING COMMAND
// ============================================================================

/// Undoable application of a visitor to one subtree.
///
/// Fresh until the first `redo`, which runs the visitor and records a
/// transcript; Executed afterwards, where `redo`/`undo` replay the transcript
/// forward/backward. The visitor is dropped after its single run.
pub struct ProcessingCommand {
    description: String,
    target: NodeId,
    visitor: Option<Box<dyn ProcessingVisitor>>,
    transcript: Transcript,
    executed: bool,
}

impl ProcessingCommand {
    pub fn new(target: NodeId, visitor: Box<dyn ProcessingVisitor>) -> Self {
        Self {
            description: visitor.name(),
            target,
            visitor: Some(visitor),
            transcript: Transcript::default(),
            executed: false,
        }
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }
}

impl Command for ProcessingCommand {
    fn redo(&mut self, canvas: &mut CanvasState) -> Result<()> {
        let Some(mut visitor) = self.visitor.take() else {
            return self.transcript.redo_all(canvas);
        };

        let mut transcript = Transcript::default();
        if let Err(e) = canvas.accept(self.target, visitor.as_mut(), &mut transcript) {
            log::warn!("'{}' failed, rolling back {} recorded steps: {}", self.description, transcript.len(), e);
            transcript.undo_all(canvas)?;
            self.visitor = Some(visitor);
            return Err(e);
        }
        log::debug!("'{}' recorded {} steps", self.description, transcript.len());
        self.transcript = transcript;
        self.executed = true;
        Ok(())
    }

    fn undo(&mut self, canvas: &mut CanvasState) -> Result<()> {
        debug_assert!(self.executed, "ProcessingCommand undone before its first redo");
        if !self.executed {
            return Err(CoreError::HistoryState(format!(
                "'{}' was undone before it was executed",
                self.description
            )));
        }
        self.transcript.undo_all(canvas)
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        self.transcript.memory_size()
    }
}
