//! Tiled, sparse paint-device core: tile storage, colorspace-aware pixel
//! buffers, compositing, perspective transforms, undoable processing and a
//! bounded worker pool.
#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]

pub mod canvas;
pub mod colorspace;
pub mod components;
pub mod composite;
pub mod config;
pub mod error;
pub mod geometry;
pub mod io;
pub mod logger;
pub mod ops;
pub mod pixel;
pub mod pool;
pub mod project;

pub use canvas::{PaintDevice, TILE_SIZE, TileStore};
pub use colorspace::{ColorConverter, ColorSpace, ToneMapping};
pub use components::history::{Command, HistoryManager, SurrogateUndoStore, UndoAdapter};
pub use components::layers::{CanvasState, Node, NodeId, NodeKind};
pub use composite::{BlendMode, CompositeOp, composite};
pub use config::CoreConfig;
pub use error::{CoreError, OpStatus, Result};
pub use geometry::{PointF, Rect};
pub use ops::canvas_ops::CropVisitor;
pub use ops::interpolator::{BackwardInterpolator, ForwardInterpolator, Interpolator, Quad};
pub use ops::processing::{ProcessingCommand, ProcessingVisitor};
pub use ops::pyramid::ImagePyramid;
pub use ops::transform::PerspectiveTransformVisitor;
pub use pixel::PixelBuffer;
pub use pool::{CancellationToken, JobHandle, JobOutcome, WorkerPool};
pub use project::Project;
