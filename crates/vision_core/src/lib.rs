//! vision_core: shared detection types, detector interface, box geometry, preprocessing and overlay helpers.

pub mod boxes;
pub mod interfaces;
pub mod overlay;
pub mod preprocess;

pub mod prelude {
    pub use crate::boxes::{clip_xyxy, iou_xyxy};
    pub use crate::interfaces::*;
    pub use crate::overlay::*;
}
