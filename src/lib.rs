pub mod blur;
pub mod camera3d;
pub mod cascades;
pub mod cli;
pub mod config;
pub mod file_watch;
pub mod gpu;
pub mod light_views;
pub mod renderer;

pub use cascades::{compute_cascades, Cascade, CascadeError, CascadeSettings, CascadeSplitter};
pub use renderer::{ShadowFrameInfo, ShadowRenderer};
