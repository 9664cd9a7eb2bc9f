use crate::layout::LayoutSpec;
use std::path::PathBuf;

/// Configuration for the live terminal display
#[derive(Clone)]
pub struct ShowConfig {
    pub layout: LayoutSpec,
    pub devices: Vec<PathBuf>,
    pub font: Option<PathBuf>,
    /// Seconds between checks for quit keys and resizes
    pub time_step: f32,
}

/// Configuration for rendering a single frame to an image file
#[derive(Clone)]
pub struct SnapshotConfig {
    pub layout: LayoutSpec,
    pub output: PathBuf,
    pub font: Option<PathBuf>,
    pub pressed: Vec<u16>,
    pub held: Vec<u16>,
}
