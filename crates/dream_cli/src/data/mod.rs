mod loader;
mod writer;

pub use loader::{load_image, DataLoadError};
pub use writer::{save_preview, save_raw_tiff};
