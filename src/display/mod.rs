pub mod sink;
pub mod surface;
pub mod window;

pub use sink::render;
pub use surface::{DrawSurface, DrawTarget};
pub use window::{Sdl2Display, WindowSurface};
