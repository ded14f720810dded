mod background;
mod component;

pub use background::{BackgroundTask, TaskState};
pub use component::TaskComponent;
