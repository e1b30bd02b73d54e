mod build;
mod gc;
mod images;
mod run;

pub use build::{BuildArgs, cmd_build};
pub use gc::cmd_gc;
pub use images::{cmd_images, cmd_rmi};
pub use run::{RunArgs, cmd_run};
