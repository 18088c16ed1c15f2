pub mod local_launcher;
pub mod wrapper;

pub use local_launcher::LocalLauncher;
pub use wrapper::WrapRequest;
