pub mod child_path;
pub mod launch;
