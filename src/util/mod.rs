//! Utility modules

pub mod paths;

pub use paths::{data_dir, join_path_list, log_file_path, logs_dir, split_path_list};
