pub mod files;
pub mod result;

pub use files::{extract_code_files, CodeFile, FileOperation};
pub use result::{clean_output_from_markers, extract_structured_result};
