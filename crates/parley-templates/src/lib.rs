pub mod error;
pub mod manager;
pub mod types;

pub use error::{Result, TemplateError};
pub use manager::{extract_variables, render_content, TemplateManager};
pub use types::{ApprovalStatus, Template};
