pub mod draft_handlers;
pub mod health_handlers;
pub mod object_handlers;
pub mod pipeline_handlers;
