pub mod error;
pub mod id;
pub mod match_style;
pub mod publish_options;
pub mod roles;
pub mod types;
pub mod uri;
