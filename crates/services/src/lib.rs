pub mod auth;
pub mod files;
pub mod mutation;
pub mod registry;
pub mod rules;
pub mod settings;
