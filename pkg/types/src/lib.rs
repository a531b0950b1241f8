pub mod config;
pub mod group;
pub mod pod;
pub mod quantity;
pub mod quota;
pub mod rbac;
pub mod resource;
pub mod user;
pub mod validate;
