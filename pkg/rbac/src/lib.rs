pub mod gateway;
pub mod policy;
pub mod templates;

pub use gateway::{BindingDescriptor, RbacGateway, RegistryRbacGateway};
pub use policy::{RoleGrant, RolePolicy};
pub use templates::{RoleTemplate, RoleTemplates};
