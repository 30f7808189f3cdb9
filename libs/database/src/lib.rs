pub mod grant;
pub mod permission_cache;
pub mod resource;
pub mod role_permission;
