pub mod bulk;
pub mod cluster_error;
pub mod nodes;
pub mod server_info;
