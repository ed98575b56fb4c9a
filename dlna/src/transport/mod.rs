pub mod description;
pub mod discovery;
pub mod soap;
pub mod ssdp;
