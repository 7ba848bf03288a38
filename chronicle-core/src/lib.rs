mod client;

pub use client::{ApiErrorClass, DiskClient, DiskError, Resource, ResourceType, TransferLink};
