pub mod model;
pub mod postgres;
pub mod repo;

#[cfg(test)]
pub mod memory;

pub use model::{NewUser, PublicUser, User};
pub use repo::{StoreError, UserRepository};
