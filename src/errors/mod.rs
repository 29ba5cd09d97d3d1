pub mod types;

pub use types::{AppError, ManagerError, ProviderError};
