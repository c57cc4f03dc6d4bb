pub mod current_user;

pub use current_user::{CurrentUser, current_user_middleware};
