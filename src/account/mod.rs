/// Account management: credential storage, login, lockout, sessions
mod manager;

pub use manager::{AccountManager, LoginSuccess, NewAccount};
