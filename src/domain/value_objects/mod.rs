pub mod session_scope;

pub use session_scope::SessionScope;
