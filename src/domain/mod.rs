pub mod entities;
pub mod value_objects;

pub use entities::{ChangeEvent, ChangeKind, DecodeError, MediaType, Photo, PhotoPatch, RawNotification};
pub use value_objects::SessionScope;
